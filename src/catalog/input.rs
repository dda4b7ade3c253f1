//! Request bodies for the catalog endpoints and their validation.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::api::{clean, nullable};

const MAX_PUBLISHED_YEAR: i64 = 2100;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBook {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    pub isbn: Option<String>,
    pub category: Option<String>,
    pub published_year: Option<JsonValue>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewBook {
    pub title: String,
    pub author: String,
    pub isbn: Option<String>,
    pub category: Option<String>,
    pub published_year: Option<i32>,
    pub description: Option<String>,
}

impl CreateBook {
    pub fn validate(self) -> Result<NewBook, String> {
        let mut problems = Vec::new();

        let title = self.title.trim().to_string();
        if title.is_empty() {
            problems.push("Title is required".to_string());
        }
        let author = self.author.trim().to_string();
        if author.is_empty() {
            problems.push("Author is required".to_string());
        }
        let published_year = match coerce_year(self.published_year.as_ref()) {
            Ok(year) => year,
            Err(e) => {
                problems.push(e);
                None
            }
        };

        if !problems.is_empty() {
            return Err(problems.join("; "));
        }

        Ok(NewBook {
            title,
            author,
            isbn: clean(self.isbn),
            category: clean(self.category),
            published_year,
            description: clean(self.description),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBook {
    #[serde(default, deserialize_with = "nullable")]
    pub title: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub author: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub isbn: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub category: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub published_year: Option<Option<JsonValue>>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
}

/// Fields to change; `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookChanges {
    pub title: Option<String>,
    pub author: Option<String>,
    pub isbn: Option<Option<String>>,
    pub category: Option<Option<String>>,
    pub published_year: Option<Option<i32>>,
    pub description: Option<Option<String>>,
}

impl BookChanges {
    pub fn is_empty(&self) -> bool {
        *self == BookChanges::default()
    }
}

impl UpdateBook {
    pub fn validate(self) -> Result<BookChanges, String> {
        let mut problems = Vec::new();

        let title = match self.title {
            None => None,
            Some(v) => match clean(v) {
                Some(t) => Some(t),
                None => {
                    problems.push("Title cannot be empty".to_string());
                    None
                }
            },
        };
        let author = match self.author {
            None => None,
            Some(v) => match clean(v) {
                Some(a) => Some(a),
                None => {
                    problems.push("Author cannot be empty".to_string());
                    None
                }
            },
        };
        let published_year = match self.published_year {
            None => None,
            Some(v) => match coerce_year(v.as_ref()) {
                Ok(year) => Some(year),
                Err(e) => {
                    problems.push(e);
                    None
                }
            },
        };

        if !problems.is_empty() {
            return Err(problems.join("; "));
        }

        Ok(BookChanges {
            title,
            author,
            isbn: self.isbn.map(clean),
            category: self.category.map(clean),
            published_year,
            description: self.description.map(clean),
        })
    }
}

/// Accepts a year as a JSON number or a numeric string.
fn coerce_year(value: Option<&JsonValue>) -> Result<Option<i32>, String> {
    let year = match value {
        None | Some(JsonValue::Null) => return Ok(None),
        Some(JsonValue::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(JsonValue::String(s)) => s.trim().parse::<f64>().ok(),
        Some(JsonValue::Number(n)) => n.as_f64(),
        Some(_) => None,
    };

    match year {
        Some(y) if y.fract() == 0.0 && (1.0..=MAX_PUBLISHED_YEAR as f64).contains(&y) => Ok(Some(y as i32)),
        Some(y) if y.fract() == 0.0 => Err(format!("Published year must be between 1 and {MAX_PUBLISHED_YEAR}")),
        _ => Err("Published year must be a whole number".to_string()),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(default)]
    pub borrower_name: String,
    pub borrower_email: Option<String>,
    pub borrower_phone: Option<String>,
    pub due_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewLoan {
    pub borrower_name: String,
    pub borrower_email: Option<String>,
    pub borrower_phone: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
}

impl CheckoutRequest {
    pub fn validate(self) -> Result<NewLoan, String> {
        let mut problems = Vec::new();

        let borrower_name = self.borrower_name.trim().to_string();
        if borrower_name.is_empty() {
            problems.push("Borrower name is required".to_string());
        }

        let borrower_email = clean(self.borrower_email);
        if let Some(email) = &borrower_email {
            if !looks_like_email(email) {
                problems.push("Enter a valid email (e.g. name@example.com)".to_string());
            }
        }

        let borrower_phone = clean(self.borrower_phone);
        if let Some(phone) = &borrower_phone {
            if let Err(e) = check_phone(phone) {
                problems.push(e);
            }
        }

        let due_at = match clean(self.due_at) {
            None => None,
            Some(raw) => match parse_due_at(&raw) {
                Some(due) => Some(due),
                None => {
                    problems.push("Due date must be a date (YYYY-MM-DD) or an RFC 3339 timestamp".to_string());
                    None
                }
            },
        };

        if !problems.is_empty() {
            return Err(problems.join("; "));
        }

        Ok(NewLoan {
            borrower_name,
            borrower_email,
            borrower_phone,
            due_at,
        })
    }
}

/// `local@domain.tld` with no whitespace and a single `@`.
fn looks_like_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

fn check_phone(phone: &str) -> Result<(), String> {
    let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
    if digits < 10 {
        return Err("Enter at least 10 digits (e.g. +1 234 567 8900)".to_string());
    }
    let body = phone.strip_prefix('+').unwrap_or(phone);
    let allowed = |c: char| c.is_ascii_digit() || matches!(c, ' ' | '-' | '(' | ')' | '.');
    if body.chars().all(allowed) {
        Ok(())
    } else {
        Err("Enter a valid phone (digits, spaces, dashes, or +1…)".to_string())
    }
}

/// A bare date means midnight UTC on that day.
pub fn parse_due_at(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
}
