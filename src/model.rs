use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: i32,
    pub title: String,
    pub author: String,
    pub isbn: Option<String>,
    pub category: Option<String>,
    pub published_year: Option<i32>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Loan {
    pub id: i32,
    pub book_id: i32,
    pub borrower_name: String,
    pub borrower_email: Option<String>,
    pub borrower_phone: Option<String>,
    pub borrowed_at: DateTime<Utc>,
    pub due_at: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
}

impl Loan {
    pub fn is_active(&self) -> bool {
        self.returned_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BookStatus {
    Available,
    Borrowed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Member,
    Librarian,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Member => "MEMBER",
            Role::Librarian => "LIBRARIAN",
            Role::Admin => "ADMIN",
        }
    }

    /// Librarians and admins may edit the catalog and manage checkouts.
    pub fn can_mutate(&self) -> bool {
        matches!(self, Role::Librarian | Role::Admin)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "MEMBER" => Ok(Role::Member),
            "LIBRARIAN" => Ok(Role::Librarian),
            "ADMIN" => Ok(Role::Admin),
            other => Err(format!("unknown role {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i32,
    pub name: Option<String>,
    pub email: String,
    pub image: Option<String>,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSuggestion {
    pub id: i32,
    pub title: String,
    pub author: String,
    pub category: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A book together with every loan recorded against it.
#[derive(Debug, Clone)]
pub struct BookWithLoans {
    pub book: Book,
    pub loans: Vec<Loan>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveLoanInfo {
    pub borrower_name: String,
    pub borrower_email: Option<String>,
    pub borrower_phone: Option<String>,
    pub borrowed_at: DateTime<Utc>,
    pub due_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookView {
    #[serde(flatten)]
    pub book: Book,
    pub status: BookStatus,
    pub active_loan: Option<ActiveLoanInfo>,
    pub overdue: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanHistoryEntry {
    pub id: i32,
    pub borrower_name: String,
    pub borrower_email: Option<String>,
    pub borrower_phone: Option<String>,
    pub borrowed_at: DateTime<Utc>,
    pub due_at: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookDetailView {
    #[serde(flatten)]
    pub view: BookView,
    pub loan_history: Vec<LoanHistoryEntry>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
pub struct Stats {
    pub total: i32,
    pub available: i32,
    pub borrowed: i32,
    pub overdue: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverdueLoan {
    pub id: i32,
    pub book_id: i32,
    pub book_title: String,
    pub borrower_name: String,
    pub borrower_email: Option<String>,
    pub borrower_phone: Option<String>,
    pub borrowed_at: DateTime<Utc>,
    pub due_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BorrowerLoan {
    pub id: i32,
    pub book_id: i32,
    pub book_title: String,
    pub borrower_name: String,
    pub borrowed_at: DateTime<Utc>,
    pub due_at: Option<DateTime<Utc>>,
    pub returned_at: Option<DateTime<Utc>>,
    pub overdue: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parses_case_insensitively() {
        assert_eq!(" librarian ".parse::<Role>(), Ok(Role::Librarian));
        assert_eq!("ADMIN".parse::<Role>(), Ok(Role::Admin));
        assert!("owner".parse::<Role>().is_err());
        assert!(Role::Librarian.can_mutate());
        assert!(!Role::Member.can_mutate());
    }
}
