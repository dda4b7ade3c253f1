//! Prompt text for the assistant and parsing of its replies.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

use crate::model::Book;

pub const MAX_SUGGESTIONS: usize = 5;
const DESCRIPTION_EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedBook {
    pub id: i32,
    pub title: String,
    pub author: String,
    pub category: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Suggestion {
    pub book: SuggestedBook,
    pub reason: String,
}

/// A real-world title proposed when nothing on the shelf fits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExternalBook {
    pub title: String,
    pub author: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

pub fn describe_prompt(title: &str, author: &str, category: Option<&str>) -> String {
    let category = match category {
        Some(c) => format!(". Category: {c}."),
        None => ".".to_string(),
    };
    format!(
        "Write a short book description in 2 to 4 sentences. Book: \"{title}\" by {author}{category} Do not use markdown or quotes."
    )
}

/// Offline stand-in used when no API key is configured.
pub fn placeholder_description(title: &str, author: &str, category: Option<&str>) -> String {
    let genre = match category {
        Some(c) => format!(" is a work in the {c} genre."),
        None => ".".to_string(),
    };
    format!("\"{title}\" by {author}{genre} This book is part of the library collection.")
}

pub fn suggest_prompt(inputs: &[String], books: &[Book]) -> String {
    let book_list = books
        .iter()
        .map(|b| {
            let mut line = format!("- id: \"{}\" | title: \"{}\" | author: {}", b.id, b.title, b.author);
            if let Some(category) = &b.category {
                line.push_str(&format!(" | category: {category}"));
            }
            if let Some(description) = &b.description {
                line.push_str(&format!(" | description: {}", excerpt(description, DESCRIPTION_EXCERPT_CHARS)));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are a library assistant. The user is looking for a book. Their preferences or hints (what they said): {prefs}

Available books (only suggest from this list; only these are in stock):
{book_list}

Respond with a JSON array of up to {MAX_SUGGESTIONS} book recommendations, most relevant first. Each item must have exactly: "bookId" (use the id from the list above) and "reason" (one short sentence why it matches). If nothing fits well, return an empty array [].
Example: [{{"bookId":"12","reason":"Matches your interest in sci-fi."}}]
Output only the JSON array, no other text."#,
        prefs = inputs.join("; "),
    )
}

pub fn fallback_prompt(inputs: &[String], library_empty: bool) -> String {
    let situation = if library_empty {
        "We have no books in our library yet."
    } else {
        "We have no matching books in our library."
    };
    format!(
        r#"The user is looking for a book. Their preferences: {prefs}. {situation} Suggest one real, published book that would fit their request (title and author). Reply with only a JSON object: {{"title": "Book Title", "author": "Author Name", "category": "Genre or category"}}. Category is optional (e.g. Fiction, Sci-Fi). Output only the JSON object, no other text."#,
        prefs = inputs.join("; "),
    )
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{cut}…")
    }
}

/// Removes a surrounding ```json fence, if the model added one.
pub fn strip_code_fence(raw: &str) -> &str {
    let mut s = raw.trim();
    if let Some(rest) = s.strip_prefix("```json").or_else(|| s.strip_prefix("```")) {
        s = rest.trim_start();
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest.trim_end();
    }
    s
}

/// Keeps well-formed picks that name a book from `books`, in reply order, at most five.
pub fn parse_suggestions(raw: &str, books: &[Book]) -> Vec<Suggestion> {
    let items = match serde_json::from_str::<JsonValue>(strip_code_fence(raw)) {
        Ok(JsonValue::Array(items)) => items,
        Ok(_) => return vec![],
        Err(e) => {
            tracing::warn!(error = %e, "AI returned invalid JSON for suggestions");
            return vec![];
        }
    };

    let by_id: HashMap<i32, &Book> = books.iter().map(|b| (b.id, b)).collect();

    items
        .iter()
        .filter_map(|item| {
            let book_id = match item.get("bookId")? {
                JsonValue::String(s) => s.trim().parse::<i32>().ok()?,
                JsonValue::Number(n) => i32::try_from(n.as_i64()?).ok()?,
                _ => return None,
            };
            let reason = item.get("reason")?.as_str()?;
            let book = by_id.get(&book_id)?;
            Some(Suggestion {
                book: SuggestedBook {
                    id: book.id,
                    title: book.title.clone(),
                    author: book.author.clone(),
                    category: book.category.clone(),
                    description: book.description.clone(),
                },
                reason: reason.to_string(),
            })
        })
        .take(MAX_SUGGESTIONS)
        .collect()
}

pub fn parse_external_book(raw: &str) -> Option<ExternalBook> {
    let value: JsonValue = serde_json::from_str(strip_code_fence(raw)).ok()?;
    let title = value.get("title")?.as_str()?.trim().to_string();
    let author = value.get("author")?.as_str()?.trim().to_string();
    let category = value
        .get("category")
        .and_then(JsonValue::as_str)
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty());

    Some(ExternalBook { title, author, category })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn book(id: i32, title: &str) -> Book {
        Book {
            id,
            title: title.into(),
            author: "Author".into(),
            isbn: None,
            category: Some("Fiction".into()),
            published_year: None,
            description: Some("x".repeat(250)),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_placeholder_description() {
        assert_eq!(
            placeholder_description("Dune", "Frank Herbert", Some("Science Fiction")),
            "\"Dune\" by Frank Herbert is a work in the Science Fiction genre. This book is part of the library collection."
        );
        assert_eq!(
            placeholder_description("Dune", "Frank Herbert", None),
            "\"Dune\" by Frank Herbert. This book is part of the library collection."
        );
    }

    #[test]
    fn test_suggest_prompt_truncates_descriptions() {
        let prompt = suggest_prompt(&["space".into(), "politics".into()], &[book(7, "Dune")]);
        assert!(prompt.contains("space; politics"));
        assert!(prompt.contains("- id: \"7\" | title: \"Dune\" | author: Author | category: Fiction"));
        assert!(prompt.contains(&format!("{}…", "x".repeat(200))));
        assert!(!prompt.contains(&"x".repeat(201)));
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fence("  [] "), "[]");
    }

    #[test]
    fn test_parse_suggestions_filters_unknown_ids() {
        let books = vec![book(1, "Dune"), book(2, "Emma")];
        let raw = r#"```json
[{"bookId":"2","reason":"Romance"},{"bookId":"99","reason":"Made up"},{"bookId":1},{"bookId":1,"reason":"Desert"}]
```"#;
        let picks = parse_suggestions(raw, &books);
        let ids: Vec<i32> = picks.iter().map(|s| s.book.id).collect();
        assert_eq!(ids, vec![2, 1]);
        assert_eq!(picks[0].reason, "Romance");
    }

    #[test]
    fn test_parse_suggestions_caps_at_five() {
        let books: Vec<Book> = (1..=8).map(|i| book(i, "T")).collect();
        let raw = serde_json::to_string(
            &(1..=8)
                .map(|i| serde_json::json!({ "bookId": i.to_string(), "reason": "r" }))
                .collect::<Vec<_>>(),
        )
        .unwrap();
        assert_eq!(parse_suggestions(&raw, &books).len(), MAX_SUGGESTIONS);
    }

    #[test]
    fn test_parse_suggestions_tolerates_garbage() {
        let books = vec![book(1, "Dune")];
        assert!(parse_suggestions("I think you'd like Dune", &books).is_empty());
        assert!(parse_suggestions(r#"{"bookId":"1"}"#, &books).is_empty());
    }

    #[test]
    fn test_parse_external_book() {
        let parsed = parse_external_book(r#"```json
{"title": " Piranesi ", "author": "Susanna Clarke", "category": ""}
```"#)
        .unwrap();
        assert_eq!(parsed.title, "Piranesi");
        assert_eq!(parsed.category, None);
        assert!(parse_external_book(r#"{"title": "No author"}"#).is_none());
    }
}
