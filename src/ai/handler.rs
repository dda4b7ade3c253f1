//! HTTP handlers for AI-assisted descriptions and book suggestions.

use axum::{extract::State, response::Response};
use serde::{Deserialize, Serialize};

use super::LlmClient;
use super::prompt::{self, ExternalBook, Suggestion};
use crate::api::{JsonBody, clean};
use crate::auth::CurrentUser;
use crate::catalog::Catalog;
use crate::error::{AiError, AppError};
use crate::handler::AppState;
use crate::success;

const DESCRIBE_MAX_TOKENS: u32 = 150;
const SUGGEST_MAX_TOKENS: u32 = 500;
const FALLBACK_MAX_TOKENS: u32 = 150;
const MAX_INPUTS: usize = 5;
const NO_DESCRIPTION: &str = "No description generated.";
const NOTHING_AVAILABLE: &str = "No books are currently available to suggest.";

#[derive(Debug, Default, Deserialize)]
pub struct DescribeRequest {
    pub title: Option<String>,
    pub author: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DescribeResponse {
    pub description: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SuggestRequest {
    #[serde(default)]
    pub inputs: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestResponse {
    pub suggestions: Vec<Suggestion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_suggested_book: Option<ExternalBook>,
}

pub async fn describe(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(payload): JsonBody<DescribeRequest>,
) -> Result<Response, AppError> {
    user.require_mutate()?;

    let (Some(title), Some(author)) = (clean(payload.title), clean(payload.author)) else {
        return Err(AppError::Validation("Title and author are required".to_string()));
    };
    let category = clean(payload.category);

    if !state.ai.is_configured() {
        return Ok(success(DescribeResponse {
            description: prompt::placeholder_description(&title, &author, category.as_deref()),
        }));
    }

    let text = state
        .ai
        .complete(
            &prompt::describe_prompt(&title, &author, category.as_deref()),
            DESCRIBE_MAX_TOKENS,
        )
        .await?;

    Ok(success(DescribeResponse {
        description: text.unwrap_or_else(|| NO_DESCRIPTION.to_string()),
    }))
}

fn validate_inputs(inputs: Vec<String>) -> Result<Vec<String>, AppError> {
    let inputs: Vec<String> = inputs.into_iter().map(|s| s.trim().to_string()).collect();
    if inputs.is_empty() {
        return Err(AppError::Validation("At least one input is required".to_string()));
    }
    if inputs.len() > MAX_INPUTS {
        return Err(AppError::Validation(format!("At most {MAX_INPUTS} inputs")));
    }
    Ok(inputs)
}

pub async fn suggest(
    State(state): State<AppState>,
    _user: CurrentUser,
    JsonBody(payload): JsonBody<SuggestRequest>,
) -> Result<Response, AppError> {
    let inputs = validate_inputs(payload.inputs)?;
    let books = Catalog::new(&state.db).available_books().await?;

    if books.is_empty() {
        let ai_suggested_book = if state.ai.is_configured() {
            fallback_book(&state.ai, &inputs, true).await
        } else {
            None
        };
        return Ok(success(SuggestResponse {
            suggestions: vec![],
            message: Some(NOTHING_AVAILABLE.to_string()),
            ai_suggested_book,
        }));
    }

    if !state.ai.is_configured() {
        return Err(AiError::NotConfigured.into());
    }

    let raw = state
        .ai
        .complete(&prompt::suggest_prompt(&inputs, &books), SUGGEST_MAX_TOKENS)
        .await?
        .unwrap_or_else(|| "[]".to_string());
    let suggestions = prompt::parse_suggestions(&raw, &books);

    let ai_suggested_book = if suggestions.is_empty() {
        fallback_book(&state.ai, &inputs, false).await
    } else {
        None
    };

    tracing::debug!(
        inputs = inputs.len(),
        candidates = books.len(),
        picks = suggestions.len(),
        fallback = ai_suggested_book.is_some(),
        "book suggestions generated"
    );

    Ok(success(SuggestResponse {
        suggestions,
        message: None,
        ai_suggested_book,
    }))
}

/// Best effort: any failure here just means no outside recommendation.
async fn fallback_book(ai: &LlmClient, inputs: &[String], library_empty: bool) -> Option<ExternalBook> {
    match ai
        .complete(&prompt::fallback_prompt(inputs, library_empty), FALLBACK_MAX_TOKENS)
        .await
    {
        Ok(Some(raw)) => prompt::parse_external_book(&raw),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(error = %e, "fallback book suggestion failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_inputs_bounds() {
        assert!(validate_inputs(vec![]).is_err());
        assert!(validate_inputs(vec!["a".into(); 6]).is_err());
        assert_eq!(
            validate_inputs(vec!["  space opera ".into()]).unwrap(),
            vec!["space opera".to_string()]
        );
    }

    #[test]
    fn test_suggest_response_omits_empty_fields() {
        let body = serde_json::to_value(SuggestResponse {
            suggestions: vec![],
            message: None,
            ai_suggested_book: None,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "suggestions": [] }));
    }
}
