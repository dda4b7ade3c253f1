use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::unpack_error;

/// Outcomes of catalog operations that are not plain successes.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Book not found")]
    BookNotFound,
    #[error("Book is already borrowed")]
    AlreadyBorrowed,
    #[error("No active loan for this book")]
    NotBorrowed,
    #[error("A book with this ISBN already exists")]
    DuplicateIsbn,
    #[error("database error")]
    Database(#[from] libsql::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CatalogError {
    /// Maps a unique-constraint failure on insert/update to the domain error it stands for.
    pub fn from_constraint(err: libsql::Error) -> Self {
        let msg = err.to_string();
        if msg.contains("UNIQUE constraint failed: books.isbn") {
            CatalogError::DuplicateIsbn
        } else if msg.contains("UNIQUE constraint failed: loans.book_id") {
            CatalogError::AlreadyBorrowed
        } else {
            CatalogError::Database(err)
        }
    }
}

#[derive(Debug, Error)]
pub enum AiError {
    #[error("AI suggestions are not configured")]
    NotConfigured,
    #[error("request to AI backend failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("AI backend returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("Sign in required")]
    Unauthenticated,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("AI service error")]
    Upstream(#[source] AiError),
    #[error("{0}")]
    Unavailable(String),
    #[error("{context}")]
    Internal {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl AppError {
    pub fn internal(context: &str, source: impl Into<anyhow::Error>) -> Self {
        let source: anyhow::Error = source.into();
        AppError::Internal {
            context: context.to_string(),
            source: source.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        use AppError::*;
        match self {
            Validation(_) => StatusCode::BAD_REQUEST,
            Unauthenticated => StatusCode::UNAUTHORIZED,
            Forbidden(_) => StatusCode::FORBIDDEN,
            NotFound(_) => StatusCode::NOT_FOUND,
            Conflict(_) => StatusCode::CONFLICT,
            Upstream(_) => StatusCode::BAD_GATEWAY,
            Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        use CatalogError::*;
        match err {
            BookNotFound => AppError::NotFound(err.to_string()),
            AlreadyBorrowed | NotBorrowed | DuplicateIsbn => AppError::Conflict(err.to_string()),
            Database(e) => AppError::internal("database error", e),
            Other(e) => AppError::internal("internal error", e),
        }
    }
}

impl From<AiError> for AppError {
    fn from(err: AiError) -> Self {
        match err {
            AiError::NotConfigured => AppError::Unavailable(
                "AI suggestions are not configured; set ai.api_key to enable them".to_string(),
            ),
            other => AppError::Upstream(other),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            AppError::Internal { .. } | AppError::Upstream(_) => {
                tracing::error!(error = %unpack_error(&self), status = status.as_u16(), "request failed");
            }
            _ => {
                tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
            }
        }

        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_errors_map_to_http_taxonomy() {
        assert_eq!(AppError::from(CatalogError::BookNotFound).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::from(CatalogError::AlreadyBorrowed).status(), StatusCode::CONFLICT);
        assert_eq!(AppError::from(CatalogError::NotBorrowed).status(), StatusCode::CONFLICT);
        assert_eq!(AppError::from(CatalogError::DuplicateIsbn).status(), StatusCode::CONFLICT);
        assert_eq!(
            AppError::from(CatalogError::Other(anyhow::anyhow!("boom"))).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_ai_not_configured_is_unavailable() {
        assert_eq!(AppError::from(AiError::NotConfigured).status(), StatusCode::SERVICE_UNAVAILABLE);
        let upstream = AppError::from(AiError::Status {
            status: 500,
            body: "oops".into(),
        });
        assert_eq!(upstream.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(upstream.to_string(), "AI service error");
    }

    #[test]
    fn test_internal_error_keeps_source_chain() {
        let err = AppError::internal("failed to list books", anyhow::anyhow!("disk full"));
        assert_eq!(unpack_error(&err), "failed to list books: disk full");
    }
}
