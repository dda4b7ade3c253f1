use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use chrono::{Duration, Utc};
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::Accounts;
use crate::config::Auth;
use crate::error::AppError;
use crate::handler::AppState;
use crate::model::{Loan, Role};

pub const SESSION_COOKIE: &str = "libris_session";

#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Lowercased emails that are always promoted to ADMIN.
    pub admin_emails: Vec<String>,
    pub session_ttl: Duration,
}

impl AuthSettings {
    pub fn from_config(cfg: &Auth) -> Self {
        AuthSettings {
            admin_emails: cfg.normalized_admin_emails(),
            session_ttl: Duration::days(cfg.session_ttl_days.max(1)),
        }
    }

    pub fn is_admin_email(&self, email: &str) -> bool {
        let email = email.trim().to_lowercase();
        self.admin_emails.iter().any(|e| *e == email)
    }
}

/// A fresh opaque session token: 32 random bytes, hex encoded.
pub fn generate_token() -> String {
    let mut buf = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Only this digest is persisted.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Reads the token from `Authorization: Bearer` or, failing that, the session cookie.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION).and_then(|h| h.to_str().ok()) {
        if let Some(token) = value.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// The signed-in user, resolved once per request from the session token.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
    pub id: i32,
    pub name: Option<String>,
    pub email: String,
    pub role: Role,
}

impl CurrentUser {
    pub fn can_mutate(&self) -> bool {
        self.role.can_mutate()
    }

    pub fn require_mutate(&self) -> Result<(), AppError> {
        if self.can_mutate() {
            Ok(())
        } else {
            Err(AppError::Forbidden("Librarian or admin access required".to_string()))
        }
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.role == Role::Admin {
            Ok(())
        } else {
            Err(AppError::Forbidden("Admin access required".to_string()))
        }
    }

    /// Whether this user is the borrower on `loan`, by trimmed, case-insensitive email.
    pub fn is_borrower_of(&self, loan: &Loan) -> bool {
        match &loan.borrower_email {
            Some(borrower) => {
                let borrower = borrower.trim();
                !borrower.is_empty() && borrower.eq_ignore_ascii_case(self.email.trim())
            }
            None => false,
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers).ok_or(AppError::Unauthenticated)?;

        Accounts::new(&state.db)
            .resolve_session(&token, &state.auth, Utc::now())
            .await
            .map_err(|e| AppError::internal("failed to resolve session", e))?
            .ok_or(AppError::Unauthenticated)
    }
}
