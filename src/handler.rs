use std::sync::Arc;

use axum::{Json, Router, response::IntoResponse, routing::get};
use serde_json::json;
use tracing::info;

use crate::ai::{self, LlmClient};
use crate::auth::{self, AuthSettings};
use crate::catalog;
use crate::db::Database;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub ai: Arc<LlmClient>,
    pub auth: Arc<AuthSettings>,
}

pub async fn healthcheck() -> impl IntoResponse {
    info!("got healthcheck request");
    Json(json!({ "status": "ok" }))
}

/// Every endpoint of the service, without transport layers.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(healthcheck))
        .merge(catalog::routes())
        .merge(auth::routes())
        .merge(ai::routes())
        .with_state(state)
}
