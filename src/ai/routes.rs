use axum::{Router, routing::post};

use super::handler;
use crate::handler::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/ai/describe", post(handler::describe))
        .route("/ai/suggest", post(handler::suggest))
}
