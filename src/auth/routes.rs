use axum::{
    Router,
    routing::{get, patch},
};

use super::handler;
use crate::handler::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/me", get(handler::me))
        .route("/users", get(handler::list_users))
        .route("/users/:id", patch(handler::update_user_role).delete(handler::delete_user))
}
