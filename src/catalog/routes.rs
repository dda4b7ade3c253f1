use axum::{
    Router,
    routing::{get, post},
};

use super::handler;
use crate::handler::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/books", get(handler::list_books).post(handler::create_book))
        .route(
            "/books/suggestions",
            get(handler::list_suggestions).post(handler::create_suggestion),
        )
        .route(
            "/books/:id",
            get(handler::get_book)
                .put(handler::update_book)
                .delete(handler::delete_book),
        )
        .route("/books/:id/checkout", post(handler::checkout))
        .route("/books/:id/checkin", post(handler::checkin))
        .route("/stats", get(handler::stats))
        .route("/loans/overdue", get(handler::overdue_loans))
        .route("/loans/mine", get(handler::my_loans))
}
