//! HTTP handlers for books, circulation and patron requests.

use axum::{extract::State, response::Response};
use chrono::Utc;
use serde::Deserialize;

use super::input::{CheckoutRequest, CreateBook, UpdateBook};
use super::{Catalog, NewSuggestion};
use crate::api::{DataResponse, JsonBody, PathParam, QueryParam, QueryParams, clean};
use crate::auth::CurrentUser;
use crate::error::{AppError, CatalogError};
use crate::handler::AppState;
use crate::status::{active_loan, book_detail_view, book_view};
use crate::{created, no_content, success};

pub async fn list_books(State(state): State<AppState>, QueryParam(qp): QueryParam<QueryParams>) -> Result<Response, AppError> {
    let hp = qp.into_handler_params().map_err(AppError::Validation)?;
    let books = Catalog::new(&state.db).list_books(&hp).await?;

    tracing::debug!(count = books.len(), "listed books");
    Ok(success(books.iter().map(book_view).collect::<Vec<_>>()))
}

pub async fn get_book(State(state): State<AppState>, PathParam(id): PathParam<i32>) -> Result<Response, AppError> {
    let entry = Catalog::new(&state.db)
        .get_book(id)
        .await?
        .ok_or(CatalogError::BookNotFound)?;

    Ok(success(book_detail_view(&entry)))
}

pub async fn create_book(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(payload): JsonBody<CreateBook>,
) -> Result<Response, AppError> {
    user.require_mutate()?;
    let input = payload.validate().map_err(AppError::Validation)?;

    let entry = Catalog::new(&state.db).create_book(input).await?;
    tracing::info!(book_id = entry.book.id, user_id = user.id, "book created");

    Ok(created(book_view(&entry)))
}

pub async fn update_book(
    State(state): State<AppState>,
    user: CurrentUser,
    PathParam(id): PathParam<i32>,
    body: Result<JsonBody<UpdateBook>, AppError>,
) -> Result<Response, AppError> {
    user.require_mutate()?;
    let catalog = Catalog::new(&state.db);
    if catalog.get_book(id).await?.is_none() {
        return Err(CatalogError::BookNotFound.into());
    }
    let JsonBody(payload) = body?;
    let changes = payload.validate().map_err(AppError::Validation)?;

    let entry = catalog.update_book(id, changes).await?;
    tracing::info!(book_id = id, user_id = user.id, "book updated");

    Ok(success(book_view(&entry)))
}

pub async fn delete_book(
    State(state): State<AppState>,
    user: CurrentUser,
    PathParam(id): PathParam<i32>,
) -> Result<Response, AppError> {
    user.require_mutate()?;
    Catalog::new(&state.db).delete_book(id).await?;
    tracing::info!(book_id = id, user_id = user.id, "book deleted");

    Ok(no_content())
}

pub async fn checkout(
    State(state): State<AppState>,
    user: CurrentUser,
    PathParam(id): PathParam<i32>,
    body: Result<JsonBody<CheckoutRequest>, AppError>,
) -> Result<Response, AppError> {
    user.require_mutate()?;
    let catalog = Catalog::new(&state.db);

    let entry = catalog.get_book(id).await?.ok_or(CatalogError::BookNotFound)?;
    if active_loan(&entry.loans).is_some() {
        return Err(CatalogError::AlreadyBorrowed.into());
    }
    let JsonBody(payload) = body?;
    let loan = payload.validate().map_err(AppError::Validation)?;

    let entry = catalog.checkout(id, loan, Utc::now()).await?;
    Ok(success(book_view(&entry)))
}

pub async fn checkin(
    State(state): State<AppState>,
    user: CurrentUser,
    PathParam(id): PathParam<i32>,
) -> Result<Response, AppError> {
    let catalog = Catalog::new(&state.db);

    let entry = catalog.get_book(id).await?.ok_or(CatalogError::BookNotFound)?;
    let active = active_loan(&entry.loans).ok_or(CatalogError::NotBorrowed)?;
    if !user.can_mutate() && !user.is_borrower_of(active) {
        return Err(AppError::Forbidden(
            "Only librarians, admins or the borrower can return this book".to_string(),
        ));
    }

    let entry = catalog.checkin(id, Utc::now()).await?;
    Ok(success(book_view(&entry)))
}

pub async fn stats(State(state): State<AppState>) -> Result<Response, AppError> {
    let stats = Catalog::new(&state.db).stats(Utc::now()).await?;
    Ok(success(stats))
}

pub async fn overdue_loans(State(state): State<AppState>, user: CurrentUser) -> Result<Response, AppError> {
    user.require_mutate()?;
    let loans = Catalog::new(&state.db).overdue_loans(Utc::now()).await?;
    Ok(success(DataResponse { data: loans }))
}

pub async fn my_loans(State(state): State<AppState>, user: CurrentUser) -> Result<Response, AppError> {
    let loans = Catalog::new(&state.db)
        .loans_for_borrower(&user.email, Utc::now())
        .await?;
    Ok(success(DataResponse { data: loans }))
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSuggestionRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    pub category: Option<String>,
    pub notes: Option<String>,
}

pub async fn list_suggestions(State(state): State<AppState>) -> Result<Response, AppError> {
    let suggestions = Catalog::new(&state.db).list_suggestions().await?;
    Ok(success(DataResponse { data: suggestions }))
}

pub async fn create_suggestion(
    State(state): State<AppState>,
    user: CurrentUser,
    JsonBody(payload): JsonBody<CreateSuggestionRequest>,
) -> Result<Response, AppError> {
    let mut problems = Vec::new();
    let title = payload.title.trim().to_string();
    if title.is_empty() {
        problems.push("Title is required");
    }
    let author = payload.author.trim().to_string();
    if author.is_empty() {
        problems.push("Author is required");
    }
    if !problems.is_empty() {
        return Err(AppError::Validation(problems.join("; ")));
    }

    let suggestion = Catalog::new(&state.db)
        .create_suggestion(NewSuggestion {
            title,
            author,
            category: clean(payload.category),
            notes: clean(payload.notes),
        })
        .await?;
    tracing::info!(suggestion_id = suggestion.id, user_id = user.id, "book suggestion added");

    Ok(created(DataResponse { data: suggestion }))
}
