use axum::extract::{FromRequest, FromRequestParts};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::AppError;

/// `axum::Json` with rejections reported as a 400 `{"error"}` body.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct JsonBody<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct PathParam<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct QueryParam<T>(pub T);

#[derive(Debug, Deserialize, Default)]
pub struct QueryParams {
    pub query: Option<String>,
    pub status: Option<String>,
    pub sort: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    Available,
    Borrowed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Title,
    Author,
    Newest,
    Oldest,
}

impl SortOrder {
    pub fn order_by(&self) -> &'static str {
        match self {
            SortOrder::Title => "books.title COLLATE NOCASE ASC, books.id ASC",
            SortOrder::Author => "books.author COLLATE NOCASE ASC, books.title COLLATE NOCASE ASC, books.id ASC",
            SortOrder::Newest => "books.created_at DESC, books.id DESC",
            SortOrder::Oldest => "books.created_at ASC, books.id ASC",
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct HandlerParams {
    pub query: Option<String>,
    pub status: StatusFilter,
    pub sort: SortOrder,
}

impl QueryParams {
    pub fn into_handler_params(self) -> Result<HandlerParams, String> {
        let status = match self.status.as_deref().map(|s| s.trim().to_uppercase()) {
            None => StatusFilter::All,
            Some(s) => match s.as_str() {
                "" | "ALL" => StatusFilter::All,
                "AVAILABLE" => StatusFilter::Available,
                "BORROWED" => StatusFilter::Borrowed,
                _ => return Err("Invalid status; use ALL, AVAILABLE, or BORROWED".to_string()),
            },
        };

        let sort = match self.sort.as_deref().map(str::trim) {
            None | Some("") | Some("title") => SortOrder::Title,
            Some("author") => SortOrder::Author,
            Some("newest") => SortOrder::Newest,
            Some("oldest") => SortOrder::Oldest,
            Some(_) => return Err("Invalid sort; use title, author, newest, or oldest".to_string()),
        };

        let query = self
            .query
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty());

        Ok(HandlerParams { query, status, sort })
    }
}

/// Envelope used by list endpoints that return records other than books.
#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub data: T,
}

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
pub fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Trims a free-text field, treating blank input as absent.
pub fn clean(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
