//! Catalog Module
//!
//! Books, their loans and patron requests for new titles.
//!
//! # Features
//!
//! - CRUD operations for books, with search, status filter and sort
//! - Checkout / checkin transitions guarded by the one-active-loan rule
//! - Stats, overdue report and per-borrower loan history
//! - Ready-to-use HTTP handlers and routes
//!
//! # Usage
//!
//! ```rust,ignore
//! use libris::catalog;
//!
//! let app = Router::new()
//!     .merge(catalog::routes())
//!     .with_state(app_state);
//!
//! let lib = catalog::Catalog::new(&db);
//! let entry = lib.checkout(book_id, loan, Utc::now()).await?;
//! ```

mod handler;
pub mod input;
mod lib;
mod routes;

pub use lib::*;
pub use routes::routes;
