//! Sessions, roles and user administration.
//!
//! Sessions are opaque bearer tokens issued out-of-band (see the
//! `issue-session` command). Only a SHA-256 digest of each token is stored.
//! Handlers take a [`CurrentUser`] argument to require a signed-in caller and
//! then check the role they need:
//!
//! ```rust,ignore
//! pub async fn handler(user: CurrentUser) -> Result<Response, AppError> {
//!     user.require_mutate()?;
//!     // ...
//! }
//! ```

mod handler;
mod lib;
mod routes;
mod session;

pub use lib::*;
pub use routes::routes;
pub use session::{AuthSettings, CurrentUser, SESSION_COOKIE, generate_token, hash_token, session_token};
