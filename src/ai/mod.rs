//! AI Module
//!
//! Book descriptions and shelf recommendations backed by an OpenAI-compatible
//! chat-completions API. Without an API key, descriptions fall back to a
//! placeholder and suggestions report the feature as unavailable.

mod client;
mod handler;
pub mod prompt;
mod routes;

pub use client::LlmClient;
pub use routes::routes;
