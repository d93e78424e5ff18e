//! HTTP adapter for the knowledge-base back-end.
//!
//! - `client` -- [`HttpChatBackend`], the [`ChatBackend`](kbchat_core::backend::ChatBackend) implementation
//! - `streaming` -- SSE response body to fragment stream
//! - `types` -- wire bodies and error mapping

pub mod client;
pub mod streaming;
pub mod types;

pub use client::HttpChatBackend;
pub use types::HealthReport;
