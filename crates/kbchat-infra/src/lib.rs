//! Infrastructure layer for kbchat.
//!
//! Contains the implementation of the [`kbchat_core::backend::ChatBackend`]
//! port over the knowledge-base back-end's REST + SSE API, and the client
//! configuration loader.

pub mod config;
pub mod http;
