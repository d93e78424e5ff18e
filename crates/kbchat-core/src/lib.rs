//! Streaming conversation session manager for kbchat.
//!
//! This crate defines the [`backend::ChatBackend`] port that the
//! infrastructure layer implements, and the components that keep a
//! multi-session streaming conversation consistent on top of it: the session
//! directory, the session detail cache, the per-session stream consumer, and
//! the conversation controller that composes them. It depends only on
//! `kbchat-types` -- never on `kbchat-infra` or any HTTP crate.

pub mod backend;
pub mod controller;
pub mod detail;
pub mod directory;
pub mod event;
pub mod stream;

#[cfg(test)]
pub(crate) mod testing;
