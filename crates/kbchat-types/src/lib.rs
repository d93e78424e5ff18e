//! Shared domain types for kbchat.
//!
//! This crate contains the types exchanged between the conversation core,
//! the HTTP backend adapter, and the CLI: sessions, messages, personas,
//! streaming phases and events, configuration, and error enums.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod persona;
pub mod session;
pub mod stream;
