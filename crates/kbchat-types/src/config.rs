//! Client configuration types.
//!
//! `ClientConfig` represents the `config.toml` in the kbchat config
//! directory. Every field has a default so an empty or missing file is valid.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the kbchat client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the knowledge-base back-end (without the `/api` prefix).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Provider used when a session is created without one.
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Upper bound for a whole request, including a streamed reply.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Capacity of the conversation event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_event_capacity() -> usize {
    256
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            default_provider: default_provider(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            event_capacity: default_event_capacity(),
        }
    }
}
