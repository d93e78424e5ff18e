//! Application state wiring the conversation controller to the HTTP backend.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;

use kbchat_core::controller::{ControllerConfig, ConversationController};
use kbchat_infra::config::{load_client_config, resolve_config_dir};
use kbchat_infra::http::HttpChatBackend;
use kbchat_types::config::ClientConfig;

pub type ConcreteController = ConversationController<HttpChatBackend>;

/// Shared application state used by every command.
#[derive(Clone)]
pub struct AppState {
    pub controller: ConcreteController,
    pub backend: Arc<HttpChatBackend>,
    pub config: ClientConfig,
    pub config_dir: PathBuf,
}

impl AppState {
    /// Load config (with CLI overrides applied) and wire the controller.
    pub async fn init(base_url: Option<String>) -> anyhow::Result<Self> {
        let config_dir = resolve_config_dir();
        let mut config = load_client_config(&config_dir).await;
        if let Some(base_url) = base_url {
            config.base_url = base_url;
        }

        let backend = Arc::new(
            HttpChatBackend::new(&config).context("Failed to initialize HTTP client")?,
        );
        let controller = ConversationController::new(
            Arc::clone(&backend),
            ControllerConfig::from(&config),
        );

        tracing::debug!(
            base_url = %config.base_url,
            config_dir = %config_dir.display(),
            "Application state initialized"
        );

        Ok(Self {
            controller,
            backend,
            config,
            config_dir,
        })
    }
}
