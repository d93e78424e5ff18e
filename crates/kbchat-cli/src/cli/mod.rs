//! CLI command definitions and dispatch for the `kbchat` binary.
//!
//! Uses clap derive macros for argument parsing. Session arguments accept a
//! full session id or any unique prefix of one.

pub mod ask;
pub mod chat;
pub mod health;
pub mod persona;
pub mod session;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use uuid::Uuid;

/// Chat with your knowledge base from the terminal.
#[derive(Parser)]
#[command(name = "kbchat", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    /// Back-end base URL (overrides config.toml).
    #[arg(long, global = true, env = "KBCHAT_BASE_URL")]
    pub base_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List conversations, most recently active first.
    #[command(alias = "ls")]
    Sessions,

    /// Start a new conversation.
    New {
        /// Persona to use (defaults to the back-end's default persona).
        #[arg(long)]
        persona: Option<Uuid>,

        /// LLM provider (defaults to `default_provider` from config).
        #[arg(long)]
        provider: Option<String>,
    },

    /// Delete a conversation and its messages.
    #[command(alias = "rm")]
    Delete {
        /// Session id or unique prefix.
        session: String,

        /// Skip confirmation prompt.
        #[arg(long)]
        force: bool,
    },

    /// Show a conversation transcript.
    Show {
        /// Session id or unique prefix.
        session: String,
    },

    /// Send one message and stream the reply (Ctrl+C cancels).
    Ask {
        /// Session id or unique prefix.
        session: String,

        /// Message to send.
        #[arg(required = true, num_args = 1..)]
        message: Vec<String>,
    },

    /// Start an interactive chat.
    Chat {
        /// Session to open (defaults to the most recent, or a new one).
        session: Option<String>,
    },

    /// List available personas.
    Personas,

    /// Back-end health check.
    Health,

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
