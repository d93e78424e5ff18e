//! kbchat command-line client entry point.
//!
//! Binary name: `kbchat`
//!
//! Parses CLI arguments, loads config, wires the conversation controller to
//! the HTTP back-end, then dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::{Cli, Commands};
use kbchat_observe::tracing_setup::{filter_for_verbosity, init_tracing, shutdown_tracing};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(filter_for_verbosity(cli.verbose, cli.quiet), cli.otel)
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "kbchat", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init(cli.base_url).await?;

    let result = match cli.command {
        Commands::Sessions => cli::session::list_sessions(&state, cli.json).await,
        Commands::New { persona, provider } => {
            cli::session::new_session(&state, persona, provider, cli.json).await
        }
        Commands::Delete { session, force } => {
            cli::session::delete_session(&state, &session, force, cli.json).await
        }
        Commands::Show { session } => cli::session::show_session(&state, &session, cli.json).await,
        Commands::Ask { session, message } => {
            cli::ask::ask(&state, &session, message.join(" "), cli.json).await
        }
        Commands::Chat { session } => cli::chat::loop_runner::run_chat_loop(&state, session).await,
        Commands::Personas => cli::persona::list_personas(&state, cli.json).await,
        Commands::Health => cli::health::health(&state, cli.json).await,
        Commands::Completions { .. } => Ok(()),
    };

    shutdown_tracing();
    result
}
