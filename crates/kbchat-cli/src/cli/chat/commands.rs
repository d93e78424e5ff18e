//! Slash command parsing for the chat loop.
//!
//! Commands start with `/` and provide in-chat controls for switching,
//! creating and deleting conversations, history, and cancellation.

use std::io::{self, Write};

use console::style;

/// Available slash commands in the chat loop.
#[derive(Debug, PartialEq)]
pub enum ChatCommand {
    /// Show available commands.
    Help,
    /// Clear the terminal screen.
    Clear,
    /// Exit the chat.
    Exit,
    /// List conversations.
    Sessions,
    /// Focus another conversation by id prefix.
    Switch(String),
    /// Start a new conversation and focus it.
    New,
    /// Delete a conversation (the active one when no prefix is given).
    Delete(Option<String>),
    /// Reprint the active conversation's transcript.
    History,
    /// Cancel the active conversation's in-flight reply.
    Cancel,
    /// Unknown command, or a known one with bad arguments.
    Unknown(String),
}

/// Parse user input as a slash command.
///
/// Returns `None` if the input doesn't start with `/`.
pub fn parse(input: &str) -> Option<ChatCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let (cmd, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((cmd, arg)) => (cmd.to_lowercase(), Some(arg.trim().to_string())),
        None => (trimmed.to_lowercase(), None),
    };
    let arg = arg.filter(|a| !a.is_empty());

    match cmd.as_str() {
        "/help" | "/h" | "/?" => Some(ChatCommand::Help),
        "/clear" | "/cls" => Some(ChatCommand::Clear),
        "/exit" | "/quit" | "/q" => Some(ChatCommand::Exit),
        "/sessions" | "/ls" => Some(ChatCommand::Sessions),
        "/switch" | "/s" => match arg {
            Some(prefix) => Some(ChatCommand::Switch(prefix)),
            None => Some(ChatCommand::Unknown(
                "/switch requires a session id prefix".to_string(),
            )),
        },
        "/new" => Some(ChatCommand::New),
        "/delete" | "/rm" => Some(ChatCommand::Delete(arg)),
        "/history" => Some(ChatCommand::History),
        "/cancel" | "/stop" => Some(ChatCommand::Cancel),
        other => Some(ChatCommand::Unknown(other.to_string())),
    }
}

/// Print the help text listing all available commands.
pub fn write_help(out: &mut impl Write) -> io::Result<()> {
    let rows = [
        ("/help", "Show this help message"),
        ("/sessions", "List conversations"),
        ("/switch <id>", "Focus another conversation (id prefix)"),
        ("/new", "Start a new conversation"),
        ("/delete [id]", "Delete a conversation (default: this one)"),
        ("/history", "Show this conversation's transcript"),
        ("/cancel", "Cancel the reply in progress"),
        ("/clear", "Clear the screen"),
        ("/exit", "End the chat"),
    ];

    writeln!(out)?;
    writeln!(out, "  {}", style("Available commands:").bold())?;
    writeln!(out)?;
    for (cmd, description) in rows {
        writeln!(out, "  {}  {description}", style(format!("{cmd:<13}")).cyan())?;
    }
    writeln!(out)?;
    writeln!(
        out,
        "  {}",
        style("Replies keep streaming in the background when you switch away").dim()
    )?;
    writeln!(out)
}
