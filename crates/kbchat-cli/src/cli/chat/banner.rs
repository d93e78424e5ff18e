//! Welcome banner and session header for the chat loop.

use std::io::{self, Write};

use console::style;

use kbchat_types::session::Session;

use super::renderer::short_id;

/// Print the welcome banner at the start of an interactive chat.
pub fn print_welcome_banner(base_url: &str, session_count: usize) {
    println!();
    println!("  * {}", style("kbchat").cyan().bold());
    println!("  {}", style("Chat with your knowledge base").dim());
    println!();
    println!("  {}  {}", style("Back-end:").bold(), style(base_url).dim());
    println!(
        "  {}  {}",
        style("Conversations:").bold(),
        style(session_count).dim()
    );
    println!();
    println!(
        "  {}",
        style("Type /help for commands, Ctrl+C cancels a reply, Ctrl+D exits").dim()
    );
    println!("  {}", style("---").dim());
    println!();
}

/// Header shown when a conversation becomes the active one.
pub fn write_session_header(out: &mut impl Write, session: &Session) -> io::Result<()> {
    writeln!(out)?;
    writeln!(
        out,
        "  {} {}  {}",
        style("#").cyan().bold(),
        style(&session.title).cyan().bold(),
        style(format!("{} · {}", short_id(&session.id), session.llm_provider)).dim()
    )?;
    writeln!(out)
}
