//! Plain-text terminal rendering for transcripts and streamed replies.
//!
//! Streamed fragments are written raw as they arrive. Persisted messages are
//! printed with a role label and, for grounded replies, a sources badge.

use std::io::{self, Write};

use console::style;
use uuid::Uuid;

use kbchat_types::session::{Message, MessageRole};

/// First eight characters of a session id, enough to address it by prefix.
pub fn short_id(id: &Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// Truncate to `max` characters, marking the cut with `...`.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// "N source(s) used" for a grounded reply; `None` when ungrounded.
pub fn sources_badge(count: usize) -> Option<String> {
    match count {
        0 => None,
        1 => Some("1 source used".to_string()),
        n => Some(format!("{n} sources used")),
    }
}

/// How much of a streamed reply is already on screen.
///
/// Fragment events only signal that the reply grew; the text to print is
/// whatever the accumulated reply holds past the cursor. Events that were
/// dropped or already covered by an earlier snapshot print nothing twice.
#[derive(Debug, Default)]
pub struct ReplyCursor {
    printed: usize,
}

impl ReplyCursor {
    /// The unprinted tail of `text`, or `None` if `text` does not extend
    /// what was printed (a different or restarted reply).
    pub fn unseen<'a>(&self, text: &'a str) -> Option<&'a str> {
        text.get(self.printed..)
    }

    /// Nothing of the reply has been printed yet.
    pub fn is_at_start(&self) -> bool {
        self.printed == 0
    }

    pub fn advance_to(&mut self, text: &str) {
        self.printed = text.len();
    }

    pub fn reset(&mut self) {
        self.printed = 0;
    }
}

/// Writes chat output to any `Write` sink (stdout, or the readline's
/// shared writer in the interactive loop).
pub struct ChatRenderer<W: Write> {
    out: W,
}

impl<W: Write> ChatRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Print the assistant label that precedes a streamed reply.
    pub fn begin_reply(&mut self) -> io::Result<()> {
        write!(self.out, "\n  {} ", style("Assistant >").cyan().bold())?;
        self.out.flush()
    }

    /// Print a single streamed fragment (raw, no formatting).
    pub fn fragment(&mut self, text: &str) -> io::Result<()> {
        write!(self.out, "{text}")?;
        self.out.flush()
    }

    /// Close a streamed reply, with its sources badge if any.
    pub fn end_reply(&mut self, source_count: usize) -> io::Result<()> {
        writeln!(self.out)?;
        if let Some(badge) = sources_badge(source_count) {
            writeln!(self.out, "  {}", style(badge).dim())?;
        }
        writeln!(self.out)
    }

    pub fn failure(&mut self, notice: &str) -> io::Result<()> {
        writeln!(self.out, "\n  {} {}\n", style("!").red().bold(), style(notice).red())
    }

    pub fn cancelled(&mut self) -> io::Result<()> {
        writeln!(self.out, "\n  {}\n", style("(cancelled)").dim())
    }

    /// Informational line (`i` marker).
    pub fn info(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "  {} {text}", style("i").blue().bold())
    }

    /// Warning line (`!` marker).
    pub fn warn(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.out, "  {} {text}", style("!").yellow().bold())
    }

    /// Print one persisted message.
    pub fn message(&mut self, msg: &Message) -> io::Result<()> {
        let label = match msg.role {
            MessageRole::User => style("You >").green().bold(),
            MessageRole::Assistant => style("Assistant >").cyan().bold(),
            MessageRole::System => style("System >").dim(),
        };
        writeln!(self.out, "  {label} {}", msg.content)?;
        if let Some(badge) = sources_badge(msg.source_count()) {
            writeln!(self.out, "  {}", style(badge).dim())?;
        }
        Ok(())
    }

    /// Print a transcript, or an empty-state hint.
    pub fn transcript(&mut self, messages: &[Message]) -> io::Result<()> {
        if messages.is_empty() {
            return self.info("No messages yet. Type to start the conversation.");
        }
        for msg in messages {
            self.message(msg)?;
        }
        writeln!(self.out)
    }

    pub fn writer(&mut self) -> &mut W {
        &mut self.out
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
