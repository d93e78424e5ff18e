//! Main chat loop orchestration.
//!
//! Coordinates the interactive lifecycle: session resolution, welcome
//! banner, and a `select!` over user input and conversation events. Typing
//! sends to the focused conversation; replies for other conversations keep
//! streaming in the background and are announced when they finish.

use std::io::{self, Write};

use anyhow::Context;
use console::style;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;
use uuid::Uuid;

use kbchat_core::backend::ChatBackend;
use kbchat_core::controller::ConversationController;
use kbchat_types::session::MessageRole;
use kbchat_types::stream::{ConversationEvent, FAILURE_NOTICE, StreamPhase, TurnOutcome};

use crate::cli::session::resolve_session_id;
use crate::state::AppState;

use super::banner::{print_welcome_banner, write_session_header};
use super::commands::{self, ChatCommand};
use super::input::{ChatInput, InputEvent};
use super::renderer::{ChatRenderer, ReplyCursor, short_id};

/// Whether the loop keeps going after a line of input.
#[derive(Debug, PartialEq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Run the interactive chat loop.
pub async fn run_chat_loop(state: &AppState, session: Option<String>) -> anyhow::Result<()> {
    let ctl = state.controller.clone();
    let sessions = ctl
        .list_sessions()
        .await
        .context("Failed to load sessions")?;

    print_welcome_banner(&state.config.base_url, sessions.len());

    let initial = match session {
        Some(input) => resolve_session_id(&sessions, &input)?,
        None => match sessions.first() {
            Some(most_recent) => most_recent.id,
            None => ctl
                .create_session(None, None)
                .await
                .context("Failed to create session")?
                .id,
        },
    };

    let mut events = ctl.subscribe();
    let (mut input, writer) = ChatInput::new(prompt_for(&initial))
        .map_err(|e| anyhow::anyhow!("Failed to initialize input: {e}"))?;
    let mut chat = ChatLoop::new(ctl, ChatRenderer::new(writer));
    chat.enter(initial).await?;

    loop {
        tokio::select! {
            line = input.read_line() => match line {
                InputEvent::Eof => break,
                InputEvent::Interrupted => chat.interrupt()?,
                InputEvent::Message(text) => {
                    let before = chat.active();
                    let flow = chat.handle_line(text).await?;
                    if flow == Flow::Exit {
                        break;
                    }
                    if chat.active() != before {
                        input.update_prompt(&chat.active().map_or_else(
                            || format!("  {} ", style("(none) >").dim()),
                            |id| prompt_for(&id),
                        ));
                    }
                    if chat.take_clear_request() {
                        input.clear();
                    }
                }
            },
            event = events.recv() => match event {
                Ok(event) => chat.on_event(event)?,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Chat loop fell behind conversation events; resyncing");
                    chat.resync()?;
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    input.flush();
    println!("\n  {}", style("Chat ended.").dim());
    Ok(())
}

fn prompt_for(session_id: &Uuid) -> String {
    format!("  {} ", style(format!("{} >", short_id(session_id))).green().bold())
}

/// Loop state: the controller, the output sink, and which session's reply
/// (if any) is currently being printed live, and how much of it.
pub struct ChatLoop<B: ChatBackend, W: Write> {
    ctl: ConversationController<B>,
    renderer: ChatRenderer<W>,
    printing: Option<Uuid>,
    cursor: ReplyCursor,
    clear_requested: bool,
}

impl<B: ChatBackend, W: Write> ChatLoop<B, W> {
    pub fn new(ctl: ConversationController<B>, renderer: ChatRenderer<W>) -> Self {
        Self {
            ctl,
            renderer,
            printing: None,
            cursor: ReplyCursor::default(),
            clear_requested: false,
        }
    }

    pub fn active(&self) -> Option<Uuid> {
        self.ctl.active_session()
    }

    fn take_clear_request(&mut self) -> bool {
        std::mem::take(&mut self.clear_requested)
    }

    /// Focus a conversation: header, transcript, and any reply in flight.
    pub async fn enter(&mut self, session_id: Uuid) -> anyhow::Result<()> {
        self.ctl.select_session(session_id);
        self.stop_printing();

        if let Some(session) = self
            .ctl
            .directory()
            .cached()
            .and_then(|sessions| sessions.into_iter().find(|s| s.id == session_id))
        {
            write_session_header(self.renderer.writer(), &session)?;
        }

        match self.ctl.transcript(&session_id).await {
            Ok(messages) => self.renderer.transcript(&messages)?,
            Err(e) => self.renderer.warn(&format!("Could not load transcript: {e}"))?,
        }

        // Fragments already queued for this session are covered by the
        // snapshot; the cursor keeps them from printing twice.
        if self.ctl.phase(&session_id).is_in_flight() {
            self.catch_up(session_id)?;
        }
        Ok(())
    }

    /// Print the unseen tail of `session_id`'s accumulated reply.
    fn catch_up(&mut self, session_id: Uuid) -> io::Result<()> {
        let text = self.ctl.streaming_text(&session_id);
        self.show_reply(session_id, &text)
    }

    fn show_reply(&mut self, session_id: Uuid, text: &str) -> io::Result<()> {
        if self.printing != Some(session_id) {
            if text.is_empty() {
                return Ok(());
            }
            self.printing = Some(session_id);
            self.cursor.reset();
            self.renderer.begin_reply()?;
        }
        match self.cursor.unseen(text) {
            Some("") => return Ok(()),
            Some(tail) => self.renderer.fragment(tail)?,
            None if text.is_empty() => return Ok(()),
            // A new reply replaced the one on screen.
            None => {
                self.renderer.begin_reply()?;
                self.renderer.fragment(text)?;
            }
        }
        self.cursor.advance_to(text);
        Ok(())
    }

    /// Bring the screen back in line after missed events.
    pub fn resync(&mut self) -> io::Result<()> {
        if let Some(active) = self.active() {
            self.catch_up(active)?;
        }
        if let Some(session_id) = self.printing {
            if self.ctl.phase(&session_id) == StreamPhase::Idle {
                self.stop_printing();
                match self.ctl.last_outcome(&session_id) {
                    Some(TurnOutcome::Failed { notice, .. }) => self.renderer.failure(&notice)?,
                    Some(TurnOutcome::Cancelled) => self.renderer.cancelled()?,
                    _ => {
                        let sources = self.sources_of(&session_id);
                        self.renderer.end_reply(sources)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn stop_printing(&mut self) {
        self.printing = None;
        self.cursor.reset();
    }

    fn sources_of(&self, session_id: &Uuid) -> usize {
        self.ctl
            .cached_transcript(session_id)
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
            .map_or(0, |m| m.source_count())
    }

    /// Ctrl+C: cancel the focused reply, if one is running.
    pub fn interrupt(&mut self) -> io::Result<()> {
        if !self.ctl.cancel() {
            self.renderer
                .info("Press Ctrl+D to exit, or keep chatting.")?;
        }
        Ok(())
    }

    /// Handle one submitted line: a slash command or a message to send.
    pub async fn handle_line(&mut self, text: String) -> anyhow::Result<Flow> {
        if text.trim().is_empty() {
            return Ok(Flow::Continue);
        }

        let Some(cmd) = commands::parse(&text) else {
            self.send(text)?;
            return Ok(Flow::Continue);
        };

        match cmd {
            ChatCommand::Help => commands::write_help(self.renderer.writer())?,
            ChatCommand::Clear => self.clear_requested = true,
            ChatCommand::Exit => return Ok(Flow::Exit),
            ChatCommand::Sessions => self.list_sessions().await?,
            ChatCommand::Switch(prefix) => self.switch(&prefix).await?,
            ChatCommand::New => match self.ctl.create_session(None, None).await {
                Ok(session) => self.enter(session.id).await?,
                Err(e) => self
                    .renderer
                    .warn(&format!("Could not create conversation: {e}"))?,
            },
            ChatCommand::Delete(target) => self.delete(target.as_deref()).await?,
            ChatCommand::History => match self.active() {
                Some(id) => match self.ctl.refresh_detail(&id).await {
                    Ok(messages) => self.renderer.transcript(&messages)?,
                    Err(e) => self
                        .renderer
                        .warn(&format!("Could not load transcript: {e}"))?,
                },
                None => self.renderer.info("No conversation selected.")?,
            },
            ChatCommand::Cancel => {
                if !self.ctl.cancel() {
                    self.renderer.info("Nothing to cancel.")?;
                }
            }
            ChatCommand::Unknown(name) => self.renderer.warn(&format!(
                "Unknown command: {}. Type /help for available commands.",
                style(name).dim()
            ))?,
        }
        Ok(Flow::Continue)
    }

    fn send(&mut self, text: String) -> io::Result<()> {
        if let Err(rejected) = self.ctl.send(text) {
            self.renderer.warn(&format!(
                "Not sent ({}): {}",
                rejected.reason,
                style(&rejected.text).dim()
            ))?;
        }
        Ok(())
    }

    async fn switch(&mut self, prefix: &str) -> anyhow::Result<()> {
        let sessions = self.ctl.list_sessions().await?;
        match resolve_session_id(&sessions, prefix) {
            Ok(id) => self.enter(id).await?,
            Err(e) => self.renderer.warn(&e.to_string())?,
        }
        Ok(())
    }

    async fn delete(&mut self, target: Option<&str>) -> anyhow::Result<()> {
        let sessions = self.ctl.list_sessions().await?;
        let session_id = match (target, self.active()) {
            (Some(prefix), _) => match resolve_session_id(&sessions, prefix) {
                Ok(id) => id,
                Err(e) => return Ok(self.renderer.warn(&e.to_string())?),
            },
            (None, Some(active)) => active,
            (None, None) => return Ok(self.renderer.info("No conversation selected.")?),
        };

        if let Err(e) = self.ctl.delete_session(&session_id).await {
            self.renderer
                .warn(&format!("Could not delete conversation: {e}"))?;
            return Ok(());
        }
        if self.printing == Some(session_id) {
            self.stop_printing();
        }
        self.renderer
            .info(&format!("Deleted conversation {}.", short_id(&session_id)))?;

        if self.active().is_none() {
            let remaining = self.ctl.list_sessions().await.unwrap_or_default();
            match remaining.first() {
                Some(next) => self.enter(next.id).await?,
                None => self
                    .renderer
                    .info("No conversations yet. Use /new to start one.")?,
            }
        }
        Ok(())
    }

    async fn list_sessions(&mut self) -> anyhow::Result<()> {
        let sessions = match self.ctl.reload_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                self.renderer
                    .warn(&format!("Could not load conversations: {e}"))?;
                return Ok(());
            }
        };
        if sessions.is_empty() {
            self.renderer.info("No conversations yet.")?;
            return Ok(());
        }

        let active = self.active();
        let out = self.renderer.writer();
        writeln!(out)?;
        for session in &sessions {
            let marker = if Some(session.id) == active { "*" } else { " " };
            let phase = self.ctl.phase(&session.id);
            let status = if phase.is_in_flight() {
                format!(" ({phase})")
            } else {
                String::new()
            };
            writeln!(
                out,
                "  {marker} {}  {}{}",
                style(short_id(&session.id)).dim(),
                style(&session.title).cyan(),
                style(status).yellow()
            )?;
        }
        writeln!(out)?;
        Ok(())
    }

    /// Render a conversation event.
    pub fn on_event(&mut self, event: ConversationEvent) -> io::Result<()> {
        let active = self.active();
        match event {
            ConversationEvent::Fragment { session_id, .. } if Some(session_id) == active => {
                self.catch_up(session_id)?;
            }
            ConversationEvent::PhaseChanged { session_id, phase } if Some(session_id) == active => {
                match phase {
                    // The refresh may have cleared the text already; the
                    // outcome keeps it.
                    StreamPhase::Completed => {
                        if let Some(TurnOutcome::Completed { text }) =
                            self.ctl.last_outcome(&session_id)
                        {
                            self.show_reply(session_id, &text)?;
                        }
                    }
                    StreamPhase::Failed => {
                        self.stop_printing();
                        let notice = self
                            .ctl
                            .failure_notice(&session_id)
                            .unwrap_or_else(|| FAILURE_NOTICE.to_string());
                        self.renderer.failure(&notice)?;
                    }
                    StreamPhase::Cancelled => {
                        self.stop_printing();
                        self.renderer.cancelled()?;
                    }
                    // A completed reply whose refresh failed still needs closing.
                    StreamPhase::Idle if self.printing == Some(session_id) => {
                        self.stop_printing();
                        self.renderer.end_reply(0)?;
                    }
                    _ => {}
                }
            }
            ConversationEvent::PhaseChanged { session_id, phase } => match phase {
                StreamPhase::Completed => {
                    let title = self.title_of(&session_id);
                    self.renderer.info(&format!(
                        "Reply ready in '{title}'. Use /switch {} to read it.",
                        short_id(&session_id)
                    ))?;
                }
                StreamPhase::Failed => {
                    let title = self.title_of(&session_id);
                    self.renderer
                        .warn(&format!("Reply in '{title}' failed: {FAILURE_NOTICE}"))?;
                }
                _ => {}
            },
            ConversationEvent::DetailRefreshed { session_id, .. }
                if self.printing == Some(session_id) =>
            {
                self.catch_up(session_id)?;
                self.stop_printing();
                let sources = self.sources_of(&session_id);
                self.renderer.end_reply(sources)?;
            }
            ConversationEvent::RefreshFailed { session_id, error } if Some(session_id) == active => {
                self.renderer
                    .warn(&format!("Could not refresh transcript: {error}"))?;
            }
            _ => {}
        }
        Ok(())
    }

    fn title_of(&self, session_id: &Uuid) -> String {
        self.ctl
            .directory()
            .cached()
            .and_then(|sessions| sessions.into_iter().find(|s| s.id == *session_id))
            .map(|s| s.title)
            .unwrap_or_else(|| short_id(session_id))
    }
}
