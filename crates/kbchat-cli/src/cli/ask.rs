//! One-shot send: stream a single reply to stdout.

use std::io::{self, Write};
use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;

use kbchat_types::session::MessageRole;
use kbchat_types::stream::{ConversationEvent, TurnOutcome};

use crate::cli::chat::renderer::{ChatRenderer, ReplyCursor};
use crate::cli::session::resolve;
use crate::state::AppState;

/// Send `message` to a session and stream the reply. Ctrl+C cancels.
///
/// # Examples
///
/// ```bash
/// kbchat ask 0193b3a0 what does the onboarding doc say about VPN access?
/// ```
pub async fn ask(state: &AppState, input: &str, message: String, json: bool) -> Result<()> {
    let ctl = &state.controller;
    let session_id = resolve(state, input).await?;

    let mut events = ctl.subscribe();
    let handle = ctl
        .send_to(session_id, message)
        .map_err(|rejected| anyhow::anyhow!("Message not sent: {}", rejected.reason))?;

    let spinner = if json {
        ProgressBar::hidden()
    } else {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
        spinner.set_message("thinking...");
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner
    };

    let mut renderer = ChatRenderer::new(io::stdout());
    let mut cursor = ReplyCursor::default();
    let mut cancelled = false;

    let outcome = handle.outcome();
    tokio::pin!(outcome);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        tokio::select! {
            biased;

            event = events.recv() => match event {
                Ok(ConversationEvent::Fragment { session_id: id, .. }) if id == session_id => {
                    if !json {
                        let text = ctl.streaming_text(&session_id);
                        catch_up(&mut renderer, &mut cursor, &spinner, &text)?;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Event receiver lagged; resyncing reply text");
                    if !json {
                        let text = ctl.streaming_text(&session_id);
                        catch_up(&mut renderer, &mut cursor, &spinner, &text)?;
                    }
                }
                Err(RecvError::Closed) => {}
            },
            outcome = &mut outcome => break outcome,
            _ = &mut ctrl_c, if !cancelled => {
                cancelled = true;
                ctl.cancel_session(&session_id);
            }
        }
    };
    // Completion clears the accumulated text; the outcome still carries it.
    if let TurnOutcome::Completed { text } = &outcome {
        if !json {
            catch_up(&mut renderer, &mut cursor, &spinner, text)?;
        }
    }
    spinner.finish_and_clear();

    if json {
        let transcript = ctl.cached_transcript(&session_id);
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "session_id": session_id,
                "result": outcome,
                "reply": transcript.iter().rev().find(|m| m.role == MessageRole::Assistant),
            }))?
        );
    } else {
        match &outcome {
            TurnOutcome::Completed { .. } => {
                if cursor.is_at_start() {
                    renderer.begin_reply()?;
                }
                let sources = ctl
                    .cached_transcript(&session_id)
                    .iter()
                    .rev()
                    .find(|m| m.role == MessageRole::Assistant)
                    .map_or(0, |m| m.source_count());
                renderer.end_reply(sources)?;
            }
            TurnOutcome::Failed { notice, .. } => renderer.failure(notice)?,
            TurnOutcome::Cancelled => renderer.cancelled()?,
        }
        io::stdout().flush()?;
    }

    match outcome {
        TurnOutcome::Completed { .. } => Ok(()),
        TurnOutcome::Failed { error, .. } => anyhow::bail!("reply failed: {error}"),
        TurnOutcome::Cancelled => anyhow::bail!("cancelled"),
    }
}

/// Print whatever part of the reply is not on screen yet.
fn catch_up<W: Write>(
    renderer: &mut ChatRenderer<W>,
    cursor: &mut ReplyCursor,
    spinner: &ProgressBar,
    text: &str,
) -> io::Result<()> {
    let Some(tail) = cursor.unseen(text).filter(|tail| !tail.is_empty()) else {
        return Ok(());
    };
    if cursor.is_at_start() {
        spinner.finish_and_clear();
        renderer.begin_reply()?;
    }
    renderer.fragment(tail)?;
    cursor.advance_to(text);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(renderer: ChatRenderer<Vec<u8>>) -> String {
        console::strip_ansi_codes(&String::from_utf8(renderer.into_inner()).unwrap()).to_string()
    }

    #[test]
    fn test_catch_up_fills_gaps_from_accumulated_text() {
        let mut renderer = ChatRenderer::new(Vec::new());
        let mut cursor = ReplyCursor::default();
        let spinner = ProgressBar::hidden();

        // Fragments "4".."8" were never seen as events.
        catch_up(&mut renderer, &mut cursor, &spinner, "0123").unwrap();
        catch_up(&mut renderer, &mut cursor, &spinner, "012345678").unwrap();
        catch_up(&mut renderer, &mut cursor, &spinner, "0123456789").unwrap();
        // The final text from the outcome repeats nothing.
        catch_up(&mut renderer, &mut cursor, &spinner, "0123456789").unwrap();

        let out = rendered(renderer);
        assert_eq!(out.matches("Assistant >").count(), 1);
        assert!(out.ends_with("Assistant > 0123456789"));
    }

    #[test]
    fn test_catch_up_ignores_cleared_text() {
        let mut renderer = ChatRenderer::new(Vec::new());
        let mut cursor = ReplyCursor::default();
        let spinner = ProgressBar::hidden();

        catch_up(&mut renderer, &mut cursor, &spinner, "Par").unwrap();
        catch_up(&mut renderer, &mut cursor, &spinner, "").unwrap();

        assert!(rendered(renderer).ends_with("Assistant > Par"));
    }
}
