//! Session management CLI commands: list, new, delete, show.
//!
//! Provides session browsing with rich tables, Markdown/JSON transcript
//! export, and deletion with confirmation prompt.

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use dialoguer::Confirm;
use uuid::Uuid;

use kbchat_types::session::{MessageRole, Session};

use crate::cli::chat::renderer::{short_id, sources_badge, truncate};
use crate::state::AppState;

/// Resolve a full session id or a unique id prefix against a listing.
pub fn resolve_session_id(sessions: &[Session], input: &str) -> Result<Uuid> {
    let input = input.trim();
    if let Ok(id) = Uuid::parse_str(input) {
        return Ok(id);
    }
    if input.is_empty() {
        bail!("No session given");
    }

    let needle = input.to_lowercase();
    let matches: Vec<&Session> = sessions
        .iter()
        .filter(|s| s.id.to_string().starts_with(&needle))
        .collect();

    match matches.as_slice() {
        [] => bail!("No session matches '{input}'"),
        [only] => Ok(only.id),
        many => bail!(
            "'{input}' matches {} sessions; use a longer prefix",
            many.len()
        ),
    }
}

/// Resolve a session argument, loading the listing first.
pub async fn resolve(state: &AppState, input: &str) -> Result<Uuid> {
    let sessions = state
        .controller
        .list_sessions()
        .await
        .context("Failed to load sessions")?;
    resolve_session_id(&sessions, input)
}

/// List conversations, most recently active first.
///
/// # Examples
///
/// ```bash
/// kbchat sessions
/// kbchat sessions --json
/// ```
pub async fn list_sessions(state: &AppState, json: bool) -> Result<()> {
    let sessions = state
        .controller
        .list_sessions()
        .await
        .context("Failed to load sessions")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&sessions)?);
        return Ok(());
    }

    if sessions.is_empty() {
        println!();
        println!(
            "  {} No conversations yet. Start one with: {}",
            style("i").blue().bold(),
            style("kbchat chat").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("ID").fg(Color::White),
        Cell::new("Title").fg(Color::White),
        Cell::new("Provider").fg(Color::White),
        Cell::new("Last active").fg(Color::White),
    ]);

    for session in &sessions {
        table.add_row(vec![
            Cell::new(short_id(&session.id)).fg(Color::DarkGrey),
            Cell::new(truncate(&session.title, 40)).fg(Color::Cyan),
            Cell::new(&session.llm_provider).fg(Color::White),
            Cell::new(session.last_active_at().format("%Y-%m-%d %H:%M").to_string())
                .fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} conversation{}",
        style(sessions.len()).bold(),
        if sessions.len() == 1 { "" } else { "s" }
    );
    println!();

    Ok(())
}

/// Create a conversation.
pub async fn new_session(
    state: &AppState,
    persona: Option<Uuid>,
    provider: Option<String>,
    json: bool,
) -> Result<()> {
    let session = state
        .controller
        .create_session(persona, provider)
        .await
        .context("Failed to create session")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&session)?);
    } else {
        println!(
            "  {} Created '{}' ({}) using {}",
            style("+").green().bold(),
            style(&session.title).cyan(),
            style(session.id).dim(),
            session.llm_provider
        );
    }
    Ok(())
}

/// Delete a conversation with confirmation.
///
/// # Examples
///
/// ```bash
/// kbchat delete 0193b3a0
/// kbchat delete 0193b3a0 --force
/// ```
pub async fn delete_session(state: &AppState, input: &str, force: bool, json: bool) -> Result<()> {
    let session_id = resolve(state, input).await?;
    let detail = state
        .controller
        .details()
        .get(&session_id)
        .await?
        .with_context(|| format!("Session '{session_id}' not found"))?;
    let title = detail.session.title.clone();

    if !force && !json {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Delete conversation '{}' ({} messages)?",
                style(&title).red().bold(),
                detail.messages.len()
            ))
            .default(false)
            .interact()?;

        if !confirmed {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    state
        .controller
        .delete_session(&session_id)
        .await
        .context("Failed to delete session")?;

    if json {
        println!(
            "{}",
            serde_json::json!({"deleted": true, "session_id": session_id.to_string()})
        );
    } else {
        println!("  {} Conversation '{}' deleted.", style("x").red().bold(), title);
    }

    Ok(())
}

/// Print a transcript as Markdown (default) or JSON.
pub async fn show_session(state: &AppState, input: &str, json: bool) -> Result<()> {
    let session_id = resolve(state, input).await?;
    let detail = state
        .controller
        .details()
        .get(&session_id)
        .await?
        .with_context(|| format!("Session '{session_id}' not found"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    let session = &detail.session;
    println!("# {}", session.title);
    println!();
    println!("- **Started:** {}", session.created_at.format("%Y-%m-%d %H:%M UTC"));
    println!("- **Provider:** {}", session.llm_provider);
    println!("- **Messages:** {}", detail.messages.len());
    println!();
    println!("---");
    println!();

    for msg in &detail.messages {
        let role_label = match msg.role {
            MessageRole::User => "**You**",
            MessageRole::Assistant => "**Assistant**",
            MessageRole::System => "**System**",
        };

        let timestamp = msg.created_at.format("%H:%M");
        println!("### {role_label} ({timestamp})");
        println!();
        println!("{}", msg.content);
        if let Some(badge) = sources_badge(msg.source_count()) {
            println!();
            println!("_{badge}_");
        }
        println!();
    }

    Ok(())
}
