//! Back-end health check.

use anyhow::Result;
use console::style;

use crate::state::AppState;

/// Show per-component health. Exits non-zero when any component is down.
pub async fn health(state: &AppState, json: bool) -> Result<()> {
    let report = match state.backend.health().await {
        Ok(report) => report,
        Err(e) => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "reachable": false, "error": e.to_string() })
                );
            } else {
                println!();
                println!(
                    "  {} Back-end at {} is unreachable: {e}",
                    style("✗").red(),
                    style(&state.config.base_url).cyan()
                );
                println!();
            }
            anyhow::bail!("back-end unreachable");
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!();
        println!(
            "  Health of {}",
            style(&state.config.base_url).cyan().bold()
        );
        println!();
        for (component, status) in &report.components {
            let mark = if status == "healthy" {
                style("✓").green()
            } else {
                style("✗").red()
            };
            println!("  {mark} {component}: {status}");
        }
        println!();
    }

    if !report.is_healthy() {
        let down: Vec<&str> = report.unhealthy().collect();
        anyhow::bail!("unhealthy components: {}", down.join(", "));
    }
    Ok(())
}
