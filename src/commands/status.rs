// ABOUTME: Status command - shows the sync status records kept on the destination
// ABOUTME: Prints one line per table, or JSON with --json

use anyhow::{Context, Result};

use crate::mysql::{connect_with_retry, MySqlDestination};
use crate::sync::{SyncStatus, WatermarkStore};
use crate::utils::{redact, validate_mysql_url};

pub async fn status(
    target_url: &str,
    status_table: &str,
    connect_retries: u32,
    json: bool,
) -> Result<()> {
    validate_mysql_url(target_url).context("Invalid target URL")?;
    tracing::info!("Reading sync status from {}", redact(target_url));

    let conn = connect_with_retry(target_url, connect_retries)
        .await
        .context("Failed to connect to target database")?;
    let mut destination = MySqlDestination::new(conn, status_table);

    destination.ensure_status_table().await?;
    let statuses = destination.list_statuses().await?;
    destination.disconnect().await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&statuses).context("Failed to serialize sync status")?
        );
    } else {
        print!("{}", render_table(&statuses));
    }

    Ok(())
}

fn render_table(statuses: &[SyncStatus]) -> String {
    if statuses.is_empty() {
        return "No tables have been synced yet.\n".to_string();
    }

    let width = statuses
        .iter()
        .map(|s| s.table_name.len())
        .max()
        .unwrap_or(0)
        .max("Table".len());

    let mut out = format!("{:<width$}  Last sync\n", "Table", width = width);
    out.push_str(&format!("{}\n", "─".repeat(width + 28)));
    for status in statuses {
        let last_sync = status
            .last_sync
            .map(|ts| ts.to_string())
            .unwrap_or_else(|| "NULL (next run is a full sync)".to_string());
        out.push_str(&format!(
            "{:<width$}  {}\n",
            status.table_name,
            last_sync,
            width = width
        ));
    }
    out
}
