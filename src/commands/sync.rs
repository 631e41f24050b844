// ABOUTME: Sync command - one batch pass from the source database to the destination
// ABOUTME: Connects both sides, runs the table syncer and prints a run summary

use std::future::Future;

use anyhow::{Context, Result};
use tokio::sync::watch;

use crate::config::SyncConfig;
use crate::mysql::{connect_with_retry, MySqlDestination, MySqlSource};
use crate::sync::{SyncOptions, SyncStats, TableSyncer};
use crate::utils::redact;

/// Run one sync pass.
///
/// Connection failures abort the run. Per-table failures are reported in the
/// returned stats; the caller decides whether they affect the exit status.
pub async fn sync(config: SyncConfig, cancel: watch::Receiver<bool>) -> Result<SyncStats> {
    tracing::info!("Starting sync");
    tracing::info!("  Source: {}", redact(&config.source_url));
    tracing::info!("  Target: {}", redact(&config.target_url));
    tracing::info!(
        "  Batch size: {}, watermark column: {}",
        config.batch_size,
        config.watermark_column
    );

    let source_conn = connect_with_retry(&config.source_url, config.connect_retries)
        .await
        .context("Failed to connect to source database")?;
    tracing::info!("✓ Connected to source");

    let target_conn = connect_with_retry(&config.target_url, config.connect_retries)
        .await
        .context("Failed to connect to target database")?;
    tracing::info!("✓ Connected to target");

    let options = SyncOptions {
        page_size: config.batch_size,
        watermark_column: config.watermark_column.clone(),
    };
    let mut syncer = TableSyncer::new(
        MySqlSource::new(source_conn),
        MySqlDestination::new(target_conn, &config.status_table),
        options,
    )
    .with_cancellation(cancel);

    let stats = syncer.run(&config.filter).await?;
    print_summary(&stats);

    let (source, destination) = syncer.into_parts();
    if let Err(e) = source.disconnect().await {
        tracing::warn!("{:#}", e);
    }
    if let Err(e) = destination.disconnect().await {
        tracing::warn!("{:#}", e);
    }

    Ok(stats)
}

/// Turn interrupt signals into cancellation.
///
/// The first signal flips `cancel` so the run stops after the current page.
/// Returns once a second signal arrives; the caller then exits without
/// waiting for the page to finish.
pub async fn handle_interrupts<F, Fut>(
    mut next_signal: F,
    cancel: watch::Sender<bool>,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    next_signal()
        .await
        .context("Failed to listen for interrupt signal")?;
    tracing::warn!("Received Ctrl+C, stopping after the current page (press again to exit now)");
    let _ = cancel.send(true);

    next_signal()
        .await
        .context("Failed to listen for interrupt signal")?;
    tracing::warn!("Received second Ctrl+C, exiting");
    Ok(())
}

fn print_summary(stats: &SyncStats) {
    println!();
    println!("Sync Summary");
    println!("{}", "═".repeat(61));
    println!();

    for report in &stats.reports {
        let icon = if report.failed_pages == 0 && !report.cancelled {
            "✓"
        } else {
            "✗"
        };
        println!(
            "  {} {} ({}{}): {} rows",
            icon,
            report.table,
            report.mode,
            if report.created { ", created" } else { "" },
            report.rows_applied
        );
    }
    if !stats.reports.is_empty() {
        println!();
    }

    println!("  Tables synced:  {}", stats.tables_synced);
    println!("  Tables failed:  {}", stats.tables_failed);
    println!("  Rows synced:    {}", stats.rows_synced);
    println!("  Pages failed:   {}", stats.pages_failed);
    println!("  Elapsed:        {}", format_elapsed(stats.duration_ms));

    if stats.cancelled {
        println!();
        println!("  Run was cancelled before all tables were processed");
    }

    if !stats.errors.is_empty() {
        println!();
        println!("Errors:");
        for error in &stats.errors {
            println!("  ✗ {}", error);
        }
    }
    println!();

    tracing::info!(
        "Sync finished: {} tables, {} rows, {} errors in {}",
        stats.tables_synced,
        stats.rows_synced,
        stats.errors.len(),
        format_elapsed(stats.duration_ms)
    );
}

/// Elapsed time in seconds and minutes, e.g. `90.00 seconds (1.50 minutes)`
fn format_elapsed(duration_ms: u64) -> String {
    let seconds = duration_ms as f64 / 1000.0;
    format!("{:.2} seconds ({:.2} minutes)", seconds, seconds / 60.0)
}
