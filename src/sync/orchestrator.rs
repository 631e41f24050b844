// ABOUTME: TableSyncer - drives per-table full or incremental sync passes
// ABOUTME: Picks the mode from the watermark store and persists the new watermark afterwards

use anyhow::{Context, Result};
use tokio::sync::watch;

use super::copier::{BatchCopier, CopyReport, RowSink, RowSource};
use super::schema::{ensure_table, SchemaProvider, SchemaTarget, TableDescriptor};
use super::watermark::WatermarkStore;
use super::{Predicate, Timestamp};
use crate::filters::TableFilter;

/// How a table is synced in this pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Full,
    Incremental,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncMode::Full => write!(f, "full"),
            SyncMode::Incremental => write!(f, "incremental"),
        }
    }
}

/// Engine settings shared by every table in a run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub page_size: u64,
    pub watermark_column: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            page_size: crate::config::DEFAULT_BATCH_SIZE,
            watermark_column: crate::config::DEFAULT_WATERMARK_COLUMN.to_string(),
        }
    }
}

/// What happened to one table.
#[derive(Debug, Clone)]
pub struct TableReport {
    pub table: String,
    pub mode: SyncMode,
    pub created: bool,
    pub rows_applied: u64,
    pub pages_applied: u64,
    pub failed_pages: usize,
    pub watermark_before: Option<Timestamp>,
    pub watermark_after: Option<Timestamp>,
    pub cancelled: bool,
}

/// Statistics from a sync run.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub tables_synced: usize,
    pub tables_failed: usize,
    pub rows_synced: u64,
    pub pages_failed: usize,
    pub errors: Vec<String>,
    pub reports: Vec<TableReport>,
    pub duration_ms: u64,
    pub cancelled: bool,
}

impl SyncStats {
    /// Check if the run completed without errors.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && !self.cancelled
    }
}

/// Watermark write decided after a copy pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WatermarkUpdate {
    RecordFull(Option<Timestamp>),
    Advance(Timestamp),
    Unchanged,
}

/// Decide which watermark to persist.
///
/// Only the safe watermark of an interrupted pass is ever written, so a failed
/// page is retried by the next run instead of being skipped. A full pass over a
/// table with no rows records `started_at`, the source clock read before the
/// pass began.
pub(crate) fn plan_watermark_update(
    mode: SyncMode,
    copy: &CopyReport,
    stored: Option<Timestamp>,
    has_watermark: bool,
    started_at: Option<Timestamp>,
) -> WatermarkUpdate {
    match mode {
        SyncMode::Full if !has_watermark => WatermarkUpdate::RecordFull(None),
        SyncMode::Full if copy.is_complete() => {
            WatermarkUpdate::RecordFull(copy.max_watermark.or(started_at))
        }
        SyncMode::Full => WatermarkUpdate::RecordFull(copy.safe_watermark),
        SyncMode::Incremental => match copy.safe_watermark {
            Some(ts) if stored.map_or(true, |current| ts > current) => {
                WatermarkUpdate::Advance(ts)
            }
            _ => WatermarkUpdate::Unchanged,
        },
    }
}

/// Current time on the source, used as the watermark of an empty full sync.
#[async_trait::async_trait]
pub trait SourceClock: Send {
    async fn current_timestamp(&mut self) -> Result<Timestamp>;
}

/// Syncs every selected source table into the destination, one after another.
///
/// Tables are processed strictly in source enumeration order and each table's
/// pages strictly in offset order. A table failure is recorded and the run
/// moves on to the next table.
pub struct TableSyncer<S, D> {
    source: S,
    destination: D,
    options: SyncOptions,
    cancel: Option<watch::Receiver<bool>>,
}

impl<S, D> TableSyncer<S, D>
where
    S: SchemaProvider + RowSource + SourceClock,
    D: SchemaTarget + RowSink + WatermarkStore,
{
    pub fn new(source: S, destination: D, options: SyncOptions) -> Self {
        Self {
            source,
            destination,
            options,
            cancel: None,
        }
    }

    /// Check the flag between tables and between pages
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn into_parts(self) -> (S, D) {
        (self.source, self.destination)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Run one sync pass over every table selected by `filter`.
    ///
    /// Fails only when the status table cannot be prepared or the source
    /// tables cannot be listed.
    pub async fn run(&mut self, filter: &TableFilter) -> Result<SyncStats> {
        let start = std::time::Instant::now();
        let mut stats = SyncStats::default();

        self.destination
            .ensure_status_table()
            .await
            .context("Failed to create sync status table on destination")?;

        let all_tables = self
            .source
            .list_tables()
            .await
            .context("Failed to list source tables")?;

        for missing in filter.missing_includes(&all_tables) {
            tracing::warn!("Table {} was requested but does not exist at source", missing);
        }

        let tables = filter.apply(all_tables);
        tracing::info!("Found {} tables to sync", tables.len());

        for table in &tables {
            if self.is_cancelled() {
                tracing::warn!("Cancellation requested, skipping remaining tables");
                stats.cancelled = true;
                break;
            }

            tracing::info!("Syncing table: {}", table);

            match self.sync_table(table).await {
                Ok(report) => {
                    stats.tables_synced += 1;
                    stats.rows_synced += report.rows_applied;
                    stats.pages_failed += report.failed_pages;
                    if report.failed_pages > 0 {
                        stats.errors.push(format!(
                            "Table {}: {} page(s) failed and were rolled back",
                            table, report.failed_pages
                        ));
                    }
                    let cancelled = report.cancelled;
                    stats.reports.push(report);
                    if cancelled {
                        stats.cancelled = true;
                        break;
                    }
                }
                Err(e) => {
                    // :? shows the full context chain
                    tracing::error!("Failed to sync table {}: {:?}", table, e);
                    stats.tables_failed += 1;
                    stats
                        .errors
                        .push(format!("Failed to sync table {}: {:#}", table, e));
                }
            }
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        Ok(stats)
    }

    /// Sync a single table: mirror schema, copy rows, persist the watermark.
    pub async fn sync_table(&mut self, table: &str) -> Result<TableReport> {
        let created = ensure_table(&mut self.source, &mut self.destination, table).await?;

        let columns = self
            .source
            .describe_columns(table)
            .await
            .with_context(|| format!("Failed to describe columns of {}", table))?;
        let descriptor = TableDescriptor::new(table, columns, &self.options.watermark_column)?;
        if !descriptor.has_primary_key() {
            tracing::warn!(
                "Table {} has no primary key; rows are only matched on unique keys and re-synced rows may be duplicated",
                table
            );
        }

        let stored = if descriptor.has_watermark() {
            self.destination
                .get_watermark(table)
                .await
                .with_context(|| format!("Failed to read watermark for {}", table))?
        } else {
            tracing::warn!(
                "Table {} has no {} column; incremental sync is not possible, performing full sync",
                table,
                self.options.watermark_column
            );
            None
        };

        let (mode, predicate) = match stored {
            None => (SyncMode::Full, Predicate::All),
            Some(ts) => (SyncMode::Incremental, Predicate::WatermarkAfter(ts)),
        };

        match mode {
            SyncMode::Full => tracing::info!("Performing full sync for table: {}", table),
            SyncMode::Incremental => tracing::info!(
                "Performing incremental sync for table: {} (since {})",
                table,
                predicate.describe()
            ),
        }

        let started_at = if mode == SyncMode::Full && descriptor.has_watermark() {
            Some(
                self.source
                    .current_timestamp()
                    .await
                    .context("Failed to read source clock")?,
            )
        } else {
            None
        };

        let mut copier = BatchCopier::new(
            &mut self.source,
            &mut self.destination,
            self.options.page_size,
        );
        if let Some(cancel) = self.cancel.clone() {
            copier = copier.with_cancellation(cancel);
        }
        let copy = copier.copy(&descriptor, &predicate).await?;

        let update = plan_watermark_update(
            mode,
            &copy,
            stored,
            descriptor.has_watermark(),
            started_at,
        );

        let watermark_after = match update {
            WatermarkUpdate::RecordFull(ts) => {
                self.destination
                    .record_full_sync(table, ts)
                    .await
                    .with_context(|| format!("Failed to record sync status for {}", table))?;
                ts
            }
            WatermarkUpdate::Advance(ts) => {
                self.destination
                    .advance_watermark(table, ts)
                    .await
                    .with_context(|| format!("Failed to advance watermark for {}", table))?;
                Some(ts)
            }
            WatermarkUpdate::Unchanged => {
                tracing::debug!("Watermark for {} left unchanged", table);
                stored
            }
        };

        if copy.is_complete() {
            tracing::info!(
                "{} sync completed for table: {} ({} rows in {} pages, watermark {})",
                capitalize(mode),
                table,
                copy.rows_applied,
                copy.pages_applied,
                display_ts(watermark_after)
            );
        } else {
            tracing::warn!(
                "{} sync of table {} finished with {} failed page(s){}: {} rows applied, watermark held at {}",
                capitalize(mode),
                table,
                copy.failed_pages.len(),
                if copy.cancelled { " (cancelled)" } else { "" },
                copy.rows_applied,
                display_ts(watermark_after)
            );
        }

        Ok(TableReport {
            table: table.to_string(),
            mode,
            created,
            rows_applied: copy.rows_applied,
            pages_applied: copy.pages_applied,
            failed_pages: copy.failed_pages.len(),
            watermark_before: stored,
            watermark_after,
            cancelled: copy.cancelled,
        })
    }
}

fn capitalize(mode: SyncMode) -> &'static str {
    match mode {
        SyncMode::Full => "Full",
        SyncMode::Incremental => "Incremental",
    }
}

fn display_ts(ts: Option<Timestamp>) -> String {
    ts.map(|t| t.to_string()).unwrap_or_else(|| "NULL".to_string())
}
