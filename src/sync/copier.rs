// ABOUTME: BatchCopier - pages rows out of the source and upserts them into the destination
// ABOUTME: Every page is applied in its own transaction; failed pages roll back and are skipped

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::watch;

use super::{Predicate, Row, TableDescriptor, Timestamp};

/// Paged row reads on the source.
#[async_trait]
pub trait RowSource: Send {
    /// Number of rows matching `predicate`
    async fn count_rows(&mut self, table: &TableDescriptor, predicate: &Predicate) -> Result<u64>;

    /// One page of matching rows in the descriptor's deterministic order
    async fn fetch_page(
        &mut self,
        table: &TableDescriptor,
        predicate: &Predicate,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Row>>;
}

/// Transactional upsert surface of the destination.
///
/// Transactions are flat: `begin` is never called while one is open.
#[async_trait]
pub trait RowSink: Send {
    async fn begin(&mut self) -> Result<()>;

    /// Insert the row, or on primary-key conflict overwrite every column
    /// except the primary key and the watermark column
    async fn upsert_row(&mut self, table: &TableDescriptor, row: &Row) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}

/// Result of applying a single page.
#[derive(Debug)]
pub enum PageOutcome {
    Applied {
        rows: u64,
        max_watermark: Option<Timestamp>,
    },
    Failed(anyhow::Error),
}

/// A page that was rolled back (or could not be read).
#[derive(Debug, Clone)]
pub struct PageFailure {
    /// 1-based page number within the pass
    pub page: u64,
    pub offset: u64,
    pub error: String,
}

/// Outcome of one copy pass over a table.
#[derive(Debug, Clone, Default)]
pub struct CopyReport {
    /// Matching rows when the pass started
    pub total_rows: u64,
    pub rows_applied: u64,
    pub pages_applied: u64,
    pub failed_pages: Vec<PageFailure>,
    /// Highest watermark over every committed row
    pub max_watermark: Option<Timestamp>,
    /// Highest watermark that can be persisted without skipping unwritten
    /// rows: the maximum over the committed pages before the first failed
    /// (or unvisited) page, backed off when the pass stopped early
    pub safe_watermark: Option<Timestamp>,
    /// Paging stopped early because cancellation was requested
    pub cancelled: bool,
}

impl CopyReport {
    /// True when every page was committed and the pass ran to the end
    pub fn is_complete(&self) -> bool {
        self.failed_pages.is_empty() && !self.cancelled
    }
}

/// Freeze the safe watermark when the committed prefix ends early.
///
/// Paging splits ties on the watermark value, so rows sharing the prefix's
/// last value may sit in the page that was not applied. Backing off by the
/// column's finest precision keeps them inside the next `>` window.
fn close_prefix(report: &mut CopyReport) {
    report.safe_watermark = report
        .safe_watermark
        .map(|ts| ts - chrono::Duration::microseconds(1));
}

/// Copies one table's matching rows in fixed-size pages.
pub struct BatchCopier<'a, S: ?Sized, D: ?Sized> {
    source: &'a mut S,
    sink: &'a mut D,
    page_size: u64,
    cancel: Option<watch::Receiver<bool>>,
}

impl<'a, S, D> BatchCopier<'a, S, D>
where
    S: RowSource + ?Sized,
    D: RowSink + ?Sized,
{
    pub fn new(source: &'a mut S, sink: &'a mut D, page_size: u64) -> Self {
        Self {
            source,
            sink,
            page_size: page_size.max(1),
            cancel: None,
        }
    }

    /// Stop between pages once the flag turns `true`
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Copy every row matching `predicate` from source to destination.
    ///
    /// Page failures are recorded in the report and do not stop the pass. An
    /// error is returned only when the row count cannot be read or a failed
    /// page cannot be rolled back, since the destination transaction state is
    /// unknown from then on.
    pub async fn copy(&mut self, table: &TableDescriptor, predicate: &Predicate) -> Result<CopyReport> {
        let total_rows = self
            .source
            .count_rows(table, predicate)
            .await
            .with_context(|| format!("Failed to count rows in {}", table.name))?;

        let mut report = CopyReport {
            total_rows,
            ..Default::default()
        };

        tracing::debug!(
            "Copying {} rows from {} ({}) in pages of {}",
            total_rows,
            table.name,
            predicate.describe(),
            self.page_size
        );

        let mut offset = 0u64;
        let mut page = 0u64;
        let mut contiguous = true;

        while offset < total_rows {
            if self.is_cancelled() {
                tracing::warn!(
                    "Cancellation requested, stopping {} at offset {}",
                    table.name,
                    offset
                );
                report.cancelled = true;
                if contiguous {
                    close_prefix(&mut report);
                }
                break;
            }

            page += 1;

            let rows = match self
                .source
                .fetch_page(table, predicate, offset, self.page_size)
                .await
            {
                Ok(rows) => rows,
                Err(e) => {
                    tracing::warn!(
                        "Failed to read page {} of {} (offset {}): {:#}",
                        page,
                        table.name,
                        offset,
                        e
                    );
                    report.failed_pages.push(PageFailure {
                        page,
                        offset,
                        error: format!("{:#}", e),
                    });
                    if contiguous {
                        close_prefix(&mut report);
                        contiguous = false;
                    }
                    offset += self.page_size;
                    continue;
                }
            };

            // The source shrank since the count was taken
            if rows.is_empty() {
                break;
            }

            match self.apply_page(table, &rows).await? {
                PageOutcome::Applied {
                    rows: applied,
                    max_watermark,
                } => {
                    report.rows_applied += applied;
                    report.pages_applied += 1;
                    report.max_watermark = report.max_watermark.max(max_watermark);
                    if contiguous {
                        report.safe_watermark = report.safe_watermark.max(max_watermark);
                    }
                }
                PageOutcome::Failed(e) => {
                    tracing::warn!(
                        "Failed to sync table {} page {} (offset {}), rolled back: {:#}",
                        table.name,
                        page,
                        offset,
                        e
                    );
                    report.failed_pages.push(PageFailure {
                        page,
                        offset,
                        error: format!("{:#}", e),
                    });
                    if contiguous {
                        close_prefix(&mut report);
                        contiguous = false;
                    }
                }
            }

            if page % 10 == 0 {
                tracing::info!(
                    "Progress: {} - {}/{} rows applied ({} pages)",
                    table.name,
                    report.rows_applied,
                    total_rows,
                    page
                );
            }

            offset += self.page_size;
        }

        Ok(report)
    }

    /// Apply one page inside a single destination transaction.
    ///
    /// The outer `Result` fails only when rollback itself fails.
    async fn apply_page(&mut self, table: &TableDescriptor, rows: &[Row]) -> Result<PageOutcome> {
        if let Err(e) = self.sink.begin().await {
            return Ok(PageOutcome::Failed(e.context("Failed to begin transaction")));
        }

        let mut failure = None;
        for (idx, row) in rows.iter().enumerate() {
            if let Err(e) = self.sink.upsert_row(table, row).await {
                failure = Some(e.context(format!("Failed to upsert row {} of page", idx + 1)));
                break;
            }
        }

        if failure.is_none() {
            match self.sink.commit().await {
                Ok(()) => {
                    return Ok(PageOutcome::Applied {
                        rows: rows.len() as u64,
                        max_watermark: table.max_watermark(rows),
                    })
                }
                Err(e) => failure = Some(e.context("Failed to commit transaction")),
            }
        }

        self.sink
            .rollback()
            .await
            .with_context(|| format!("Failed to roll back page of {}", table.name))?;

        Ok(PageOutcome::Failed(failure.unwrap_or_else(|| {
            anyhow::anyhow!("Page of {} was not applied", table.name)
        })))
    }
}
