// ABOUTME: Watermark store contract - durable per-table last-sync timestamps
// ABOUTME: Absence of a record means "full sync"; a timestamp means "incremental from here"

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use super::Timestamp;

/// Sync status record for a single table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    /// Table name (unique key)
    pub table_name: String,
    /// Highest watermark value durably synced; `None` means no watermark yet
    pub last_sync: Option<Timestamp>,
}

/// Durable mapping of table name to last-synced watermark, kept on the destination.
///
/// The store does not enforce monotonicity; the orchestrator only ever writes
/// values computed from rows it has just committed.
#[async_trait]
pub trait WatermarkStore: Send {
    /// Create the backing status table if it does not exist yet
    async fn ensure_status_table(&mut self) -> Result<()>;

    /// Full record for a table, `None` if the table was never synced
    async fn get_status(&mut self, table: &str) -> Result<Option<SyncStatus>>;

    /// Stored watermark; a record with a NULL timestamp counts as no watermark
    async fn get_watermark(&mut self, table: &str) -> Result<Option<Timestamp>> {
        Ok(self.get_status(table).await?.and_then(|s| s.last_sync))
    }

    /// Insert or overwrite the record for a table after a full sync
    async fn record_full_sync(&mut self, table: &str, timestamp: Option<Timestamp>) -> Result<()>;

    /// Move an existing record's watermark forward
    ///
    /// Must only be called when a record already exists for `table`.
    async fn advance_watermark(&mut self, table: &str, timestamp: Timestamp) -> Result<()>;

    /// Every record, ordered by table name
    async fn list_statuses(&mut self) -> Result<Vec<SyncStatus>>;
}
