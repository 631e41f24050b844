// ABOUTME: Incremental table synchronization engine
// ABOUTME: Schema mirroring, watermark tracking, batched copying and per-table orchestration

pub mod copier;
pub mod orchestrator;
pub mod schema;
pub mod watermark;

pub use copier::{BatchCopier, CopyReport, PageFailure, PageOutcome, RowSink, RowSource};
pub use orchestrator::{SourceClock, SyncMode, SyncOptions, SyncStats, TableReport, TableSyncer};
pub use schema::{ensure_table, ColumnInfo, SchemaProvider, SchemaTarget, TableDescriptor};
pub use watermark::{SyncStatus, WatermarkStore};

/// Values of the watermark column. MySQL `DATETIME`/`TIMESTAMP` carry no zone.
pub type Timestamp = chrono::NaiveDateTime;

/// A row as an ordered tuple of column values, aligned to its table descriptor.
pub type Row = Vec<mysql_async::Value>;

/// Which source rows a copy pass reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    /// Every row in the table (full sync)
    All,
    /// Rows whose watermark column is strictly greater than the timestamp
    WatermarkAfter(Timestamp),
}

impl Predicate {
    pub fn describe(&self) -> String {
        match self {
            Predicate::All => "all rows".to_string(),
            Predicate::WatermarkAfter(ts) => format!("watermark > {}", ts),
        }
    }
}
