//! In-memory source and destination for engine tests.
//!
//! Both fakes share their state through `Arc<Mutex<_>>` so a test can keep a
//! handle, hand the fake to a `TableSyncer`, and inspect or mutate the data
//! between runs.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use mysql_async::Value;
use tokio::sync::watch;

use table_syncer::mysql::value::{timestamp_from_value, timestamp_to_value};
use table_syncer::sync::{
    ColumnInfo, Predicate, Row, RowSink, RowSource, SchemaProvider, SchemaTarget, SourceClock,
    SyncStatus, TableDescriptor, Timestamp, WatermarkStore,
};

/// 2024-01-01 00:00:00 plus `seconds`
pub fn ts(seconds: i64) -> Timestamp {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        + Duration::seconds(seconds)
}

/// Columns of the standard test table: `id`, `name`, `time_stamp`
pub fn orders_columns() -> Vec<ColumnInfo> {
    vec![
        ColumnInfo::new("id", "int", true, false),
        ColumnInfo::new("name", "varchar(64)", false, true),
        ColumnInfo::new("time_stamp", "timestamp", false, true),
    ]
}

pub fn orders_row(id: i64, name: &str, watermark: Timestamp) -> Row {
    vec![
        Value::Int(id),
        Value::Bytes(name.as_bytes().to_vec()),
        timestamp_to_value(&watermark),
    ]
}

/// Rows `first..=last` where row `i` has watermark `ts(i)`
pub fn orders_rows(first: i64, last: i64) -> Vec<Row> {
    (first..=last)
        .map(|id| orders_row(id, &format!("order-{}", id), ts(id)))
        .collect()
}

pub fn ddl_for(table: &str) -> String {
    format!("CREATE TABLE `{}` (`id` int NOT NULL, PRIMARY KEY (`id`))", table)
}

fn table_name_from_ddl(ddl: &str) -> Result<String> {
    let mut parts = ddl.split('`');
    parts.next();
    parts
        .next()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Cannot find table name in DDL: {}", ddl))
}

fn int_of(value: &Value) -> i64 {
    match value {
        Value::Int(v) => *v,
        Value::UInt(v) => *v as i64,
        _ => 0,
    }
}

fn pk_key(table: &TableDescriptor, row: &Row) -> String {
    let pk: Vec<&Value> = table
        .columns
        .iter()
        .zip(row.iter())
        .filter(|(c, _)| c.is_primary_key)
        .map(|(_, v)| v)
        .collect();
    format!("{:?}", pk)
}

fn first_pk(table: &TableDescriptor, row: &Row) -> i64 {
    table
        .columns
        .iter()
        .position(|c| c.is_primary_key)
        .and_then(|idx| row.get(idx))
        .map(int_of)
        .unwrap_or_default()
}

// ----------------------------------------------------------------------------
// Source
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SourceTable {
    pub columns: Vec<ColumnInfo>,
    pub ddl: String,
    pub rows: Vec<Row>,
}

#[derive(Default)]
pub struct SourceState {
    /// Tables in enumeration order
    pub tables: Vec<(String, SourceTable)>,
    pub clock: Option<Timestamp>,
    /// (table, offset) pairs whose page read fails
    pub fail_fetch: HashSet<(String, u64)>,
    /// Flip the sender after this many page reads
    pub cancel_after_pages: Option<(usize, watch::Sender<bool>)>,
    pub pages_fetched: usize,
    pub predicates: Vec<(String, Predicate)>,
}

#[derive(Clone, Default)]
pub struct FakeSource {
    state: Arc<Mutex<SourceState>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock().unwrap()
    }

    pub fn add_table(&self, name: &str, columns: Vec<ColumnInfo>, rows: Vec<Row>) {
        self.state().tables.push((
            name.to_string(),
            SourceTable {
                columns,
                ddl: ddl_for(name),
                rows,
            },
        ));
    }

    pub fn push_rows(&self, name: &str, rows: Vec<Row>) {
        let mut state = self.state();
        if let Some((_, table)) = state.tables.iter_mut().find(|(n, _)| n == name) {
            table.rows.extend(rows);
        }
    }

    /// Replace the row whose first column equals `id`
    pub fn replace_row(&self, name: &str, id: i64, row: Row) {
        let mut state = self.state();
        if let Some((_, table)) = state.tables.iter_mut().find(|(n, _)| n == name) {
            for existing in table.rows.iter_mut() {
                if existing.first().map(int_of) == Some(id) {
                    *existing = row.clone();
                }
            }
        }
    }

    pub fn set_clock(&self, now: Timestamp) {
        self.state().clock = Some(now);
    }

    pub fn fail_fetch_at(&self, table: &str, offset: u64) {
        self.state().fail_fetch.insert((table.to_string(), offset));
    }

    pub fn cancel_after_pages(&self, pages: usize, sender: watch::Sender<bool>) {
        self.state().cancel_after_pages = Some((pages, sender));
    }

    fn matching_rows(state: &SourceState, table: &TableDescriptor, predicate: &Predicate) -> Result<Vec<Row>> {
        let source = state
            .tables
            .iter()
            .find(|(n, _)| *n == table.name)
            .map(|(_, t)| t)
            .ok_or_else(|| anyhow!("Table '{}' doesn't exist", table.name))?;

        let mut rows: Vec<Row> = source
            .rows
            .iter()
            .filter(|row| match predicate {
                Predicate::All => true,
                // NULL > x is never true
                Predicate::WatermarkAfter(since) => {
                    table.watermark_of(row).is_some_and(|w| w > *since)
                }
            })
            .cloned()
            .collect();

        rows.sort_by_key(|row| (table.watermark_of(row), first_pk(table, row)));
        Ok(rows)
    }
}

#[async_trait]
impl SchemaProvider for FakeSource {
    async fn list_tables(&mut self) -> Result<Vec<String>> {
        Ok(self.state().tables.iter().map(|(n, _)| n.clone()).collect())
    }

    async fn create_statement(&mut self, table: &str) -> Result<String> {
        self.state()
            .tables
            .iter()
            .find(|(n, _)| n == table)
            .map(|(_, t)| t.ddl.clone())
            .ok_or_else(|| anyhow!("Table '{}' doesn't exist", table))
    }

    async fn describe_columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>> {
        self.state()
            .tables
            .iter()
            .find(|(n, _)| n == table)
            .map(|(_, t)| t.columns.clone())
            .ok_or_else(|| anyhow!("Table '{}' doesn't exist", table))
    }
}

#[async_trait]
impl RowSource for FakeSource {
    async fn count_rows(&mut self, table: &TableDescriptor, predicate: &Predicate) -> Result<u64> {
        let mut state = self.state();
        state.predicates.push((table.name.clone(), *predicate));
        Ok(Self::matching_rows(&state, table, predicate)?.len() as u64)
    }

    async fn fetch_page(
        &mut self,
        table: &TableDescriptor,
        predicate: &Predicate,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Row>> {
        let mut state = self.state();
        state.pages_fetched += 1;
        let fetched = state.pages_fetched;
        if let Some((after, sender)) = &state.cancel_after_pages {
            if fetched >= *after {
                let _ = sender.send(true);
            }
        }

        if state.fail_fetch.contains(&(table.name.clone(), offset)) {
            bail!("Lost connection to MySQL server during query");
        }

        Ok(Self::matching_rows(&state, table, predicate)?
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }
}

#[async_trait]
impl SourceClock for FakeSource {
    async fn current_timestamp(&mut self) -> Result<Timestamp> {
        Ok(self.state().clock.unwrap_or_else(|| ts(1_000_000)))
    }
}

// ----------------------------------------------------------------------------
// Destination
// ----------------------------------------------------------------------------

pub type DestTables = BTreeMap<String, BTreeMap<String, Row>>;

#[derive(Default)]
pub struct DestinationState {
    /// Rows keyed by the debug form of their primary key, or by insertion
    /// position for tables without one
    pub tables: DestTables,
    pub statuses: BTreeMap<String, Option<Timestamp>>,
    pub status_table_ready: bool,
    pub ddl_log: Vec<String>,
    /// Snapshot taken at `begin`, restored at `rollback`
    pub snapshot: Option<DestTables>,
    pub commits: usize,
    pub rollbacks: usize,
    /// (table, first primary key value) pairs whose upsert fails
    pub fail_upsert: HashSet<(String, i64)>,
    pub fail_rollback: bool,
    pub fail_ddl: bool,
    pub upserts_per_table: HashMap<String, usize>,
}

#[derive(Clone, Default)]
pub struct FakeDestination {
    state: Arc<Mutex<DestinationState>>,
}

impl FakeDestination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, DestinationState> {
        self.state.lock().unwrap()
    }

    pub fn create_table(&self, name: &str) {
        self.state().tables.insert(name.to_string(), BTreeMap::new());
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.state().tables.get(table).map_or(0, |rows| rows.len())
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.state().tables.contains_key(table)
    }

    /// Row stored for integer primary key `id`
    pub fn row(&self, table: &str, id: i64) -> Option<Row> {
        let key = format!("{:?}", vec![&Value::Int(id)]);
        self.state()
            .tables
            .get(table)
            .and_then(|rows| rows.get(&key).cloned())
    }

    pub fn status(&self, table: &str) -> Option<Option<Timestamp>> {
        self.state().statuses.get(table).cloned()
    }

    pub fn set_status(&self, table: &str, last_sync: Option<Timestamp>) {
        self.state().statuses.insert(table.to_string(), last_sync);
    }

    pub fn fail_upsert_of(&self, table: &str, id: i64) {
        self.state().fail_upsert.insert((table.to_string(), id));
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.fail_upsert.clear();
        state.fail_rollback = false;
        state.fail_ddl = false;
    }
}

#[async_trait]
impl SchemaTarget for FakeDestination {
    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        Ok(self.has_table(table))
    }

    async fn execute_ddl(&mut self, ddl: &str) -> Result<()> {
        let mut state = self.state();
        if state.fail_ddl {
            bail!("Access denied; you need the CREATE privilege");
        }
        let name = table_name_from_ddl(ddl)?;
        state.ddl_log.push(ddl.to_string());
        state.tables.insert(name, BTreeMap::new());
        Ok(())
    }
}

#[async_trait]
impl RowSink for FakeDestination {
    async fn begin(&mut self) -> Result<()> {
        let mut state = self.state();
        if state.snapshot.is_some() {
            bail!("Transaction already open");
        }
        state.snapshot = Some(state.tables.clone());
        Ok(())
    }

    async fn upsert_row(&mut self, table: &TableDescriptor, row: &Row) -> Result<()> {
        let mut state = self.state();
        if state.snapshot.is_none() {
            bail!("Upsert outside of a transaction");
        }
        if state
            .fail_upsert
            .contains(&(table.name.clone(), first_pk(table, row)))
        {
            bail!("Duplicate entry for key 'uniq_name'");
        }

        let update_columns = table.update_columns();
        let rows = state
            .tables
            .get_mut(&table.name)
            .ok_or_else(|| anyhow!("Table '{}' doesn't exist", table.name))?;
        // Without a key nothing conflicts, every upsert inserts
        let key = if table.has_primary_key() {
            pk_key(table, row)
        } else {
            format!("#{}", rows.len())
        };

        match rows.get_mut(&key) {
            Some(existing) => {
                for (idx, column) in table.columns.iter().enumerate() {
                    if update_columns.contains(&column.name.as_str()) {
                        existing[idx] = row[idx].clone();
                    }
                }
            }
            None => {
                rows.insert(key, row.clone());
            }
        }

        *state
            .upserts_per_table
            .entry(table.name.clone())
            .or_default() += 1;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let mut state = self.state();
        state
            .snapshot
            .take()
            .ok_or_else(|| anyhow!("No transaction to commit"))?;
        state.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        let mut state = self.state();
        if state.fail_rollback {
            bail!("Lost connection to MySQL server during ROLLBACK");
        }
        if let Some(snapshot) = state.snapshot.take() {
            state.tables = snapshot;
        }
        state.rollbacks += 1;
        Ok(())
    }
}

#[async_trait]
impl WatermarkStore for FakeDestination {
    async fn ensure_status_table(&mut self) -> Result<()> {
        self.state().status_table_ready = true;
        Ok(())
    }

    async fn get_status(&mut self, table: &str) -> Result<Option<SyncStatus>> {
        Ok(self.state().statuses.get(table).map(|last_sync| SyncStatus {
            table_name: table.to_string(),
            last_sync: *last_sync,
        }))
    }

    async fn record_full_sync(&mut self, table: &str, timestamp: Option<Timestamp>) -> Result<()> {
        self.state().statuses.insert(table.to_string(), timestamp);
        Ok(())
    }

    async fn advance_watermark(&mut self, table: &str, timestamp: Timestamp) -> Result<()> {
        let mut state = self.state();
        match state.statuses.get_mut(table) {
            Some(last_sync) => {
                *last_sync = Some(timestamp);
                Ok(())
            }
            None => bail!("No sync status record for {}", table),
        }
    }

    async fn list_statuses(&mut self) -> Result<Vec<SyncStatus>> {
        Ok(self
            .state()
            .statuses
            .iter()
            .map(|(table, last_sync)| SyncStatus {
                table_name: table.clone(),
                last_sync: *last_sync,
            })
            .collect())
    }
}

/// Watermark stored in a destination row, for asserting that upserts keep it
pub fn row_watermark(row: &Row) -> Option<Timestamp> {
    row.get(2).and_then(timestamp_from_value)
}
