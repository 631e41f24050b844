// ABOUTME: MySqlDestination - writes to the destination database
// ABOUTME: DDL execution, per-page transactions, upserts and the sync status table

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Params, Value};

use super::value::{timestamp_from_value, timestamp_to_value};
use crate::sync::{
    Row, RowSink, SchemaTarget, SyncStatus, TableDescriptor, Timestamp, WatermarkStore,
};
use crate::utils::quote_mysql_ident;

/// Destination side of a sync run, holding one connection for the whole run.
///
/// Transactions are driven with plain `START TRANSACTION` / `COMMIT` /
/// `ROLLBACK` statements so the caller decides their boundaries.
pub struct MySqlDestination {
    conn: Conn,
    status_table: String,
}

impl MySqlDestination {
    pub fn new(conn: Conn, status_table: &str) -> Self {
        Self {
            conn,
            status_table: status_table.to_string(),
        }
    }

    pub async fn disconnect(self) -> Result<()> {
        self.conn
            .disconnect()
            .await
            .context("Failed to close destination connection")
    }
}

#[async_trait]
impl SchemaTarget for MySqlDestination {
    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        let count: Option<u64> = self
            .conn
            .exec_first(
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_name = ?",
                (table,),
            )
            .await
            .with_context(|| format!("Failed to check existence of {}", table))?;

        Ok(count.unwrap_or(0) > 0)
    }

    async fn execute_ddl(&mut self, ddl: &str) -> Result<()> {
        self.conn
            .query_drop(ddl)
            .await
            .context("Failed to execute DDL on destination")
    }
}

#[async_trait]
impl RowSink for MySqlDestination {
    async fn begin(&mut self) -> Result<()> {
        self.conn
            .query_drop("START TRANSACTION")
            .await
            .context("Failed to start transaction")
    }

    async fn upsert_row(&mut self, table: &TableDescriptor, row: &Row) -> Result<()> {
        if row.len() != table.columns.len() {
            bail!(
                "Row has {} values but {} has {} columns",
                row.len(),
                table.name,
                table.columns.len()
            );
        }

        let query = build_upsert_query(table);
        self.conn
            .exec_drop(query.as_str(), Params::Positional(row.clone()))
            .await
            .with_context(|| format!("Failed to upsert row into {}", table.name))
    }

    async fn commit(&mut self) -> Result<()> {
        self.conn
            .query_drop("COMMIT")
            .await
            .context("Failed to commit transaction")
    }

    async fn rollback(&mut self) -> Result<()> {
        self.conn
            .query_drop("ROLLBACK")
            .await
            .context("Failed to roll back transaction")
    }
}

#[async_trait]
impl WatermarkStore for MySqlDestination {
    async fn ensure_status_table(&mut self) -> Result<()> {
        self.conn
            .query_drop(build_status_table_ddl(&self.status_table))
            .await
            .with_context(|| format!("Failed to create status table {}", self.status_table))?;

        // A table left by an older job may store whole seconds only
        let column: Option<(String, Option<u64>)> = self
            .conn
            .exec_first(
                "SELECT DATA_TYPE, DATETIME_PRECISION FROM information_schema.columns \
                 WHERE table_schema = DATABASE() AND table_name = ? AND column_name = 'last_sync'",
                (self.status_table.as_str(),),
            )
            .await
            .with_context(|| format!("Failed to inspect status table {}", self.status_table))?;

        if let Some((data_type, precision)) = column {
            if needs_precision_upgrade(&data_type, precision) {
                tracing::warn!(
                    "Status table {} stores last_sync as {}({}); converting to DATETIME(6)",
                    self.status_table,
                    data_type,
                    precision.unwrap_or(0)
                );
                self.conn
                    .query_drop(format!(
                        "ALTER TABLE {} MODIFY last_sync DATETIME(6) NULL",
                        quote_mysql_ident(&self.status_table)
                    ))
                    .await
                    .with_context(|| {
                        format!("Failed to convert last_sync of {}", self.status_table)
                    })?;
            }
        }

        Ok(())
    }

    async fn get_status(&mut self, table: &str) -> Result<Option<SyncStatus>> {
        let query = format!(
            "SELECT table_name, last_sync FROM {} WHERE table_name = ?",
            quote_mysql_ident(&self.status_table)
        );
        let row: Option<(String, Value)> = self
            .conn
            .exec_first(query.as_str(), (table,))
            .await
            .with_context(|| format!("Failed to read sync status for {}", table))?;

        Ok(row.map(|(table_name, last_sync)| SyncStatus {
            table_name,
            last_sync: timestamp_from_value(&last_sync),
        }))
    }

    async fn record_full_sync(&mut self, table: &str, timestamp: Option<Timestamp>) -> Result<()> {
        let query = format!(
            "INSERT INTO {} (table_name, last_sync) VALUES (?, ?) \
             ON DUPLICATE KEY UPDATE last_sync = VALUES(last_sync)",
            quote_mysql_ident(&self.status_table)
        );
        let last_sync = timestamp
            .as_ref()
            .map(timestamp_to_value)
            .unwrap_or(Value::NULL);

        self.conn
            .exec_drop(
                query.as_str(),
                Params::Positional(vec![Value::from(table), last_sync]),
            )
            .await
            .with_context(|| format!("Failed to record full sync for {}", table))
    }

    async fn advance_watermark(&mut self, table: &str, timestamp: Timestamp) -> Result<()> {
        let query = format!(
            "UPDATE {} SET last_sync = ? WHERE table_name = ?",
            quote_mysql_ident(&self.status_table)
        );

        self.conn
            .exec_drop(
                query.as_str(),
                Params::Positional(vec![timestamp_to_value(&timestamp), Value::from(table)]),
            )
            .await
            .with_context(|| format!("Failed to advance watermark for {}", table))?;

        tracing::debug!("Watermark for {} advanced to {}", table, timestamp);
        Ok(())
    }

    async fn list_statuses(&mut self) -> Result<Vec<SyncStatus>> {
        let query = format!(
            "SELECT table_name, last_sync FROM {} ORDER BY table_name",
            quote_mysql_ident(&self.status_table)
        );
        let rows: Vec<(String, Value)> = self
            .conn
            .query(query)
            .await
            .context("Failed to list sync status records")?;

        Ok(rows
            .into_iter()
            .map(|(table_name, last_sync)| SyncStatus {
                table_name,
                last_sync: timestamp_from_value(&last_sync),
            })
            .collect())
    }
}

/// DDL for the status table. `DATETIME(6)` keeps the microseconds of the
/// watermark column; a rounded watermark could skip rows.
fn build_status_table_ddl(status_table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\
         table_name VARCHAR(255) NOT NULL PRIMARY KEY, \
         last_sync DATETIME(6) NULL)",
        quote_mysql_ident(status_table)
    )
}

/// True unless `last_sync` is already a `DATETIME` with microsecond precision.
/// Rounding a backed-off watermark up to the next second could skip rows.
fn needs_precision_upgrade(data_type: &str, precision: Option<u64>) -> bool {
    !data_type.eq_ignore_ascii_case("datetime") || precision.unwrap_or(0) < 6
}

/// Build an upsert query for one row, e.g.
///
/// ```sql
/// INSERT INTO `orders` (`id`, `total`, `time_stamp`) VALUES (?, ?, ?)
/// ON DUPLICATE KEY UPDATE `total` = VALUES(`total`)
/// ```
///
/// The watermark column is never part of the update list.
fn build_upsert_query(table: &TableDescriptor) -> String {
    let columns: Vec<String> = table
        .column_names()
        .into_iter()
        .map(quote_mysql_ident)
        .collect();
    let placeholders = vec!["?"; columns.len()].join(", ");

    let mut updates: Vec<String> = table
        .update_columns()
        .into_iter()
        .map(|c| {
            let quoted = quote_mysql_ident(c);
            format!("{} = VALUES({})", quoted, quoted)
        })
        .collect();

    if updates.is_empty() {
        // Only key and watermark columns; an existing row is left as is
        if let Some(first) = columns.first() {
            updates.push(format!("{} = {}", first, first));
        }
    }

    format!(
        "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
        quote_mysql_ident(&table.name),
        columns.join(", "),
        placeholders,
        updates.join(", ")
    )
}
