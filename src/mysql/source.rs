// ABOUTME: MySqlSource - read-only access to the source database
// ABOUTME: Lists tables, reads DDL and column metadata, counts and pages matching rows

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Params, Value};

use super::value::{timestamp_from_value, timestamp_to_value};
use crate::sync::{
    ColumnInfo, Predicate, Row, RowSource, SchemaProvider, SourceClock, TableDescriptor,
    Timestamp,
};
use crate::utils::quote_mysql_ident;

/// Source side of a sync run, holding one connection for the whole run.
pub struct MySqlSource {
    conn: Conn,
}

impl MySqlSource {
    pub fn new(conn: Conn) -> Self {
        Self { conn }
    }

    pub async fn disconnect(self) -> Result<()> {
        self.conn
            .disconnect()
            .await
            .context("Failed to close source connection")
    }
}

#[async_trait]
impl SchemaProvider for MySqlSource {
    async fn list_tables(&mut self) -> Result<Vec<String>> {
        let rows: Vec<(String, String)> = self
            .conn
            .query("SHOW FULL TABLES")
            .await
            .context("Failed to list source tables")?;

        let tables: Vec<String> = rows
            .into_iter()
            .filter(|(_, table_type)| table_type == "BASE TABLE")
            .map(|(name, _)| name)
            .collect();

        tracing::debug!("Found {} base tables at source", tables.len());
        Ok(tables)
    }

    async fn create_statement(&mut self, table: &str) -> Result<String> {
        let row: Option<(String, String)> = self
            .conn
            .query_first(format!("SHOW CREATE TABLE {}", quote_mysql_ident(table)))
            .await
            .with_context(|| format!("Failed to read creation statement for {}", table))?;

        let (_, ddl) =
            row.with_context(|| format!("SHOW CREATE TABLE returned nothing for {}", table))?;
        Ok(ddl)
    }

    async fn describe_columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>> {
        type ShowColumnsRow = (String, String, String, String, Option<String>, String);

        let rows: Vec<ShowColumnsRow> = self
            .conn
            .query(format!("SHOW COLUMNS FROM {}", quote_mysql_ident(table)))
            .await
            .with_context(|| format!("Failed to describe columns of {}", table))?;

        Ok(rows
            .into_iter()
            .map(|(field, column_type, null, key, _default, _extra)| ColumnInfo {
                name: field,
                column_type,
                is_primary_key: key == "PRI",
                is_nullable: null == "YES",
            })
            .collect())
    }
}

#[async_trait]
impl RowSource for MySqlSource {
    async fn count_rows(&mut self, table: &TableDescriptor, predicate: &Predicate) -> Result<u64> {
        let query = build_count_query(table, predicate)?;
        let count: Option<u64> = self
            .conn
            .exec_first(query.as_str(), predicate_params(predicate, None))
            .await
            .with_context(|| format!("Failed to count rows in {}", table.name))?;

        Ok(count.unwrap_or(0))
    }

    async fn fetch_page(
        &mut self,
        table: &TableDescriptor,
        predicate: &Predicate,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Row>> {
        let query = build_page_query(table, predicate)?;
        let rows: Vec<mysql_async::Row> = self
            .conn
            .exec(
                query.as_str(),
                predicate_params(predicate, Some((limit, offset))),
            )
            .await
            .with_context(|| {
                format!(
                    "Failed to read rows {}..{} from {}",
                    offset,
                    offset + limit,
                    table.name
                )
            })?;

        Ok(rows.into_iter().map(mysql_async::Row::unwrap).collect())
    }
}

#[async_trait]
impl SourceClock for MySqlSource {
    async fn current_timestamp(&mut self) -> Result<Timestamp> {
        let now: Option<Value> = self
            .conn
            .query_first("SELECT NOW(6)")
            .await
            .context("Failed to read source clock")?;

        now.as_ref()
            .and_then(timestamp_from_value)
            .context("Source returned an unreadable NOW()")
    }
}

fn where_clause(table: &TableDescriptor, predicate: &Predicate) -> Result<String> {
    match predicate {
        Predicate::All => Ok(String::new()),
        Predicate::WatermarkAfter(_) => match table.watermark_column() {
            Some(column) => Ok(format!(" WHERE {} > ?", quote_mysql_ident(column))),
            None => bail!(
                "Table {} has no watermark column to filter on",
                table.name
            ),
        },
    }
}

/// Positional parameters for a predicate, optionally followed by LIMIT/OFFSET.
fn predicate_params(predicate: &Predicate, page: Option<(u64, u64)>) -> Params {
    let mut values = Vec::new();
    if let Predicate::WatermarkAfter(ts) = predicate {
        values.push(timestamp_to_value(ts));
    }
    if let Some((limit, offset)) = page {
        values.push(Value::UInt(limit));
        values.push(Value::UInt(offset));
    }

    if values.is_empty() {
        Params::Empty
    } else {
        Params::Positional(values)
    }
}

/// Build the row count query, e.g.
///
/// ```sql
/// SELECT COUNT(*) FROM `orders` WHERE `time_stamp` > ?
/// ```
fn build_count_query(table: &TableDescriptor, predicate: &Predicate) -> Result<String> {
    Ok(format!(
        "SELECT COUNT(*) FROM {}{}",
        quote_mysql_ident(&table.name),
        where_clause(table, predicate)?
    ))
}

/// Build the page query, e.g.
///
/// ```sql
/// SELECT `id`, `total`, `time_stamp` FROM `orders` WHERE `time_stamp` > ?
/// ORDER BY `time_stamp`, `id` LIMIT ? OFFSET ?
/// ```
///
/// The ORDER BY keeps offsets stable across pages.
fn build_page_query(table: &TableDescriptor, predicate: &Predicate) -> Result<String> {
    let columns: Vec<String> = table
        .column_names()
        .into_iter()
        .map(quote_mysql_ident)
        .collect();
    let order_by: Vec<String> = table
        .order_by_columns()
        .into_iter()
        .map(quote_mysql_ident)
        .collect();

    Ok(format!(
        "SELECT {} FROM {}{} ORDER BY {} LIMIT ? OFFSET ?",
        columns.join(", "),
        quote_mysql_ident(&table.name),
        where_clause(table, predicate)?,
        order_by.join(", ")
    ))
}
