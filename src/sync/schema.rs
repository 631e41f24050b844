// ABOUTME: Table descriptors and the schema mirror for destination bootstrapping
// ABOUTME: Creates missing destination tables verbatim from the source DDL

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use super::{Row, Timestamp};
use crate::mysql::value::timestamp_from_value;

/// Read-only schema introspection on the source.
#[async_trait]
pub trait SchemaProvider: Send {
    /// Base tables in source enumeration order
    async fn list_tables(&mut self) -> Result<Vec<String>>;

    /// Full creation statement for a table, including keys and column types
    async fn create_statement(&mut self, table: &str) -> Result<String>;

    /// Column metadata in ordinal order
    async fn describe_columns(&mut self, table: &str) -> Result<Vec<ColumnInfo>>;
}

/// DDL surface of the destination.
#[async_trait]
pub trait SchemaTarget: Send {
    async fn table_exists(&mut self, table: &str) -> Result<bool>;

    async fn execute_ddl(&mut self, ddl: &str) -> Result<()>;
}

/// Information about a table column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub column_type: String,
    pub is_primary_key: bool,
    pub is_nullable: bool,
}

impl ColumnInfo {
    pub fn new(name: &str, column_type: &str, is_primary_key: bool, is_nullable: bool) -> Self {
        Self {
            name: name.to_string(),
            column_type: column_type.to_string(),
            is_primary_key,
            is_nullable,
        }
    }
}

/// Column layout of one table, obtained once per sync pass.
///
/// Rows handled by the engine are aligned to `columns`. At most one column is
/// the watermark column; it is written on insert and never on the conflict
/// path of an upsert.
#[derive(Debug, Clone)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    watermark_index: Option<usize>,
}

impl TableDescriptor {
    /// Build a descriptor, flagging the column named `watermark_column`.
    ///
    /// Fails only when the table has no columns. Tables without a primary key
    /// are accepted; their upserts can only match on unique keys.
    pub fn new(name: &str, columns: Vec<ColumnInfo>, watermark_column: &str) -> Result<Self> {
        if columns.is_empty() {
            bail!("Table {} has no columns", name);
        }

        let watermark_index = columns.iter().position(|c| c.name == watermark_column);

        Ok(Self {
            name: name.to_string(),
            columns,
            watermark_index,
        })
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn primary_key_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.is_primary_key)
            .map(|c| c.name.as_str())
            .collect()
    }

    pub fn watermark_column(&self) -> Option<&str> {
        self.watermark_index
            .map(|idx| self.columns[idx].name.as_str())
    }

    pub fn has_watermark(&self) -> bool {
        self.watermark_index.is_some()
    }

    pub fn has_primary_key(&self) -> bool {
        self.columns.iter().any(|c| c.is_primary_key)
    }

    /// Columns rewritten when an upsert hits an existing key
    pub fn update_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(idx, c)| !c.is_primary_key && Some(*idx) != self.watermark_index)
            .map(|(_, c)| c.name.as_str())
            .collect()
    }

    /// Deterministic paging order: watermark first (if any), then the
    /// primary key, or every other column when there is none
    pub fn order_by_columns(&self) -> Vec<&str> {
        let tiebreak = if self.has_primary_key() {
            self.primary_key_columns()
        } else {
            self.column_names()
        };

        let mut order: Vec<&str> = self.watermark_column().into_iter().collect();
        order.extend(
            tiebreak
                .into_iter()
                .filter(|c| Some(*c) != self.watermark_column()),
        );
        order
    }

    /// Watermark value of a row, if the table has one and the value is set
    pub fn watermark_of(&self, row: &Row) -> Option<Timestamp> {
        let idx = self.watermark_index?;
        row.get(idx).and_then(timestamp_from_value)
    }

    /// Highest watermark value among `rows`
    pub fn max_watermark(&self, rows: &[Row]) -> Option<Timestamp> {
        rows.iter().filter_map(|row| self.watermark_of(row)).max()
    }
}

/// Make sure `table` exists on the destination, creating it from the source DDL.
///
/// Returns whether the table had to be created. DDL failures are propagated so
/// that no rows are copied into a table that does not exist.
pub async fn ensure_table<S, D>(source: &mut S, destination: &mut D, table: &str) -> Result<bool>
where
    S: SchemaProvider + ?Sized,
    D: SchemaTarget + ?Sized,
{
    if destination
        .table_exists(table)
        .await
        .with_context(|| format!("Failed to check whether {} exists on destination", table))?
    {
        return Ok(false);
    }

    tracing::info!("Table {} does not exist on destination. Creating table.", table);

    let ddl = source
        .create_statement(table)
        .await
        .with_context(|| format!("Failed to read creation statement for {}", table))?;

    destination
        .execute_ddl(&ddl)
        .await
        .with_context(|| format!("Failed to create table {} on destination", table))?;

    Ok(true)
}
