// ABOUTME: Table selection filter for a sync run
// ABOUTME: Handles include/exclude lists applied to the source's table enumeration

use anyhow::{bail, Result};

/// Represents which source tables take part in a sync run
#[derive(Debug, Clone, Default)]
pub struct TableFilter {
    include_tables: Option<Vec<String>>,
    exclude_tables: Option<Vec<String>>,
}

impl TableFilter {
    /// Creates a filter from configuration lists
    pub fn new(
        include_tables: Option<Vec<String>>,
        exclude_tables: Option<Vec<String>>,
    ) -> Result<Self> {
        let include_tables = include_tables.filter(|t| !t.is_empty());
        let exclude_tables = exclude_tables.filter(|t| !t.is_empty());

        if include_tables.is_some() && exclude_tables.is_some() {
            bail!("Cannot use both --tables and --exclude-tables");
        }

        for table in include_tables
            .iter()
            .chain(exclude_tables.iter())
            .flatten()
        {
            if table.trim().is_empty() {
                bail!("Table names in filters cannot be empty");
            }
        }

        Ok(Self {
            include_tables,
            exclude_tables,
        })
    }

    /// Creates an empty filter (sync everything)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Checks if any filters are active
    pub fn is_empty(&self) -> bool {
        self.include_tables.is_none() && self.exclude_tables.is_none()
    }

    /// Determines if a table should be synced
    pub fn should_sync_table(&self, table: &str) -> bool {
        if let Some(ref include) = self.include_tables {
            if !include.iter().any(|t| t == table) {
                return false;
            }
        }

        if let Some(ref exclude) = self.exclude_tables {
            if exclude.iter().any(|t| t == table) {
                return false;
            }
        }

        true
    }

    /// Applies the filter to an enumeration, preserving source order
    pub fn apply(&self, tables: Vec<String>) -> Vec<String> {
        tables
            .into_iter()
            .filter(|t| self.should_sync_table(t))
            .collect()
    }

    /// Tables named in the include list that the source does not have
    pub fn missing_includes(&self, tables: &[String]) -> Vec<String> {
        match self.include_tables {
            Some(ref include) => include
                .iter()
                .filter(|t| !tables.contains(t))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }
}
