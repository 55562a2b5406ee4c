//! Schema registry: which tables exist and whether RLS is on.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::Serialize;

use crate::{Error, Result};

/// Security-relevant attributes of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Table {
    pub name: String,
    pub rls_enabled: bool,
    /// Declared columns, when known. Policies on the table may only
    /// reference these.
    pub columns: Option<Vec<String>>,
}

impl Table {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns
            .as_ref()
            .is_none_or(|cols| cols.iter().any(|c| c == column))
    }
}

/// Registry of tables under the engine's control.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    tables: RwLock<BTreeMap<String, Table>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table with RLS disabled. Re-registering is a no-op.
    pub fn register_table(&self, name: &str) -> Result<()> {
        self.insert(name, None)
    }

    /// Register a table and declare its columns.
    ///
    /// Re-registering keeps the RLS flag and replaces the column list.
    pub fn register_table_with_columns<I, S>(&self, name: &str, columns: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(name, Some(columns.into_iter().map(Into::into).collect()))
    }

    fn insert(&self, name: &str, columns: Option<Vec<String>>) -> Result<()> {
        let mut tables = self.tables.write().map_err(|_| Error::Poisoned)?;
        match tables.get_mut(name) {
            Some(table) => {
                if columns.is_some() {
                    table.columns = columns;
                }
            }
            None => {
                tracing::info!(table = name, "registered table");
                tables.insert(
                    name.to_string(),
                    Table {
                        name: name.to_string(),
                        rls_enabled: false,
                        columns,
                    },
                );
            }
        }
        Ok(())
    }

    /// Turn on row-level security. Idempotent.
    pub fn enable_rls(&self, name: &str) -> Result<()> {
        self.set_rls(name, true)
    }

    /// Return the table to unsecured mode. Idempotent.
    pub fn disable_rls(&self, name: &str) -> Result<()> {
        self.set_rls(name, false)
    }

    fn set_rls(&self, name: &str, enabled: bool) -> Result<()> {
        let mut tables = self.tables.write().map_err(|_| Error::Poisoned)?;
        let table = tables
            .get_mut(name)
            .ok_or_else(|| Error::UnknownTable(name.to_string()))?;
        if table.rls_enabled != enabled {
            table.rls_enabled = enabled;
            tracing::info!(table = name, rls_enabled = enabled, "row level security toggled");
        }
        Ok(())
    }

    pub fn is_rls_enabled(&self, name: &str) -> Result<bool> {
        self.table(name).map(|t| t.rls_enabled)
    }

    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let tables = self.tables.read().map_err(|_| Error::Poisoned)?;
        Ok(tables.contains_key(name))
    }

    /// Snapshot of a single table.
    pub fn table(&self, name: &str) -> Result<Table> {
        let tables = self.tables.read().map_err(|_| Error::Poisoned)?;
        tables
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownTable(name.to_string()))
    }

    /// Snapshot of all tables, sorted by name.
    pub fn tables(&self) -> Result<Vec<Table>> {
        let tables = self.tables.read().map_err(|_| Error::Poisoned)?;
        Ok(tables.values().cloned().collect())
    }

    /// Drop a table from the registry. Callers should also drop its policies;
    /// see [`Catalog::drop_table`](crate::Catalog::drop_table).
    pub fn drop_table(&self, name: &str) -> Result<()> {
        let mut tables = self.tables.write().map_err(|_| Error::Poisoned)?;
        if tables.remove(name).is_none() {
            return Err(Error::UnknownTable(name.to_string()));
        }
        tracing::info!(table = name, "dropped table");
        Ok(())
    }
}
