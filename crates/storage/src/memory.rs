//! In-memory row store.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::{Error, Result, Row, RowKey, RowStore};

/// A row store held entirely in memory (useful for testing).
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, BTreeMap<RowKey, Row>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RowStore for MemoryStore {
    fn read(&self, table: &str, key: &RowKey) -> Result<Option<Row>> {
        let tables = self.tables.read().map_err(|_| Error::Poisoned)?;
        Ok(tables.get(table).and_then(|rows| rows.get(key)).cloned())
    }

    fn write(&self, table: &str, key: &RowKey, row: &Row) -> Result<()> {
        let mut tables = self.tables.write().map_err(|_| Error::Poisoned)?;
        tables
            .entry(table.to_string())
            .or_default()
            .insert(key.clone(), row.clone());
        Ok(())
    }

    fn delete(&self, table: &str, key: &RowKey) -> Result<bool> {
        let mut tables = self.tables.write().map_err(|_| Error::Poisoned)?;
        Ok(tables
            .get_mut(table)
            .is_some_and(|rows| rows.remove(key).is_some()))
    }

    fn scan(&self, table: &str) -> Result<Vec<(RowKey, Row)>> {
        let tables = self.tables.read().map_err(|_| Error::Poisoned)?;
        Ok(tables
            .get(table)
            .map(|rows| rows.iter().map(|(k, r)| (k.clone(), r.clone())).collect())
            .unwrap_or_default())
    }
}
