//! The row store boundary.

use crate::{Result, Row, RowKey};

/// Trait for row stores.
///
/// A row store persists rows keyed by `(table, key)` and knows nothing about
/// authorization. Callers are expected to gate every call through an access
/// layer before reaching it.
pub trait RowStore: Send + Sync {
    /// Read a row, or `None` if no row has that key.
    fn read(&self, table: &str, key: &RowKey) -> Result<Option<Row>>;

    /// Write a row, replacing any row already stored under the key.
    fn write(&self, table: &str, key: &RowKey, row: &Row) -> Result<()>;

    /// Delete a row. Returns whether a row was removed.
    fn delete(&self, table: &str, key: &RowKey) -> Result<bool>;

    /// All rows of a table, ordered by key.
    fn scan(&self, table: &str) -> Result<Vec<(RowKey, Row)>>;
}
