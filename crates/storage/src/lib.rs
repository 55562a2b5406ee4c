//! Row storage for rowgate.
//!
//! This crate is the bottom of the stack: it persists rows and nothing else.
//! It performs no authorization. Every call that reaches a [`RowStore`] is
//! expected to have been admitted by the access gateway first.
//!
//! # Core Concepts
//!
//! ## Row
//!
//! A [`Row`] is a flat JSON object of column values. The store treats it as
//! opaque; only policy predicates look inside.
//!
//! ## RowKey
//!
//! A [`RowKey`] identifies a row within its table. Keys can be supplied by
//! the caller or generated with [`RowKey::generate`].
//!
//! ## RowStore
//!
//! The [`RowStore`] trait is the boundary to the backing store. Two
//! implementations ship with the crate:
//!
//! - [`SqliteStore`]: persistent, one SQLite file
//! - [`MemoryStore`]: in-process, for tests and ephemeral use
//!
//! # Example
//!
//! ```no_run
//! use storage::{Row, RowKey, RowStore, SqliteStore};
//!
//! let store = SqliteStore::open("rows.db")?;
//! let key = RowKey::generate();
//! store.write("authentication", &key, &Row::new().with("username", "ada"))?;
//!
//! for (key, row) in store.scan("authentication")? {
//!     println!("{key}: {:?}", row.get("username"));
//! }
//! # Ok::<(), storage::Error>(())
//! ```

mod error;
mod memory;
mod row;
mod sqlite;
mod store;

pub use error::{Error, Result};
pub use memory::MemoryStore;
pub use row::{Row, RowKey};
pub use sqlite::SqliteStore;
pub use store::RowStore;
