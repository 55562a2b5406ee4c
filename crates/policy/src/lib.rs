//! Row-level security policies.
//!
//! Core principle: **with RLS on, nothing is visible or writable unless a
//! policy says so.**
//!
//! - [`SchemaRegistry`] tracks tables and whether RLS is enabled on each.
//! - [`PolicyStore`] holds [`Policy`] records: (table, operation, principals,
//!   `USING` predicate, `WITH CHECK` predicate).
//! - [`Evaluator`] answers a [`Request`] with a [`Decision`]. Matching
//!   policies combine with OR, and no match means deny.
//! - [`Catalog`] owns a registry and a store together.
//! - [`Manifest`] declares tables and policies in TOML.
//!
//! # Example
//!
//! ```
//! use policy::{Catalog, Operation, Policy, Principal, Request};
//! use storage::Row;
//!
//! let catalog = Catalog::new();
//! catalog.schema().register_table("user_cookies")?;
//! catalog.schema().enable_rls("user_cookies")?;
//! catalog.add_policy(
//!     Policy::builder("owner_select", "user_cookies", Operation::Select)
//!         .to(Principal::public())
//!         .using_expr("user_id = auth.uid()")?
//!         .build(),
//! )?;
//!
//! let me = Principal::new("42");
//! let row = Row::new().with("user_id", "42");
//! let request = Request::new("user_cookies", Operation::Select, &me).with_existing(&row);
//! assert!(catalog.authorize(&request)?.is_allowed());
//! # Ok::<(), policy::Error>(())
//! ```

mod catalog;
mod error;
mod evaluator;
mod manifest;
mod operation;
mod policy;
mod predicate;
mod schema;
mod store;

pub use catalog::Catalog;
pub use error::{Error, Result};
pub use evaluator::{Decision, DenyReason, Evaluator, PolicySnapshot, Request};
pub use manifest::{Manifest, PROVISIONED_TABLES, PolicyDef, TableDef};
pub use operation::{Operation, Principal};
pub use policy::{Policy, PolicyBuilder};
pub use predicate::{NativePredicate, Predicate};
pub use schema::{SchemaRegistry, Table};
pub use store::PolicyStore;
