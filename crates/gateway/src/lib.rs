//! rowgate gateway: the single choke point between callers and row storage.
//!
//! The [`AccessGateway`] owns the row store. Every `insert`, `select`,
//! `update`, `delete` and `scan` is authorized against the policy
//! [`Catalog`](policy::Catalog) first. A denial becomes
//! [`Error::AccessDenied`] and the store is left untouched.
//!
//! [`Accounts`] layers the credential tables (`authentication`,
//! `user_cookies`) on top, with typed records.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use gateway::{AccessGateway, Accounts};
//! use policy::{Catalog, Manifest, Principal};
//! use storage::MemoryStore;
//!
//! let catalog = Catalog::new();
//! Manifest::provisioned().apply(&catalog)?;
//! let gateway = AccessGateway::new(Arc::new(catalog), MemoryStore::new());
//!
//! let accounts = Accounts::new(&gateway, Principal::anon());
//! let user = accounts.signup("ada", "salt:hash")?;
//! accounts.upsert_cookies(&user.id, serde_json::json!([{"name": "ds_user"}]))?;
//! assert!(accounts.latest_cookies(&user.id)?.is_some());
//! # Ok::<(), gateway::Error>(())
//! ```

mod accounts;
mod error;
mod gateway;

pub use accounts::{AUTHENTICATION, Accounts, CookieRecord, Credentials, USER_COOKIES, User};
pub use error::{Error, Result};
pub use gateway::AccessGateway;
