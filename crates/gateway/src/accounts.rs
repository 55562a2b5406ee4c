//! Typed access to the credential tables.
//!
//! [`Accounts`] is what the application layer calls instead of issuing raw
//! row operations against `authentication` and `user_cookies`. Everything
//! still runs through the [`AccessGateway`] as one principal, so the tables'
//! policies apply unchanged.
//!
//! Password hashing and verification happen elsewhere: this module stores
//! and returns the hash it is given.

use chrono::{DateTime, Utc};
use policy::Principal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use storage::{Row, RowKey, RowStore};

use crate::{AccessGateway, Error, Result};

pub const AUTHENTICATION: &str = "authentication";
pub const USER_COOKIES: &str = "user_cookies";

/// A user as returned to callers, without the password hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
}

/// The stored credentials of a user, for an external verifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub id: String,
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AuthenticationRow {
    id: String,
    username: String,
    password_hash: String,
    created_at: DateTime<Utc>,
}

/// A stored cookie snapshot for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieRecord {
    pub id: String,
    pub user_id: String,
    pub cookies: Value,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Credential and cookie operations, executed as one principal.
pub struct Accounts<'g, S> {
    gateway: &'g AccessGateway<S>,
    principal: Principal,
}

impl<'g, S: RowStore> Accounts<'g, S> {
    pub fn new(gateway: &'g AccessGateway<S>, principal: Principal) -> Self {
        Self { gateway, principal }
    }

    /// Create a user. Fails with [`Error::UsernameTaken`] if the name exists.
    ///
    /// Concurrent signups through the same gateway are serialized, so a
    /// username is claimed at most once.
    pub fn signup(&self, username: &str, password_hash: &str) -> Result<User> {
        self.gateway.exclusive(|| {
            if self.find_user_row(username)?.is_some() {
                return Err(Error::UsernameTaken(username.to_string()));
            }

            let key = RowKey::generate();
            let record = AuthenticationRow {
                id: key.to_string(),
                username: username.to_string(),
                password_hash: password_hash.to_string(),
                created_at: Utc::now(),
            };
            let row = to_row(AUTHENTICATION, &key, &record)?;
            self.gateway.insert(AUTHENTICATION, &self.principal, &key, &row)?;

            tracing::info!(user_id = %record.id, "user signed up");
            Ok(user_of(record))
        })
    }

    /// Stored credentials for `username`, if the user exists.
    pub fn credentials(&self, username: &str) -> Result<Option<Credentials>> {
        Ok(self.find_user_row(username)?.map(|row| Credentials {
            id: row.id,
            username: row.username,
            password_hash: row.password_hash,
        }))
    }

    pub fn user_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self.find_user_row(username)?.map(user_of))
    }

    pub fn user_by_id(&self, id: &str) -> Result<Option<User>> {
        let key = RowKey::from(id);
        match self.gateway.select(AUTHENTICATION, &self.principal, &key)? {
            Some(row) => Ok(Some(user_of(from_row(AUTHENTICATION, &key, row)?))),
            None => Ok(None),
        }
    }

    /// Store cookies for a user, keeping at most one row per user: an
    /// existing row is updated in place, otherwise a new one is inserted.
    pub fn upsert_cookies(&self, user_id: &str, cookies: Value) -> Result<CookieRecord> {
        self.gateway.exclusive(|| {
            let now = Utc::now();

            if let Some(mut record) = self.latest_cookies(user_id)? {
                record.cookies = cookies;
                record.updated_at = Some(now);
                let key = RowKey::from(record.id.as_str());
                let row = to_row(USER_COOKIES, &key, &record)?;
                self.gateway.update(USER_COOKIES, &self.principal, &key, &row)?;
                tracing::debug!(user_id, cookie_id = %record.id, "cookies updated");
                return Ok(record);
            }

            let key = RowKey::generate();
            let record = CookieRecord {
                id: key.to_string(),
                user_id: user_id.to_string(),
                cookies,
                created_at: now,
                updated_at: None,
            };
            let row = to_row(USER_COOKIES, &key, &record)?;
            self.gateway.insert(USER_COOKIES, &self.principal, &key, &row)?;
            tracing::debug!(user_id, cookie_id = %record.id, "cookies stored");
            Ok(record)
        })
    }

    /// All cookie snapshots for a user, newest first.
    pub fn all_cookies(&self, user_id: &str) -> Result<Vec<CookieRecord>> {
        let mut records = Vec::new();
        for (key, row) in self.gateway.scan(USER_COOKIES, &self.principal)? {
            if row.get("user_id").and_then(Value::as_str) == Some(user_id) {
                records.push(from_row::<CookieRecord>(USER_COOKIES, &key, row)?);
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// The most recent cookie snapshot for a user.
    pub fn latest_cookies(&self, user_id: &str) -> Result<Option<CookieRecord>> {
        Ok(self.all_cookies(user_id)?.into_iter().next())
    }

    /// Delete one cookie row. Returns whether it existed.
    pub fn delete_cookies(&self, cookie_id: &str) -> Result<bool> {
        match self
            .gateway
            .delete(USER_COOKIES, &self.principal, &RowKey::from(cookie_id))
        {
            Ok(()) => Ok(true),
            Err(Error::RowNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn find_user_row(&self, username: &str) -> Result<Option<AuthenticationRow>> {
        for (key, row) in self.gateway.scan(AUTHENTICATION, &self.principal)? {
            if row.get("username").and_then(Value::as_str) == Some(username) {
                return from_row(AUTHENTICATION, &key, row).map(Some);
            }
        }
        Ok(None)
    }
}

fn user_of(row: AuthenticationRow) -> User {
    User {
        id: row.id,
        username: row.username,
        created_at: row.created_at,
    }
}

fn to_row<T: Serialize>(table: &str, key: &RowKey, record: &T) -> Result<Row> {
    let malformed = |reason: String| Error::MalformedRow {
        table: table.to_string(),
        key: key.clone(),
        reason,
    };
    let value = serde_json::to_value(record).map_err(|e| malformed(e.to_string()))?;
    Row::try_from(value).map_err(|other| malformed(format!("expected an object, found {other}")))
}

fn from_row<T: DeserializeOwned>(table: &str, key: &RowKey, row: Row) -> Result<T> {
    serde_json::from_value(row.into_value()).map_err(|e| Error::MalformedRow {
        table: table.to_string(),
        key: key.clone(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy::{Catalog, Manifest, Operation, Policy};
    use serde_json::json;
    use std::sync::Arc;
    use storage::{MemoryStore, SqliteStore};

    fn gateway() -> AccessGateway<SqliteStore> {
        let catalog = Catalog::new();
        Manifest::provisioned().apply(&catalog).unwrap();
        AccessGateway::new(Arc::new(catalog), SqliteStore::in_memory().unwrap())
    }

    #[test]
    fn test_signup_and_lookup() {
        let gateway = gateway();
        let accounts = Accounts::new(&gateway, Principal::anon());

        let user = accounts.signup("ada", "salt:hash").unwrap();
        assert_eq!(accounts.user_by_username("ada").unwrap(), Some(user.clone()));
        assert_eq!(accounts.user_by_id(&user.id).unwrap(), Some(user.clone()));
        assert_eq!(accounts.user_by_username("bob").unwrap(), None);

        let credentials = accounts.credentials("ada").unwrap().unwrap();
        assert_eq!(credentials.password_hash, "salt:hash");
        assert_eq!(credentials.id, user.id);
    }

    #[test]
    fn test_signup_rejects_taken_username() {
        let gateway = gateway();
        let accounts = Accounts::new(&gateway, Principal::anon());
        accounts.signup("ada", "h1").unwrap();
        assert!(matches!(
            accounts.signup("ada", "h2"),
            Err(Error::UsernameTaken(name)) if name == "ada"
        ));
    }

    #[test]
    fn test_concurrent_signups_claim_a_username_once() {
        let gateway = gateway();
        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let gateway = &gateway;
                    scope.spawn(move || {
                        Accounts::new(gateway, Principal::anon()).signup("ada", &format!("h{i}"))
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, Error::UsernameTaken(_))));
        assert_eq!(
            gateway.scan(AUTHENTICATION, &Principal::anon()).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_concurrent_upserts_keep_one_row() {
        let gateway = gateway();
        std::thread::scope(|scope| {
            for i in 0..8 {
                let gateway = &gateway;
                scope.spawn(move || {
                    Accounts::new(gateway, Principal::anon())
                        .upsert_cookies("u1", json!([{"value": i}]))
                        .unwrap();
                });
            }
        });
        let accounts = Accounts::new(&gateway, Principal::anon());
        assert_eq!(accounts.all_cookies("u1").unwrap().len(), 1);
    }

    #[test]
    fn test_upsert_keeps_one_row_per_user() {
        let gateway = gateway();
        let accounts = Accounts::new(&gateway, Principal::anon());

        let first = accounts
            .upsert_cookies("u1", json!([{"name": "ds_user", "value": "a"}]))
            .unwrap();
        assert!(first.updated_at.is_none());

        let second = accounts
            .upsert_cookies("u1", json!([{"name": "ds_user", "value": "b"}]))
            .unwrap();
        assert_eq!(second.id, first.id);
        assert!(second.updated_at.is_some());

        accounts.upsert_cookies("u2", json!([])).unwrap();

        let all = accounts.all_cookies("u1").unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].cookies, json!([{"name": "ds_user", "value": "b"}]));
        assert_eq!(accounts.latest_cookies("u1").unwrap(), Some(second));
        assert_eq!(accounts.latest_cookies("nobody").unwrap(), None);
    }

    #[test]
    fn test_delete_cookies() {
        let gateway = gateway();
        let accounts = Accounts::new(&gateway, Principal::anon());
        let record = accounts.upsert_cookies("u1", json!([])).unwrap();

        assert!(accounts.delete_cookies(&record.id).unwrap());
        assert!(!accounts.delete_cookies(&record.id).unwrap());
        assert!(accounts.all_cookies("u1").unwrap().is_empty());
    }

    #[test]
    fn test_other_principal_cannot_read_credentials() {
        let gateway = gateway();
        Accounts::new(&gateway, Principal::anon())
            .signup("ada", "salt:hash")
            .unwrap();

        let stranger = Accounts::new(&gateway, Principal::new("stranger"));
        assert!(matches!(
            stranger.credentials("ada"),
            Err(Error::AccessDenied { .. })
        ));
    }

    #[test]
    fn test_ownership_policies_scope_cookies() {
        let catalog = Catalog::new();
        catalog.schema().register_table(USER_COOKIES).unwrap();
        catalog.schema().enable_rls(USER_COOKIES).unwrap();
        for operation in Operation::ALL {
            let name = format!("owner_{operation}");
            let policy = Policy::builder(name, USER_COOKIES, operation)
                .to(Principal::public())
                .using_expr("user_id = auth.uid()")
                .unwrap()
                .build();
            catalog.add_policy(policy).unwrap();
        }
        let gateway = AccessGateway::new(Arc::new(catalog), MemoryStore::new());

        let alice = Accounts::new(&gateway, Principal::new("alice"));
        let bob = Accounts::new(&gateway, Principal::new("bob"));
        alice.upsert_cookies("alice", json!(["a"])).unwrap();

        assert!(bob.latest_cookies("alice").unwrap().is_none());
        assert!(matches!(
            bob.upsert_cookies("alice", json!(["forged"])),
            Err(Error::AccessDenied { .. })
        ));
        assert_eq!(alice.all_cookies("alice").unwrap().len(), 1);
    }
}
