//! The access gateway: every row operation passes through here.

use std::sync::{Arc, Mutex};

use policy::{Catalog, Decision, Operation, PolicySnapshot, Principal};
use storage::{Row, RowKey, RowStore};

use crate::{Error, Result};

/// Sole owner of a row store. Each operation is authorized against the
/// catalog before the store is touched, and a denial is an
/// [`Error::AccessDenied`], never a silent no-op.
pub struct AccessGateway<S> {
    catalog: Arc<Catalog>,
    store: S,
    /// Held across an insert's duplicate-key check and its write.
    inserts: Mutex<()>,
    /// Held by [`Accounts`](crate::Accounts) across its check-then-write sequences.
    accounts: Mutex<()>,
}

impl<S: RowStore> AccessGateway<S> {
    pub fn new(catalog: Arc<Catalog>, store: S) -> Self {
        Self {
            catalog,
            store,
            inserts: Mutex::new(()),
            accounts: Mutex::new(()),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Insert a new row. Only the `WITH CHECK` clause is consulted.
    pub fn insert(&self, table: &str, principal: &Principal, key: &RowKey, row: &Row) -> Result<()> {
        let snapshot = self.snapshot(table, Operation::Insert, principal)?;
        Self::require(&snapshot, table, Operation::Insert, principal, Some(row), None)?;

        let _guard = self.inserts.lock().map_err(|_| storage::Error::Poisoned)?;
        if self.store.read(table, key)?.is_some() {
            return Err(Error::DuplicateKey {
                table: table.to_string(),
                key: key.clone(),
            });
        }
        self.store.write(table, key, row)?;
        Ok(())
    }

    /// Read one row. `None` when no row has the key.
    pub fn select(&self, table: &str, principal: &Principal, key: &RowKey) -> Result<Option<Row>> {
        let snapshot = self.snapshot(table, Operation::Select, principal)?;
        let Some(row) = self.store.read(table, key)? else {
            return Ok(None);
        };
        Self::require(&snapshot, table, Operation::Select, principal, None, Some(&row))?;
        Ok(Some(row))
    }

    /// Replace an existing row. Both `USING` (old row) and `WITH CHECK`
    /// (new row) must pass.
    pub fn update(&self, table: &str, principal: &Principal, key: &RowKey, row: &Row) -> Result<()> {
        let snapshot = self.snapshot(table, Operation::Update, principal)?;
        let existing = self.existing(table, key)?;
        Self::require(
            &snapshot,
            table,
            Operation::Update,
            principal,
            Some(row),
            Some(&existing),
        )?;
        self.store.write(table, key, row)?;
        Ok(())
    }

    /// Delete an existing row.
    pub fn delete(&self, table: &str, principal: &Principal, key: &RowKey) -> Result<()> {
        let snapshot = self.snapshot(table, Operation::Delete, principal)?;
        let existing = self.existing(table, key)?;
        Self::require(
            &snapshot,
            table,
            Operation::Delete,
            principal,
            None,
            Some(&existing),
        )?;
        self.store.delete(table, key)?;
        Ok(())
    }

    /// Every row of `table` visible to `principal`, ordered by key.
    ///
    /// Rows the `USING` clause rejects are left out rather than failing the
    /// scan. With no applicable policy at all the scan is denied outright.
    pub fn scan(&self, table: &str, principal: &Principal) -> Result<Vec<(RowKey, Row)>> {
        let snapshot = self.snapshot(table, Operation::Select, principal)?;

        let mut visible = Vec::new();
        for (key, row) in self.store.scan(table)? {
            if snapshot.decide(None, Some(&row))?.is_allowed() {
                visible.push((key, row));
            }
        }
        Ok(visible)
    }

    /// Run `f` with no other account sequence interleaving on this gateway.
    pub(crate) fn exclusive<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _guard = self.accounts.lock().map_err(|_| storage::Error::Poisoned)?;
        f()
    }

    /// Fetch the policy snapshot, failing fast when nothing could ever match.
    fn snapshot(
        &self,
        table: &str,
        operation: Operation,
        principal: &Principal,
    ) -> Result<PolicySnapshot> {
        let snapshot = self.catalog.evaluator().snapshot(table, operation, principal)?;
        if snapshot.is_default_deny() {
            Self::require(&snapshot, table, operation, principal, None, None)?;
        }
        Ok(snapshot)
    }

    fn existing(&self, table: &str, key: &RowKey) -> Result<Row> {
        self.store.read(table, key)?.ok_or_else(|| Error::RowNotFound {
            table: table.to_string(),
            key: key.clone(),
        })
    }

    fn require(
        snapshot: &PolicySnapshot,
        table: &str,
        operation: Operation,
        principal: &Principal,
        candidate: Option<&Row>,
        existing: Option<&Row>,
    ) -> Result<()> {
        match snapshot.decide(candidate, existing)? {
            Decision::Allow { .. } => Ok(()),
            Decision::Deny { reason } => {
                tracing::warn!(table, %operation, %principal, %reason, "access denied");
                Err(Error::AccessDenied {
                    table: table.to_string(),
                    operation,
                    principal: principal.clone(),
                    reason,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy::{DenyReason, Manifest, Policy, Predicate};
    use serde_json::json;
    use storage::{MemoryStore, SqliteStore};

    fn row(value: serde_json::Value) -> Row {
        Row::try_from(value).unwrap()
    }

    fn provisioned() -> AccessGateway<MemoryStore> {
        let catalog = Catalog::new();
        Manifest::provisioned().apply(&catalog).unwrap();
        AccessGateway::new(Arc::new(catalog), MemoryStore::new())
    }

    /// A catalog with one RLS table and no policies yet.
    fn locked(table: &str) -> AccessGateway<MemoryStore> {
        let catalog = Catalog::new();
        catalog.schema().register_table(table).unwrap();
        catalog.schema().enable_rls(table).unwrap();
        AccessGateway::new(Arc::new(catalog), MemoryStore::new())
    }

    #[test]
    fn test_anon_crud_on_provisioned_tables() {
        let gateway = provisioned();
        let anon = Principal::anon();
        let key = RowKey::from("1");
        let original = row(json!({"id": "1", "username": "ada", "password_hash": "s:h"}));

        gateway.insert("authentication", &anon, &key, &original).unwrap();
        assert_eq!(
            gateway.select("authentication", &anon, &key).unwrap(),
            Some(original.clone())
        );

        let changed = original.with("username", "ada2");
        gateway.update("authentication", &anon, &key, &changed).unwrap();
        assert_eq!(gateway.scan("authentication", &anon).unwrap(), vec![(key.clone(), changed)]);

        gateway.delete("authentication", &anon, &key).unwrap();
        assert_eq!(gateway.select("authentication", &anon, &key).unwrap(), None);
    }

    #[test]
    fn test_other_principal_is_denied_without_touching_store() {
        let gateway = provisioned();
        let stranger = Principal::new("stranger");
        let key = RowKey::from("1");

        let err = gateway
            .insert("authentication", &stranger, &key, &Row::new())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::AccessDenied {
                reason: DenyReason::NoMatchingPolicy,
                ..
            }
        ));
        assert!(gateway.scan("authentication", &Principal::anon()).unwrap().is_empty());

        // Missing rows are not revealed to callers with no policy either.
        assert!(matches!(
            gateway.delete("authentication", &stranger, &key),
            Err(Error::AccessDenied { .. })
        ));
        assert!(matches!(
            gateway.scan("authentication", &stranger),
            Err(Error::AccessDenied { .. })
        ));
    }

    #[test]
    fn test_user_cookies_delete_without_policy() {
        let gateway = locked("user_cookies");
        let anon = Principal::anon();
        for operation in [Operation::Insert, Operation::Select] {
            gateway
                .catalog()
                .add_policy(Policy::permissive("user_cookies", operation, anon.clone()))
                .unwrap();
        }

        let key = RowKey::from("c1");
        gateway
            .insert("user_cookies", &anon, &key, &row(json!({"user_id": "1"})))
            .unwrap();

        let err = gateway.delete("user_cookies", &anon, &key).unwrap_err();
        assert!(matches!(err, Error::AccessDenied { operation: Operation::Delete, .. }));
        assert!(gateway.select("user_cookies", &anon, &key).unwrap().is_some());
    }

    #[test]
    fn test_update_rejected_by_check_leaves_row_unchanged() {
        let gateway = locked("t");
        let anon = Principal::anon();
        let catalog = gateway.catalog();
        catalog.add_policy(Policy::permissive("t", Operation::Insert, anon.clone())).unwrap();
        catalog.add_policy(Policy::permissive("t", Operation::Select, anon.clone())).unwrap();
        catalog
            .add_policy(
                Policy::builder("frozen", "t", Operation::Update)
                    .to(anon.clone())
                    .using(Predicate::always())
                    .with_check(Predicate::never())
                    .build(),
            )
            .unwrap();

        let key = RowKey::from("k");
        let original = row(json!({"v": 1}));
        gateway.insert("t", &anon, &key, &original).unwrap();

        let err = gateway.update("t", &anon, &key, &row(json!({"v": 2}))).unwrap_err();
        assert!(matches!(
            err,
            Error::AccessDenied {
                reason: DenyReason::PredicateFailed,
                ..
            }
        ));
        assert_eq!(gateway.select("t", &anon, &key).unwrap(), Some(original));
    }

    #[test]
    fn test_scan_filters_by_ownership() {
        let gateway = locked("user_cookies");
        let catalog = gateway.catalog();
        catalog
            .add_policy(Policy::permissive("user_cookies", Operation::Insert, Principal::public()))
            .unwrap();
        catalog
            .add_policy(
                Policy::builder("owner_select", "user_cookies", Operation::Select)
                    .to(Principal::public())
                    .using_expr("user_id = auth.uid()")
                    .unwrap()
                    .build(),
            )
            .unwrap();

        let alice = Principal::new("alice");
        let bob = Principal::new("bob");
        gateway
            .insert("user_cookies", &alice, &"a".into(), &row(json!({"user_id": "alice"})))
            .unwrap();
        gateway
            .insert("user_cookies", &bob, &"b".into(), &row(json!({"user_id": "bob"})))
            .unwrap();

        let keys: Vec<_> = gateway
            .scan("user_cookies", &alice)
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![RowKey::from("a")]);

        assert!(matches!(
            gateway.select("user_cookies", &alice, &"b".into()),
            Err(Error::AccessDenied { .. })
        ));
    }

    #[test]
    fn test_duplicate_and_missing_keys() {
        let gateway = provisioned();
        let anon = Principal::anon();
        let key = RowKey::from("1");
        gateway.insert("user_cookies", &anon, &key, &Row::new()).unwrap();

        assert!(matches!(
            gateway.insert("user_cookies", &anon, &key, &Row::new()),
            Err(Error::DuplicateKey { .. })
        ));
        assert!(matches!(
            gateway.update("user_cookies", &anon, &"2".into(), &Row::new()),
            Err(Error::RowNotFound { .. })
        ));
    }

    #[test]
    fn test_predicate_errors_reach_the_caller() {
        let gateway = locked("t");
        let anon = Principal::anon();
        for operation in Operation::ALL {
            let broken = Predicate::from_fn("broken", |_, _| Err("boom".into()));
            let builder = Policy::builder(format!("broken_{operation}"), "t", operation).to(anon.clone());
            let builder = if operation == Operation::Insert {
                builder.with_check(broken)
            } else {
                builder.using(broken)
            };
            let catalog = gateway.catalog();
            catalog.add_policy(Policy::permissive("t", operation, anon.clone())).unwrap();
            catalog.add_policy(builder.build()).unwrap();
        }

        let key = RowKey::from("k");
        let original = row(json!({"v": 1}));
        gateway.store.write("t", &key, &original).unwrap();

        let is_predicate_error =
            |err: Error| matches!(err, Error::Policy(policy::Error::PredicateEvaluation { .. }));

        let fresh = RowKey::from("new");
        assert!(is_predicate_error(
            gateway.insert("t", &anon, &fresh, &original).unwrap_err()
        ));
        assert_eq!(gateway.store.read("t", &fresh).unwrap(), None);

        assert!(is_predicate_error(gateway.select("t", &anon, &key).unwrap_err()));

        assert!(is_predicate_error(
            gateway.update("t", &anon, &key, &row(json!({"v": 2}))).unwrap_err()
        ));
        assert!(is_predicate_error(gateway.delete("t", &anon, &key).unwrap_err()));
        assert_eq!(gateway.store.read("t", &key).unwrap(), Some(original));

        assert!(is_predicate_error(gateway.scan("t", &anon).unwrap_err()));
    }

    #[test]
    fn test_unknown_table() {
        let gateway = provisioned();
        assert!(matches!(
            gateway.select("sessions", &Principal::anon(), &"1".into()),
            Err(Error::Policy(policy::Error::UnknownTable(_)))
        ));
    }

    #[test]
    fn test_rls_disabled_bypasses_policies() {
        let catalog = Catalog::new();
        catalog.schema().register_table("legacy").unwrap();
        let gateway = AccessGateway::new(Arc::new(catalog), SqliteStore::in_memory().unwrap());

        let anyone = Principal::new("anyone");
        let key = RowKey::from("1");
        gateway.insert("legacy", &anyone, &key, &Row::new()).unwrap();
        gateway.delete("legacy", &anyone, &key).unwrap();
    }

    #[test]
    fn test_policy_change_applies_to_later_requests() {
        let gateway = provisioned();
        let anon = Principal::anon();
        gateway
            .insert("user_cookies", &anon, &"1".into(), &Row::new())
            .unwrap();

        gateway
            .catalog()
            .remove_policy("user_cookies", "anon_select_user_cookies")
            .unwrap();
        assert!(matches!(
            gateway.select("user_cookies", &anon, &"1".into()),
            Err(Error::AccessDenied { .. })
        ));
    }

    #[test]
    fn test_concurrent_requests() {
        let gateway = provisioned();
        std::thread::scope(|scope| {
            for worker in 0..4 {
                let gateway = &gateway;
                scope.spawn(move || {
                    let anon = Principal::anon();
                    for i in 0..25 {
                        let key = RowKey::new(format!("{worker}-{i}"));
                        gateway.insert("user_cookies", &anon, &key, &Row::new()).unwrap();
                        assert!(gateway.select("user_cookies", &anon, &key).unwrap().is_some());
                    }
                });
            }
        });
        assert_eq!(gateway.scan("user_cookies", &Principal::anon()).unwrap().len(), 100);
    }
}
