//! The catalog: schema registry and policy store as one owned context.

use std::sync::Mutex;

use crate::{
    Decision, Error, Evaluator, Policy, PolicyStore, Request, Result, SchemaRegistry,
};

/// All authorization state for one deployment.
///
/// There is no process-wide catalog. Build one, share it behind an `Arc`,
/// and hand it to whatever needs to authorize requests.
#[derive(Debug, Default)]
pub struct Catalog {
    schema: SchemaRegistry,
    policies: PolicyStore,
    /// Held by changes that must see the schema and the policy set together.
    admin: Mutex<()>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    pub fn policies(&self) -> &PolicyStore {
        &self.policies
    }

    pub fn evaluator(&self) -> Evaluator<'_> {
        Evaluator::new(&self.schema, &self.policies)
    }

    pub fn authorize(&self, request: &Request<'_>) -> Result<Decision> {
        self.evaluator().authorize(request)
    }

    /// `CREATE POLICY`: the table must exist, and when it declares columns the
    /// policy's predicates may only reference those.
    pub fn add_policy(&self, policy: Policy) -> Result<()> {
        let _guard = self.admin.lock().map_err(|_| Error::Poisoned)?;
        let table = self.schema.table(policy.table())?;

        let (using, check) = policy.declared();
        for predicate in using.into_iter().chain(check) {
            if let Some(column) = predicate.columns().into_iter().find(|c| !table.has_column(c)) {
                return Err(Error::InvalidPredicate {
                    expr: predicate.source().to_string(),
                    reason: format!("column \"{column}\" does not exist on \"{}\"", table.name),
                });
            }
        }

        self.policies.add_policy(policy)
    }

    /// `DROP POLICY name ON table`.
    pub fn remove_policy(&self, table: &str, name: &str) -> Result<Policy> {
        self.policies.remove_policy(table, name)
    }

    /// `DROP TABLE`: forgets the table and every policy on it.
    pub fn drop_table(&self, name: &str) -> Result<()> {
        let _guard = self.admin.lock().map_err(|_| Error::Poisoned)?;
        self.schema.drop_table(name)?;
        let dropped = self.policies.remove_policies_on(name)?;
        if dropped > 0 {
            tracing::info!(table = name, policies = dropped, "dropped table policies");
        }
        Ok(())
    }
}
