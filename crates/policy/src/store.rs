//! Policy store.

use std::sync::RwLock;

use crate::{Error, Operation, Policy, Principal, Result};

/// Holds every installed policy, in installation order.
///
/// Each read takes its snapshot under a single lock guard, so an evaluation
/// never sees a half-applied administrative change.
#[derive(Debug, Default)]
pub struct PolicyStore {
    policies: RwLock<Vec<Policy>>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a policy. Names are unique per table.
    pub fn add_policy(&self, policy: Policy) -> Result<()> {
        let mut policies = self.policies.write().map_err(|_| Error::Poisoned)?;
        if policies
            .iter()
            .any(|p| p.table() == policy.table() && p.name() == policy.name())
        {
            return Err(Error::DuplicatePolicyName {
                table: policy.table().to_string(),
                name: policy.name().to_string(),
            });
        }

        tracing::info!(
            table = policy.table(),
            policy = policy.name(),
            operation = %policy.operation(),
            "policy created"
        );
        policies.push(policy);
        Ok(())
    }

    /// Remove a policy by name.
    pub fn remove_policy(&self, table: &str, name: &str) -> Result<Policy> {
        let mut policies = self.policies.write().map_err(|_| Error::Poisoned)?;
        let index = policies
            .iter()
            .position(|p| p.table() == table && p.name() == name)
            .ok_or_else(|| Error::PolicyNotFound {
                table: table.to_string(),
                name: name.to_string(),
            })?;

        tracing::info!(table, policy = name, "policy dropped");
        Ok(policies.remove(index))
    }

    /// Remove every policy on a table, returning how many were dropped.
    pub fn remove_policies_on(&self, table: &str) -> Result<usize> {
        let mut policies = self.policies.write().map_err(|_| Error::Poisoned)?;
        let before = policies.len();
        policies.retain(|p| p.table() != table);
        Ok(before - policies.len())
    }

    /// Policies that govern `operation` on `table` for `principal`.
    pub fn policies_for(
        &self,
        table: &str,
        operation: Operation,
        principal: &Principal,
    ) -> Result<Vec<Policy>> {
        let policies = self.policies.read().map_err(|_| Error::Poisoned)?;
        Ok(policies
            .iter()
            .filter(|p| {
                p.table() == table && p.operation() == operation && p.applies_to(principal)
            })
            .cloned()
            .collect())
    }

    /// All policies on a table.
    pub fn policies_on(&self, table: &str) -> Result<Vec<Policy>> {
        let policies = self.policies.read().map_err(|_| Error::Poisoned)?;
        Ok(policies.iter().filter(|p| p.table() == table).cloned().collect())
    }

    pub fn all(&self) -> Result<Vec<Policy>> {
        let policies = self.policies.read().map_err(|_| Error::Poisoned)?;
        Ok(policies.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anon_policy(name: &str, table: &str, operation: Operation) -> Policy {
        Policy::builder(name, table, operation).to("anon").build()
    }

    #[test]
    fn test_duplicate_name_on_same_table() {
        let store = PolicyStore::new();
        store.add_policy(anon_policy("p", "authentication", Operation::Insert)).unwrap();

        let err = store
            .add_policy(anon_policy("p", "authentication", Operation::Select))
            .unwrap_err();
        assert!(matches!(err, Error::DuplicatePolicyName { .. }));

        // The same name on another table is fine.
        store.add_policy(anon_policy("p", "user_cookies", Operation::Insert)).unwrap();
    }

    #[test]
    fn test_remove_unknown_policy() {
        let store = PolicyStore::new();
        assert!(matches!(
            store.remove_policy("authentication", "ghost"),
            Err(Error::PolicyNotFound { .. })
        ));
    }

    #[test]
    fn test_remove_then_recreate() {
        let store = PolicyStore::new();
        store.add_policy(anon_policy("p", "t", Operation::Select)).unwrap();
        let removed = store.remove_policy("t", "p").unwrap();
        assert_eq!(removed.name(), "p");
        store.add_policy(anon_policy("p", "t", Operation::Select)).unwrap();
    }

    #[test]
    fn test_policies_for_filters_and_keeps_order() {
        let store = PolicyStore::new();
        store.add_policy(anon_policy("b", "t", Operation::Select)).unwrap();
        store.add_policy(anon_policy("a", "t", Operation::Select)).unwrap();
        store.add_policy(anon_policy("c", "t", Operation::Delete)).unwrap();
        store.add_policy(anon_policy("d", "other", Operation::Select)).unwrap();
        store
            .add_policy(Policy::builder("e", "t", Operation::Select).to("42").build())
            .unwrap();

        let names: Vec<_> = store
            .policies_for("t", Operation::Select, &Principal::anon())
            .unwrap()
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_remove_policies_on_table() {
        let store = PolicyStore::new();
        store.add_policy(anon_policy("a", "t", Operation::Select)).unwrap();
        store.add_policy(anon_policy("b", "t", Operation::Insert)).unwrap();
        store.add_policy(anon_policy("c", "u", Operation::Insert)).unwrap();

        assert_eq!(store.remove_policies_on("t").unwrap(), 2);
        assert!(store.policies_on("t").unwrap().is_empty());
        assert_eq!(store.all().unwrap().len(), 1);
    }
}
