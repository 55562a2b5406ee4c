//! Policy evaluation.

use serde::Serialize;
use storage::Row;

use crate::{
    Error, Operation, Policy, PolicyStore, Predicate, Principal, Result, SchemaRegistry,
};

/// An authorization question: may `principal` perform `operation` on a row
/// of `table`?
#[derive(Debug, Clone, Copy)]
pub struct Request<'a> {
    pub table: &'a str,
    pub operation: Operation,
    pub principal: &'a Principal,
    /// The row as it would be after an insert or update.
    pub candidate: Option<&'a Row>,
    /// The row as it is now, for select, update and delete.
    pub existing: Option<&'a Row>,
}

impl<'a> Request<'a> {
    pub fn new(table: &'a str, operation: Operation, principal: &'a Principal) -> Self {
        Self {
            table,
            operation,
            principal,
            candidate: None,
            existing: None,
        }
    }

    pub fn with_candidate(mut self, row: &'a Row) -> Self {
        self.candidate = Some(row);
        self
    }

    pub fn with_existing(mut self, row: &'a Row) -> Self {
        self.existing = Some(row);
        self
    }
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// RLS is on and no policy covers (table, operation, principal).
    NoMatchingPolicy,
    /// Policies matched but none of their predicates passed.
    PredicateFailed,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DenyReason::NoMatchingPolicy => f.write_str("no matching policy"),
            DenyReason::PredicateFailed => f.write_str("row rejected by policy"),
        }
    }
}

/// Result of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// Allowed by the named policy, or by RLS being off (`None`).
    Allow { policy: Option<String> },
    Deny { reason: DenyReason },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }
}

/// Evaluates requests against a schema registry and policy store.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator<'a> {
    schema: &'a SchemaRegistry,
    policies: &'a PolicyStore,
}

impl<'a> Evaluator<'a> {
    pub fn new(schema: &'a SchemaRegistry, policies: &'a PolicyStore) -> Self {
        Self { schema, policies }
    }

    /// Decide a single request.
    ///
    /// A denial is `Ok(Decision::Deny { .. })`. `Err` is reserved for unknown
    /// tables and broken predicates.
    pub fn authorize(&self, request: &Request<'_>) -> Result<Decision> {
        self.snapshot(request.table, request.operation, request.principal)?
            .decide(request.candidate, request.existing)
    }

    /// Capture the policies governing (table, operation, principal).
    ///
    /// The snapshot can decide many rows against one consistent policy set,
    /// which is what a filtered scan needs.
    pub fn snapshot(
        &self,
        table: &str,
        operation: Operation,
        principal: &Principal,
    ) -> Result<PolicySnapshot> {
        let policies = if self.schema.is_rls_enabled(table)? {
            Some(self.policies.policies_for(table, operation, principal)?)
        } else {
            None
        };

        Ok(PolicySnapshot {
            table: table.to_string(),
            operation,
            principal: principal.clone(),
            policies,
        })
    }
}

/// The policies matching one (table, operation, principal), frozen at the
/// time they were fetched.
#[derive(Debug, Clone)]
pub struct PolicySnapshot {
    table: String,
    operation: Operation,
    principal: Principal,
    /// `None` when RLS is off for the table.
    policies: Option<Vec<Policy>>,
}

impl PolicySnapshot {
    /// RLS is on and nothing matched: every row will be denied.
    pub fn is_default_deny(&self) -> bool {
        self.policies.as_ref().is_some_and(Vec::is_empty)
    }

    /// Decide one row pair against the snapshot.
    pub fn decide(&self, candidate: Option<&Row>, existing: Option<&Row>) -> Result<Decision> {
        let Some(policies) = &self.policies else {
            return Ok(Decision::Allow { policy: None });
        };

        if policies.is_empty() {
            tracing::debug!(
                table = %self.table,
                operation = %self.operation,
                principal = %self.principal,
                "denied: no matching policy"
            );
            return Ok(Decision::Deny {
                reason: DenyReason::NoMatchingPolicy,
            });
        }

        // An absent row is evaluated as one with every column NULL.
        let empty = Row::new();
        let existing = existing.unwrap_or(&empty);
        let candidate = candidate.unwrap_or(&empty);

        // Evaluate every matching policy before folding; any error fails the request.
        let mut verdicts = Vec::with_capacity(policies.len());
        for policy in policies {
            verdicts.push((policy, self.passes(policy, candidate, existing)?));
        }

        match verdicts.into_iter().find(|(_, passed)| *passed) {
            Some((policy, _)) => {
                tracing::debug!(
                    table = %self.table,
                    operation = %self.operation,
                    principal = %self.principal,
                    policy = policy.name(),
                    "allowed"
                );
                Ok(Decision::Allow {
                    policy: Some(policy.name().to_string()),
                })
            }
            None => Ok(Decision::Deny {
                reason: DenyReason::PredicateFailed,
            }),
        }
    }

    fn passes(&self, policy: &Policy, candidate: &Row, existing: &Row) -> Result<bool> {
        let visible = if self.operation.reads_existing() {
            self.evaluate(policy, "using", &policy.using(), existing)?
        } else {
            true
        };

        // Update needs both: a visible target and an acceptable new shape.
        // Both clauses always run.
        let acceptable = if self.operation.writes_candidate() {
            self.evaluate(policy, "check", &policy.check(), candidate)?
        } else {
            true
        };
        Ok(visible && acceptable)
    }

    fn evaluate(
        &self,
        policy: &Policy,
        clause: &str,
        predicate: &Predicate,
        row: &Row,
    ) -> Result<bool> {
        predicate.evaluate(row, &self.principal).map_err(|reason| {
            tracing::error!(
                table = %self.table,
                policy = policy.name(),
                clause,
                %reason,
                "predicate evaluation failed"
            );
            Error::PredicateEvaluation {
                policy: policy.name().to_string(),
                reason,
            }
        })
    }
}
