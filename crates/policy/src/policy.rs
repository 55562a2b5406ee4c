//! Policy definitions.

use crate::{Operation, Predicate, Principal, Result};

/// A row-level security policy.
///
/// Policies are immutable once built; changing one means removing it and
/// adding a replacement.
#[derive(Debug, Clone)]
pub struct Policy {
    name: String,
    table: String,
    operation: Operation,
    principals: Vec<Principal>,
    using: Option<Predicate>,
    check: Option<Predicate>,
}

impl Policy {
    /// Start a policy granting `operation` on `table`.
    ///
    /// With no principals added the policy applies to nobody, and with no
    /// predicates it behaves like `USING (true) WITH CHECK (true)`.
    pub fn builder(
        name: impl Into<String>,
        table: impl Into<String>,
        operation: Operation,
    ) -> PolicyBuilder {
        PolicyBuilder {
            policy: Policy {
                name: name.into(),
                table: table.into(),
                operation,
                principals: Vec::new(),
                using: None,
                check: None,
            },
        }
    }

    /// The always-true policy for `principal` named `<principal>_<op>_<table>`.
    pub fn permissive(table: &str, operation: Operation, principal: Principal) -> Self {
        let name = format!("{principal}_{operation}_{table}");
        Self::builder(name, table, operation)
            .to(principal)
            .using(Predicate::always())
            .build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn principals(&self) -> &[Principal] {
        &self.principals
    }

    /// Whether the policy applies to requests made as `principal`.
    pub fn applies_to(&self, principal: &Principal) -> bool {
        self.principals
            .iter()
            .any(|p| p.is_public() || p == principal)
    }

    /// The predicate gating existing rows, `true` when not declared.
    pub fn using(&self) -> Predicate {
        self.using.clone().unwrap_or_else(Predicate::always)
    }

    /// The predicate gating new row shapes.
    ///
    /// Falls back to the `using` predicate, then to `true`.
    pub fn check(&self) -> Predicate {
        self.check
            .clone()
            .or_else(|| self.using.clone())
            .unwrap_or_else(Predicate::always)
    }

    /// The predicates as declared, without fallbacks.
    pub fn declared(&self) -> (Option<&Predicate>, Option<&Predicate>) {
        (self.using.as_ref(), self.check.as_ref())
    }
}

/// Builder for [`Policy`].
#[derive(Debug, Clone)]
pub struct PolicyBuilder {
    policy: Policy,
}

impl PolicyBuilder {
    /// Grant the policy to a principal. May be called repeatedly.
    pub fn to(mut self, principal: impl Into<Principal>) -> Self {
        let principal = principal.into();
        if !self.policy.principals.contains(&principal) {
            self.policy.principals.push(principal);
        }
        self
    }

    pub fn using(mut self, predicate: Predicate) -> Self {
        self.policy.using = Some(predicate);
        self
    }

    pub fn with_check(mut self, predicate: Predicate) -> Self {
        self.policy.check = Some(predicate);
        self
    }

    /// Parse and set the `USING` expression.
    pub fn using_expr(self, expr: &str) -> Result<Self> {
        Ok(self.using(Predicate::parse(expr)?))
    }

    /// Parse and set the `WITH CHECK` expression.
    pub fn check_expr(self, expr: &str) -> Result<Self> {
        Ok(self.with_check(Predicate::parse(expr)?))
    }

    pub fn build(self) -> Policy {
        self.policy
    }
}
