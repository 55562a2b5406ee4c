//! Declarative tables and policies, loaded from TOML.
//!
//! A manifest is the administrative surface in file form: the equivalent of
//! `ALTER TABLE ... ENABLE ROW LEVEL SECURITY` and `CREATE POLICY` statements.
//!
//! ```toml
//! [[table]]
//! name = "authentication"
//! rls = true
//!
//! [[policy]]
//! name = "anon_insert_authentication"
//! table = "authentication"
//! operation = "insert"
//! to = ["anon"]
//! check = "true"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Catalog, Error, Operation, Policy, Predicate, Principal, Result};

/// Tables and policies to install into a [`Catalog`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default, rename = "table", skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<TableDef>,

    #[serde(default, rename = "policy", skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<PolicyDef>,
}

/// A table declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub name: String,

    /// Whether row-level security is enabled.
    #[serde(default)]
    pub rls: bool,

    /// Optional column list; policies are validated against it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
}

/// A policy declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDef {
    pub name: String,
    pub table: String,
    pub operation: Operation,

    /// Principals the policy is granted to. Defaults to `public`.
    #[serde(default = "default_to")]
    pub to: Vec<String>,

    /// `USING` expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub using: Option<String>,

    /// `WITH CHECK` expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,
}

fn default_to() -> Vec<String> {
    vec![Principal::PUBLIC.to_string()]
}

/// Tables created by the credential-storage deployment.
pub const PROVISIONED_TABLES: [(&str, &[&str]); 2] = [
    ("authentication", &["id", "username", "password_hash", "created_at"]),
    ("user_cookies", &["id", "user_id", "cookies", "created_at", "updated_at"]),
];

impl Manifest {
    /// Load a manifest from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse a manifest from a TOML string.
    pub fn parse(toml: &str) -> Result<Self> {
        toml::from_str(toml).map_err(|e| Error::Parse(e.to_string()))
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Invalid(e.to_string()))
    }

    /// The default deployment: both credential tables under RLS, opened to
    /// `anon` for every operation with always-true predicates.
    ///
    /// This is a permissive placeholder, not an ownership model.
    pub fn provisioned() -> Self {
        let mut manifest = Self::default();

        for (table, columns) in PROVISIONED_TABLES {
            manifest.tables.push(TableDef {
                name: table.to_string(),
                rls: true,
                columns: Some(columns.iter().map(|c| c.to_string()).collect()),
            });

            for operation in Operation::ALL {
                let (using, check) = match operation {
                    Operation::Insert => (None, Some("true")),
                    Operation::Select | Operation::Delete => (Some("true"), None),
                    Operation::Update => (Some("true"), Some("true")),
                };
                manifest.policies.push(PolicyDef {
                    name: format!("{}_{operation}_{table}", Principal::ANON),
                    table: table.to_string(),
                    operation,
                    to: vec![Principal::ANON.to_string()],
                    using: using.map(str::to_string),
                    check: check.map(str::to_string),
                });
            }
        }

        manifest
    }

    /// Install into a catalog.
    ///
    /// Every predicate is compiled before anything is changed, so a manifest
    /// with a bad expression leaves the catalog untouched.
    pub fn apply(&self, catalog: &Catalog) -> Result<()> {
        let policies = self
            .policies
            .iter()
            .map(PolicyDef::to_policy)
            .collect::<Result<Vec<_>>>()?;

        for table in &self.tables {
            match &table.columns {
                Some(columns) => catalog
                    .schema()
                    .register_table_with_columns(&table.name, columns.iter().cloned())?,
                None => catalog.schema().register_table(&table.name)?,
            }
            if table.rls {
                catalog.schema().enable_rls(&table.name)?;
            } else {
                catalog.schema().disable_rls(&table.name)?;
            }
        }

        for policy in policies {
            catalog.add_policy(policy)?;
        }

        Ok(())
    }
}

impl PolicyDef {
    /// Compile into a [`Policy`].
    pub fn to_policy(&self) -> Result<Policy> {
        if self.to.is_empty() {
            return Err(Error::Invalid(format!(
                "policy \"{}\" is granted to no principal",
                self.name
            )));
        }

        let mut builder = Policy::builder(&self.name, &self.table, self.operation);
        for principal in &self.to {
            builder = builder.to(principal.as_str());
        }
        if let Some(expr) = &self.using {
            builder = builder.using(Predicate::parse(expr)?);
        }
        if let Some(expr) = &self.check {
            builder = builder.with_check(Predicate::parse(expr)?);
        }
        Ok(builder.build())
    }
}

impl From<&Policy> for PolicyDef {
    fn from(policy: &Policy) -> Self {
        let (using, check) = policy.declared();
        Self {
            name: policy.name().to_string(),
            table: policy.table().to_string(),
            operation: policy.operation(),
            to: policy.principals().iter().map(|p| p.to_string()).collect(),
            using: using.map(|p| p.source().to_string()),
            check: check.map(|p| p.source().to_string()),
        }
    }
}
