use serde::{Deserialize, Serialize};

/// Storage operations a policy can govern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Insert,
    Select,
    Update,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Insert,
        Operation::Select,
        Operation::Update,
        Operation::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Select => "select",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    /// Whether the operation targets a row that already exists.
    pub fn reads_existing(&self) -> bool {
        !matches!(self, Operation::Insert)
    }

    /// Whether the operation produces a new row shape.
    pub fn writes_candidate(&self) -> bool {
        matches!(self, Operation::Insert | Operation::Update)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "insert" => Ok(Operation::Insert),
            "select" => Ok(Operation::Select),
            "update" => Ok(Operation::Update),
            "delete" => Ok(Operation::Delete),
            other => Err(format!("unknown operation '{other}'")),
        }
    }
}

/// The identity a request executes as.
///
/// Principals are opaque: the shared `anon` role today, a user id later.
/// The engine compares them but never validates them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Principal(String);

impl Principal {
    /// Name of the shared low-privilege role.
    pub const ANON: &'static str = "anon";

    /// Name of the wildcard principal; a policy granted to it matches everyone.
    pub const PUBLIC: &'static str = "public";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn anon() -> Self {
        Self::new(Self::ANON)
    }

    pub fn public() -> Self {
        Self::new(Self::PUBLIC)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_public(&self) -> bool {
        self.0 == Self::PUBLIC
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Principal {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Principal {
    fn from(name: String) -> Self {
        Self(name)
    }
}
