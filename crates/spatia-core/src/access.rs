use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::SpatiaError;
use crate::id::RefId;

/// Permission level, ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessLevel {
    #[default]
    NoAccess,
    Read,
    Write,
    Admin,
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAccess => write!(f, "NO_ACCESS"),
            Self::Read => write!(f, "READ"),
            Self::Write => write!(f, "WRITE"),
            Self::Admin => write!(f, "ADMIN"),
        }
    }
}

impl std::str::FromStr for AccessLevel {
    type Err = SpatiaError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "NO_ACCESS" | "-1" => Ok(Self::NoAccess),
            "READ" | "0" => Ok(Self::Read),
            "WRITE" | "1" => Ok(Self::Write),
            "ADMIN" | "2" => Ok(Self::Admin),
            other => Err(SpatiaError::Config(format!("unknown access level: {}", other))),
        }
    }
}

/// Access-control record carried by every anchor.
///
/// `all` applies to every principal; `roots` holds per-principal grants keyed
/// by the principal's root id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
    #[serde(default)]
    pub all: AccessLevel,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub roots: BTreeMap<RefId, AccessLevel>,
}

impl Access {
    pub fn with_all(all: AccessLevel) -> Self {
        Self {
            all,
            roots: BTreeMap::new(),
        }
    }

    pub fn grant(&mut self, principal: RefId, level: AccessLevel) {
        self.roots.insert(principal, level);
    }

    pub fn revoke(&mut self, principal: &RefId) -> Option<AccessLevel> {
        self.roots.remove(principal)
    }

    /// Maximum of owner, explicit grant and the `all` default.
    pub fn resolve(&self, principal: &RefId, owner: Option<&RefId>) -> AccessLevel {
        if owner == Some(principal) {
            return AccessLevel::Admin;
        }
        let granted = self.roots.get(principal).copied().unwrap_or_default();
        granted.max(self.all)
    }
}
