//! Typed reference ids for graph entities.
//!
//! A reference id is `{kind}::{unique-id}` where the unique id is 12 bytes
//! rendered as 24 lowercase hex digits. The kind is written with its short
//! code (`n`, `e`, `w`, `o`); parsing also accepts the long names.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SpatiaError;

/// Kind of graph entity a reference id points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Node,
    Edge,
    Walker,
    Object,
}

impl EntityKind {
    /// Short code used in the canonical text form.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Node => "n",
            Self::Edge => "e",
            Self::Walker => "w",
            Self::Object => "o",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Edge => "edge",
            Self::Walker => "walker",
            Self::Object => "object",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EntityKind {
    type Err = SpatiaError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "n" | "node" => Ok(Self::Node),
            "e" | "edge" => Ok(Self::Edge),
            "w" | "walker" => Ok(Self::Walker),
            "o" | "object" => Ok(Self::Object),
            other => Err(SpatiaError::InvalidReference(format!(
                "unknown entity kind '{}'",
                other
            ))),
        }
    }
}

/// Length of a unique id in bytes.
pub const UID_LEN: usize = 12;

/// Typed, globally unique reference to a graph entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RefId {
    kind: EntityKind,
    uid: [u8; UID_LEN],
}

/// The system root: kind `node`, all-zero unique id.
pub const SYSTEM_ROOT: RefId = RefId::reserved(0);

/// The public root: kind `node`, unique id `1`.
pub const PUBLIC_ROOT: RefId = RefId::reserved(1);

impl RefId {
    const fn reserved(last: u8) -> Self {
        let mut uid = [0u8; UID_LEN];
        uid[UID_LEN - 1] = last;
        Self {
            kind: EntityKind::Node,
            uid,
        }
    }

    /// Generate a fresh id of the given kind.
    ///
    /// Ids whose leading 11 bytes are all zero are reserved and never issued.
    pub fn generate(kind: EntityKind) -> Self {
        loop {
            let bytes = Uuid::new_v4().into_bytes();
            let mut uid = [0u8; UID_LEN];
            uid.copy_from_slice(&bytes[..UID_LEN]);
            if uid[..UID_LEN - 1].iter().any(|b| *b != 0) {
                return Self { kind, uid };
            }
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Hex rendering of the unique id.
    pub fn uid_hex(&self) -> String {
        hex::encode(self.uid)
    }

    /// Whether this is one of the two reserved root ids.
    pub fn is_reserved(&self) -> bool {
        *self == SYSTEM_ROOT || *self == PUBLIC_ROOT
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.kind.code(), self.uid_hex())
    }
}

impl FromStr for RefId {
    type Err = SpatiaError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (kind, uid) = s
            .split_once("::")
            .ok_or_else(|| SpatiaError::InvalidReference(format!("missing '::' in '{}'", s)))?;
        let kind: EntityKind = kind.parse()?;

        if uid.len() != UID_LEN * 2 {
            return Err(SpatiaError::InvalidReference(format!(
                "unique id must be {} hex digits: '{}'",
                UID_LEN * 2,
                s
            )));
        }
        let bytes = hex::decode(uid)
            .map_err(|e| SpatiaError::InvalidReference(format!("'{}': {}", s, e)))?;
        let mut out = [0u8; UID_LEN];
        out.copy_from_slice(&bytes);
        Ok(Self { kind, uid: out })
    }
}

impl TryFrom<String> for RefId {
    type Error = SpatiaError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RefId> for String {
    fn from(id: RefId) -> Self {
        id.to_string()
    }
}
