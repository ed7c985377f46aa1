//! Inconsistency reports flowing from the validator to the fixer
//!
//! Wire format (JSON):
//!
//! ```text
//! {"id": 5, "direction": "SRC", "type": "not_equal"}
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pattern::Side;

/// Which store the fixer trusts when repairing one row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Trust the source; repair the destination
    #[serde(rename = "SRC")]
    Src,
    /// Trust the destination; repair the source
    #[serde(rename = "DST")]
    Dst,
}

impl Direction {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Src => "SRC",
            Direction::Dst => "DST",
        }
    }

    /// The store treated as base (authoritative)
    pub fn base(&self) -> Side {
        match self {
            Direction::Src => Side::Src,
            Direction::Dst => Side::Dst,
        }
    }

    /// The store being checked and repaired
    pub fn target(&self) -> Side {
        self.base().other()
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SRC" => Ok(Direction::Src),
            "DST" => Ok(Direction::Dst),
            other => Err(Error::UnknownDirection(other.to_string())),
        }
    }
}

/// Why an inconsistency was reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InconsistencyType {
    /// Row exists in the target but not in the base
    BaseMissing,
    /// Row exists in the base but not in the target
    TargetMissing,
    /// Row exists on both sides with different content
    NotEqual,
}

impl InconsistencyType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            InconsistencyType::BaseMissing => "base_missing",
            InconsistencyType::TargetMissing => "target_missing",
            InconsistencyType::NotEqual => "not_equal",
        }
    }
}

impl fmt::Display for InconsistencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InconsistencyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "base_missing" => Ok(InconsistencyType::BaseMissing),
            "target_missing" => Ok(InconsistencyType::TargetMissing),
            "not_equal" => Ok(InconsistencyType::NotEqual),
            other => Err(Error::UnknownEventType(other.to_string())),
        }
    }
}

/// One detected divergence for one row id.
///
/// Carries no row content: the fixer re-reads the base at repair time, so a
/// stale or duplicated event still converges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InconsistencyEvent {
    /// Row id
    pub id: i64,
    /// Store to trust when repairing
    pub direction: Direction,
    /// Reason the event was raised
    #[serde(rename = "type")]
    pub kind: InconsistencyType,
}

impl InconsistencyEvent {
    /// Create an event
    pub fn new(id: i64, direction: Direction, kind: InconsistencyType) -> Self {
        Self {
            id,
            direction,
            kind,
        }
    }

    /// Encode as the JSON wire format
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from the JSON wire format
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
