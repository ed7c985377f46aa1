//! Migration patterns and the atomic cell that holds the active one
//!
//! A migration walks through four phases:
//!
//! ```text
//! src_only -> src_first -> dst_first -> dst_only
//! ```
//!
//! The pattern decides which physical store is authoritative (its result is
//! what the caller sees) and whether the other store receives a best-effort
//! copy of every write. Transitions are not checked: the operator may set any
//! of the four values at any time.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One of the two physical stores taking part in a migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// The store being migrated away from
    Src,
    /// The store being migrated to
    Dst,
}

impl Side {
    /// The other store
    pub fn other(self) -> Side {
        match self {
            Side::Src => Side::Dst,
            Side::Dst => Side::Src,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Src => f.write_str("src"),
            Side::Dst => f.write_str("dst"),
        }
    }
}

/// The four-valued migration phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum MigrationPattern {
    /// Read and write the source only
    SrcOnly = 0,
    /// Source is authoritative, destination receives best-effort copies
    SrcFirst = 1,
    /// Destination is authoritative, source receives best-effort copies
    DstFirst = 2,
    /// Read and write the destination only
    DstOnly = 3,
}

impl MigrationPattern {
    /// All patterns in migration order
    pub const ALL: [MigrationPattern; 4] = [
        MigrationPattern::SrcOnly,
        MigrationPattern::SrcFirst,
        MigrationPattern::DstFirst,
        MigrationPattern::DstOnly,
    ];

    /// Wire name (`src_only`, `src_first`, `dst_first`, `dst_only`)
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationPattern::SrcOnly => "src_only",
            MigrationPattern::SrcFirst => "src_first",
            MigrationPattern::DstFirst => "dst_first",
            MigrationPattern::DstOnly => "dst_only",
        }
    }

    /// The store whose result is returned to the caller
    pub fn authoritative(&self) -> Side {
        match self {
            MigrationPattern::SrcOnly | MigrationPattern::SrcFirst => Side::Src,
            MigrationPattern::DstFirst | MigrationPattern::DstOnly => Side::Dst,
        }
    }

    /// The store that receives best-effort writes, if any
    pub fn secondary(&self) -> Option<Side> {
        match self {
            MigrationPattern::SrcFirst => Some(Side::Dst),
            MigrationPattern::DstFirst => Some(Side::Src),
            MigrationPattern::SrcOnly | MigrationPattern::DstOnly => None,
        }
    }

    /// Whether reads may be shadowed against the destination
    pub fn shadows_reads(&self) -> bool {
        matches!(self, MigrationPattern::SrcOnly | MigrationPattern::SrcFirst)
    }

    fn from_u8(raw: u8) -> MigrationPattern {
        match raw {
            0 => MigrationPattern::SrcOnly,
            1 => MigrationPattern::SrcFirst,
            2 => MigrationPattern::DstFirst,
            _ => MigrationPattern::DstOnly,
        }
    }
}

impl Default for MigrationPattern {
    fn default() -> Self {
        MigrationPattern::SrcOnly
    }
}

impl fmt::Display for MigrationPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MigrationPattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "src_only" => Ok(MigrationPattern::SrcOnly),
            "src_first" => Ok(MigrationPattern::SrcFirst),
            "dst_first" => Ok(MigrationPattern::DstFirst),
            "dst_only" => Ok(MigrationPattern::DstOnly),
            other => Err(Error::UnknownPattern(other.to_string())),
        }
    }
}

/// Holder for the active pattern of one migration.
///
/// A single byte behind an atomic: readers load it once per operation and
/// never see a torn value; writers store without read-modify-write. Share it
/// with `Arc` between the connector and the control plane; each migration
/// owns its own cell.
#[derive(Debug)]
pub struct PatternCell {
    raw: AtomicU8,
}

impl PatternCell {
    /// Create a cell holding `pattern`
    pub fn new(pattern: MigrationPattern) -> Self {
        Self {
            raw: AtomicU8::new(pattern as u8),
        }
    }

    /// Current pattern
    #[inline]
    pub fn load(&self) -> MigrationPattern {
        MigrationPattern::from_u8(self.raw.load(Ordering::Acquire))
    }

    /// Replace the pattern
    #[inline]
    pub fn store(&self, pattern: MigrationPattern) {
        self.raw.store(pattern as u8, Ordering::Release);
    }

    /// Parse and store; the cell is untouched when parsing fails
    pub fn store_str(&self, pattern: &str) -> Result<MigrationPattern> {
        let parsed = pattern.parse::<MigrationPattern>()?;
        self.store(parsed);
        Ok(parsed)
    }
}

impl Default for PatternCell {
    fn default() -> Self {
        Self::new(MigrationPattern::SrcOnly)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_parse_all_patterns() {
        for pattern in MigrationPattern::ALL {
            assert_eq!(pattern.as_str().parse::<MigrationPattern>().unwrap(), pattern);
        }
    }

    #[test]
    fn test_parse_unknown_pattern() {
        let err = "double".parse::<MigrationPattern>().unwrap_err();
        assert!(matches!(err, Error::UnknownPattern(ref s) if s == "double"));
        assert!("SRC_ONLY".parse::<MigrationPattern>().is_err());
        assert!("".parse::<MigrationPattern>().is_err());
    }

    #[test]
    fn test_authoritative_and_secondary() {
        assert_eq!(MigrationPattern::SrcOnly.authoritative(), Side::Src);
        assert_eq!(MigrationPattern::SrcOnly.secondary(), None);
        assert_eq!(MigrationPattern::SrcFirst.authoritative(), Side::Src);
        assert_eq!(MigrationPattern::SrcFirst.secondary(), Some(Side::Dst));
        assert_eq!(MigrationPattern::DstFirst.authoritative(), Side::Dst);
        assert_eq!(MigrationPattern::DstFirst.secondary(), Some(Side::Src));
        assert_eq!(MigrationPattern::DstOnly.authoritative(), Side::Dst);
        assert_eq!(MigrationPattern::DstOnly.secondary(), None);
    }

    #[test]
    fn test_serde_names_match_wire_names() {
        for pattern in MigrationPattern::ALL {
            let json = serde_json::to_string(&pattern).unwrap();
            assert_eq!(json, format!("\"{}\"", pattern.as_str()));
        }
    }

    proptest::proptest! {
        #[test]
        fn prop_only_wire_names_parse(s in "\\PC{0,12}") {
            let parsed = s.parse::<MigrationPattern>().is_ok();
            let legal = MigrationPattern::ALL.iter().any(|p| p.as_str() == s);
            proptest::prop_assert_eq!(parsed, legal);
        }
    }

    #[test]
    fn test_cell_defaults_to_src_only() {
        assert_eq!(PatternCell::default().load(), MigrationPattern::SrcOnly);
    }

    #[test]
    fn test_cell_store_str_rejects_unknown_and_keeps_value() {
        let cell = PatternCell::new(MigrationPattern::SrcFirst);
        assert!(cell.store_str("dst_last").is_err());
        assert_eq!(cell.load(), MigrationPattern::SrcFirst);

        assert_eq!(cell.store_str("dst_first").unwrap(), MigrationPattern::DstFirst);
        assert_eq!(cell.load(), MigrationPattern::DstFirst);
    }

    #[test]
    fn test_cell_concurrent_readers_never_see_garbage() {
        let cell = Arc::new(PatternCell::default());
        let writer = {
            let cell = Arc::clone(&cell);
            std::thread::spawn(move || {
                for i in 0..10_000 {
                    cell.store(MigrationPattern::ALL[i % 4]);
                }
            })
        };
        for _ in 0..10_000 {
            assert!(MigrationPattern::ALL.contains(&cell.load()));
        }
        writer.join().unwrap();
    }
}
