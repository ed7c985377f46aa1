//! The contract every migratable row type implements
//!
//! Migration works entirely in terms of row identity: the id of an entity is
//! the id carried by an inconsistency event is the primary key in both
//! stores. Everything else in the workspace is generic over [`Entity`].

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A row that can be migrated between two stores.
///
/// Implementations are immutable snapshots read from a store at a point in
/// time. `compare_to` decides what "consistent" means for the row type; the
/// validator never looks at fields directly.
///
/// # Example
///
/// ```
/// use dualwrite_core::Entity;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Interaction {
///     id: i64,
///     read_cnt: i64,
///     like_cnt: i64,
/// }
///
/// impl Entity for Interaction {
///     fn id(&self) -> i64 {
///         self.id
///     }
///
///     fn compare_to(&self, other: &Self) -> bool {
///         self.read_cnt == other.read_cnt && self.like_cnt == other.like_cnt
///     }
/// }
/// ```
pub trait Entity: Clone + Send + Sync + Serialize + DeserializeOwned + std::fmt::Debug + 'static {
    /// Stable primary key.
    fn id(&self) -> i64;

    /// True iff every migration-relevant column equals `other`'s.
    fn compare_to(&self, other: &Self) -> bool;
}
