//! Fast collection types for panelmux.
//!
//! Terminal and session identifiers are short strings, so the registry and the
//! panel coordinator key everything by `FxHashMap`/`FxHashSet`. Session member
//! sets use `IndexSet` so listings come back in creation order.

pub use rustc_hash::{FxBuildHasher, FxHashMap, FxHashSet};
pub use std::collections::*;

/// Insertion-ordered hash map with FxHash.
pub type IndexMap<K, V> = indexmap::IndexMap<K, V, FxBuildHasher>;

/// Insertion-ordered hash set with FxHash.
pub type IndexSet<T> = indexmap::IndexSet<T, FxBuildHasher>;

/// Empty `IndexSet` with the Fx hasher (`IndexSet::default()` without the turbofish noise).
pub fn index_set<T>() -> IndexSet<T> {
    IndexSet::with_hasher(FxBuildHasher)
}
