//! Persistence boundary for feature state.
//!
//! An adapter stores, per feature key, the full [`GateSet`]. A write replaces
//! the whole set in one step, so a reader sees either the previous set or the
//! new one. Two implementations ship with the crate: [`MemoryAdapter`] and the
//! SQLite-backed [`Database`](crate::db::Database).

mod memory;

pub use memory::MemoryAdapter;

use crate::error::StorageError;
use crate::models::GateSet;

pub trait Adapter: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Keys of every persisted feature, in the order they were first written.
    fn features(&self) -> Result<Vec<String>, StorageError>;

    /// Stored gates for `key`, or `None` if the feature was never written.
    fn get(&self, key: &str) -> Result<Option<GateSet>, StorageError>;

    /// Persists `key` with exactly `gates`, creating the feature if needed.
    ///
    /// Must be atomic: the stored gate set is either fully replaced or left
    /// untouched.
    fn write(&self, key: &str, gates: &GateSet) -> Result<(), StorageError>;

    /// Deletes the feature and its gates. Returns whether it existed.
    fn remove(&self, key: &str) -> Result<bool, StorageError>;
}
