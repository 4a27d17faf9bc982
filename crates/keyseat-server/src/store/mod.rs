pub mod db;
pub mod memory;
pub mod model;

use anyhow::Result;

pub use db::RedbStore;
pub use memory::MemoryStore;
pub use model::License;

/// Durable keyed storage for license records.
///
/// `update` is the serialization point for the activate path: the closure
/// runs exactly once against the current record, and no other update for the
/// same key interleaves with its read-decide-write sequence. Returning `None`
/// from the closure leaves the store untouched, so a rejected operation never
/// mutates persisted data.
pub trait LicenseStore: Send + Sync {
    /// Persist a freshly issued license.
    fn insert(&self, license: &License) -> Result<()>;

    /// Snapshot read of a single record.
    fn get(&self, key: &str) -> Result<Option<License>>;

    /// Atomic read-modify-write. `apply` receives the current record
    /// (`None` if the key is unknown) and returns the record to persist,
    /// or `None` to commit nothing.
    fn update(
        &self,
        key: &str,
        apply: &mut dyn FnMut(Option<&License>) -> Option<License>,
    ) -> Result<()>;

    /// Snapshot of all records, in key order where the backend supports it.
    fn list(&self) -> Result<Vec<License>>;
}
