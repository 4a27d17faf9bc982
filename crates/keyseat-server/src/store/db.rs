use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use super::model::License;
use super::LicenseStore;

const LICENSES: TableDefinition<&str, &[u8]> = TableDefinition::new("licenses");

/// Thread-safe handle to the redb store.
///
/// redb admits one writer at a time, so running a read-modify-write inside a
/// single write transaction serializes it against every other mutation —
/// the per-record atomicity the registry's activate path relies on.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).context("open redb database")?;

        // Ensure the table exists so later read transactions never fail.
        let write_txn = db.begin_write()?;
        write_txn.open_table(LICENSES)?;
        write_txn.commit()?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl LicenseStore for RedbStore {
    fn insert(&self, license: &License) -> Result<()> {
        let bytes = encode(license)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(LICENSES)?;
            table.insert(license.key.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;

        debug!(key = %license.key, "stored license");
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<License>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LICENSES)?;

        let raw_bytes: Option<Vec<u8>> = table.get(key)?.map(|guard| guard.value().to_vec());
        raw_bytes.map(|bytes| decode(&bytes)).transpose()
    }

    fn update(
        &self,
        key: &str,
        apply: &mut dyn FnMut(Option<&License>) -> Option<License>,
    ) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        let changed = {
            let mut table = write_txn.open_table(LICENSES)?;

            // Read the raw bytes and immediately clone them so the AccessGuard
            // (which borrows `table`) is dropped before any mutation.
            let raw_bytes: Option<Vec<u8>> = table.get(key)?.map(|guard| guard.value().to_vec());
            let current = raw_bytes.map(|bytes| decode(&bytes)).transpose()?;

            match apply(current.as_ref()) {
                Some(updated) => {
                    let bytes = encode(&updated)?;
                    table.insert(key, bytes.as_slice())?;
                    true
                }
                None => false,
            }
        };

        if changed {
            write_txn.commit()?;
        }
        // Dropping an uncommitted transaction aborts it; nothing was written.
        Ok(())
    }

    fn list(&self) -> Result<Vec<License>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(LICENSES)?;

        let mut licenses = Vec::new();
        for item in table.iter()? {
            let (_k, v) = item?;
            licenses.push(decode(v.value())?);
        }
        Ok(licenses)
    }
}

fn encode(license: &License) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(license, bincode::config::standard())
        .context("bincode encode license")
}

fn decode(bytes: &[u8]) -> Result<License> {
    let (license, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .context("bincode decode license")?;
    Ok(license)
}
