use std::collections::BTreeMap;
use std::sync::Mutex;

use anyhow::Result;

use super::model::License;
use super::LicenseStore;

/// In-memory store for tests. The mutex is held across the `update` closure,
/// so it gives the same read-modify-write atomicity as the redb transaction.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, License>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LicenseStore for MemoryStore {
    fn insert(&self, license: &License) -> Result<()> {
        let mut records = self.records.lock().expect("store mutex poisoned");
        records.insert(license.key.clone(), license.clone());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<License>> {
        let records = self.records.lock().expect("store mutex poisoned");
        Ok(records.get(key).cloned())
    }

    fn update(
        &self,
        key: &str,
        apply: &mut dyn FnMut(Option<&License>) -> Option<License>,
    ) -> Result<()> {
        let mut records = self.records.lock().expect("store mutex poisoned");
        if let Some(updated) = apply(records.get(key)) {
            records.insert(key.to_owned(), updated);
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<License>> {
        let records = self.records.lock().expect("store mutex poisoned");
        Ok(records.values().cloned().collect())
    }
}
