//! License lifecycle and single-seat enforcement.
//!
//! Every mutation runs its read-check-write sequence inside
//! [`LicenseStore::update`], so two clients racing to bind the same key can
//! never both succeed. Expiry is evaluated lazily against the injected clock;
//! nothing ever deletes a record.

use std::sync::Arc;

use tracing::debug;

use crate::clock::Clock;
use crate::error::LicenseError;
use crate::keygen::generate_license_key;
use crate::store::{License, LicenseStore};

/// Successful activation: the client holds the seat until `expires_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct Activation {
    pub expires_at: i64,
}

/// Non-mutating availability probe result. `ok` says whether the supplied
/// client (or any client, when none was supplied) could use the license;
/// the current holder and expiry are disclosed either way.
#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    pub ok: bool,
    pub active_client: Option<String>,
    pub expires_at: i64,
}

/// Owns all license records and enforces the activation state machine.
/// Holds no shared state beyond the store and clock handles, so it clones
/// cheaply into every request handler.
#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn LicenseStore>,
    clock: Arc<dyn Clock>,
}

impl Registry {
    pub fn new(store: Arc<dyn LicenseStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Issue a new license valid for `duration_days` from now.
    pub fn create(&self, duration_days: u32) -> Result<License, LicenseError> {
        if duration_days == 0 {
            return Err(LicenseError::InvalidInput("days must be positive"));
        }

        let now = self.clock.now();
        let license = License {
            key: generate_license_key(),
            created_at: now,
            duration_days,
            expires_at: now + i64::from(duration_days) * 86_400,
            active_client: None,
            last_seen: None,
        };
        self.store.insert(&license)?;

        debug!(key = %license.key, duration_days, "issued license");
        Ok(license)
    }

    /// Bind `client_id` to the seat. Idempotent for the current holder;
    /// rejected with the holder disclosed when another client has the seat.
    pub fn activate(&self, key: &str, client_id: &str) -> Result<Activation, LicenseError> {
        if key.is_empty() || client_id.is_empty() {
            return Err(LicenseError::InvalidInput("key and client_id required"));
        }

        let now = self.clock.now();
        let mut verdict = Err(LicenseError::NotFound);
        self.store.update(key, &mut |current| match current {
            None => {
                verdict = Err(LicenseError::NotFound);
                None
            }
            Some(lic) if lic.is_expired(now) => {
                verdict = Err(LicenseError::Expired);
                None
            }
            Some(lic) => match lic.active_client.as_deref() {
                Some(holder) if holder != client_id => {
                    verdict = Err(LicenseError::Conflict {
                        active_client: holder.to_owned(),
                    });
                    None
                }
                // Unbound, or re-activation by the current holder.
                _ => {
                    let mut updated = lic.clone();
                    updated.active_client = Some(client_id.to_owned());
                    updated.last_seen = Some(now);
                    verdict = Ok(Activation {
                        expires_at: lic.expires_at,
                    });
                    Some(updated)
                }
            },
        })?;

        if verdict.is_ok() {
            debug!(key, client_id, "seat bound");
        }
        verdict
    }

    /// Check whether `client_id` would be allowed to use the license,
    /// without mutating anything. With no client supplied, `ok` means the
    /// seat is free.
    pub fn validate(
        &self,
        key: &str,
        client_id: Option<&str>,
    ) -> Result<Validation, LicenseError> {
        if key.is_empty() {
            return Err(LicenseError::InvalidInput("key required"));
        }

        let now = self.clock.now();
        let lic = self.store.get(key)?.ok_or(LicenseError::NotFound)?;
        if lic.is_expired(now) {
            return Err(LicenseError::Expired);
        }

        let ok = match lic.active_client.as_deref() {
            None => true,
            Some(holder) => client_id == Some(holder),
        };
        Ok(Validation {
            ok,
            active_client: lic.active_client,
            expires_at: lic.expires_at,
        })
    }

    /// Refresh `last_seen` for the current holder. Deliberately does not
    /// re-check expiry — an open session keeps reporting until it closes.
    pub fn heartbeat(&self, key: &str, client_id: &str) -> Result<(), LicenseError> {
        let now = self.clock.now();
        let mut verdict = Err(LicenseError::NotFound);
        self.store.update(key, &mut |current| match current {
            None => {
                verdict = Err(LicenseError::NotFound);
                None
            }
            Some(lic) if !lic.is_held_by(client_id) => {
                verdict = Err(LicenseError::Forbidden);
                None
            }
            Some(lic) => {
                let mut updated = lic.clone();
                updated.last_seen = Some(now);
                verdict = Ok(());
                Some(updated)
            }
        })?;
        verdict
    }

    /// Release the seat. Only the current holder may release; this is the
    /// only transition that lets a different client subsequently activate.
    pub fn deactivate(&self, key: &str, client_id: &str) -> Result<(), LicenseError> {
        let mut verdict = Err(LicenseError::NotFound);
        self.store.update(key, &mut |current| match current {
            None => {
                verdict = Err(LicenseError::NotFound);
                None
            }
            Some(lic) if !lic.is_held_by(client_id) => {
                verdict = Err(LicenseError::Forbidden);
                None
            }
            Some(lic) => {
                let mut updated = lic.clone();
                updated.active_client = None;
                updated.last_seen = None;
                verdict = Ok(());
                Some(updated)
            }
        })?;

        if verdict.is_ok() {
            debug!(key, client_id, "seat released");
        }
        verdict
    }

    /// Snapshot of all records, for admin inspection.
    pub fn list(&self) -> Result<Vec<License>, LicenseError> {
        Ok(self.store.list()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryStore;

    const NOW: i64 = 1_700_000_000;

    fn registry() -> (Registry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(NOW));
        let registry = Registry::new(Arc::new(MemoryStore::new()), clock.clone());
        (registry, clock)
    }

    // ── create ───────────────────────────────────────────────────────────

    #[test]
    fn create_sets_expiry_exactly_duration_days_after_creation() {
        let (reg, _clock) = registry();
        let lic = reg.create(30).unwrap();
        assert_eq!(lic.created_at, NOW);
        assert_eq!(lic.duration_days, 30);
        assert_eq!(lic.expires_at, NOW + 30 * 86_400);
        assert_eq!(lic.active_client, None);
        assert_eq!(lic.last_seen, None);
    }

    #[test]
    fn create_rejects_zero_days() {
        let (reg, _clock) = registry();
        assert!(matches!(
            reg.create(0),
            Err(LicenseError::InvalidInput(_))
        ));
        assert!(reg.list().unwrap().is_empty());
    }

    #[test]
    fn created_keys_are_distinct() {
        let (reg, _clock) = registry();
        let a = reg.create(30).unwrap();
        let b = reg.create(30).unwrap();
        assert_ne!(a.key, b.key);
        assert_eq!(reg.list().unwrap().len(), 2);
    }

    // ── activate ─────────────────────────────────────────────────────────

    #[test]
    fn activate_binds_an_unbound_license() {
        let (reg, _clock) = registry();
        let lic = reg.create(30).unwrap();

        let activation = reg.activate(&lic.key, "laptop-1").unwrap();
        assert_eq!(activation.expires_at, lic.expires_at);

        let stored = reg.list().unwrap().pop().unwrap();
        assert_eq!(stored.active_client.as_deref(), Some("laptop-1"));
        assert_eq!(stored.last_seen, Some(NOW));
    }

    #[test]
    fn activate_is_idempotent_for_the_holder() {
        let (reg, clock) = registry();
        let lic = reg.create(30).unwrap();

        reg.activate(&lic.key, "laptop-1").unwrap();
        clock.advance(60);
        let again = reg.activate(&lic.key, "laptop-1").unwrap();
        assert_eq!(again.expires_at, lic.expires_at);

        let stored = reg.list().unwrap().pop().unwrap();
        assert_eq!(stored.active_client.as_deref(), Some("laptop-1"));
        assert_eq!(stored.last_seen, Some(NOW + 60));
    }

    #[test]
    fn activate_by_second_client_is_rejected_and_state_unchanged() {
        let (reg, _clock) = registry();
        let lic = reg.create(30).unwrap();
        reg.activate(&lic.key, "laptop-1").unwrap();

        match reg.activate(&lic.key, "laptop-2") {
            Err(LicenseError::Conflict { active_client }) => {
                assert_eq!(active_client, "laptop-1");
            }
            other => panic!("expected conflict, got {other:?}"),
        }

        let stored = reg.list().unwrap().pop().unwrap();
        assert_eq!(stored.active_client.as_deref(), Some("laptop-1"));
    }

    #[test]
    fn activate_unknown_key_is_not_found() {
        let (reg, _clock) = registry();
        assert!(matches!(
            reg.activate("DOESNOTEXIST", "laptop-1"),
            Err(LicenseError::NotFound)
        ));
    }

    #[test]
    fn activate_requires_key_and_client() {
        let (reg, _clock) = registry();
        let lic = reg.create(30).unwrap();
        assert!(matches!(
            reg.activate("", "laptop-1"),
            Err(LicenseError::InvalidInput(_))
        ));
        assert!(matches!(
            reg.activate(&lic.key, ""),
            Err(LicenseError::InvalidInput(_))
        ));
    }

    #[test]
    fn activate_succeeds_at_expiry_instant_and_fails_after() {
        let (reg, clock) = registry();
        let lic = reg.create(30).unwrap();

        clock.set(lic.expires_at);
        reg.activate(&lic.key, "laptop-1").unwrap();

        clock.advance(1);
        assert!(matches!(
            reg.activate(&lic.key, "laptop-1"),
            Err(LicenseError::Expired)
        ));
    }

    #[test]
    fn expiry_applies_regardless_of_prior_binding() {
        let (reg, clock) = registry();
        let lic = reg.create(30).unwrap();
        reg.activate(&lic.key, "laptop-1").unwrap();

        clock.set(lic.expires_at + 1);
        assert!(matches!(
            reg.activate(&lic.key, "laptop-1"),
            Err(LicenseError::Expired)
        ));
        assert!(matches!(
            reg.validate(&lic.key, Some("laptop-1")),
            Err(LicenseError::Expired)
        ));
    }

    // ── validate ─────────────────────────────────────────────────────────

    #[test]
    fn validate_unbound_without_client_is_ok() {
        let (reg, _clock) = registry();
        let lic = reg.create(30).unwrap();

        let v = reg.validate(&lic.key, None).unwrap();
        assert!(v.ok);
        assert_eq!(v.active_client, None);
        assert_eq!(v.expires_at, lic.expires_at);
    }

    #[test]
    fn validate_bound_to_other_client_discloses_holder() {
        let (reg, _clock) = registry();
        let lic = reg.create(30).unwrap();
        reg.activate(&lic.key, "laptop-1").unwrap();

        let v = reg.validate(&lic.key, Some("laptop-2")).unwrap();
        assert!(!v.ok);
        assert_eq!(v.active_client.as_deref(), Some("laptop-1"));
        assert_eq!(v.expires_at, lic.expires_at);
    }

    #[test]
    fn validate_bound_to_same_client_is_ok() {
        let (reg, _clock) = registry();
        let lic = reg.create(30).unwrap();
        reg.activate(&lic.key, "laptop-1").unwrap();

        assert!(reg.validate(&lic.key, Some("laptop-1")).unwrap().ok);
    }

    #[test]
    fn validate_bound_without_client_is_not_ok() {
        let (reg, _clock) = registry();
        let lic = reg.create(30).unwrap();
        reg.activate(&lic.key, "laptop-1").unwrap();

        let v = reg.validate(&lic.key, None).unwrap();
        assert!(!v.ok);
        assert_eq!(v.active_client.as_deref(), Some("laptop-1"));
    }

    #[test]
    fn validate_does_not_mutate() {
        let (reg, _clock) = registry();
        let lic = reg.create(30).unwrap();
        reg.validate(&lic.key, Some("laptop-1")).unwrap();

        let stored = reg.list().unwrap().pop().unwrap();
        assert_eq!(stored.active_client, None);
        assert_eq!(stored.last_seen, None);
    }

    #[test]
    fn validate_unknown_and_empty_key() {
        let (reg, _clock) = registry();
        assert!(matches!(
            reg.validate("DOESNOTEXIST", None),
            Err(LicenseError::NotFound)
        ));
        assert!(matches!(
            reg.validate("", None),
            Err(LicenseError::InvalidInput(_))
        ));
    }

    // ── heartbeat ────────────────────────────────────────────────────────

    #[test]
    fn heartbeat_refreshes_last_seen_for_the_holder() {
        let (reg, clock) = registry();
        let lic = reg.create(30).unwrap();
        reg.activate(&lic.key, "laptop-1").unwrap();

        clock.advance(300);
        reg.heartbeat(&lic.key, "laptop-1").unwrap();

        let stored = reg.list().unwrap().pop().unwrap();
        assert_eq!(stored.last_seen, Some(NOW + 300));
    }

    #[test]
    fn heartbeat_on_unbound_license_is_forbidden() {
        let (reg, _clock) = registry();
        let lic = reg.create(30).unwrap();
        assert!(matches!(
            reg.heartbeat(&lic.key, "laptop-1"),
            Err(LicenseError::Forbidden)
        ));
    }

    #[test]
    fn heartbeat_by_non_holder_is_forbidden() {
        let (reg, _clock) = registry();
        let lic = reg.create(30).unwrap();
        reg.activate(&lic.key, "laptop-1").unwrap();
        assert!(matches!(
            reg.heartbeat(&lic.key, "laptop-2"),
            Err(LicenseError::Forbidden)
        ));
    }

    #[test]
    fn heartbeat_unknown_key_is_not_found() {
        let (reg, _clock) = registry();
        assert!(matches!(
            reg.heartbeat("DOESNOTEXIST", "laptop-1"),
            Err(LicenseError::NotFound)
        ));
    }

    // Preserved source behavior: heartbeat never re-checks expiry.
    #[test]
    fn heartbeat_still_succeeds_past_expiry() {
        let (reg, clock) = registry();
        let lic = reg.create(30).unwrap();
        reg.activate(&lic.key, "laptop-1").unwrap();

        clock.set(lic.expires_at + 86_400);
        reg.heartbeat(&lic.key, "laptop-1").unwrap();

        let stored = reg.list().unwrap().pop().unwrap();
        assert_eq!(stored.last_seen, Some(lic.expires_at + 86_400));
    }

    // ── deactivate ───────────────────────────────────────────────────────

    #[test]
    fn deactivate_releases_the_seat_for_a_new_client() {
        let (reg, _clock) = registry();
        let lic = reg.create(30).unwrap();
        reg.activate(&lic.key, "laptop-1").unwrap();

        reg.deactivate(&lic.key, "laptop-1").unwrap();
        let stored = reg.list().unwrap().pop().unwrap();
        assert_eq!(stored.active_client, None);
        assert_eq!(stored.last_seen, None);

        reg.activate(&lic.key, "laptop-2").unwrap();
        let stored = reg.list().unwrap().pop().unwrap();
        assert_eq!(stored.active_client.as_deref(), Some("laptop-2"));
    }

    #[test]
    fn deactivate_by_non_holder_is_forbidden_and_state_unchanged() {
        let (reg, _clock) = registry();
        let lic = reg.create(30).unwrap();
        reg.activate(&lic.key, "laptop-1").unwrap();

        assert!(matches!(
            reg.deactivate(&lic.key, "laptop-2"),
            Err(LicenseError::Forbidden)
        ));
        let stored = reg.list().unwrap().pop().unwrap();
        assert_eq!(stored.active_client.as_deref(), Some("laptop-1"));
    }

    #[test]
    fn deactivate_unknown_key_is_not_found() {
        let (reg, _clock) = registry();
        assert!(matches!(
            reg.deactivate("DOESNOTEXIST", "laptop-1"),
            Err(LicenseError::NotFound)
        ));
    }

    // ── concurrency ──────────────────────────────────────────────────────

    #[test]
    fn racing_activations_bind_exactly_one_client() {
        use std::sync::Barrier;

        let (reg, _clock) = registry();
        let lic = reg.create(30).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = ["client-a", "client-b"]
            .into_iter()
            .map(|client| {
                let reg = reg.clone();
                let key = lic.key.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    reg.activate(&key, client).map(|_| client)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let winners: Vec<&str> = results.iter().filter_map(|r| r.as_deref().ok()).collect();
        assert_eq!(winners.len(), 1, "exactly one activation must succeed");

        match results.iter().find(|r| r.is_err()).expect("one must lose") {
            Err(LicenseError::Conflict { active_client }) => {
                assert_eq!(active_client, winners[0]);
            }
            other => panic!("loser should see conflict, got {other:?}"),
        }

        let stored = reg.list().unwrap().pop().unwrap();
        assert_eq!(stored.active_client.as_deref(), Some(winners[0]));
    }

    // `last_seen` is non-null iff `active_client` is non-null, at every step.
    #[test]
    fn last_seen_tracks_binding_through_the_lifecycle() {
        let (reg, _clock) = registry();
        let lic = reg.create(30).unwrap();

        let bound_iff = |reg: &Registry| {
            let stored = reg.list().unwrap().pop().unwrap();
            stored.active_client.is_some() == stored.last_seen.is_some()
        };

        assert!(bound_iff(&reg));
        reg.activate(&lic.key, "laptop-1").unwrap();
        assert!(bound_iff(&reg));
        reg.heartbeat(&lic.key, "laptop-1").unwrap();
        assert!(bound_iff(&reg));
        reg.deactivate(&lic.key, "laptop-1").unwrap();
        assert!(bound_iff(&reg));
    }

    // The redb-backed store enforces the same serialization as the double.
    #[test]
    fn registry_works_over_redb() {
        let dir = tempfile::tempdir().unwrap();
        let store = crate::store::RedbStore::open(&dir.path().join("test.db")).unwrap();
        let clock = Arc::new(ManualClock::new(NOW));
        let reg = Registry::new(Arc::new(store), clock);

        let lic = reg.create(7).unwrap();
        reg.activate(&lic.key, "laptop-1").unwrap();
        assert!(matches!(
            reg.activate(&lic.key, "laptop-2"),
            Err(LicenseError::Conflict { .. })
        ));
        reg.deactivate(&lic.key, "laptop-1").unwrap();
        reg.activate(&lic.key, "laptop-2").unwrap();

        let stored = reg.list().unwrap().pop().unwrap();
        assert_eq!(stored.active_client.as_deref(), Some("laptop-2"));
    }
}
