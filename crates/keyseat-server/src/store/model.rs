use serde::{Deserialize, Serialize};

/// Stored in redb as bincode-encoded bytes, keyed by `key`.
/// `expires_at` is fixed at creation — a renewal is a new license, never an
/// extension of this record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct License {
    /// 32 uppercase hex characters, unique for the lifetime of the store.
    pub key: String,
    /// Unix timestamp (seconds) when the license was issued.
    pub created_at: i64,
    /// Validity window in days, set once at creation.
    pub duration_days: u32,
    /// Unix timestamp (seconds): `created_at + duration_days * 86400`.
    pub expires_at: i64,
    /// The client currently holding the seat. `None` means unbound.
    pub active_client: Option<String>,
    /// Last successful activation or heartbeat for the bound client.
    /// Set iff `active_client` is set.
    pub last_seen: Option<i64>,
}

impl License {
    /// A license is expired strictly after its expiry instant — an operation
    /// at exactly `expires_at` still succeeds.
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }

    /// Returns true if `client_id` currently holds the seat.
    pub fn is_held_by(&self, client_id: &str) -> bool {
        self.active_client.as_deref() == Some(client_id)
    }
}
