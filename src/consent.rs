//! Cookie-consent persistence.
//!
//! The choice is stored through the credential store with an ISO timestamp
//! and honored for 365 days; after that the user is asked again. Expiry is
//! checked here, not in the store.

use crate::storage::{CredentialStore, KEY_COOKIE_CONSENT};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const CONSENT_TTL_DAYS: i64 = 365;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub accepted: bool,
    pub recorded_at: DateTime<Utc>,
}

impl ConsentRecord {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.recorded_at > Duration::days(CONSENT_TTL_DAYS)
    }
}

/// Persist the user's choice with the current timestamp.
pub fn record_choice(store: &CredentialStore, accepted: bool) {
    let record = ConsentRecord {
        accepted,
        recorded_at: Utc::now(),
    };
    match serde_json::to_string(&record) {
        Ok(encoded) => store.save(KEY_COOKIE_CONSENT, &encoded),
        Err(e) => eprintln!("warning: failed to encode consent record: {}", e),
    }
}

/// The current choice, or None when absent, corrupt, or older than the
/// TTL. Stale records are cleared so the question is asked again.
pub fn current_choice(store: &CredentialStore) -> Option<bool> {
    current_choice_at(store, Utc::now())
}

fn current_choice_at(store: &CredentialStore, now: DateTime<Utc>) -> Option<bool> {
    let raw = store.read(KEY_COOKIE_CONSENT)?;
    let record: ConsentRecord = match serde_json::from_str(&raw) {
        Ok(r) => r,
        Err(_) => {
            store.clear(&[KEY_COOKIE_CONSENT]);
            return None;
        }
    };
    if record.is_expired(now) {
        store.clear(&[KEY_COOKIE_CONSENT]);
        return None;
    }
    Some(record.accepted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_choice_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path());

        assert_eq!(current_choice(&store), None);
        record_choice(&store, true);
        assert_eq!(current_choice(&store), Some(true));
        record_choice(&store, false);
        assert_eq!(current_choice(&store), Some(false));
    }

    #[test]
    fn test_expired_choice_is_cleared() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path());

        record_choice(&store, true);
        let future = Utc::now() + Duration::days(CONSENT_TTL_DAYS + 1);
        assert_eq!(current_choice_at(&store, future), None);
        // the stale record was removed
        assert!(store.read(KEY_COOKIE_CONSENT).is_none());
    }

    #[test]
    fn test_choice_valid_just_under_ttl() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path());

        record_choice(&store, true);
        let almost = Utc::now() + Duration::days(CONSENT_TTL_DAYS) - Duration::hours(1);
        assert_eq!(current_choice_at(&store, almost), Some(true));
    }

    #[test]
    fn test_corrupt_record_cleared() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path());

        store.save(KEY_COOKIE_CONSENT, "{broken");
        assert_eq!(current_choice(&store), None);
        assert!(store.read(KEY_COOKIE_CONSENT).is_none());
    }
}
