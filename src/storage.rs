//! Dual-store credential persistence.
//!
//! Values are written to a durable store (one file per key under the data
//! directory) and mirrored into a session-scoped in-memory store. Either
//! store may be unavailable: a failed durable write is logged and
//! swallowed, and reads fall back to the mirror. No TTL is enforced here;
//! callers that need expiry (cookie consent) check their own timestamps.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const KEY_AUTH_TOKEN: &str = "auth_token";
pub const KEY_USER_INFO: &str = "user_info";
pub const KEY_PLAN_INFO: &str = "plan_info";
pub const KEY_COOKIE_CONSENT: &str = "cookie_consent";

/// Keys cleared together when a session ends.
pub const CREDENTIAL_KEYS: &[&str] = &[KEY_AUTH_TOKEN, KEY_USER_INFO, KEY_PLAN_INFO];

pub struct CredentialStore {
    dir: PathBuf,
    mirror: RefCell<HashMap<String, String>>,
}

impl CredentialStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            mirror: RefCell::new(HashMap::new()),
        }
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    /// Write durable first, then mirror. Failures are logged, never raised.
    pub fn save(&self, key: &str, value: &str) {
        if let Err(e) = fs::create_dir_all(&self.dir)
            .and_then(|_| fs::write(self.key_path(key), value))
        {
            eprintln!("warning: failed to persist '{}': {}", key, e);
        }
        self.mirror
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
    }

    /// Read from the durable store, falling back to the session mirror.
    pub fn read(&self, key: &str) -> Option<String> {
        match fs::read_to_string(self.key_path(key)) {
            Ok(value) => Some(value),
            Err(_) => self.mirror.borrow().get(key).cloned(),
        }
    }

    /// Remove the given keys from both stores.
    pub fn clear(&self, keys: &[&str]) {
        for key in keys {
            let path = self.key_path(key);
            if path.exists() {
                if let Err(e) = fs::remove_file(&path) {
                    eprintln!("warning: failed to remove '{}': {}", key, e);
                }
            }
            self.mirror.borrow_mut().remove(*key);
        }
    }
}
