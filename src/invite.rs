//! Invite program: referral code and stats.

use crate::api::{self, ApiTransport};
use crate::error::ApiError;
use crate::session::SessionManager;
use crate::storage::CredentialStore;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InviteStats {
    #[serde(default)]
    pub invite_code: String,
    #[serde(default)]
    pub invited_count: u32,
}

/// Fetch the caller's invite code and referral count. Falls back to the
/// code-generation endpoint when no code exists yet, as the web UI does.
pub fn fetch_stats(
    transport: &dyn ApiTransport,
    session: &mut SessionManager,
    store: &CredentialStore,
) -> Result<InviteStats, ApiError> {
    let header = session.authorization_header().ok_or(ApiError::Unauthorized)?;

    let data = authorized_get(transport, session, store, "/api/invite/stats", &header)?;
    let mut stats: InviteStats = serde_json::from_value(data).unwrap_or_default();

    if stats.invite_code.is_empty() {
        let data = authorized_get(transport, session, store, "/api/invite/code", &header)?;
        if let Some(code) = data.get("invite_code").and_then(Value::as_str) {
            stats.invite_code = code.to_string();
        }
    }
    Ok(stats)
}

fn authorized_get(
    transport: &dyn ApiTransport,
    session: &mut SessionManager,
    store: &CredentialStore,
    path: &str,
    header: &str,
) -> Result<Value, ApiError> {
    match api::get_json(transport, path, Some(header)) {
        Ok(v) => Ok(v),
        Err(ApiError::Unauthorized) => {
            session.invalidate(store);
            Err(ApiError::Unauthorized)
        }
        Err(e) => Err(e),
    }
}
