//! Session manager: owns the authentication state.
//!
//! The session is either Anonymous or Authenticated. Token and user record
//! are stored together in one `Option<AuthState>` so they can never get out
//! of sync: both are set by a successful login/register and both are
//! cleared by `logout` or by `invalidate` (the implicit path taken when any
//! authorized request comes back 401).

use crate::api::{self, ApiTransport};
use crate::error::ApiError;
use crate::storage::{CredentialStore, CREDENTIAL_KEYS, KEY_AUTH_TOKEN, KEY_PLAN_INFO, KEY_USER_INFO};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Membership plan tiers, ordered by upload allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Basic,
    Professional,
    Flagship,
    Enterprise,
    // serde requires the catch-all variant to come last
    #[default]
    #[serde(other)]
    Free,
}

impl Plan {
    /// Parse a plan name, treating anything unknown as the free tier
    /// (mirrors the backend's fallback).
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Plan::Basic,
            "professional" => Plan::Professional,
            "flagship" => Plan::Flagship,
            "enterprise" => Plan::Enterprise,
            _ => Plan::Free,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Basic => "basic",
            Plan::Professional => "professional",
            Plan::Flagship => "flagship",
            Plan::Enterprise => "enterprise",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Plan::Free => "Free",
            Plan::Basic => "Basic",
            Plan::Professional => "Professional",
            Plan::Flagship => "Flagship",
            Plan::Enterprise => "Enterprise",
        }
    }

    /// Per-plan upload size limit in MB, enforced client-side before an
    /// image is encoded or sent.
    pub fn max_upload_mb(&self) -> u64 {
        match self {
            Plan::Free => 5,
            Plan::Basic => 10,
            Plan::Professional => 50,
            Plan::Flagship => 100,
            Plan::Enterprise => 500,
        }
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb() * 1024 * 1024
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub plan: Plan,
    #[serde(default)]
    pub usage_stats: Option<Value>,
}

impl UserRecord {
    /// Build a user record from a response object. The backend is not
    /// consistent about shapes: ids may be numbers or strings, and the plan
    /// sometimes arrives as `membership_type`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let id = match obj.get("id").or_else(|| obj.get("user_id")) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return None,
        };
        Some(Self {
            id,
            email: str_field(obj, "email").unwrap_or_default(),
            name: str_field(obj, "name").unwrap_or_default(),
            plan: plan_field(obj).unwrap_or_default(),
            usage_stats: obj.get("usage_stats").cloned(),
        })
    }

    /// Shallow overlay of a fresh profile payload over this record: fields
    /// present in `fresh` win, missing fields keep their cached value.
    /// Last write wins; stale responses are not reconciled.
    fn overlay(&self, fresh: &Value) -> Self {
        let obj = match fresh.as_object() {
            Some(o) => o,
            None => return self.clone(),
        };
        let id = match obj.get("id").or_else(|| obj.get("user_id")) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => self.id.clone(),
        };
        Self {
            id,
            email: str_field(obj, "email").unwrap_or_else(|| self.email.clone()),
            name: str_field(obj, "name").unwrap_or_else(|| self.name.clone()),
            plan: plan_field(obj).unwrap_or(self.plan),
            usage_stats: obj
                .get("usage_stats")
                .cloned()
                .or_else(|| self.usage_stats.clone()),
        }
    }
}

fn str_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(String::from)
}

fn plan_field(obj: &serde_json::Map<String, Value>) -> Option<Plan> {
    obj.get("plan")
        .or_else(|| obj.get("membership_type"))
        .and_then(Value::as_str)
        .map(Plan::parse)
}

/// Registration fields, validated client-side before any network call.
#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub name: String,
    pub invite_code: Option<String>,
}

impl Registration {
    pub fn validate(&self) -> Result<(), ApiError> {
        if !self.email.contains('@') || !self.email.contains('.') {
            return Err(ApiError::Validation("invalid email address".to_string()));
        }
        if self.password.chars().count() < 6 {
            return Err(ApiError::Validation(
                "password must be at least 6 characters".to_string(),
            ));
        }
        if self.password != self.confirm_password {
            return Err(ApiError::Validation("passwords do not match".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(ApiError::Validation("name is required".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct AuthState {
    token: String,
    user: UserRecord,
}

#[derive(Default)]
pub struct SessionManager {
    auth: Option<AuthState>,
    plan_info: Option<Value>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore the session from storage. Corrupt cached JSON clears the
    /// credential keys rather than leaving a half-usable session behind.
    pub fn hydrate(store: &CredentialStore) -> Self {
        let mut session = Self::new();
        if let (Some(token), Some(raw)) = (store.read(KEY_AUTH_TOKEN), store.read(KEY_USER_INFO)) {
            match serde_json::from_str::<UserRecord>(&raw) {
                Ok(user) => session.auth = Some(AuthState { token, user }),
                Err(e) => {
                    eprintln!("warning: discarding corrupt cached user info: {}", e);
                    store.clear(CREDENTIAL_KEYS);
                }
            }
        }
        if let Some(raw) = store.read(KEY_PLAN_INFO) {
            session.plan_info = serde_json::from_str(&raw).ok();
        }
        session
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth.is_some()
    }

    pub fn user(&self) -> Option<&UserRecord> {
        self.auth.as_ref().map(|a| &a.user)
    }

    pub fn token(&self) -> Option<&str> {
        self.auth.as_ref().map(|a| a.token.as_str())
    }

    /// Effective plan; anonymous sessions get the free tier limits.
    pub fn plan(&self) -> Plan {
        self.user().map(|u| u.plan).unwrap_or_default()
    }

    pub fn plan_info(&self) -> Option<&Value> {
        self.plan_info.as_ref()
    }

    /// `Bearer <token>` when authenticated, else None. Callers either omit
    /// the header or abort, depending on whether the endpoint needs auth.
    pub fn authorization_header(&self) -> Option<String> {
        self.token().map(|t| format!("Bearer {}", t))
    }

    pub fn login(
        &mut self,
        transport: &dyn ApiTransport,
        store: &CredentialStore,
        email: &str,
        password: &str,
    ) -> Result<(), ApiError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(ApiError::Validation(
                "email and password are required".to_string(),
            ));
        }

        let body = json!({ "email": email, "password": password });
        let data = match api::post_json(transport, "/api/auth/login", None, &body) {
            Ok(v) => v,
            Err(ApiError::Unauthorized) => return Err(ApiError::InvalidCredentials),
            Err(e) => return Err(e),
        };

        let (token, user) = extract_credentials(&data)?;
        self.set_auth(store, token, user);
        Ok(())
    }

    pub fn register(
        &mut self,
        transport: &dyn ApiTransport,
        store: &CredentialStore,
        registration: &Registration,
    ) -> Result<(), ApiError> {
        registration.validate()?;

        let mut body = json!({
            "email": registration.email,
            "password": registration.password,
            "name": registration.name,
        });
        if let Some(code) = &registration.invite_code {
            let code = code.trim();
            if !code.is_empty() {
                body["invite_code"] = Value::String(code.to_uppercase());
            }
        }

        let data = match api::post_json(transport, "/api/auth/register", None, &body) {
            Ok(v) => v,
            Err(ApiError::Api { message, .. }) if is_duplicate_message(&message) => {
                return Err(ApiError::DuplicateAccount)
            }
            Err(e) => return Err(e),
        };

        let (token, user) = extract_credentials(&data)?;
        self.set_auth(store, token, user);
        Ok(())
    }

    /// Explicit logout. A no-op when already anonymous.
    pub fn logout(&mut self, store: &CredentialStore) {
        self.invalidate(store);
    }

    /// Implicit logout taken when an authorized request returns 401.
    /// Idempotent: returns true only when credentials were actually
    /// cleared, so concurrent 401s collapse to one transition.
    pub fn invalidate(&mut self, store: &CredentialStore) -> bool {
        if self.auth.is_none() && self.plan_info.is_none() {
            return false;
        }
        self.auth = None;
        self.plan_info = None;
        store.clear(CREDENTIAL_KEYS);
        true
    }

    /// Refresh the cached user record from `/api/auth/profile`. The fresh
    /// payload is overlaid wholesale onto the cached record.
    pub fn refresh_profile(
        &mut self,
        transport: &dyn ApiTransport,
        store: &CredentialStore,
    ) -> Result<(), ApiError> {
        let header = self.authorization_header().ok_or(ApiError::Unauthorized)?;
        let data = match api::get_json(transport, "/api/auth/profile", Some(&header)) {
            Ok(v) => v,
            Err(ApiError::Unauthorized) => {
                self.invalidate(store);
                return Err(ApiError::Unauthorized);
            }
            Err(e) => return Err(e),
        };

        if let Some(auth) = self.auth.as_mut() {
            let fresh = data.get("user").unwrap_or(&data);
            let mut user = auth.user.overlay(fresh);
            if let Some(stats) = data.get("usage_stats") {
                user.usage_stats = Some(stats.clone());
            }
            persist_user(store, &user);
            auth.user = user;
        }
        Ok(())
    }

    /// Fetch and cache the membership plan details.
    pub fn fetch_plan_info(
        &mut self,
        transport: &dyn ApiTransport,
        store: &CredentialStore,
    ) -> Result<(), ApiError> {
        let header = self.authorization_header().ok_or(ApiError::Unauthorized)?;
        let data = match api::get_json(transport, "/api/auth/plan-info", Some(&header)) {
            Ok(v) => v,
            Err(ApiError::Unauthorized) => {
                self.invalidate(store);
                return Err(ApiError::Unauthorized);
            }
            Err(e) => return Err(e),
        };
        if let Some(info) = data.get("plan_info") {
            store.save(KEY_PLAN_INFO, &info.to_string());
            self.plan_info = Some(info.clone());
        }
        Ok(())
    }

    fn set_auth(&mut self, store: &CredentialStore, token: String, user: UserRecord) {
        store.save(KEY_AUTH_TOKEN, &token);
        persist_user(store, &user);
        self.auth = Some(AuthState { token, user });
    }
}

fn persist_user(store: &CredentialStore, user: &UserRecord) {
    match serde_json::to_string(user) {
        Ok(encoded) => store.save(KEY_USER_INFO, &encoded),
        Err(e) => eprintln!("warning: failed to encode user record: {}", e),
    }
}

/// Pull token and user out of a login/register response. The user object
/// may be nested under `user` or spread across the top level.
fn extract_credentials(data: &Value) -> Result<(String, UserRecord), ApiError> {
    let token = data
        .get("token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Api {
            status: 200,
            message: "response missing auth token".to_string(),
        })?
        .to_string();

    let user = data
        .get("user")
        .and_then(UserRecord::from_value)
        .or_else(|| UserRecord::from_value(data))
        .ok_or_else(|| ApiError::Api {
            status: 200,
            message: "response missing user record".to_string(),
        })?;

    Ok((token, user))
}

fn is_duplicate_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("already registered")
        || lower.contains("already exists")
        || lower.contains("duplicate")
}
