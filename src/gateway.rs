//! Tool invocation gateway.
//!
//! Stateless between invocations except for a single in-flight guard: only
//! one tool call may be active at a time, and a second attempt is rejected
//! with `AlreadyProcessing` instead of being queued. A 401 from any tool
//! endpoint invalidates the session before the error is surfaced, so every
//! component observes the logout immediately.

use crate::api::{self, ApiTransport};
use crate::error::ApiError;
use crate::session::{Plan, SessionManager};
use crate::storage::CredentialStore;
use crate::tools::ToolRequest;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;
use std::cell::Cell;

#[derive(Default)]
pub struct ToolGateway {
    in_flight: Cell<bool>,
}

/// Clears the in-flight flag when the invocation ends, on every path.
struct InFlightGuard<'a>(&'a Cell<bool>);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl ToolGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn begin(&self) -> Result<InFlightGuard<'_>, ApiError> {
        if self.in_flight.get() {
            return Err(ApiError::AlreadyProcessing);
        }
        self.in_flight.set(true);
        Ok(InFlightGuard(&self.in_flight))
    }

    /// Run one tool invocation: encode the image payload (if any), merge it
    /// with the tool options, POST to the tool's endpoint and classify the
    /// response.
    pub fn invoke(
        &self,
        transport: &dyn ApiTransport,
        session: &mut SessionManager,
        store: &CredentialStore,
        request: &ToolRequest,
        image: Option<&[u8]>,
    ) -> Result<Value, ApiError> {
        let _guard = self.begin()?;

        let mut body = request.options();
        if request.needs_image() {
            let bytes = image.ok_or_else(|| {
                ApiError::Validation(format!("{} requires an input image", request.name()))
            })?;
            check_upload_size(session.plan(), bytes.len() as u64)?;
            body["image"] = Value::String(STANDARD.encode(bytes));
        }

        let header = session.authorization_header();
        if header.is_none() && request.requires_auth() {
            return Err(ApiError::Unauthorized);
        }
        match api::post_json(transport, request.endpoint(), header.as_deref(), &body) {
            Ok(result) => Ok(result),
            Err(ApiError::Unauthorized) => {
                session.invalidate(store);
                Err(ApiError::Unauthorized)
            }
            Err(e) => Err(e),
        }
    }
}

/// Pre-flight check of the image size against the plan's upload limit,
/// done before encoding or any network traffic.
pub fn check_upload_size(plan: Plan, size_bytes: u64) -> Result<(), ApiError> {
    if size_bytes > plan.max_upload_bytes() {
        let size_mb = size_bytes as f64 / (1024.0 * 1024.0);
        return Err(ApiError::Validation(format!(
            "image is {:.1} MB but the {} plan allows at most {} MB; use a smaller file or upgrade your plan",
            size_mb,
            plan.display_name(),
            plan.max_upload_mb()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::MockTransport;
    use tempfile::TempDir;

    fn authed_session(store: &CredentialStore) -> SessionManager {
        let transport = MockTransport::new();
        transport.push_json(
            200,
            r#"{"token": "tok-1", "user": {"id": 1, "email": "a@b.com", "plan": "free"}}"#,
        );
        let mut session = SessionManager::new();
        session
            .login(&transport, store, "a@b.com", "secret1")
            .unwrap();
        session
    }

    #[test]
    fn test_invoke_sends_options_and_image() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path());
        let mut session = authed_session(&store);
        let gateway = ToolGateway::new();
        let transport = MockTransport::new();
        transport.push_json(200, r#"{"success": true, "processed_image": "aGk="}"#);

        let request = ToolRequest::compress_image(85, "jpeg", None).unwrap();
        let result = gateway
            .invoke(&transport, &mut session, &store, &request, Some(b"fakeimg"))
            .unwrap();
        assert_eq!(result["processed_image"], "aGk=");

        let calls = transport.calls.borrow();
        assert_eq!(calls[0].path, "/api/tools/compress-image");
        assert_eq!(calls[0].bearer.as_deref(), Some("Bearer tok-1"));
        let body = calls[0].body.as_ref().unwrap();
        assert_eq!(body["quality"], 85);
        assert_eq!(body["image"], STANDARD.encode(b"fakeimg"));
    }

    #[test]
    fn test_second_invocation_rejected_while_in_flight() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path());
        let mut session = authed_session(&store);
        let gateway = ToolGateway::new();
        let transport = MockTransport::new();

        let _held = gateway.begin().unwrap();
        let request = ToolRequest::convert_currency(10.0, "USD", "EUR").unwrap();
        let err = gateway
            .invoke(&transport, &mut session, &store, &request, None)
            .unwrap_err();
        assert!(matches!(err, ApiError::AlreadyProcessing));
        // rejected before any network call
        assert_eq!(transport.call_count(), 0);
    }

    #[test]
    fn test_guard_released_after_invocation() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path());
        let mut session = authed_session(&store);
        let gateway = ToolGateway::new();
        let transport = MockTransport::new();
        transport.push_json(200, r#"{"success": true, "result": 1}"#);
        transport.push_json(200, r#"{"success": true, "result": 2}"#);

        let request = ToolRequest::convert_currency(10.0, "USD", "EUR").unwrap();
        gateway
            .invoke(&transport, &mut session, &store, &request, None)
            .unwrap();
        // sequential invocations are fine, the guard only covers in-flight
        gateway
            .invoke(&transport, &mut session, &store, &request, None)
            .unwrap();
        assert_eq!(transport.call_count(), 2);
    }

    #[test]
    fn test_guard_released_after_error() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path());
        let mut session = authed_session(&store);
        let gateway = ToolGateway::new();
        let transport = MockTransport::new();
        transport.push_network_error();
        transport.push_json(200, r#"{"success": true}"#);

        let request = ToolRequest::convert_currency(10.0, "USD", "EUR").unwrap();
        assert!(gateway
            .invoke(&transport, &mut session, &store, &request, None)
            .is_err());
        // the guard did not leak
        assert!(gateway
            .invoke(&transport, &mut session, &store, &request, None)
            .is_ok());
    }

    #[test]
    fn test_401_invalidates_session() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path());
        let mut session = authed_session(&store);
        let gateway = ToolGateway::new();
        let transport = MockTransport::new();
        transport.push_json(401, r#"{"error": "token expired"}"#);

        let request = ToolRequest::convert_currency(10.0, "USD", "EUR").unwrap();
        let err = gateway
            .invoke(&transport, &mut session, &store, &request, None)
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert!(!session.is_authenticated());
        assert!(session.authorization_header().is_none());
    }

    #[test]
    fn test_quota_exceeded_classified() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path());
        let mut session = authed_session(&store);
        let gateway = ToolGateway::new();
        let transport = MockTransport::new();
        transport.push_json(400, r#"{"error": "daily limit reached (5/5)"}"#);

        let request = ToolRequest::convert_currency(10.0, "USD", "EUR").unwrap();
        let err = gateway
            .invoke(&transport, &mut session, &store, &request, None)
            .unwrap_err();
        assert!(matches!(err, ApiError::QuotaExceeded(_)));
        // quota errors do not touch the session
        assert!(session.is_authenticated());
    }

    #[test]
    fn test_upload_size_checked_before_network() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path());
        let mut session = authed_session(&store);
        let gateway = ToolGateway::new();
        let transport = MockTransport::new();

        // free plan: 5 MB limit, 6 MB image
        let big = vec![0u8; 6 * 1024 * 1024];
        let request = ToolRequest::compress_image(85, "jpeg", None).unwrap();
        let err = gateway
            .invoke(&transport, &mut session, &store, &request, Some(&big))
            .unwrap_err();
        match err {
            ApiError::Validation(msg) => {
                assert!(msg.contains("6.0 MB"));
                assert!(msg.contains("5 MB"));
                assert!(msg.contains("Free"));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(transport.call_count(), 0);
    }

    #[test]
    fn test_check_upload_size_under_limit() {
        // 2 MB file passes the free plan's 5 MB limit
        assert!(check_upload_size(Plan::Free, 2 * 1024 * 1024).is_ok());
        assert!(check_upload_size(Plan::Enterprise, 400 * 1024 * 1024).is_ok());
    }

    #[test]
    fn test_text_tools_rejected_when_anonymous() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path());
        let mut session = SessionManager::new();
        let gateway = ToolGateway::new();
        let transport = MockTransport::new();

        let request = ToolRequest::convert_currency(10.0, "USD", "EUR").unwrap();
        let err = gateway
            .invoke(&transport, &mut session, &store, &request, None)
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        // aborted client-side, nothing was sent
        assert_eq!(transport.call_count(), 0);
    }

    #[test]
    fn test_image_tools_sent_without_header_when_anonymous() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path());
        let mut session = SessionManager::new();
        let gateway = ToolGateway::new();
        let transport = MockTransport::new();
        transport.push_json(200, r#"{"success": true, "processed_image": "aGk="}"#);

        gateway
            .invoke(
                &transport,
                &mut session,
                &store,
                &ToolRequest::RemoveBackground,
                Some(b"fakeimg"),
            )
            .unwrap();
        let calls = transport.calls.borrow();
        assert!(calls[0].bearer.is_none());
    }

    #[test]
    fn test_missing_image_rejected() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path());
        let mut session = authed_session(&store);
        let gateway = ToolGateway::new();
        let transport = MockTransport::new();

        let err = gateway
            .invoke(
                &transport,
                &mut session,
                &store,
                &ToolRequest::RemoveBackground,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        assert_eq!(transport.call_count(), 0);
    }
}
