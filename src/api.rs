//! HTTP transport and response classification.
//!
//! The backend speaks a JSON envelope: 2xx with `success != false` means
//! the request worked, 401/403 carry auth failures, and 400 carries
//! validation or quota errors in an `error` string. Anything that is not
//! JSON (an HTML error page, for example) is turned into
//! `ApiError::MalformedResponse` with a bounded body snippet instead of a
//! raw parse failure.

use crate::error::{body_snippet, ApiError};
use serde_json::Value;

/// A response before classification: status, content type, raw body.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: String,
    pub body: String,
}

/// Trait for the HTTP layer to allow mocking in tests.
pub trait ApiTransport {
    fn execute(
        &self,
        method: &str,
        path: &str,
        bearer: Option<&str>,
        body: Option<&Value>,
    ) -> Result<RawResponse, ApiError>;
}

pub struct HttpTransport {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent: ureq::Agent::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl ApiTransport for HttpTransport {
    fn execute(
        &self,
        method: &str,
        path: &str,
        bearer: Option<&str>,
        body: Option<&Value>,
    ) -> Result<RawResponse, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .agent
            .request(method, &url)
            .set("Content-Type", "application/json");
        if let Some(header) = bearer {
            req = req.set("Authorization", header);
        }

        let result = match body {
            Some(json) => req.send_json(json.clone()),
            None => req.call(),
        };

        // ureq reports 4xx/5xx as Error::Status; we still want the body
        // for classification.
        let resp = match result {
            Ok(r) => r,
            Err(ureq::Error::Status(_, r)) => r,
            Err(e) => return Err(ApiError::Network(e.to_string())),
        };

        let status = resp.status();
        let content_type = resp.content_type().to_string();
        let body = resp
            .into_string()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(RawResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Interpret a raw response against the backend's JSON envelope.
pub fn classify(resp: RawResponse) -> Result<Value, ApiError> {
    if !resp.content_type.contains("json") {
        // Auth failures keep their meaning even when the body is junk.
        return Err(match resp.status {
            401 => ApiError::Unauthorized,
            403 => ApiError::PermissionDenied,
            _ => ApiError::MalformedResponse {
                status: resp.status,
                snippet: body_snippet(&resp.body),
            },
        });
    }

    let value: Value = match serde_json::from_str(&resp.body) {
        Ok(v) => v,
        Err(_) => {
            return Err(ApiError::MalformedResponse {
                status: resp.status,
                snippet: body_snippet(&resp.body),
            })
        }
    };

    let message = value
        .get("error")
        .and_then(Value::as_str)
        .or_else(|| value.get("message").and_then(Value::as_str))
        .unwrap_or("request failed")
        .to_string();

    match resp.status {
        200..=299 => {
            if value.get("success").and_then(Value::as_bool) == Some(false) {
                Err(ApiError::Api {
                    status: resp.status,
                    message,
                })
            } else {
                Ok(value)
            }
        }
        401 => Err(ApiError::Unauthorized),
        403 => Err(ApiError::PermissionDenied),
        400 if is_quota_message(&message) => Err(ApiError::QuotaExceeded(message)),
        _ => Err(ApiError::Api {
            status: resp.status,
            message,
        }),
    }
}

fn is_quota_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    lower.contains("daily limit")
        || lower.contains("usage limit")
        || lower.contains("quota")
}

/// POST a JSON body and classify the response.
pub fn post_json(
    transport: &dyn ApiTransport,
    path: &str,
    bearer: Option<&str>,
    body: &Value,
) -> Result<Value, ApiError> {
    classify(transport.execute("POST", path, bearer, Some(body))?)
}

/// GET and classify the response.
pub fn get_json(
    transport: &dyn ApiTransport,
    path: &str,
    bearer: Option<&str>,
) -> Result<Value, ApiError> {
    classify(transport.execute("GET", path, bearer, None)?)
}

#[cfg(test)]
pub mod testing {
    //! Scripted transport for tests: pops one canned response per call and
    //! records what was sent.

    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    pub struct RecordedCall {
        pub method: String,
        pub path: String,
        pub bearer: Option<String>,
        pub body: Option<Value>,
    }

    #[derive(Default)]
    pub struct MockTransport {
        responses: RefCell<VecDeque<Result<RawResponse, ApiError>>>,
        pub calls: RefCell<Vec<RecordedCall>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_json(&self, status: u16, body: &str) {
            self.responses.borrow_mut().push_back(Ok(RawResponse {
                status,
                content_type: "application/json".to_string(),
                body: body.to_string(),
            }));
        }

        pub fn push_raw(&self, status: u16, content_type: &str, body: &str) {
            self.responses.borrow_mut().push_back(Ok(RawResponse {
                status,
                content_type: content_type.to_string(),
                body: body.to_string(),
            }));
        }

        pub fn push_network_error(&self) {
            self.responses
                .borrow_mut()
                .push_back(Err(ApiError::Network("connection refused".to_string())));
        }

        pub fn call_count(&self) -> usize {
            self.calls.borrow().len()
        }
    }

    impl ApiTransport for MockTransport {
        fn execute(
            &self,
            method: &str,
            path: &str,
            bearer: Option<&str>,
            body: Option<&Value>,
        ) -> Result<RawResponse, ApiError> {
            self.calls.borrow_mut().push(RecordedCall {
                method: method.to_string(),
                path: path.to_string(),
                bearer: bearer.map(String::from),
                body: body.cloned(),
            });
            self.responses
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| panic!("no scripted response for {} {}", method, path))
        }
    }
}
