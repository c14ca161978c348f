//! Payment flow: plans, orders, and the order-status polling monitor.
//!
//! The client never decides an order is paid on its own. After the user
//! claims payment (`mark_paid`), the monitor polls the query-order endpoint
//! at a fixed interval until the backend reports `paid` or the attempt
//! budget runs out. The state machine is tick-driven so tests can walk it
//! without timers; `watch_order` is the blocking driver the CLI uses.

use crate::api::{self, ApiTransport};
use crate::error::ApiError;
use crate::session::{Plan, SessionManager};
use crate::storage::CredentialStore;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const MAX_POLL_ATTEMPTS: u32 = 120; // 10 minutes at 5s per poll

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingPeriod {
    Monthly,
    Yearly,
}

impl BillingPeriod {
    pub fn parse(s: &str) -> Result<Self, ApiError> {
        match s.to_ascii_lowercase().as_str() {
            "monthly" => Ok(BillingPeriod::Monthly),
            "yearly" => Ok(BillingPeriod::Yearly),
            other => Err(ApiError::Validation(format!(
                "unknown billing period '{}' (expected monthly or yearly)",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BillingPeriod::Monthly => "monthly",
            BillingPeriod::Yearly => "yearly",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_no: String,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub plan: Plan,
    #[serde(default)]
    pub billing_period: Option<String>,
    #[serde(default)]
    pub status: String,
}

impl Order {
    pub fn is_paid(&self) -> bool {
        self.status == "paid"
    }
}

/// List the available membership plans.
pub fn fetch_plans(transport: &dyn ApiTransport) -> Result<Value, ApiError> {
    let data = api::get_json(transport, "/api/payment/plans", None)?;
    Ok(data.get("plans").cloned().unwrap_or(data))
}

/// Create an order for a plan upgrade. Requires an authenticated session.
pub fn create_order(
    transport: &dyn ApiTransport,
    session: &mut SessionManager,
    store: &CredentialStore,
    plan: Plan,
    period: BillingPeriod,
) -> Result<Order, ApiError> {
    let header = session.authorization_header().ok_or(ApiError::Unauthorized)?;
    let body = json!({
        "plan": plan.as_str(),
        "billing_period": period.as_str(),
    });
    let data = match api::post_json(transport, "/api/payment/create-order", Some(&header), &body) {
        Ok(v) => v,
        Err(ApiError::Unauthorized) => {
            session.invalidate(store);
            return Err(ApiError::Unauthorized);
        }
        Err(e) => return Err(e),
    };

    data.get("order")
        .and_then(|o| serde_json::from_value(o.clone()).ok())
        .ok_or_else(|| ApiError::Api {
            status: 200,
            message: "response missing order".to_string(),
        })
}

/// Tell the backend the user claims to have paid.
pub fn mark_paid(transport: &dyn ApiTransport, order_no: &str) -> Result<(), ApiError> {
    let body = json!({ "order_no": order_no });
    api::post_json(transport, "/api/payment/mark-paid", None, &body)?;
    Ok(())
}

/// Activate the purchased membership for a confirmed order.
pub fn activate_membership(
    transport: &dyn ApiTransport,
    bearer: &str,
    order: &Order,
) -> Result<(), ApiError> {
    let body = json!({
        "order_no": order.order_no,
        "plan": order.plan.as_str(),
        "billing_period": order.billing_period.as_deref().unwrap_or("monthly"),
    });
    api::post_json(
        transport,
        "/api/payment/activate-membership",
        Some(bearer),
        &body,
    )?;
    Ok(())
}

/// Query the current status of an order.
pub fn query_order(
    transport: &dyn ApiTransport,
    bearer: Option<&str>,
    order_no: &str,
) -> Result<Order, ApiError> {
    let path = format!("/api/payment/query-order/{}", order_no);
    let data = api::get_json(transport, &path, bearer)?;
    data.get("order")
        .and_then(|o| serde_json::from_value(o.clone()).ok())
        .ok_or_else(|| ApiError::Api {
            status: 200,
            message: "response missing order".to_string(),
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Polling,
    Confirmed,
    TimedOut,
}

/// Polls an order until the backend confirms payment or the attempt budget
/// is exhausted. Only one poll can be active; `start` cancels any previous
/// one, and `stop` is safe to call in every state.
pub struct OrderMonitor {
    state: MonitorState,
    order_no: Option<String>,
    attempts: u32,
    max_attempts: u32,
    confirmed: Option<Order>,
}

impl Default for OrderMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderMonitor {
    pub fn new() -> Self {
        Self::with_max_attempts(MAX_POLL_ATTEMPTS)
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            state: MonitorState::Idle,
            order_no: None,
            attempts: 0,
            max_attempts,
            confirmed: None,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The order as reported by the backend once polling confirmed it.
    pub fn confirmed_order(&self) -> Option<&Order> {
        self.confirmed.as_ref()
    }

    /// Begin polling an order, cancelling any poll already in progress.
    pub fn start(&mut self, order_no: &str) {
        self.order_no = Some(order_no.to_string());
        self.attempts = 0;
        self.confirmed = None;
        self.state = MonitorState::Polling;
    }

    /// Cancel polling. No-op unless currently polling, so callers can
    /// always invoke it on teardown.
    pub fn stop(&mut self) {
        if self.state == MonitorState::Polling {
            self.state = MonitorState::Idle;
            self.order_no = None;
        }
    }

    /// One poll tick. Errors from the status query count as an attempt but
    /// do not abort polling; any status other than `paid` keeps polling.
    pub fn poll(&mut self, transport: &dyn ApiTransport, bearer: Option<&str>) -> MonitorState {
        if self.state != MonitorState::Polling {
            return self.state;
        }
        let order_no = match &self.order_no {
            Some(n) => n.clone(),
            None => {
                self.state = MonitorState::Idle;
                return self.state;
            }
        };

        self.attempts += 1;
        let paid = match query_order(transport, bearer, &order_no) {
            Ok(order) if order.is_paid() => {
                self.confirmed = Some(order);
                true
            }
            Ok(_) => false,
            Err(e) => {
                eprintln!("warning: order status query failed: {}", e);
                false
            }
        };

        if paid {
            self.state = MonitorState::Confirmed;
        } else if self.attempts >= self.max_attempts {
            self.state = MonitorState::TimedOut;
        }
        self.state
    }
}

/// Blocking driver for the CLI: claim payment, then poll at the given
/// interval until the order confirms or times out. A confirmed order
/// refreshes the profile so the new plan is visible immediately.
pub fn watch_order(
    transport: &dyn ApiTransport,
    session: &mut SessionManager,
    store: &CredentialStore,
    monitor: &mut OrderMonitor,
    order_no: &str,
    interval: Duration,
) -> MonitorState {
    // The claim is best-effort: a failure here does not stop polling,
    // the admin may confirm the order anyway.
    if let Err(e) = mark_paid(transport, order_no) {
        eprintln!("warning: failed to notify backend of payment: {}", e);
    }

    monitor.start(order_no);
    println!("Waiting for payment confirmation (Ctrl-C to stop)...");

    loop {
        let bearer = session.authorization_header();
        match monitor.poll(transport, bearer.as_deref()) {
            MonitorState::Confirmed => {
                if let (Some(order), Some(header)) =
                    (monitor.confirmed_order(), session.authorization_header())
                {
                    if let Err(e) = activate_membership(transport, &header, order) {
                        eprintln!("warning: membership activation failed: {}", e);
                    }
                }
                println!("Payment confirmed, membership activated.");
                if let Err(e) = session.refresh_profile(transport, store) {
                    eprintln!("warning: failed to refresh profile: {}", e);
                }
                return MonitorState::Confirmed;
            }
            MonitorState::TimedOut => {
                println!(
                    "No confirmation after {} checks; verify the order status manually later.",
                    monitor.attempts()
                );
                return MonitorState::TimedOut;
            }
            MonitorState::Polling => std::thread::sleep(interval),
            MonitorState::Idle => return MonitorState::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::MockTransport;

    fn pending_body() -> String {
        r#"{"success": true, "order": {"order_no": "A1", "status": "pending"}}"#.to_string()
    }

    fn paid_body() -> String {
        r#"{"success": true, "order": {"order_no": "A1", "status": "paid"}}"#.to_string()
    }

    #[test]
    fn test_monitor_confirms_after_k_plus_one_polls() {
        let transport = MockTransport::new();
        let k = 3;
        for _ in 0..k {
            transport.push_json(200, &pending_body());
        }
        transport.push_json(200, &paid_body());

        let mut monitor = OrderMonitor::new();
        monitor.start("A1");

        let mut polls = 0;
        loop {
            polls += 1;
            match monitor.poll(&transport, None) {
                MonitorState::Polling => continue,
                state => {
                    assert_eq!(state, MonitorState::Confirmed);
                    break;
                }
            }
        }
        assert_eq!(polls, k + 1);
        assert_eq!(monitor.attempts(), (k + 1) as u32);
    }

    #[test]
    fn test_confirmed_order_exposed_for_activation() {
        let transport = MockTransport::new();
        transport.push_json(
            200,
            r#"{"success": true, "order": {"order_no": "A1", "plan": "basic", "status": "paid"}}"#,
        );
        let mut monitor = OrderMonitor::new();
        monitor.start("A1");
        assert!(monitor.confirmed_order().is_none());

        assert_eq!(monitor.poll(&transport, None), MonitorState::Confirmed);
        let order = monitor.confirmed_order().unwrap();
        assert_eq!(order.order_no, "A1");
        assert_eq!(order.plan, Plan::Basic);

        // restarting drops the previous confirmation
        monitor.start("B2");
        assert!(monitor.confirmed_order().is_none());
    }

    #[test]
    fn test_activate_membership_body() {
        let transport = MockTransport::new();
        transport.push_json(200, r#"{"success": true}"#);

        let order = Order {
            order_no: "ORD-9".to_string(),
            amount: 29.9,
            plan: Plan::Basic,
            billing_period: None,
            status: "paid".to_string(),
        };
        activate_membership(&transport, "Bearer tok-1", &order).unwrap();

        let calls = transport.calls.borrow();
        assert_eq!(calls[0].path, "/api/payment/activate-membership");
        assert_eq!(calls[0].bearer.as_deref(), Some("Bearer tok-1"));
        let body = calls[0].body.as_ref().unwrap();
        assert_eq!(body["order_no"], "ORD-9");
        assert_eq!(body["plan"], "basic");
        // monthly is the fallback when the order omits the period
        assert_eq!(body["billing_period"], "monthly");
    }

    #[test]
    fn test_monitor_times_out_and_stops_polling() {
        let transport = MockTransport::new();
        let mut monitor = OrderMonitor::with_max_attempts(10);
        for _ in 0..10 {
            transport.push_json(200, &pending_body());
        }
        monitor.start("A1");

        let mut state = MonitorState::Polling;
        while state == MonitorState::Polling {
            state = monitor.poll(&transport, None);
        }
        assert_eq!(state, MonitorState::TimedOut);
        assert_eq!(transport.call_count(), 10);

        // further polls issue no requests
        assert_eq!(monitor.poll(&transport, None), MonitorState::TimedOut);
        assert_eq!(transport.call_count(), 10);
    }

    #[test]
    fn test_monitor_full_budget_is_120() {
        let monitor = OrderMonitor::new();
        assert_eq!(monitor.max_attempts, MAX_POLL_ATTEMPTS);
        assert_eq!(MAX_POLL_ATTEMPTS, 120);
        assert_eq!(POLL_INTERVAL, Duration::from_secs(5));
    }

    #[test]
    fn test_stop_is_idempotent_and_state_aware() {
        let transport = MockTransport::new();
        let mut monitor = OrderMonitor::new();

        // stopping an idle monitor is a no-op
        monitor.stop();
        assert_eq!(monitor.state(), MonitorState::Idle);

        monitor.start("A1");
        monitor.stop();
        assert_eq!(monitor.state(), MonitorState::Idle);
        // no request after cancellation
        assert_eq!(monitor.poll(&transport, None), MonitorState::Idle);
        assert_eq!(transport.call_count(), 0);

        // stop after Confirmed stays Confirmed
        transport.push_json(200, &paid_body());
        monitor.start("A1");
        assert_eq!(monitor.poll(&transport, None), MonitorState::Confirmed);
        monitor.stop();
        assert_eq!(monitor.state(), MonitorState::Confirmed);
    }

    #[test]
    fn test_start_cancels_previous_poll() {
        let transport = MockTransport::new();
        let mut monitor = OrderMonitor::with_max_attempts(5);
        transport.push_json(200, &pending_body());
        monitor.start("A1");
        monitor.poll(&transport, None);
        assert_eq!(monitor.attempts(), 1);

        // restarting resets the attempt budget and the order
        monitor.start("B2");
        assert_eq!(monitor.attempts(), 0);
        assert_eq!(monitor.state(), MonitorState::Polling);

        transport.push_json(200, &paid_body());
        assert_eq!(monitor.poll(&transport, None), MonitorState::Confirmed);
        let calls = transport.calls.borrow();
        assert!(calls[1].path.ends_with("/B2"));
    }

    #[test]
    fn test_poll_errors_count_as_attempts() {
        let transport = MockTransport::new();
        let mut monitor = OrderMonitor::with_max_attempts(2);
        transport.push_network_error();
        transport.push_json(200, &pending_body());

        monitor.start("A1");
        assert_eq!(monitor.poll(&transport, None), MonitorState::Polling);
        assert_eq!(monitor.poll(&transport, None), MonitorState::TimedOut);
    }

    #[test]
    fn test_create_order_parses_order() {
        let transport = MockTransport::new();
        transport.push_json(
            200,
            r#"{"token": "tok-1", "user": {"id": 1, "email": "a@b.com"}}"#,
        );
        let dir = tempfile::TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path());
        let mut session = SessionManager::new();
        session
            .login(&transport, &store, "a@b.com", "secret1")
            .unwrap();

        transport.push_json(
            200,
            r#"{
                "success": true,
                "order": {"order_no": "ORD-9", "amount": 29.9, "plan": "basic", "status": "pending"}
            }"#,
        );
        let order = create_order(
            &transport,
            &mut session,
            &store,
            Plan::Basic,
            BillingPeriod::Monthly,
        )
        .unwrap();
        assert_eq!(order.order_no, "ORD-9");
        assert!(!order.is_paid());

        let calls = transport.calls.borrow();
        let body = calls[1].body.as_ref().unwrap();
        assert_eq!(body["plan"], "basic");
        assert_eq!(body["billing_period"], "monthly");
    }

    #[test]
    fn test_create_order_requires_auth() {
        let transport = MockTransport::new();
        let dir = tempfile::TempDir::new().unwrap();
        let store = CredentialStore::new(dir.path());
        let mut session = SessionManager::new();

        let err = create_order(
            &transport,
            &mut session,
            &store,
            Plan::Basic,
            BillingPeriod::Monthly,
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
        assert_eq!(transport.call_count(), 0);
    }

    #[test]
    fn test_billing_period_parse() {
        assert_eq!(
            BillingPeriod::parse("Yearly").unwrap(),
            BillingPeriod::Yearly
        );
        assert!(BillingPeriod::parse("weekly").is_err());
    }
}
