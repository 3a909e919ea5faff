//! crosswire-testkit: conformance scenarios for crosswire transports.
//!
//! Provides the [`TransportFactory`] trait and shared test scenarios that
//! every transport must pass.
//!
//! # Usage
//!
//! Each transport provides a factory and runs the shared scenarios:
//!
//! ```ignore
//! use crosswire_testkit::{TestError, TransportFactory};
//!
//! struct MemFactory;
//!
//! impl TransportFactory for MemFactory {
//!     async fn connect_pair() -> Result<(Transport, Transport), TestError> {
//!         Ok(Transport::mem_pair())
//!     }
//! }
//!
//! #[tokio::test]
//! async fn call_round_trip() {
//!     crosswire_testkit::run_call_round_trip::<MemFactory>().await;
//! }
//! ```

#![forbid(unsafe_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crosswire_core::{
    ApiDelegate, DEFAULT_API, ErrorCode, RESOLVE_API, RpcConnection, RpcError, Transport,
    TransportError,
};
use parking_lot::Mutex;
use serde_json::{Value, json};

/// Api id the test resolver maps the name `"backend"` to.
pub const BACKEND_API: u64 = 2;

/// Callback id whose notice handler always fails (for silence checks).
pub const FAILING_NOTICE_ID: u64 = 13;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Error type for test scenarios.
#[derive(Debug)]
pub enum TestError {
    /// Transport creation failed.
    Setup(String),
    /// RPC call failed.
    Rpc(RpcError),
    /// Transport error.
    Transport(TransportError),
    /// Assertion failed.
    Assertion(String),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Setup(msg) => write!(f, "setup error: {}", msg),
            TestError::Rpc(e) => write!(f, "RPC error: {}", e),
            TestError::Transport(e) => write!(f, "transport error: {}", e),
            TestError::Assertion(msg) => write!(f, "assertion failed: {}", msg),
        }
    }
}

impl std::error::Error for TestError {}

impl From<RpcError> for TestError {
    fn from(e: RpcError) -> Self {
        TestError::Rpc(e)
    }
}

impl From<TransportError> for TestError {
    fn from(e: TransportError) -> Self {
        TestError::Transport(e)
    }
}

/// Factory trait for creating transport pairs for testing.
pub trait TransportFactory: Send + Sync + 'static {
    /// Create a connected pair of transports.
    ///
    /// Returns (client_side, server_side); messages sent on one side are
    /// received by the other.
    fn connect_pair() -> impl Future<Output = Result<(Transport, Transport), TestError>> + Send;
}

// ============================================================================
// Test api surface
// ============================================================================

/// Application delegate used by every scenario.
///
/// Api 0 carries a handful of plain methods, api 1 resolves the name
/// `"backend"` to api 2, and notices/callbacks are recorded for assertions.
#[derive(Default)]
pub struct TestApi {
    pub notices: Mutex<Vec<(u64, Vec<Value>)>>,
    pub callbacks: Mutex<Vec<(u64, Vec<Value>)>>,
    pub unrouted: Mutex<Vec<(u64, String, Vec<Value>)>>,
}

impl ApiDelegate for TestApi {
    async fn receive_call(
        &self,
        conn: RpcConnection,
        api_id: u64,
        method: String,
        params: Vec<Value>,
    ) -> Result<Value, RpcError> {
        match (api_id, method.as_str()) {
            (DEFAULT_API, "get_info") => Ok(json!({"version": "1.0"})),
            (DEFAULT_API, "add") => {
                let a = params.first().and_then(Value::as_i64);
                let b = params.get(1).and_then(Value::as_i64);
                match (a, b) {
                    (Some(a), Some(b)) => Ok(json!(a + b)),
                    _ => Err(RpcError::invalid_params("add expects two integers")),
                }
            }
            (DEFAULT_API, "probe") => Ok(json!({"echo": params})),
            (DEFAULT_API, "fail") => Err(RpcError::handler_with_data(
                "intentional failure",
                json!({"hint": "requested"}),
            )),
            (DEFAULT_API, "relay") => {
                // Issues a nested outbound call while this inbound dispatch
                // is still in flight; the re-entrancy scenarios depend on it.
                let [callback_id, payload] = <[Value; 2]>::try_from(params)
                    .map_err(|_| RpcError::invalid_params("relay expects [callback_id, payload]"))?;
                let callback_id = callback_id
                    .as_u64()
                    .ok_or_else(|| RpcError::invalid_params("callback id must be an integer"))?;
                let acked = conn.callback(callback_id, vec![payload]).await?;
                Ok(json!({"acked": acked}))
            }
            (RESOLVE_API, "backend") => Ok(json!(BACKEND_API)),
            (BACKEND_API, "query") => Ok(json!(["row1", "row2"])),
            _ => {
                self.unrouted.lock().push((api_id, method.clone(), params));
                Err(RpcError::method_not_found(&method))
            }
        }
    }

    async fn receive_notice(
        &self,
        _conn: RpcConnection,
        callback_id: u64,
        params: Vec<Value>,
    ) -> Result<(), RpcError> {
        self.notices.lock().push((callback_id, params));
        if callback_id == FAILING_NOTICE_ID {
            return Err(RpcError::handler("notice handler failure"));
        }
        Ok(())
    }

    async fn receive_callback(
        &self,
        _conn: RpcConnection,
        callback_id: u64,
        params: Vec<Value>,
    ) -> Result<Value, RpcError> {
        self.callbacks.lock().push((callback_id, params));
        Ok(json!({"ack": callback_id}))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Build a connection over `transport` and spawn its pump.
pub fn spawn_connection(transport: Transport, api: Arc<TestApi>) -> RpcConnection {
    let conn = RpcConnection::new(transport, api);
    tokio::spawn(conn.clone().run());
    conn
}

/// Receive and parse one message on a raw (scripted) transport end.
async fn recv_value(transport: &Transport) -> Result<Value, TestError> {
    let text = tokio::time::timeout(RECV_TIMEOUT, transport.recv_text())
        .await
        .map_err(|_| TestError::Assertion("timed out waiting for a message".into()))??;
    serde_json::from_str(&text)
        .map_err(|e| TestError::Assertion(format!("peer received invalid JSON: {e}")))
}

async fn send_value(transport: &Transport, value: Value) -> Result<(), TestError> {
    transport.send_text(value.to_string()).await?;
    Ok(())
}

fn assert_eq_json(actual: &Value, expected: &Value, context: &str) -> Result<(), TestError> {
    if actual != expected {
        return Err(TestError::Assertion(format!(
            "{context}: expected {expected}, got {actual}"
        )));
    }
    Ok(())
}

/// Spin until `check` passes; dispatch runs in spawned tasks, so recorded
/// side effects can trail the wire traffic slightly.
async fn wait_for(check: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

// ============================================================================
// Scenarios
// ============================================================================

/// Both endpoints call each other over one connection pair.
pub async fn run_call_round_trip<F: TransportFactory>() {
    if let Err(e) = run_call_round_trip_inner::<F>().await {
        panic!("run_call_round_trip failed: {}", e);
    }
}

async fn run_call_round_trip_inner<F: TransportFactory>() -> Result<(), TestError> {
    let (a, b) = F::connect_pair().await?;
    let conn_a = spawn_connection(a, Arc::new(TestApi::default()));
    let conn_b = spawn_connection(b, Arc::new(TestApi::default()));

    let info = conn_a.call(DEFAULT_API, "get_info", vec![]).await?;
    assert_eq_json(&info, &json!({"version": "1.0"}), "a -> b call")?;

    // Same connection, opposite direction.
    let sum = conn_b
        .call(DEFAULT_API, "add", vec![json!(2), json!(3)])
        .await?;
    assert_eq_json(&sum, &json!(5), "b -> a call")?;

    Ok(())
}

/// A raw request with an unregistered method name reaches the fallback with
/// name and params intact, and the reply has the exact wire shape.
pub async fn run_raw_request_reaches_fallback<F: TransportFactory>() {
    if let Err(e) = run_raw_request_reaches_fallback_inner::<F>().await {
        panic!("run_raw_request_reaches_fallback failed: {}", e);
    }
}

async fn run_raw_request_reaches_fallback_inner<F: TransportFactory>() -> Result<(), TestError> {
    let (raw, b) = F::connect_pair().await?;
    let api = Arc::new(TestApi::default());
    let _conn = spawn_connection(b, api.clone());

    // Known method: the reply must match the wire shape byte for byte.
    send_value(
        &raw,
        json!({"id": 1, "method": "get_info", "params": []}),
    )
    .await?;
    let reply = recv_value(&raw).await?;
    assert_eq_json(
        &reply,
        &json!({"id": 1, "ssid": "", "result": {"version": "1.0"}}),
        "fallback success reply",
    )?;

    // Unknown method: delivered to the fallback with params intact.
    send_value(
        &raw,
        json!({"id": 2, "method": "frobnicate", "params": [1, "two"]}),
    )
    .await?;
    let reply = recv_value(&raw).await?;
    let error = &reply["error"];
    if error["code"].as_i64() != Some(ErrorCode::MethodNotFound as i64) {
        return Err(TestError::Assertion(format!(
            "expected method-not-found error, got {reply}"
        )));
    }

    let unrouted = api.unrouted.lock();
    if unrouted.as_slice()
        != [(
            DEFAULT_API,
            "frobnicate".to_owned(),
            vec![json!(1), json!("two")],
        )]
    {
        return Err(TestError::Assertion(format!(
            "fallback did not see the original call: {unrouted:?}"
        )));
    }

    Ok(())
}

/// N concurrent calls; the scripted peer replies in reverse order and each
/// call still resolves to its own result.
pub async fn run_concurrent_calls_resolve_by_id<F: TransportFactory>() {
    if let Err(e) = run_concurrent_calls_resolve_by_id_inner::<F>().await {
        panic!("run_concurrent_calls_resolve_by_id failed: {}", e);
    }
}

async fn run_concurrent_calls_resolve_by_id_inner<F: TransportFactory>() -> Result<(), TestError> {
    const CALLS: usize = 8;

    let (a, raw) = F::connect_pair().await?;
    let conn = spawn_connection(a, Arc::new(TestApi::default()));

    let mut handles = Vec::new();
    for i in 0..CALLS {
        let conn = conn.clone();
        handles.push(tokio::spawn(async move {
            conn.call(DEFAULT_API, "probe", vec![json!(i)]).await
        }));
    }

    // Collect every request, then answer them newest-first.
    let mut requests = Vec::new();
    for _ in 0..CALLS {
        let request = recv_value(&raw).await?;
        let id = request["id"]
            .as_u64()
            .ok_or_else(|| TestError::Assertion(format!("request without id: {request}")))?;
        let arg = request["params"][2][0].clone();
        requests.push((id, arg));
    }
    for (id, arg) in requests.iter().rev() {
        send_value(&raw, json!({"id": id, "ssid": "", "result": {"seq": arg}})).await?;
    }

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle
            .await
            .map_err(|e| TestError::Setup(format!("call task panicked: {e}")))??;
        assert_eq_json(&result, &json!({"seq": i}), "permuted reply correlation")?;
    }

    if !conn.pending_ids().is_empty() {
        return Err(TestError::Assertion("registry not empty after replies".into()));
    }

    Ok(())
}

/// Notices never block and never produce a reply, in either direction, even
/// when the notice handler fails.
pub async fn run_notice_is_silent<F: TransportFactory>() {
    if let Err(e) = run_notice_is_silent_inner::<F>().await {
        panic!("run_notice_is_silent failed: {}", e);
    }
}

async fn run_notice_is_silent_inner<F: TransportFactory>() -> Result<(), TestError> {
    let (a, raw) = F::connect_pair().await?;
    let api = Arc::new(TestApi::default());
    let conn = spawn_connection(a, api.clone());

    // Outbound: returns immediately, envelope has no id key.
    conn.notice(5, vec![json!("hello")]).await?;
    let envelope = recv_value(&raw).await?;
    assert_eq_json(
        &envelope,
        &json!({"method": "notice", "params": [5, ["hello"]]}),
        "outbound notice envelope",
    )?;

    // Inbound: a notice whose handler fails stays silent on the wire. The
    // marker call proves nothing was sent for the notice before it.
    send_value(&raw, json!({"method": "notice", "params": [FAILING_NOTICE_ID, []]})).await?;
    send_value(&raw, json!({"id": 9, "method": "get_info", "params": []})).await?;

    let first_reply = recv_value(&raw).await?;
    if first_reply["id"].as_u64() != Some(9) {
        return Err(TestError::Assertion(format!(
            "expected only the marker reply, got {first_reply}"
        )));
    }

    if !wait_for(|| api.notices.lock().as_slice() == [(FAILING_NOTICE_ID, vec![])]).await {
        return Err(TestError::Assertion(format!(
            "notice was not dispatched: {:?}",
            api.notices.lock()
        )));
    }

    // A notice-shaped request that does carry an id gets a null result back;
    // only the sender's choice to omit the id makes a notice silent.
    send_value(&raw, json!({"id": 21, "method": "notice", "params": [5, []]})).await?;
    let reply = recv_value(&raw).await?;
    assert_eq_json(
        &reply,
        &json!({"id": 21, "ssid": "", "result": null}),
        "notice with id",
    )?;

    Ok(())
}

/// A reply whose id has no pending entry changes nothing.
pub async fn run_unmatched_reply_is_inert<F: TransportFactory>() {
    if let Err(e) = run_unmatched_reply_is_inert_inner::<F>().await {
        panic!("run_unmatched_reply_is_inert failed: {}", e);
    }
}

async fn run_unmatched_reply_is_inert_inner<F: TransportFactory>() -> Result<(), TestError> {
    let (a, raw) = F::connect_pair().await?;
    let conn = spawn_connection(a, Arc::new(TestApi::default()));

    send_value(&raw, json!({"id": 777, "ssid": "", "result": "ghost"})).await?;

    // The connection still works and holds no stray state.
    let call = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.call(DEFAULT_API, "probe", vec![json!("ok")]).await })
    };
    let request = recv_value(&raw).await?;
    let id = request["id"].as_u64().unwrap_or_default();
    send_value(&raw, json!({"id": id, "ssid": "", "result": "alive"})).await?;

    let result = call
        .await
        .map_err(|e| TestError::Setup(format!("call task panicked: {e}")))??;
    assert_eq_json(&result, &json!("alive"), "call after ghost reply")?;

    if !conn.pending_ids().is_empty() {
        return Err(TestError::Assertion("ghost reply left pending state".into()));
    }

    Ok(())
}

/// Closing the connection fails every outstanding call with a
/// connection-closed outcome, exactly once each, and empties the registry.
pub async fn run_close_drains_pending<F: TransportFactory>() {
    if let Err(e) = run_close_drains_pending_inner::<F>().await {
        panic!("run_close_drains_pending failed: {}", e);
    }
}

async fn run_close_drains_pending_inner<F: TransportFactory>() -> Result<(), TestError> {
    const CALLS: usize = 4;

    let (a, raw) = F::connect_pair().await?;
    let conn = spawn_connection(a, Arc::new(TestApi::default()));

    let mut handles = Vec::new();
    for i in 0..CALLS {
        let conn = conn.clone();
        handles.push(tokio::spawn(async move {
            conn.call(DEFAULT_API, "probe", vec![json!(i)]).await
        }));
    }

    // The peer sees all requests but never answers.
    for _ in 0..CALLS {
        recv_value(&raw).await?;
    }
    if conn.pending_ids().len() != CALLS {
        return Err(TestError::Assertion("calls not all registered".into()));
    }

    conn.close();

    for handle in handles {
        let result = handle
            .await
            .map_err(|e| TestError::Setup(format!("call task panicked: {e}")))?;
        match result {
            Err(RpcError::ConnectionClosed) => {}
            other => {
                return Err(TestError::Assertion(format!(
                    "expected ConnectionClosed, got {other:?}"
                )));
            }
        }
    }

    if !conn.pending_ids().is_empty() {
        return Err(TestError::Assertion("registry not drained".into()));
    }

    Ok(())
}

/// A peer-reported failure surfaces as `Remote` with code, message and data
/// preserved.
pub async fn run_error_response<F: TransportFactory>() {
    if let Err(e) = run_error_response_inner::<F>().await {
        panic!("run_error_response failed: {}", e);
    }
}

async fn run_error_response_inner<F: TransportFactory>() -> Result<(), TestError> {
    let (a, b) = F::connect_pair().await?;
    let conn_a = spawn_connection(a, Arc::new(TestApi::default()));
    let _conn_b = spawn_connection(b, Arc::new(TestApi::default()));

    match conn_a.call(DEFAULT_API, "fail", vec![]).await {
        Err(RpcError::Remote(e)) => {
            if e.code != ErrorCode::Handler as i64 {
                return Err(TestError::Assertion(format!("unexpected code {}", e.code)));
            }
            if !e.message.contains("intentional failure") {
                return Err(TestError::Assertion(format!(
                    "unexpected message {:?}",
                    e.message
                )));
            }
            assert_eq_json(&e.data, &json!({"hint": "requested"}), "error data")?;
        }
        other => {
            return Err(TestError::Assertion(format!(
                "expected Remote error, got {other:?}"
            )));
        }
    }

    Ok(())
}

/// A handler issues a nested call while its own dispatch is in flight; the
/// nested reply is delivered even though the outer call is still parked.
pub async fn run_reentrant_dispatch<F: TransportFactory>() {
    if let Err(e) = run_reentrant_dispatch_inner::<F>().await {
        panic!("run_reentrant_dispatch failed: {}", e);
    }
}

async fn run_reentrant_dispatch_inner<F: TransportFactory>() -> Result<(), TestError> {
    let (a, b) = F::connect_pair().await?;
    let api_a = Arc::new(TestApi::default());
    let conn_a = spawn_connection(a, api_a.clone());
    let _conn_b = spawn_connection(b, Arc::new(TestApi::default()));

    // a's call parks; b's relay handler calls back into a and parks too;
    // both pumps must keep routing for either side to finish.
    let result = conn_a
        .call(DEFAULT_API, "relay", vec![json!(42), json!("x")])
        .await?;
    assert_eq_json(&result, &json!({"acked": {"ack": 42}}), "relayed callback")?;

    let callbacks = api_a.callbacks.lock().clone();
    if callbacks != [(42, vec![json!("x")])] {
        return Err(TestError::Assertion(format!(
            "callback not dispatched on the caller: {callbacks:?}"
        )));
    }

    Ok(())
}

/// A string call target is resolved to a numeric api id through the
/// resolver api before the named method is dispatched.
pub async fn run_string_target_resolution<F: TransportFactory>() {
    if let Err(e) = run_string_target_resolution_inner::<F>().await {
        panic!("run_string_target_resolution failed: {}", e);
    }
}

async fn run_string_target_resolution_inner<F: TransportFactory>() -> Result<(), TestError> {
    let (raw, b) = F::connect_pair().await?;
    let _conn = spawn_connection(b, Arc::new(TestApi::default()));

    send_value(
        &raw,
        json!({"id": 3, "method": "call", "params": ["backend", "query", []]}),
    )
    .await?;
    let reply = recv_value(&raw).await?;
    assert_eq_json(
        &reply,
        &json!({"id": 3, "ssid": "", "result": ["row1", "row2"]}),
        "resolved call reply",
    )?;

    Ok(())
}

/// An id-less callback envelope invokes the handler and sends nothing back,
/// regardless of outcome.
pub async fn run_callback_without_id_is_silent<F: TransportFactory>() {
    if let Err(e) = run_callback_without_id_is_silent_inner::<F>().await {
        panic!("run_callback_without_id_is_silent failed: {}", e);
    }
}

async fn run_callback_without_id_is_silent_inner<F: TransportFactory>() -> Result<(), TestError> {
    let (raw, b) = F::connect_pair().await?;
    let api = Arc::new(TestApi::default());
    let _conn = spawn_connection(b, api.clone());

    send_value(&raw, json!({"method": "callback", "params": [42, ["x"]]})).await?;
    send_value(&raw, json!({"id": 9, "method": "get_info", "params": []})).await?;

    let first_reply = recv_value(&raw).await?;
    if first_reply["id"].as_u64() != Some(9) {
        return Err(TestError::Assertion(format!(
            "expected only the marker reply, got {first_reply}"
        )));
    }

    if !wait_for(|| api.callbacks.lock().as_slice() == [(42, vec![json!("x")])]).await {
        return Err(TestError::Assertion(format!(
            "callback not dispatched: {:?}",
            api.callbacks.lock()
        )));
    }

    Ok(())
}

/// The session tag is echoed from request to response untouched.
pub async fn run_session_tag_echo<F: TransportFactory>() {
    if let Err(e) = run_session_tag_echo_inner::<F>().await {
        panic!("run_session_tag_echo failed: {}", e);
    }
}

async fn run_session_tag_echo_inner<F: TransportFactory>() -> Result<(), TestError> {
    let (raw, b) = F::connect_pair().await?;
    let _conn = spawn_connection(b, Arc::new(TestApi::default()));

    send_value(
        &raw,
        json!({"id": 4, "ssid": "sess-9", "method": "get_info", "params": []}),
    )
    .await?;
    let reply = recv_value(&raw).await?;
    assert_eq_json(
        &reply,
        &json!({"id": 4, "ssid": "sess-9", "result": {"version": "1.0"}}),
        "session tag echo",
    )?;

    Ok(())
}

/// A non-duplex host gets the reply back from `handle_message` instead of a
/// transport push; undecodable input yields a diagnostic, never a crash.
pub async fn run_inline_reply_for_non_duplex<F: TransportFactory>() {
    if let Err(e) = run_inline_reply_for_non_duplex_inner::<F>().await {
        panic!("run_inline_reply_for_non_duplex failed: {}", e);
    }
}

async fn run_inline_reply_for_non_duplex_inner<F: TransportFactory>() -> Result<(), TestError> {
    let (_raw, b) = F::connect_pair().await?;
    // No pump: the host hands messages in and relays replies itself.
    let conn = RpcConnection::new(b, Arc::new(TestApi::default()));

    let reply = conn
        .handle_message(r#"{"id": 1, "method": "get_info", "params": []}"#, false)
        .await
        .ok_or_else(|| TestError::Assertion("expected an inline reply".into()))?;
    let reply: Value = serde_json::from_str(&reply)
        .map_err(|e| TestError::Assertion(format!("inline reply is invalid JSON: {e}")))?;
    assert_eq_json(
        &reply,
        &json!({"id": 1, "ssid": "", "result": {"version": "1.0"}}),
        "inline reply",
    )?;

    let diagnostic = conn.handle_message("{not json", false).await;
    match diagnostic {
        Some(text) if text.contains("decode") => {}
        other => {
            return Err(TestError::Assertion(format!(
                "expected a decode diagnostic, got {other:?}"
            )));
        }
    }

    // An unmatched reply produces nothing and breaks nothing.
    if conn
        .handle_message(r#"{"id": 55, "ssid": "", "result": null}"#, false)
        .await
        .is_some()
    {
        return Err(TestError::Assertion(
            "unmatched reply should produce no output".into(),
        ));
    }

    Ok(())
}
