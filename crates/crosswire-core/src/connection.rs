//! RpcConnection: the correlation and dispatch engine bound to one transport.
//!
//! Either endpoint may initiate calls; both directions share the connection.
//! The key invariant is that only [`RpcConnection::run`] calls
//! `Transport::recv_text` — replies are fulfilled inline in delivery order,
//! while request dispatch is spawned per message so a handler that parks on
//! a nested call never starves the pump.
//!
//! ```text
//!                 ┌───────────────────────────────────┐
//!                 │           RpcConnection           │
//!                 ├───────────────────────────────────┤
//!                 │  transport: Transport             │
//!                 │  codec:     Codec                 │
//!                 │  dispatch:  DispatchTable         │
//!                 │  pending:   PendingCalls          │
//!                 └───────────────┬───────────────────┘
//!                                 │
//!                            pump loop
//!                                 │
//!              ┌──────────────────┴──────────────────┐
//!              │                                     │
//!        has "method"?                        no "method":
//!        spawn dispatch,                      reply envelope,
//!        reply if id present                  fulfill pending id
//! ```

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde_json::Value;

use crate::{
    Codec, DispatchTable, PendingCalls, ReplyOutcome, Request, Response, RpcError, Transport,
    TransportError, method,
};

/// The root api: unregistered method names are dispatched to it.
pub const DEFAULT_API: u64 = 0;

/// The resolver api: string call targets are turned into numeric api ids by
/// a recursive local dispatch to this id.
pub const RESOLVE_API: u64 = 1;

const DEFAULT_SLOW_CALL_MS: u64 = 500;

fn slow_call_threshold() -> Duration {
    std::env::var("CROSSWIRE_SLOW_CALL_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(DEFAULT_SLOW_CALL_MS))
}

/// The application surface behind one connection.
///
/// `receive_call` serves named methods on a target api; `receive_notice` and
/// `receive_callback` serve pushes addressed to callback ids the peer holds.
/// Each method receives the connection handle explicitly so it can make
/// nested outbound calls through the same engine it is serving.
pub trait ApiDelegate: Send + Sync + 'static {
    fn receive_call(
        &self,
        conn: RpcConnection,
        api_id: u64,
        method: String,
        params: Vec<Value>,
    ) -> impl Future<Output = Result<Value, RpcError>> + Send;

    fn receive_notice(
        &self,
        conn: RpcConnection,
        callback_id: u64,
        params: Vec<Value>,
    ) -> impl Future<Output = Result<(), RpcError>> + Send;

    fn receive_callback(
        &self,
        conn: RpcConnection,
        callback_id: u64,
        params: Vec<Value>,
    ) -> impl Future<Output = Result<Value, RpcError>> + Send;
}

struct ConnectionInner {
    transport: Transport,
    codec: Codec,
    dispatch: DispatchTable,
    pending: PendingCalls,
}

/// Cheap-clone handle to one RPC connection.
///
/// Lives exactly as long as the transport it is bound to; once the transport
/// closes, every outstanding call fails with
/// [`RpcError::ConnectionClosed`](crate::RpcError).
#[derive(Clone)]
pub struct RpcConnection {
    inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for RpcConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcConnection")
            .field("pending", &self.inner.pending.len())
            .field("closed", &self.inner.transport.is_closed())
            .finish_non_exhaustive()
    }
}

impl RpcConnection {
    pub fn new<A: ApiDelegate>(transport: Transport, delegate: Arc<A>) -> Self {
        Self::with_codec(transport, delegate, Codec::default())
    }

    /// Create a connection with an explicit codec (nesting-depth cap).
    ///
    /// Wires the three protocol conventions into the dispatch table and the
    /// fallback that routes every other method name to the root api.
    pub fn with_codec<A: ApiDelegate>(
        transport: Transport,
        delegate: Arc<A>,
        codec: Codec,
    ) -> Self {
        let mut dispatch = DispatchTable::new();

        dispatch.register(method::CALL, {
            let delegate = delegate.clone();
            move |conn, params| {
                let delegate = delegate.clone();
                async move { call_convention(delegate, conn, params).await }
            }
        });

        dispatch.register(method::NOTICE, {
            let delegate = delegate.clone();
            move |conn, params| {
                let delegate = delegate.clone();
                async move {
                    let (callback_id, args) = callback_params(method::NOTICE, params)?;
                    delegate.receive_notice(conn, callback_id, args).await?;
                    Ok(Value::Null)
                }
            }
        });

        dispatch.register(method::CALLBACK, {
            let delegate = delegate.clone();
            move |conn, params| {
                let delegate = delegate.clone();
                async move {
                    let (callback_id, args) = callback_params(method::CALLBACK, params)?;
                    delegate.receive_callback(conn, callback_id, args).await
                }
            }
        });

        dispatch.set_fallback(move |conn, name, params| {
            let delegate = delegate.clone();
            async move { delegate.receive_call(conn, DEFAULT_API, name, params).await }
        });

        Self {
            inner: Arc::new(ConnectionInner {
                transport,
                codec,
                dispatch,
                pending: PendingCalls::new(),
            }),
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.inner.transport
    }

    pub fn codec(&self) -> &Codec {
        &self.inner.codec
    }

    /// Correlation ids of calls still waiting for replies (for diagnostics).
    pub fn pending_ids(&self) -> Vec<u64> {
        self.inner.pending.pending_ids()
    }

    /// Close the transport and synchronously fail every outstanding call
    /// with a connection-closed outcome.
    pub fn close(&self) {
        self.inner.transport.close();
        self.on_transport_closed();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.transport.is_closed()
    }

    /// Invoked when the transport reports closure: drains the pending-call
    /// registry. Idempotent.
    pub fn on_transport_closed(&self) {
        self.inner.pending.drain_on_close();
    }

    /// Call `method` on the peer's api `api_id` and park until the reply.
    ///
    /// Resolves to the peer's result value, fails with the peer's reported
    /// error, or fails with `ConnectionClosed` if the connection dies first.
    pub async fn call(
        &self,
        api_id: u64,
        method_name: impl Into<String>,
        args: Vec<Value>,
    ) -> Result<Value, RpcError> {
        let params = vec![
            Value::from(api_id),
            Value::from(method_name.into()),
            Value::Array(args),
        ];
        self.send_call(method::CALL, params).await
    }

    /// Invoke a callback previously registered with this side by the peer.
    pub async fn callback(&self, callback_id: u64, args: Vec<Value>) -> Result<Value, RpcError> {
        let params = vec![Value::from(callback_id), Value::Array(args)];
        self.send_call(method::CALLBACK, params).await
    }

    /// Fire-and-forget push: no correlation id, no rendezvous, no reply.
    /// Only encode and transmission failures surface.
    pub async fn notice(&self, callback_id: u64, args: Vec<Value>) -> Result<(), RpcError> {
        let request = Request::notice(
            method::NOTICE,
            vec![Value::from(callback_id), Value::Array(args)],
        );
        let text = self.inner.codec.encode(&request)?;
        self.inner.transport.send_text(text).await?;
        Ok(())
    }

    async fn send_call(&self, method_name: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let (id, rx) = self.inner.pending.begin_call()?;
        let mut guard = PendingGuard {
            pending: &self.inner.pending,
            id,
            active: true,
        };

        let request = Request::call(id, method_name, params);
        let text = self.inner.codec.encode(&request)?;
        self.inner.transport.send_text(text).await?;
        tracing::debug!(id, method = method_name, "call: request sent");

        let outcome = match rx.await {
            Ok(outcome) => outcome,
            // The slot sender only disappears without an outcome if the
            // connection state was torn down wholesale.
            Err(_) => Err(RpcError::ConnectionClosed),
        };
        guard.disarm();
        outcome
    }

    /// The transport's single entry point for received text.
    ///
    /// Returns the serialized reply if the message produced one (so a
    /// non-duplex host can relay it as the direct response), a diagnostic
    /// string if the envelope was undecodable, or `None`.
    ///
    /// With `send_reply` set, request dispatch is spawned and any reply is
    /// pushed straight to the transport; the pump stays free to process
    /// unrelated messages while a handler is parked on a nested call.
    pub async fn handle_message(&self, text: &str, send_reply: bool) -> Option<String> {
        let value = match self.inner.codec.decode(text) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "failed to decode inbound envelope");
                return Some(format!("failed to decode rpc envelope: {e}"));
            }
        };

        if value.get("method").is_some() {
            // Inbound call or notice. The session tag rides at the top level
            // of the raw object and is echoed back verbatim.
            let ssid = value
                .get("ssid")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            let request: Request = match serde_json::from_value(value) {
                Ok(request) => request,
                Err(e) => {
                    tracing::warn!(error = %e, "malformed request envelope");
                    return Some(format!("malformed request envelope: {e}"));
                }
            };

            if send_reply {
                let conn = self.clone();
                tokio::spawn(async move {
                    conn.dispatch_request(request, ssid, true).await;
                });
                None
            } else {
                self.dispatch_request(request, ssid, false).await
            }
        } else {
            // No method field: a reply to one of our calls.
            let response: Response = match serde_json::from_value(value) {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(error = %e, "malformed response envelope");
                    return Some(format!("malformed response envelope: {e}"));
                }
            };
            let outcome = match response.outcome {
                ReplyOutcome::Result(value) => Ok(value),
                ReplyOutcome::Error(error) => Err(RpcError::Remote(error)),
            };
            self.inner.pending.fulfill(response.id, outcome);
            None
        }
    }

    async fn dispatch_request(
        &self,
        request: Request,
        ssid: String,
        send_reply: bool,
    ) -> Option<String> {
        let Request {
            id,
            method: method_name,
            params,
        } = request;

        let started = Instant::now();
        // A handler panic must not take the connection down; it becomes an
        // internal-error outcome like any other dispatch failure.
        let result = AssertUnwindSafe(self.inner.dispatch.dispatch(self.clone(), &method_name, params))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(RpcError::from_panic(panic)));
        let elapsed = started.elapsed();
        if elapsed > slow_call_threshold() {
            tracing::warn!(
                method = %method_name,
                elapsed_ms = elapsed.as_millis() as u64,
                "slow rpc dispatch"
            );
        }

        let Some(id) = id else {
            // A notice never gets a reply, success or failure.
            if let Err(e) = result {
                tracing::warn!(method = %method_name, error = %e, "notice dispatch failed");
            }
            return None;
        };

        let response = match result {
            Ok(value) => Response::result(id, ssid, value),
            Err(e) => {
                tracing::debug!(method = %method_name, id, error = %e, "dispatch failed; reporting to peer");
                Response::error(id, ssid, e.to_wire())
            }
        };

        let reply = match self.inner.codec.encode(&response) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(id, error = %e, "failed to encode reply envelope");
                return None;
            }
        };

        if send_reply {
            if let Err(e) = self.inner.transport.send_text(reply.clone()).await {
                tracing::warn!(id, error = %e, "failed to send reply");
            }
        }
        Some(reply)
    }

    /// Run the pump: the sole consumer of inbound transport messages.
    ///
    /// Exits when the transport closes (either direction), draining every
    /// pending call with a connection-closed outcome on the way out.
    pub async fn run(self) -> Result<(), TransportError> {
        tracing::debug!("connection pump started");
        loop {
            let text = match self.inner.transport.recv_text().await {
                Ok(text) => text,
                Err(TransportError::Closed) => {
                    tracing::debug!("transport closed; draining pending calls");
                    self.on_transport_closed();
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(error = %e, "transport error; draining pending calls");
                    self.on_transport_closed();
                    return Err(e);
                }
            };

            // Diagnostics for undecodable messages are already logged; in
            // duplex mode there is no direct caller to hand them to.
            let _ = self.handle_message(&text, true).await;
        }
    }
}

struct PendingGuard<'a> {
    pending: &'a PendingCalls,
    id: u64,
    active: bool,
}

impl PendingGuard<'_> {
    fn disarm(&mut self) {
        self.active = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.active && self.pending.discard(self.id) {
            tracing::debug!(id = self.id, "call dropped; removed pending waiter");
        }
    }
}

/// The `"call"` convention: params `[target, method, args]`.
///
/// A string target names a sub-api; it is resolved to a numeric id first by
/// a recursive local dispatch to the resolver api.
async fn call_convention<A: ApiDelegate>(
    delegate: Arc<A>,
    conn: RpcConnection,
    params: Vec<Value>,
) -> Result<Value, RpcError> {
    let [target, method_name, args] = <[Value; 3]>::try_from(params)
        .map_err(|_| RpcError::invalid_params("call expects [target, method, args]"))?;
    let Value::String(method_name) = method_name else {
        return Err(RpcError::invalid_params("method name must be a string"));
    };
    let Value::Array(args) = args else {
        return Err(RpcError::invalid_params("argument list must be an array"));
    };

    let api_id = match target {
        Value::String(name) => {
            let resolved = delegate
                .receive_call(conn.clone(), RESOLVE_API, name, Vec::new())
                .await?;
            resolved
                .as_u64()
                .ok_or_else(|| RpcError::invalid_params("api name resolved to a non-numeric id"))?
        }
        other => other
            .as_u64()
            .ok_or_else(|| RpcError::invalid_params("api target must be an id or a name"))?,
    };

    delegate.receive_call(conn, api_id, method_name, args).await
}

/// Shared shape of `"notice"` and `"callback"` params: `[callback_id, args]`.
fn callback_params(kind: &str, params: Vec<Value>) -> Result<(u64, Vec<Value>), RpcError> {
    let [callback_id, args] = <[Value; 2]>::try_from(params)
        .map_err(|_| RpcError::invalid_params(format!("{kind} expects [callback_id, args]")))?;
    let callback_id = callback_id
        .as_u64()
        .ok_or_else(|| RpcError::invalid_params("callback id must be an unsigned integer"))?;
    let Value::Array(args) = args else {
        return Err(RpcError::invalid_params("argument list must be an array"));
    };
    Ok((callback_id, args))
}
