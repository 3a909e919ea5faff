//! Method-name dispatch table with a single fallback handler.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::{RpcConnection, RpcError};

/// Boxed future returned by dispatch handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, RpcError>> + Send>>;

type BoxedHandler = Box<dyn Fn(RpcConnection, Vec<Value>) -> HandlerFuture + Send + Sync>;
type BoxedFallback = Box<dyn Fn(RpcConnection, String, Vec<Value>) -> HandlerFuture + Send + Sync>;

/// Registry of method-name -> handler, populated once at construction.
///
/// Handlers receive the connection handle as an explicit parameter rather
/// than capturing the engine, so nested outbound calls go through the same
/// ownership path as everything else.
#[derive(Default)]
pub struct DispatchTable {
    handlers: HashMap<String, BoxedHandler>,
    fallback: Option<BoxedFallback>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an explicit method name.
    ///
    /// # Panics
    ///
    /// Panics if the name is already registered; duplicate registration is a
    /// programming error caught at construction time.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(RpcConnection, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        let name = name.into();
        let boxed: BoxedHandler = Box::new(move |conn, params| Box::pin(handler(conn, params)));
        let prev = self.handlers.insert(name.clone(), boxed);
        assert!(prev.is_none(), "handler already registered for method {name:?}");
    }

    /// Register the fallback invoked with `(method, params)` for any name
    /// without an explicit entry.
    ///
    /// # Panics
    ///
    /// Panics if a fallback is already set; there is exactly one.
    pub fn set_fallback<F, Fut>(&mut self, fallback: F)
    where
        F: Fn(RpcConnection, String, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        assert!(self.fallback.is_none(), "fallback handler already registered");
        self.fallback = Some(Box::new(move |conn, name, params| {
            Box::pin(fallback(conn, name, params))
        }));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Invoke the handler for `name`, or the fallback with the original name
    /// and params intact. Handler failures propagate to the caller; the
    /// orchestrator is responsible for catching them.
    pub async fn dispatch(
        &self,
        conn: RpcConnection,
        name: &str,
        params: Vec<Value>,
    ) -> Result<Value, RpcError> {
        if let Some(handler) = self.handlers.get(name) {
            handler(conn, params).await
        } else if let Some(fallback) = &self.fallback {
            tracing::trace!(method = name, "dispatching through fallback");
            fallback(conn, name.to_owned(), params).await
        } else {
            Err(RpcError::method_not_found(name))
        }
    }
}

#[cfg(all(test, feature = "mem"))]
mod tests {
    use super::*;
    use crate::{ApiDelegate, Transport};
    use serde_json::json;
    use std::sync::Arc;

    struct NullApi;

    impl ApiDelegate for NullApi {
        async fn receive_call(
            &self,
            _conn: RpcConnection,
            _api_id: u64,
            method: String,
            _params: Vec<Value>,
        ) -> Result<Value, RpcError> {
            Err(RpcError::method_not_found(&method))
        }

        async fn receive_notice(
            &self,
            _conn: RpcConnection,
            _callback_id: u64,
            _params: Vec<Value>,
        ) -> Result<(), RpcError> {
            Ok(())
        }

        async fn receive_callback(
            &self,
            _conn: RpcConnection,
            _callback_id: u64,
            _params: Vec<Value>,
        ) -> Result<Value, RpcError> {
            Ok(Value::Null)
        }
    }

    fn test_conn() -> RpcConnection {
        let (a, _b) = Transport::mem_pair();
        RpcConnection::new(a, Arc::new(NullApi))
    }

    #[tokio::test]
    async fn dispatches_to_the_explicit_entry() {
        let mut table = DispatchTable::new();
        table.register("sum", |_conn, params| async move {
            let total: i64 = params.iter().filter_map(Value::as_i64).sum();
            Ok(json!(total))
        });

        let result = table
            .dispatch(test_conn(), "sum", vec![json!(2), json!(3)])
            .await
            .unwrap();
        assert_eq!(result, json!(5));
    }

    #[tokio::test]
    async fn unregistered_names_reach_the_fallback_intact() {
        let mut table = DispatchTable::new();
        table.register("known", |_conn, _params| async { Ok(Value::Null) });
        table.set_fallback(|_conn, name, params| async move {
            Ok(json!({"method": name, "params": params}))
        });

        let result = table
            .dispatch(test_conn(), "mystery", vec![json!(1), json!("two")])
            .await
            .unwrap();
        assert_eq!(result, json!({"method": "mystery", "params": [1, "two"]}));
    }

    #[tokio::test]
    async fn missing_fallback_is_a_method_not_found_error() {
        let table = DispatchTable::new();
        let err = table.dispatch(test_conn(), "nope", vec![]).await.unwrap_err();
        assert!(matches!(
            err,
            RpcError::Status {
                code: crate::ErrorCode::MethodNotFound,
                ..
            }
        ));
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_registration_panics() {
        let mut table = DispatchTable::new();
        table.register("twice", |_conn, _params| async { Ok(Value::Null) });
        table.register("twice", |_conn, _params| async { Ok(Value::Null) });
    }

    #[test]
    #[should_panic(expected = "fallback handler already registered")]
    fn duplicate_fallback_panics() {
        let mut table = DispatchTable::new();
        table.set_fallback(|_conn, _name, _params| async { Ok(Value::Null) });
        table.set_fallback(|_conn, _name, _params| async { Ok(Value::Null) });
    }
}
