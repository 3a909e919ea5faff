//! crosswire: bidirectional RPC over a single duplex text transport.
//!
//! Either endpoint may initiate calls toward the other; both directions
//! share one connection. Outbound calls get a correlation id and park until
//! the matching reply arrives; inbound envelopes are dispatched to the
//! [`ApiDelegate`] the connection was built with.
//!
//! # Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use crosswire::prelude::*;
//!
//! struct Info;
//!
//! impl ApiDelegate for Info {
//!     async fn receive_call(
//!         &self,
//!         _conn: RpcConnection,
//!         _api_id: u64,
//!         method: String,
//!         _params: Vec<Value>,
//!     ) -> Result<Value, RpcError> {
//!         match method.as_str() {
//!             "get_info" => Ok(json!({"version": "1.0"})),
//!             other => Err(RpcError::method_not_found(other)),
//!         }
//!     }
//!
//!     async fn receive_notice(
//!         &self,
//!         _conn: RpcConnection,
//!         _callback_id: u64,
//!         _params: Vec<Value>,
//!     ) -> Result<(), RpcError> {
//!         Ok(())
//!     }
//!
//!     async fn receive_callback(
//!         &self,
//!         _conn: RpcConnection,
//!         callback_id: u64,
//!         _params: Vec<Value>,
//!     ) -> Result<Value, RpcError> {
//!         Ok(json!({"ack": callback_id}))
//!     }
//! }
//!
//! # async fn demo() -> Result<(), RpcError> {
//! let (client, server) = Transport::mem_pair();
//! let client = RpcConnection::new(client, Arc::new(Info));
//! let server = RpcConnection::new(server, Arc::new(Info));
//! tokio::spawn(client.clone().run());
//! tokio::spawn(server.clone().run());
//!
//! let info = client.call(0, "get_info", vec![]).await?;
//! # Ok(())
//! # }
//! ```
//!
//! For a websocket connection, wrap the accepted stream instead:
//! `Transport::websocket(ws)` (tokio-tungstenite) or
//! `Transport::websocket_axum(ws)` (axum handler).

#![forbid(unsafe_code)]

pub use crosswire_core::*;

pub mod prelude {
    pub use crate::{
        ApiDelegate, Codec, DEFAULT_API, ErrorCode, ErrorObject, RESOLVE_API, Request, Response,
        RpcConnection, RpcError, Transport, TransportError,
    };
    pub use serde_json::{Value, json};
}
