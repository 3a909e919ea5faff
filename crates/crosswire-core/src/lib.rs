//! crosswire-core: bidirectional RPC correlation and dispatch over a single
//! duplex text transport.
//!
//! This crate defines:
//! - Wire envelopes ([`Request`], [`Response`], [`ErrorObject`])
//! - The JSON codec with a nesting-depth cap ([`Codec`])
//! - The pending-call registry ([`PendingCalls`])
//! - The dispatch table ([`DispatchTable`])
//! - The connection orchestrator ([`RpcConnection`], [`ApiDelegate`])
//! - The transport enum and backends ([`Transport`])
//! - Error codes and error types ([`ErrorCode`], [`RpcError`],
//!   [`TransportError`], [`CodecError`])

#![forbid(unsafe_code)]

mod codec;
mod connection;
mod dispatch;
mod envelope;
mod error;
mod pending;
mod transport;

pub use codec::*;
pub use connection::*;
pub use dispatch::*;
pub use envelope::*;
pub use error::*;
pub use pending::*;
pub use transport::*;
