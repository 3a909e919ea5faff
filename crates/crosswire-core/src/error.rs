//! Error codes and error types.

use core::fmt;

use serde_json::Value;

use crate::{CodecError, ErrorObject};

/// Classification codes carried in the `code` field of a wire error object.
///
/// Code 1 is the generic "handler raised a failure" classification; peers
/// built against the same protocol expect it for application-level faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum ErrorCode {
    Ok = 0,
    Handler = 1,
    InvalidParams = 2,
    MethodNotFound = 3,
    Parse = 4,
    Internal = 5,
    Unavailable = 6,
    ResourceExhausted = 7,
}

impl ErrorCode {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Ok),
            1 => Some(Self::Handler),
            2 => Some(Self::InvalidParams),
            3 => Some(Self::MethodNotFound),
            4 => Some(Self::Parse),
            5 => Some(Self::Internal),
            6 => Some(Self::Unavailable),
            7 => Some(Self::ResourceExhausted),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Handler => write!(f, "handler failure"),
            Self::InvalidParams => write!(f, "invalid params"),
            Self::MethodNotFound => write!(f, "method not found"),
            Self::Parse => write!(f, "parse error"),
            Self::Internal => write!(f, "internal error"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::ResourceExhausted => write!(f, "resource exhausted"),
        }
    }
}

/// Transport-level errors.
#[derive(Debug)]
pub enum TransportError {
    Closed,
    Io(std::io::Error),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "transport closed"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Closed => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// High-level RPC errors.
///
/// `Remote` carries a failure the peer reported in an error response;
/// `ConnectionClosed` is the synthetic outcome delivered to pending calls
/// when the connection dies. Callers can tell "peer said no" from
/// "connection died" by matching on the variant.
#[derive(Debug)]
pub enum RpcError {
    /// Failure reported by the peer in an error response envelope.
    Remote(ErrorObject),
    /// The connection closed while the call was outstanding.
    ConnectionClosed,
    /// Local failure with a wire classification.
    Status {
        code: ErrorCode,
        message: String,
        data: Value,
    },
    /// Envelope encode or decode failure.
    Codec(CodecError),
    /// Transport failure while transmitting.
    Transport(TransportError),
}

impl RpcError {
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Status {
            code: ErrorCode::Handler,
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn handler_with_data(message: impl Into<String>, data: Value) -> Self {
        Self::Status {
            code: ErrorCode::Handler,
            message: message.into(),
            data,
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::Status {
            code: ErrorCode::InvalidParams,
            message: message.into(),
            data: Value::Null,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::Status {
            code: ErrorCode::MethodNotFound,
            message: format!("no handler for method {method:?}"),
            data: Value::Null,
        }
    }

    pub(crate) fn from_panic(panic: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = panic.downcast_ref::<&str>() {
            format!("panic in handler: {s}")
        } else if let Some(s) = panic.downcast_ref::<String>() {
            format!("panic in handler: {s}")
        } else {
            "panic in handler".to_owned()
        };
        Self::Status {
            code: ErrorCode::Internal,
            message,
            data: Value::Null,
        }
    }

    /// Project this failure into the wire error representation.
    ///
    /// A `Remote` failure passes the peer's object through unchanged, so a
    /// handler that propagates a nested call's error keeps its classification.
    pub fn to_wire(&self) -> ErrorObject {
        match self {
            Self::Remote(e) => e.clone(),
            Self::Status {
                code,
                message,
                data,
            } => ErrorObject {
                code: *code as i64,
                message: message.clone(),
                data: data.clone(),
            },
            Self::ConnectionClosed => ErrorObject {
                code: ErrorCode::Unavailable as i64,
                message: "connection closed".to_owned(),
                data: Value::Null,
            },
            Self::Codec(e) => ErrorObject {
                code: ErrorCode::Parse as i64,
                message: e.to_string(),
                data: Value::Null,
            },
            Self::Transport(e) => ErrorObject {
                code: ErrorCode::Unavailable as i64,
                message: e.to_string(),
                data: Value::Null,
            },
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote(e) => write!(f, "peer error {}: {}", e.code, e.message),
            Self::ConnectionClosed => write!(f, "connection closed"),
            Self::Status { code, message, .. } => write!(f, "{code}: {message}"),
            Self::Codec(e) => write!(f, "codec error: {e}"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
        }
    }
}

impl std::error::Error for RpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec(e) => Some(e),
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CodecError> for RpcError {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<TransportError> for RpcError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<ErrorObject> for RpcError {
    fn from(e: ErrorObject) -> Self {
        Self::Remote(e)
    }
}
