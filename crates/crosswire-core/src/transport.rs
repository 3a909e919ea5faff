//! Transport enum and internal backend trait.
//!
//! The public API is the [`Transport`] enum. Each backend lives in its own
//! module under `transport/` and implements the internal [`TransportBackend`]
//! trait. The engine only needs `send_text` and `recv_text`; message framing,
//! connect/close lifecycle and byte delivery stay inside the backend.

use crate::TransportError;

pub(crate) trait TransportBackend: Send + Sync + Clone + 'static {
    async fn send_text(&self, text: String) -> Result<(), TransportError>;
    async fn recv_text(&self) -> Result<String, TransportError>;
    fn close(&self);
    fn is_closed(&self) -> bool;
}

#[derive(Clone, Debug)]
pub enum Transport {
    #[cfg(feature = "mem")]
    Mem(mem::MemTransport),
    #[cfg(any(feature = "websocket", feature = "websocket-axum"))]
    WebSocket(websocket::WebSocketTransport),
}

impl Transport {
    /// Transmit one message. Fire-and-forget from the engine's perspective.
    pub async fn send_text(&self, text: String) -> Result<(), TransportError> {
        match self {
            #[cfg(feature = "mem")]
            Transport::Mem(t) => t.send_text(text).await,
            #[cfg(any(feature = "websocket", feature = "websocket-axum"))]
            Transport::WebSocket(t) => t.send_text(text).await,
        }
    }

    /// Receive the next message. Only the connection pump should call this.
    pub async fn recv_text(&self) -> Result<String, TransportError> {
        match self {
            #[cfg(feature = "mem")]
            Transport::Mem(t) => t.recv_text().await,
            #[cfg(any(feature = "websocket", feature = "websocket-axum"))]
            Transport::WebSocket(t) => t.recv_text().await,
        }
    }

    pub fn close(&self) {
        match self {
            #[cfg(feature = "mem")]
            Transport::Mem(t) => t.close(),
            #[cfg(any(feature = "websocket", feature = "websocket-axum"))]
            Transport::WebSocket(t) => t.close(),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            #[cfg(feature = "mem")]
            Transport::Mem(t) => t.is_closed(),
            #[cfg(any(feature = "websocket", feature = "websocket-axum"))]
            Transport::WebSocket(t) => t.is_closed(),
        }
    }

    #[cfg(feature = "mem")]
    pub fn mem_pair() -> (Self, Self) {
        let (a, b) = mem::MemTransport::pair();
        (Transport::Mem(a), Transport::Mem(b))
    }

    #[cfg(feature = "websocket")]
    pub fn websocket<S>(ws: tokio_tungstenite::WebSocketStream<S>) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        Transport::WebSocket(websocket::WebSocketTransport::new(ws))
    }

    #[cfg(feature = "websocket")]
    pub async fn websocket_pair() -> (Self, Self) {
        let (a, b) = websocket::WebSocketTransport::pair().await;
        (Transport::WebSocket(a), Transport::WebSocket(b))
    }

    #[cfg(feature = "websocket-axum")]
    pub fn websocket_axum(ws: axum::extract::ws::WebSocket) -> Self {
        Transport::WebSocket(websocket::WebSocketTransport::from_axum(ws))
    }
}

#[cfg(feature = "mem")]
pub mod mem;
#[cfg(any(feature = "websocket", feature = "websocket-axum"))]
pub mod websocket;
