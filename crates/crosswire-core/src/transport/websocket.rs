//! WebSocket transport: text messages over a split sink/stream pair.
//!
//! A writer task drains an outbound channel into the socket sink; a reader
//! task forwards text frames into an inbound channel. Ping/pong and binary
//! frames are skipped; a close frame (either direction) flips the closed
//! flag and tears both tasks down.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::{SinkExt, StreamExt};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc;

use crate::TransportError;

use super::TransportBackend;

#[cfg(feature = "websocket-axum")]
use axum::extract::ws::{Message as AxumMessage, WebSocket as AxumWebSocket};

#[cfg(feature = "websocket")]
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;

const CHANNEL_CAPACITY: usize = 64;

enum OutMsg {
    Text(String),
    Close,
}

struct WebSocketInner {
    send: mpsc::Sender<OutMsg>,
    recv: AsyncMutex<mpsc::Receiver<String>>,
    closed: AtomicBool,
}

#[derive(Clone)]
pub struct WebSocketTransport {
    inner: Arc<WebSocketInner>,
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("closed", &self.inner.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl WebSocketTransport {
    #[cfg(feature = "websocket")]
    pub fn new<S>(ws: tokio_tungstenite::WebSocketStream<S>) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
    {
        let (send_tx, mut send_rx) = mpsc::channel::<OutMsg>(CHANNEL_CAPACITY);
        let (recv_tx, recv_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let inner = Arc::new(WebSocketInner {
            send: send_tx,
            recv: AsyncMutex::new(recv_rx),
            closed: AtomicBool::new(false),
        });

        let (mut sink, mut stream) = ws.split();

        let inner_for_writer = inner.clone();
        tokio::spawn(async move {
            while let Some(msg) = send_rx.recv().await {
                match msg {
                    OutMsg::Text(text) => {
                        if sink
                            .send(TungsteniteMessage::Text(text.into()))
                            .await
                            .is_err()
                        {
                            inner_for_writer.closed.store(true, Ordering::Release);
                            break;
                        }
                    }
                    OutMsg::Close => {
                        let _ = sink.send(TungsteniteMessage::Close(None)).await;
                        inner_for_writer.closed.store(true, Ordering::Release);
                        break;
                    }
                }
            }
        });

        let inner_for_reader = inner.clone();
        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(TungsteniteMessage::Text(text)) => {
                        if recv_tx.send(text.as_str().to_owned()).await.is_err() {
                            break;
                        }
                    }
                    Ok(TungsteniteMessage::Close(_)) => {
                        inner_for_reader.closed.store(true, Ordering::Release);
                        break;
                    }
                    Ok(TungsteniteMessage::Binary(_))
                    | Ok(TungsteniteMessage::Ping(_))
                    | Ok(TungsteniteMessage::Pong(_))
                    | Ok(TungsteniteMessage::Frame(_)) => {}
                    Err(_) => {
                        inner_for_reader.closed.store(true, Ordering::Release);
                        break;
                    }
                }
            }
        });

        Self { inner }
    }

    /// Create a connected in-memory pair with a real websocket handshake.
    #[cfg(feature = "websocket")]
    pub async fn pair() -> (Self, Self) {
        let (client_stream, server_stream) = tokio::io::duplex(65536);

        let client_fut = tokio_tungstenite::client_async("ws://localhost/", client_stream);
        let server_fut = tokio_tungstenite::accept_async(server_stream);

        let (client_result, server_result) = futures::future::join(client_fut, server_fut).await;

        let ws_a = client_result.expect("client handshake failed").0;
        let ws_b = server_result.expect("server handshake failed");

        (Self::new(ws_a), Self::new(ws_b))
    }

    #[cfg(feature = "websocket-axum")]
    pub fn from_axum(ws: AxumWebSocket) -> Self {
        let (send_tx, mut send_rx) = mpsc::channel::<OutMsg>(CHANNEL_CAPACITY);
        let (recv_tx, recv_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
        let inner = Arc::new(WebSocketInner {
            send: send_tx,
            recv: AsyncMutex::new(recv_rx),
            closed: AtomicBool::new(false),
        });

        let (mut sink, mut stream) = ws.split();

        let inner_for_writer = inner.clone();
        tokio::spawn(async move {
            while let Some(msg) = send_rx.recv().await {
                match msg {
                    OutMsg::Text(text) => {
                        if sink.send(AxumMessage::Text(text.into())).await.is_err() {
                            inner_for_writer.closed.store(true, Ordering::Release);
                            break;
                        }
                    }
                    OutMsg::Close => {
                        let _ = sink.send(AxumMessage::Close(None)).await;
                        inner_for_writer.closed.store(true, Ordering::Release);
                        break;
                    }
                }
            }
        });

        let inner_for_reader = inner.clone();
        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                let msg = match item {
                    Ok(msg) => msg,
                    Err(_) => {
                        inner_for_reader.closed.store(true, Ordering::Release);
                        break;
                    }
                };

                match msg {
                    AxumMessage::Text(text) => {
                        if recv_tx.send(text.as_str().to_owned()).await.is_err() {
                            break;
                        }
                    }
                    AxumMessage::Close(_) => {
                        inner_for_reader.closed.store(true, Ordering::Release);
                        break;
                    }
                    AxumMessage::Binary(_) | AxumMessage::Ping(_) | AxumMessage::Pong(_) => {}
                }
            }
        });

        Self { inner }
    }

    fn is_closed_inner(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl TransportBackend for WebSocketTransport {
    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        if self.is_closed_inner() {
            return Err(TransportError::Closed);
        }

        self.inner
            .send
            .send(OutMsg::Text(text))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn recv_text(&self) -> Result<String, TransportError> {
        if self.is_closed_inner() {
            return Err(TransportError::Closed);
        }

        let mut recv = self.inner.recv.lock().await;
        recv.recv().await.ok_or(TransportError::Closed)
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let _ = self.inner.send.try_send(OutMsg::Close);
    }

    fn is_closed(&self) -> bool {
        self.is_closed_inner()
    }
}

#[cfg(all(test, feature = "websocket"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_round_trips_text() {
        let (a, b) = WebSocketTransport::pair().await;

        a.send_text("hello".into()).await.unwrap();
        assert_eq!(b.recv_text().await.unwrap(), "hello");

        b.send_text("back".into()).await.unwrap();
        assert_eq!(a.recv_text().await.unwrap(), "back");
    }

    #[tokio::test]
    async fn close_propagates_to_the_peer() {
        let (a, b) = WebSocketTransport::pair().await;

        a.close();
        assert!(a.is_closed());
        assert!(matches!(b.recv_text().await, Err(TransportError::Closed)));
    }
}
