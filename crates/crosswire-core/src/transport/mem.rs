//! In-process transport: the semantic reference implementation.
//!
//! Messages pass through async channels with no serialization of the
//! transport's own. All other transports must behave identically to this
//! one; if behavior differs, the other transport has a bug.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::TransportError;

use super::TransportBackend;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
pub struct MemTransport {
    inner: Arc<MemInner>,
}

#[derive(Debug)]
struct MemInner {
    tx: mpsc::Sender<String>,
    rx: tokio::sync::Mutex<mpsc::Receiver<String>>,
    closed: std::sync::atomic::AtomicBool,
}

impl MemTransport {
    /// Create a connected pair: messages sent on one side are received on
    /// the other, and vice versa.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(CHANNEL_CAPACITY);
        let (tx_b, rx_b) = mpsc::channel(CHANNEL_CAPACITY);

        let inner_a = Arc::new(MemInner {
            tx: tx_b,
            rx: tokio::sync::Mutex::new(rx_a),
            closed: std::sync::atomic::AtomicBool::new(false),
        });

        let inner_b = Arc::new(MemInner {
            tx: tx_a,
            rx: tokio::sync::Mutex::new(rx_b),
            closed: std::sync::atomic::AtomicBool::new(false),
        });

        (Self { inner: inner_a }, Self { inner: inner_b })
    }

    fn is_closed_inner(&self) -> bool {
        self.inner.closed.load(std::sync::atomic::Ordering::Acquire)
    }
}

impl TransportBackend for MemTransport {
    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        if self.is_closed_inner() {
            return Err(TransportError::Closed);
        }

        self.inner
            .tx
            .send(text)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn recv_text(&self) -> Result<String, TransportError> {
        if self.is_closed_inner() {
            return Err(TransportError::Closed);
        }

        let text = {
            let mut rx = self.inner.rx.lock().await;
            rx.recv().await.ok_or(TransportError::Closed)?
        };

        Ok(text)
    }

    fn close(&self) {
        self.inner
            .closed
            .store(true, std::sync::atomic::Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.is_closed_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_delivers_in_both_directions() {
        let (a, b) = MemTransport::pair();

        a.send_text("from a".into()).await.unwrap();
        b.send_text("from b".into()).await.unwrap();

        assert_eq!(b.recv_text().await.unwrap(), "from a");
        assert_eq!(a.recv_text().await.unwrap(), "from b");
    }

    #[tokio::test]
    async fn delivery_preserves_order() {
        let (a, b) = MemTransport::pair();
        for i in 0..10 {
            a.send_text(format!("msg {i}")).await.unwrap();
        }
        for i in 0..10 {
            assert_eq!(b.recv_text().await.unwrap(), format!("msg {i}"));
        }
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (a, _b) = MemTransport::pair();
        a.close();
        assert!(a.is_closed());
        assert!(matches!(
            a.send_text("late".into()).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn dropping_the_peer_closes_the_stream() {
        let (a, b) = MemTransport::pair();
        drop(b);
        assert!(matches!(a.recv_text().await, Err(TransportError::Closed)));
    }
}
