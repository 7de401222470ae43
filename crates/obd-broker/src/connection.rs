//! Shared Connection Handle

use crate::error::TransportError;
use crate::transport::LinkEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error};

/// Capacity of the per-connection event broadcast
const EVENT_BROADCAST_CAPACITY: usize = 256;

/// Handle to the single connection on the line
///
/// Clones refer to the same underlying link. The link closes once every
/// clone has been dropped.
#[derive(Debug, Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    /// Device path the link was opened on
    path: String,
    /// Attempt that produced this connection
    attempt: u64,
    /// Set once the configure step has succeeded
    ready: AtomicBool,
    /// Outbound half of the transport link
    outbound: mpsc::Sender<Vec<u8>>,
    /// Fan-out of link events to subscribers
    events: broadcast::Sender<LinkEvent>,
}

impl Connection {
    pub(crate) fn new(path: &str, attempt: u64, outbound: mpsc::Sender<Vec<u8>>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                path: path.to_string(),
                attempt,
                ready: AtomicBool::new(false),
                outbound,
                events,
            }),
        }
    }

    /// Whether the configure step has completed
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::Acquire)
    }

    pub(crate) fn mark_ready(&self) {
        self.inner.ready.store(true, Ordering::Release);
    }

    /// Device path of the line
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    /// Id of the attempt that opened this connection
    pub fn attempt(&self) -> u64 {
        self.inner.attempt
    }

    /// Whether both handles refer to the same connection
    pub fn same_connection(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Receive data and error events from this point on
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.inner.events.subscribe()
    }

    /// Write raw bytes to the line
    pub async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        self.inner
            .outbound
            .send(bytes.to_vec())
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Forward link events to subscribers until the link closes
    pub(crate) fn spawn_forwarder(&self, mut inbound: mpsc::Receiver<LinkEvent>) {
        let events = self.inner.events.clone();
        let path = self.inner.path.clone();

        tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                match &event {
                    LinkEvent::Data(bytes) => {
                        debug!("Received {} bytes from {}", bytes.len(), path);
                    }
                    LinkEvent::Error(e) => {
                        error!("Error on connection {}: {}", path, e);
                    }
                }
                // No subscribers is fine
                let _ = events.send(event);
            }
            debug!("Event forwarder for {} stopped", path);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_reaches_link() {
        let (tx, mut rx) = mpsc::channel(4);
        let conn = Connection::new("dev/x", 1, tx);
        conn.write(b"ATZ\r").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), b"ATZ\r".to_vec());
    }

    #[tokio::test]
    async fn test_write_after_link_closed() {
        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let conn = Connection::new("dev/x", 1, tx);
        assert_eq!(conn.write(b"0100\r").await, Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_forwarder_broadcasts_events() {
        let (tx, _rx) = mpsc::channel(4);
        let conn = Connection::new("dev/x", 1, tx);
        let mut events = conn.subscribe();

        let (inbound_tx, inbound_rx) = mpsc::channel(4);
        conn.spawn_forwarder(inbound_rx);
        inbound_tx.send(LinkEvent::Data(b"OK".to_vec())).await.unwrap();
        inbound_tx
            .send(LinkEvent::Error(TransportError::Serial("noise".into())))
            .await
            .unwrap();

        assert_eq!(events.recv().await.unwrap(), LinkEvent::Data(b"OK".to_vec()));
        assert_eq!(
            events.recv().await.unwrap(),
            LinkEvent::Error(TransportError::Serial("noise".into()))
        );
    }

    #[test]
    fn test_clones_share_state() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = Connection::new("dev/x", 7, tx);
        let other = conn.clone();
        assert!(!other.is_ready());
        conn.mark_ready();
        assert!(other.is_ready());
        assert!(conn.same_connection(&other));
        assert_eq!(other.attempt(), 7);
    }
}
