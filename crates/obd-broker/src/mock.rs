//! Mock Transport
//!
//! Scripted transport for running the broker without hardware. Clones
//! share state, so a test can keep one handle while the broker owns another.

use crate::error::TransportError;
use crate::options::SerialOptions;
use crate::transport::{LinkEvent, Transport, TransportLink};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Produces the reply the simulated device sends for a write
pub type Responder = Arc<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// In-memory transport with scripted behaviour
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    opens: AtomicUsize,
    script: Mutex<Script>,
}

#[derive(Default)]
struct Script {
    /// Delay before the open resolves
    open_delay: Duration,
    /// Open fails with this message when set
    failure: Option<String>,
    /// Replies to outbound writes
    responder: Option<Responder>,
    /// Every write seen on any link, in order
    writes: Vec<Vec<u8>>,
    /// Inbound side of the most recent link
    last_link: Option<mpsc::Sender<LinkEvent>>,
}

impl MockTransport {
    /// Transport whose opens succeed
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport whose opens fail with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        let mock = Self::default();
        mock.set_failure(Some(message.into()));
        mock
    }

    /// Delay every open by `delay`
    pub fn with_open_delay(self, delay: Duration) -> Self {
        self.script().open_delay = delay;
        self
    }

    /// Answer writes with `responder`
    pub fn with_responder<F>(self, responder: F) -> Self
    where
        F: Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        self.script().responder = Some(Arc::new(responder));
        self
    }

    /// Change whether subsequent opens fail
    pub fn set_failure(&self, failure: Option<String>) {
        self.script().failure = failure;
    }

    /// Number of open attempts seen so far
    pub fn open_count(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    /// Writes seen so far
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.script().writes.clone()
    }

    /// Inject an event into the most recently opened link
    ///
    /// Returns false when no link is open.
    pub async fn emit(&self, event: LinkEvent) -> bool {
        let link = self.script().last_link.clone();
        match link {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.inner.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, path: &str, _options: &SerialOptions) -> Result<TransportLink, TransportError> {
        let attempt = self.inner.opens.fetch_add(1, Ordering::SeqCst) + 1;
        let (delay, failure) = {
            let script = self.script();
            (script.open_delay, script.failure.clone())
        };
        info!("Mock open #{} of {}", attempt, path);

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = failure {
            return Err(TransportError::Open(message));
        }

        let (link, mut outbound, inbound) = TransportLink::channel();
        self.script().last_link = Some(inbound.clone());

        let mock = self.clone();
        tokio::spawn(async move {
            while let Some(bytes) = outbound.recv().await {
                let responder = {
                    let mut script = mock.script();
                    script.writes.push(bytes.clone());
                    script.responder.clone()
                };
                if let Some(reply) = responder.and_then(|respond| respond(&bytes)) {
                    if inbound.send(LinkEvent::Data(reply)).await.is_err() {
                        break;
                    }
                }
            }
            debug!("Mock link #{} closed", attempt);
        });

        Ok(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_counts_and_fails() {
        let mock = MockTransport::failing("fake error");
        let err = mock.open("dev/x", &SerialOptions::default()).await.unwrap_err();
        assert_eq!(err, TransportError::Open("fake error".into()));
        assert_eq!(mock.open_count(), 1);

        mock.set_failure(None);
        assert!(mock.open("dev/x", &SerialOptions::default()).await.is_ok());
        assert_eq!(mock.open_count(), 2);
    }

    #[tokio::test]
    async fn test_responder_replies_to_writes() {
        let mock = MockTransport::new().with_responder(|req| {
            (req == b"ATI\r").then(|| b"ELM327 v1.5\r\r>".to_vec())
        });
        let mut link = mock.open("dev/x", &SerialOptions::default()).await.unwrap();

        link.outbound.send(b"ATI\r".to_vec()).await.unwrap();
        assert_eq!(
            link.inbound.recv().await.unwrap(),
            LinkEvent::Data(b"ELM327 v1.5\r\r>".to_vec())
        );
        assert_eq!(mock.writes(), vec![b"ATI\r".to_vec()]);
    }

    #[tokio::test]
    async fn test_emit_without_link() {
        let mock = MockTransport::new();
        assert!(!mock.emit(LinkEvent::Data(vec![1])).await);
    }
}
