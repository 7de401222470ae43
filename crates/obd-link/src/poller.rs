//! Raw Request Poller
//!
//! Sends a fixed set of raw requests on an interval and hands the raw
//! replies on. Replies are not decoded here.

use crate::adapter::{send_request, AdapterError};
use crate::settings::PollSettings;
use obd_broker::Connection;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Consecutive failures before a request is reported as unanswered
const MAX_CONSECUTIVE_FAILURES: u8 = 3;

/// Reply to one raw request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReply {
    /// Request as sent, e.g. "010C"
    pub request: String,
    /// Reply text with echo and prompt removed
    pub text: String,
    /// Time the reply completed (Unix ms)
    pub timestamp_ms: u64,
}

/// A request in the polling rotation
#[derive(Debug, Clone)]
struct PolledRequest {
    command: String,
    failures: u8,
}

/// Round-robin poller over a ready connection
pub struct RawPoller {
    requests: Vec<PolledRequest>,
    interval: Duration,
    request_timeout: Duration,
}

impl RawPoller {
    pub fn new(settings: &PollSettings, request_timeout: Duration) -> Self {
        let requests = settings
            .requests
            .iter()
            .map(|command| PolledRequest {
                command: command.trim().to_string(),
                failures: 0,
            })
            .filter(|request| !request.command.is_empty())
            .collect::<Vec<_>>();

        info!("Raw poller created with {} request(s)", requests.len());

        Self {
            requests,
            interval: Duration::from_millis(settings.interval_ms.max(1)),
            request_timeout,
        }
    }

    /// Number of requests in the rotation
    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    /// Send every request once, returning the replies that arrived
    pub async fn poll_once(&mut self, conn: &Connection) -> Vec<RawReply> {
        let mut replies = Vec::with_capacity(self.requests.len());

        for request in &mut self.requests {
            match send_request(conn, &request.command, self.request_timeout).await {
                Ok(text) => {
                    request.failures = 0;
                    replies.push(RawReply {
                        request: request.command.clone(),
                        text,
                        timestamp_ms: now_ms(),
                    });
                }
                Err(e) => {
                    request.failures = request.failures.saturating_add(1);
                    warn!(
                        "Request {} failed (attempt {}): {}",
                        request.command, request.failures, e
                    );
                    if request.failures == MAX_CONSECUTIVE_FAILURES {
                        warn!("Request {} unanswered {} times in a row", request.command, request.failures);
                    }
                    if matches!(e, AdapterError::Transport(obd_broker::TransportError::Closed)) {
                        break;
                    }
                }
            }
        }

        replies
    }

    /// Poll until the reply receiver is dropped
    pub async fn run(&mut self, conn: &Connection, reply_tx: mpsc::Sender<RawReply>) {
        info!("Starting raw poller every {:?}", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            for reply in self.poll_once(conn).await {
                if reply_tx.send(reply).await.is_err() {
                    info!("Raw poller stopped");
                    return;
                }
            }
            if reply_tx.is_closed() {
                info!("Raw poller stopped");
                return;
            }
        }
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::simulated_reply;
    use obd_broker::{BoxError, ConnectOptions, ConnectionBroker, MockTransport};

    async fn ready_connection(mock: &MockTransport) -> Connection {
        ConnectionBroker::new(mock.clone())
            .configure(ConnectOptions::new("dev/x"))
            .unwrap()
            .connect(|_conn| async { Ok::<(), BoxError>(()) })
            .await
            .unwrap()
    }

    fn settings(requests: &[&str]) -> PollSettings {
        PollSettings {
            requests: requests.iter().map(|r| r.to_string()).collect(),
            interval_ms: 10,
        }
    }

    #[test]
    fn test_blank_requests_skipped() {
        let poller = RawPoller::new(&settings(&["010C", "  ", ""]), Duration::from_millis(50));
        assert_eq!(poller.request_count(), 1);
    }

    #[tokio::test]
    async fn test_poll_once_collects_replies() {
        let mock = MockTransport::new().with_responder(simulated_reply);
        let conn = ready_connection(&mock).await;
        let mut poller = RawPoller::new(&settings(&["010C", "010D"]), Duration::from_millis(200));

        let replies = poller.poll_once(&conn).await;
        let texts: Vec<_> = replies.iter().map(|r| (r.request.as_str(), r.text.as_str())).collect();
        assert_eq!(texts, vec![("010C", "41 0C 1A F8"), ("010D", "41 0D 32")]);
    }

    #[tokio::test]
    async fn test_failed_request_is_skipped() {
        let mock = MockTransport::new().with_responder(simulated_reply);
        let conn = ready_connection(&mock).await;
        let mut poller = RawPoller::new(&settings(&["01FF", "0105"]), Duration::from_millis(200));

        let replies = poller.poll_once(&conn).await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].request, "0105");
        assert_eq!(poller.requests[0].failures, 1);
    }

    #[tokio::test]
    async fn test_run_stops_when_receiver_dropped() {
        let mock = MockTransport::new().with_responder(simulated_reply);
        let conn = ready_connection(&mock).await;
        let mut poller = RawPoller::new(&settings(&["010C"]), Duration::from_millis(200));

        let (tx, mut rx) = mpsc::channel(1);
        let handle = tokio::spawn(async move { poller.run(&conn, tx).await });

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.text, "41 0C 1A F8");
        drop(rx);

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
