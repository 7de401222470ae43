//! Connection Broker
//!
//! Serialises access to the single connection a line supports. The first
//! request opens the transport and runs the caller's configure step; every
//! request that arrives before the attempt settles is queued and receives
//! the same outcome. Once ready, requests are answered from the existing
//! connection without touching the transport again.

use crate::connection::Connection;
use crate::error::{BoxError, ConfigurationError, ConnectionError};
use crate::options::ConnectOptions;
use crate::transport::Transport;
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, warn};

/// One queued caller
type Waiter = oneshot::Sender<Result<Connection, ConnectionError>>;

/// Externally visible broker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerStatus {
    /// No connection and no attempt in flight
    Idle,
    /// Waiting for the transport to open
    Opening,
    /// Transport open, configure step running
    Configuring,
    /// Connection configured and shared
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Opening,
    Configuring,
}

enum BrokerState {
    Idle,
    Connecting {
        attempt: u64,
        phase: Phase,
        waiters: VecDeque<Waiter>,
    },
    Ready(Connection),
}

struct Shared<T> {
    transport: T,
    state: Mutex<BrokerState>,
    attempts: AtomicU64,
}

/// Owner of the singleton connection for one line
pub struct ConnectionBroker<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> Clone for ConnectionBroker<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Transport> ConnectionBroker<T> {
    /// Create a broker that opens lines through `transport`
    pub fn new(transport: T) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                state: Mutex::new(BrokerState::Idle),
                attempts: AtomicU64::new(0),
            }),
        }
    }

    /// Validate `opts` and return a connector bound to them
    ///
    /// No I/O happens here; the transport is first touched by
    /// [`Connector::connect`].
    pub fn configure(&self, opts: ConnectOptions) -> Result<Connector<T>, ConfigurationError> {
        opts.validate()?;
        debug!("Connector configured for {}", opts.serial_path);
        Ok(Connector {
            opts: Arc::new(opts),
            shared: Arc::clone(&self.shared),
        })
    }

    /// Like [`configure`](Self::configure) for untyped options of the shape
    /// `{"serialPath": "...", "serialOpts": {...}}`
    pub fn configure_value(&self, opts: &Value) -> Result<Connector<T>, ConfigurationError> {
        self.configure(ConnectOptions::from_value(opts)?)
    }

    /// Current lifecycle state
    pub async fn status(&self) -> BrokerStatus {
        match &*self.shared.state.lock().await {
            BrokerState::Idle => BrokerStatus::Idle,
            BrokerState::Connecting { phase: Phase::Opening, .. } => BrokerStatus::Opening,
            BrokerState::Connecting { phase: Phase::Configuring, .. } => BrokerStatus::Configuring,
            BrokerState::Ready(_) => BrokerStatus::Ready,
        }
    }

    /// Drop the shared connection and return to idle
    ///
    /// Requests still waiting on an in-flight attempt are rejected with
    /// [`ConnectionError::Abandoned`], and that attempt's result is discarded.
    pub async fn reset(&self) {
        let mut state = self.shared.state.lock().await;
        match std::mem::replace(&mut *state, BrokerState::Idle) {
            BrokerState::Idle => {}
            BrokerState::Ready(conn) => {
                info!("Releasing connection on {}", conn.path());
            }
            BrokerState::Connecting { attempt, waiters, .. } => {
                warn!(
                    "Abandoning connection attempt {} with {} waiting request(s)",
                    attempt,
                    waiters.len()
                );
            }
        }
    }
}

/// Requests the shared connection with a fixed set of options
pub struct Connector<T: Transport> {
    opts: Arc<ConnectOptions>,
    shared: Arc<Shared<T>>,
}

impl<T: Transport> Clone for Connector<T> {
    fn clone(&self) -> Self {
        Self {
            opts: Arc::clone(&self.opts),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Transport> Connector<T> {
    /// Options this connector opens the line with
    pub fn options(&self) -> &ConnectOptions {
        &self.opts
    }

    /// Get the shared connection, opening and configuring it if needed
    ///
    /// `configure` runs at most once per attempt and only when this call
    /// starts the attempt. If the connection is already ready it is
    /// returned immediately and `configure` is dropped unused.
    pub async fn connect<F, Fut, E>(&self, configure: F) -> Result<Connection, ConnectionError>
    where
        F: FnOnce(Connection) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.shared.state.lock().await;
            match &mut *state {
                BrokerState::Ready(conn) => {
                    debug!("Reusing ready connection on {}", conn.path());
                    return Ok(conn.clone());
                }
                BrokerState::Connecting { attempt, waiters, .. } => {
                    waiters.push_back(tx);
                    debug!(
                        "Attempt {} in flight, queued request ({} waiting)",
                        attempt,
                        waiters.len()
                    );
                }
                BrokerState::Idle => {
                    let attempt = self.shared.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    *state = BrokerState::Connecting {
                        attempt,
                        phase: Phase::Opening,
                        waiters: VecDeque::from([tx]),
                    };
                    info!(
                        "Starting connection attempt {} on {}",
                        attempt, self.opts.serial_path
                    );
                    tokio::spawn(run_attempt(
                        Arc::clone(&self.shared),
                        Arc::clone(&self.opts),
                        attempt,
                        configure,
                    ));
                }
            }
        }

        rx.await.unwrap_or(Err(ConnectionError::Abandoned))
    }
}

async fn run_attempt<T, F, Fut, E>(
    shared: Arc<Shared<T>>,
    opts: Arc<ConnectOptions>,
    attempt: u64,
    configure: F,
) where
    T: Transport,
    F: FnOnce(Connection) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    // Panics in the transport or the caller's closure end the inner task,
    // never this one, so the attempt always settles
    let worker = tokio::spawn(establish(Arc::clone(&shared), opts, attempt, configure));
    let outcome = match worker.await {
        Ok(outcome) => outcome,
        Err(join_err) if join_err.is_panic() => {
            error!("Connection attempt {} panicked", attempt);
            Err(ConnectionError::Aborted(panic_message(join_err)))
        }
        Err(_) => Err(ConnectionError::Abandoned),
    };
    shared.settle(attempt, outcome).await;
}

/// Open the transport and run the configure step once
async fn establish<T, F, Fut, E>(
    shared: Arc<Shared<T>>,
    opts: Arc<ConnectOptions>,
    attempt: u64,
    configure: F,
) -> Result<Connection, ConnectionError>
where
    T: Transport,
    F: FnOnce(Connection) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError> + Send + 'static,
{
    let link = shared
        .transport
        .open(&opts.serial_path, &opts.serial_opts)
        .await
        .map_err(ConnectionError::Open)?;

    let conn = Connection::new(&opts.serial_path, attempt, link.outbound);
    conn.spawn_forwarder(link.inbound);

    if !shared.enter_configuring(attempt).await {
        return Err(ConnectionError::Abandoned);
    }
    info!("Transport open on {}, configuring", opts.serial_path);

    configure(conn.clone())
        .await
        .map_err(|e| ConnectionError::configure(e.into()))?;
    Ok(conn)
}

fn panic_message(join_err: tokio::task::JoinError) -> String {
    let payload = join_err.into_panic();
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "task panicked".to_string()
    }
}

impl<T> Shared<T> {
    /// Move the attempt to the configuring phase; false if it was superseded
    async fn enter_configuring(&self, attempt: u64) -> bool {
        let mut state = self.state.lock().await;
        match &mut *state {
            BrokerState::Connecting { attempt: current, phase, .. } if *current == attempt => {
                *phase = Phase::Configuring;
                true
            }
            _ => false,
        }
    }

    /// Record the attempt's outcome and fan it out to every waiter
    async fn settle(&self, attempt: u64, outcome: Result<Connection, ConnectionError>) {
        let waiters = {
            let mut state = self.state.lock().await;
            let current = matches!(
                &*state,
                BrokerState::Connecting { attempt: a, .. } if *a == attempt
            );
            if !current {
                debug!("Discarding outcome of superseded attempt {}", attempt);
                return;
            }

            let waiters = match std::mem::replace(&mut *state, BrokerState::Idle) {
                BrokerState::Connecting { waiters, .. } => waiters,
                _ => VecDeque::new(),
            };
            if let Ok(conn) = &outcome {
                conn.mark_ready();
                *state = BrokerState::Ready(conn.clone());
            }
            waiters
        };

        match outcome {
            Ok(conn) => {
                info!(
                    "Connection on {} ready, resolving {} request(s)",
                    conn.path(),
                    waiters.len()
                );
                for waiter in waiters {
                    // Caller may have stopped waiting
                    let _ = waiter.send(Ok(conn.clone()));
                }
            }
            Err(e) => {
                error!(
                    "Connection attempt {} failed: {}; rejecting {} request(s)",
                    attempt,
                    e,
                    waiters.len()
                );
                for waiter in waiters {
                    let _ = waiter.send(Err(e.clone()));
                }
            }
        }
    }
}
