//! OBD-II Line Broker
//!
//! A serial OBD line supports one open connection at a time. This crate
//! hands that single connection to any number of concurrent callers: the
//! first request opens the [`Transport`] and runs a caller-supplied
//! configure step, later requests share the outcome.
//!
//! ```no_run
//! use obd_broker::{BoxError, ConnectOptions, ConnectionBroker, SerialTransport};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = ConnectionBroker::new(SerialTransport::new());
//! let connector = broker.configure(ConnectOptions::new("/dev/ttyUSB0"))?;
//! let conn = connector
//!     .connect(|conn| async move {
//!         conn.write(b"ATZ\r").await?;
//!         Ok::<(), BoxError>(())
//!     })
//!     .await?;
//! assert!(conn.is_ready());
//! # Ok(())
//! # }
//! ```

mod broker;
mod connection;
mod error;
pub mod mock;
mod options;
mod transport;

pub use broker::{BrokerStatus, ConnectionBroker, Connector};
pub use connection::Connection;
pub use error::{BoxError, ConfigurationError, ConnectionError, TransportError};
pub use mock::MockTransport;
pub use options::{ConnectOptions, FlowControl, Parity, SerialOptions, DEFAULT_BAUD_RATE};
pub use transport::{LinkEvent, SerialTransport, Transport, TransportLink};
