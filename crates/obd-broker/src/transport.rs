//! Transport Capability
//!
//! A transport opens the physical line and hands back a [`TransportLink`]:
//! an outbound byte channel plus an inbound stream of [`LinkEvent`]s.
//! The link stays open until every outbound sender is dropped.

use crate::error::TransportError;
use crate::options::{FlowControl, Parity, SerialOptions};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, warn};

/// Depth of the inbound and outbound link channels
pub const LINK_CHANNEL_CAPACITY: usize = 64;

/// Read buffer size for serial links
const READ_BUFFER_BYTES: usize = 256;

/// Signal emitted by an open link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Raw bytes received from the line
    Data(Vec<u8>),
    /// Error reported by the line after it opened
    Error(TransportError),
}

/// Both halves of an opened line
#[derive(Debug)]
pub struct TransportLink {
    /// Bytes to write to the line
    pub outbound: mpsc::Sender<Vec<u8>>,
    /// Data and error signals from the line
    pub inbound: mpsc::Receiver<LinkEvent>,
}

impl TransportLink {
    /// Create a link pair, returning the far ends for the transport driver
    pub fn channel() -> (Self, mpsc::Receiver<Vec<u8>>, mpsc::Sender<LinkEvent>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(LINK_CHANNEL_CAPACITY);
        let link = Self {
            outbound: outbound_tx,
            inbound: inbound_rx,
        };
        (link, outbound_rx, inbound_tx)
    }
}

/// Capability that opens the physical line
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open the line at `path`, resolving once it is usable
    async fn open(&self, path: &str, options: &SerialOptions) -> Result<TransportLink, TransportError>;
}

/// Transport backed by a native serial port
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialTransport;

impl SerialTransport {
    /// Create a transport that opens native serial ports
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn open(&self, path: &str, options: &SerialOptions) -> Result<TransportLink, TransportError> {
        info!("Opening serial port {} at {} baud", path, options.baud_rate);

        let port = tokio_serial::new(path, options.baud_rate)
            .data_bits(data_bits(options.data_bits))
            .parity(parity(options.parity))
            .stop_bits(stop_bits(options.stop_bits))
            .flow_control(flow_control(options.flow_control))
            .timeout(Duration::from_millis(options.timeout_ms))
            .open_native_async()
            .map_err(|e| TransportError::Open(format!("{}: {}", path, e)))?;

        let (link, outbound, inbound) = TransportLink::channel();
        tokio::spawn(run_serial_link(path.to_string(), port, outbound, inbound));
        Ok(link)
    }
}

/// Pump bytes between the serial port and the link channels
async fn run_serial_link(
    path: String,
    mut port: SerialStream,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    inbound: mpsc::Sender<LinkEvent>,
) {
    let mut buf = [0u8; READ_BUFFER_BYTES];

    loop {
        tokio::select! {
            request = outbound.recv() => match request {
                Some(bytes) => {
                    if let Err(e) = write_frame(&mut port, &bytes).await {
                        warn!("Write to {} failed: {}", path, e);
                        if inbound.send(LinkEvent::Error(e)).await.is_err() {
                            break;
                        }
                    }
                }
                None => {
                    debug!("All senders for {} dropped, closing port", path);
                    break;
                }
            },
            read = port.read(&mut buf) => match read {
                Ok(0) => {
                    let _ = inbound.send(LinkEvent::Error(TransportError::Closed)).await;
                    break;
                }
                Ok(n) => {
                    if inbound.send(LinkEvent::Data(buf[..n].to_vec())).await.is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(e) => {
                    let _ = inbound.send(LinkEvent::Error(e.into())).await;
                    break;
                }
            },
        }
    }

    info!("Serial link {} closed", path);
}

async fn write_frame(port: &mut SerialStream, bytes: &[u8]) -> Result<(), TransportError> {
    port.write_all(bytes).await?;
    port.flush().await?;
    Ok(())
}

fn data_bits(bits: u8) -> tokio_serial::DataBits {
    match bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        _ => tokio_serial::DataBits::Eight,
    }
}

fn parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Odd => tokio_serial::Parity::Odd,
        Parity::Even => tokio_serial::Parity::Even,
    }
}

fn stop_bits(bits: u8) -> tokio_serial::StopBits {
    match bits {
        2 => tokio_serial::StopBits::Two,
        _ => tokio_serial::StopBits::One,
    }
}

fn flow_control(flow: FlowControl) -> tokio_serial::FlowControl {
    match flow {
        FlowControl::None => tokio_serial::FlowControl::None,
        FlowControl::Software => tokio_serial::FlowControl::Software,
        FlowControl::Hardware => tokio_serial::FlowControl::Hardware,
    }
}
