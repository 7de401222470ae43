//! ELM327 Adapter Bring-up
//!
//! Request/reply helpers over a brokered connection, and the init sequence
//! run as the broker's configure step.

use crate::protocol::ObdProtocol;
use crate::settings::AdapterSettings;
use obd_broker::{Connection, LinkEvent, TransportError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

/// Prompt the adapter prints when it is ready for the next command
const PROMPT: char = '>';

/// Errors talking to the adapter
#[derive(Debug, Error)]
pub enum AdapterError {
    /// No prompt within the command timeout
    #[error("Timeout waiting for adapter response after {0}ms")]
    Timeout(u64),

    /// Adapter answered with an error
    #[error("Adapter rejected {command}: {reply}")]
    Rejected { command: String, reply: String },

    /// Link failed while waiting
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Too many events arrived before we could read them
    #[error("Missed {0} link events")]
    Lagged(u64),
}

/// Send `command` and return the adapter's reply with echo and prompt removed
pub async fn send_request(
    conn: &Connection,
    command: &str,
    timeout: Duration,
) -> Result<String, AdapterError> {
    // Subscribe first so the reply cannot slip past
    let mut events = conn.subscribe();
    conn.write(format!("{}\r", command).as_bytes()).await?;

    let mut raw = String::new();
    let wait = async {
        loop {
            match events.recv().await {
                Ok(LinkEvent::Data(bytes)) => {
                    raw.push_str(&String::from_utf8_lossy(&bytes));
                    if let Some(end) = raw.find(PROMPT) {
                        raw.truncate(end);
                        return Ok(());
                    }
                }
                Ok(LinkEvent::Error(e)) => return Err(AdapterError::Transport(e)),
                Err(RecvError::Lagged(missed)) => return Err(AdapterError::Lagged(missed)),
                Err(RecvError::Closed) => return Err(AdapterError::Transport(TransportError::Closed)),
            }
        }
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok(result) => result?,
        Err(_) => return Err(AdapterError::Timeout(timeout.as_millis() as u64)),
    }

    let reply = clean_reply(command, &raw);
    debug!("{} -> {:?}", command, reply);

    if reply.contains('?') || reply.contains("ERROR") {
        return Err(AdapterError::Rejected {
            command: command.to_string(),
            reply,
        });
    }
    Ok(reply)
}

/// Strip the echoed command and blank lines
fn clean_reply(command: &str, raw: &str) -> String {
    raw.split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty() && *line != command)
        .collect::<Vec<_>>()
        .join("\n")
}

/// ELM327 init sequence
#[derive(Debug, Clone)]
pub struct Elm327Init {
    protocol: ObdProtocol,
    command_timeout: Duration,
    reset: bool,
}

impl Elm327Init {
    /// Init sequence selecting `protocol`, with reset and default timeout
    pub fn new(protocol: ObdProtocol) -> Self {
        Self {
            protocol,
            command_timeout: Duration::from_millis(crate::settings::DEFAULT_COMMAND_TIMEOUT_MS),
            reset: true,
        }
    }

    /// Init sequence as described by the adapter settings
    pub fn from_settings(settings: &AdapterSettings) -> Self {
        Self {
            protocol: settings.protocol,
            command_timeout: Duration::from_millis(settings.command_timeout_ms),
            reset: settings.reset_on_connect,
        }
    }

    /// Commands sent, in order
    pub fn commands(&self) -> Vec<&'static str> {
        let mut commands = Vec::with_capacity(5);
        if self.reset {
            commands.push("ATZ");
        }
        // Echo, linefeeds and spaces off
        commands.extend(["ATE0", "ATL0", "ATS0"]);
        commands.push(self.protocol.to_elm_command());
        commands
    }

    /// Bring the adapter up; used as the broker's configure step
    pub async fn run(self, conn: Connection) -> Result<(), AdapterError> {
        info!("Initializing ELM327 adapter on {}", conn.path());

        for command in self.commands() {
            let reply = send_request(&conn, command, self.command_timeout).await?;
            if command == "ATZ" {
                info!("Adapter identified as {:?}", reply);
            }
        }

        info!("Adapter ready, protocol {:?}", self.protocol);
        Ok(())
    }
}

/// Replies of a healthy ELM327 on a running engine, for hardware-free runs
pub fn simulated_reply(request: &[u8]) -> Option<Vec<u8>> {
    let request = String::from_utf8_lossy(request);
    let command = request.trim().to_ascii_uppercase();

    let reply = match command.as_str() {
        "ATZ" => "\r\rELM327 v1.5",
        "ATE0" | "ATL0" | "ATS0" | "ATH0" | "ATH1" => "OK",
        c if c.starts_with("ATSP") => "OK",
        "0100" => "41 00 BE 3E B8 11",
        "0105" => "41 05 73",
        "010C" => "41 0C 1A F8",
        "010D" => "41 0D 32",
        "0111" => "41 11 40",
        "" => return None,
        _ => "?",
    };
    Some(format!("{}\r\r{}", reply, PROMPT).into_bytes())
}
