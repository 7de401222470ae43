//! OBD-II Link
//!
//! Brings an ELM327 adapter up over a brokered serial line and polls it
//! with raw requests.

mod adapter;
mod poller;
mod protocol;
mod settings;

pub use adapter::{send_request, simulated_reply, AdapterError, Elm327Init};
pub use poller::{RawPoller, RawReply};
pub use protocol::ObdProtocol;
pub use settings::{
    AdapterSettings, DeviceSettings, PollSettings, Settings, SettingsError, DEFAULT_SETTINGS_FILE,
};

use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Install the global subscriber at `level`, falling back to INFO for
/// unknown level names
pub fn init_logging(level: &str) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let max_level = Level::from_str(level).unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(max_level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
}
