//! ELM327 Protocol Selection

use serde::{Deserialize, Serialize};

/// Vehicle bus protocol the adapter is told to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObdProtocol {
    /// Let the adapter search for the protocol
    #[default]
    Auto,
    /// SAE J1850 PWM (41.6 kbaud)
    J1850Pwm,
    /// SAE J1850 VPW (10.4 kbaud)
    J1850Vpw,
    /// ISO 9141-2 (5 baud init)
    Iso9141,
    /// ISO 14230-4 KWP, slow init
    Kwp,
    /// ISO 14230-4 KWP, fast init
    KwpFast,
    /// ISO 15765-4 CAN, 11 bit ID, 500 kbaud
    Can11bit500,
    /// ISO 15765-4 CAN, 29 bit ID, 500 kbaud
    Can29bit500,
    /// ISO 15765-4 CAN, 11 bit ID, 250 kbaud
    Can11bit250,
    /// ISO 15765-4 CAN, 29 bit ID, 250 kbaud
    Can29bit250,
}

impl ObdProtocol {
    /// The `ATSP` command selecting this protocol
    pub fn to_elm_command(&self) -> &'static str {
        match self {
            ObdProtocol::Auto => "ATSP0",
            ObdProtocol::J1850Pwm => "ATSP1",
            ObdProtocol::J1850Vpw => "ATSP2",
            ObdProtocol::Iso9141 => "ATSP3",
            ObdProtocol::Kwp => "ATSP4",
            ObdProtocol::KwpFast => "ATSP5",
            ObdProtocol::Can11bit500 => "ATSP6",
            ObdProtocol::Can29bit500 => "ATSP7",
            ObdProtocol::Can11bit250 => "ATSP8",
            ObdProtocol::Can29bit250 => "ATSP9",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elm_commands() {
        assert_eq!(ObdProtocol::Auto.to_elm_command(), "ATSP0");
        assert_eq!(ObdProtocol::Can11bit500.to_elm_command(), "ATSP6");
        assert_eq!(ObdProtocol::Can29bit250.to_elm_command(), "ATSP9");
    }
}
