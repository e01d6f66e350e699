use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One decoded telemetry frame from the wind station.
///
/// `mph`, `gust` and `temp` are required. Anything else the firmware adds is
/// kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryMessage {
    /// Current wind speed
    pub mph: f64,
    /// Highest gust since the last reset
    pub gust: f64,
    /// Temperature; some firmware revisions send a pre-formatted string ("70F")
    pub temp: Temperature,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Temperature {
    Number(f64),
    Text(String),
}

impl fmt::Display for Temperature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{}", value),
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// Opaque command token written verbatim to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutboundCommand(Vec<u8>);

impl OutboundCommand {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for OutboundCommand {
    fn from(token: &str) -> Self {
        Self::new(token.as_bytes())
    }
}

/// Link status as seen by collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    /// An established session dropped
    Lost,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "Disconnected",
            Self::Connected => "Connected",
            Self::Lost => "Connection lost",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid Bluetooth address {0:?}, expected XX:XX:XX:XX:XX:XX")]
pub struct AddressError(String);

/// Bluetooth device address, most significant byte first as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BdAddr([u8; 6]);

impl BdAddr {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for BdAddr {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AddressError(s.to_string());
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');

        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            // from_str_radix alone would take "+F"
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }

        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(octets))
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}

/// Everything the link publishes to collaborators, in delivery order.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    Telemetry(TelemetryMessage),
    ConnectionStatus(ConnectionStatus),
}
