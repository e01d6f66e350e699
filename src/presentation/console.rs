//! Console rendering of the wind display.
//!
//! Turns [`AppEvent`]s into the text a user sees and maps typed keys to
//! device commands.

use crate::domain::models::{AppEvent, ConnectionStatus, TelemetryMessage};
use crate::infrastructure::bluetooth::protocol::DeviceCommand;

const NO_SPEED: &str = "-- mph";
const NO_GUST: &str = "Highest Gust: -- mph";
const NO_TEMP: &str = "Temperature: ---";

/// What the user asked for on stdin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleInput {
    Command(DeviceCommand),
    Quit,
}

impl ConsoleInput {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "l" | "lights" => Some(Self::Command(DeviceCommand::ToggleLights)),
            "r" | "reset" => Some(Self::Command(DeviceCommand::ResetGust)),
            "q" | "quit" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Latest readings plus link status.
#[derive(Debug, Clone)]
pub struct WindDisplay {
    pub speed: String,
    pub gust: String,
    pub temperature: String,
    pub status: ConnectionStatus,
}

impl Default for WindDisplay {
    fn default() -> Self {
        Self {
            speed: NO_SPEED.to_string(),
            gust: NO_GUST.to_string(),
            temperature: NO_TEMP.to_string(),
            status: ConnectionStatus::Disconnected,
        }
    }
}

impl WindDisplay {
    /// Apply one event. Returns `true` if anything visible changed.
    pub fn handle_event(&mut self, event: &AppEvent) -> bool {
        match event {
            AppEvent::Telemetry(message) => {
                self.show_reading(message);
                true
            }
            AppEvent::ConnectionStatus(status) => {
                let changed = self.status != *status;
                self.status = *status;
                if *status != ConnectionStatus::Connected {
                    self.clear_readings();
                }
                changed
            }
        }
    }

    fn show_reading(&mut self, message: &TelemetryMessage) {
        self.speed = format!("{} mph", message.mph);
        self.gust = format!("Highest Gust: {} mph", message.gust);
        self.temperature = format!("Temperature: {}", message.temp);
    }

    fn clear_readings(&mut self) {
        self.speed = NO_SPEED.to_string();
        self.gust = NO_GUST.to_string();
        self.temperature = NO_TEMP.to_string();
    }

    pub fn status_line(&self) -> String {
        format!("BT: {}", self.status)
    }

    /// Single line for the terminal
    pub fn render(&self) -> String {
        format!(
            "{} | {} | {} | {}",
            self.speed,
            self.gust,
            self.temperature,
            self.status_line()
        )
    }
}
