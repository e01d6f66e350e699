//! Bluetooth Module
//!
//! Serial-style link to the wind station over RFCOMM (or a TCP bridge).
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      LinkService                         │
//! │  (public API: events out, commands in, request_stop)     │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │ spawns
//!                       ▼
//!               ┌───────────────┐   fresh child token per attempt
//!               │    Watcher    │──────────────┐
//!               └───────┬───────┘              │
//!                       │ spawns, awaits       │
//!                       ▼                      ▼
//!               ┌───────────────┐      ┌──────────────┐
//!               │  Connection   │◄─────│ CommandQueue │
//!               │ - Transport   │      └──────────────┘
//!               │ - Framer      │
//!               └───────┬───────┘
//!                       │ AppEvent (telemetry, status)
//!                       ▼
//!                  collaborators
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Frame delimiters, device commands, the [`protocol::Framer`]
//! - [`transport`] - Transport/connector traits, TCP bridge connector
//! - [`rfcomm`] - Bluetooth addresses and the BlueZ RFCOMM connector
//! - [`queue`] - Outbound command queue
//! - [`connection`] - One connection attempt
//! - [`watcher`] - Reconnect supervision and backoff
//! - [`service`] - Main service coordinator

pub mod connection;
pub mod protocol;
pub mod queue;
pub mod rfcomm;
pub mod service;
pub mod transport;
pub mod watcher;

// Re-export main service for convenience
pub use service::LinkService;
