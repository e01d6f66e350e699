//! Bluetooth wind receiver.
//!
//! Keeps an RFCOMM link to a wind station alive, decodes its JSON telemetry
//! frames and sends it short command tokens. Presentation is left to
//! collaborators, which consume [`domain::models::AppEvent`]s and push
//! commands through [`infrastructure::bluetooth::LinkService`].

pub mod domain;
pub mod infrastructure;
pub mod presentation;
