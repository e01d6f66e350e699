//! Link Service Module
//!
//! Public entry point: wires the channels, spawns the watcher, and gives
//! collaborators the command sender, the event stream and the stop switch.

use crate::domain::models::{AppEvent, OutboundCommand};
use crate::domain::settings::LinkSettings;
use crate::infrastructure::bluetooth::{
    connection::ConnectionConfig,
    queue::{command_channel, CommandSender},
    transport::Connector,
    watcher::{Backoff, Watcher, WatcherState},
};
use anyhow::Context;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Running link to the wind station.
pub struct LinkService {
    commands: CommandSender,
    stop: CancellationToken,
    state: Arc<watch::Sender<WatcherState>>,
    watcher: Option<JoinHandle<()>>,
}

impl LinkService {
    /// Spawn the watcher on the current tokio runtime.
    ///
    /// Returns the service and the receiver for telemetry and status events.
    pub fn start<C: Connector>(
        connector: C,
        settings: &LinkSettings,
    ) -> (Self, mpsc::UnboundedReceiver<AppEvent>) {
        Self::start_with(
            connector,
            ConnectionConfig::from(settings),
            Backoff::from_settings(settings),
        )
    }

    pub fn start_with<C: Connector>(
        connector: C,
        config: ConnectionConfig,
        backoff: Backoff,
    ) -> (Self, mpsc::UnboundedReceiver<AppEvent>) {
        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        let (commands, queue) = command_channel();
        let stop = CancellationToken::new();
        let state = Arc::new(watch::Sender::new(WatcherState::Running));

        let watcher = Watcher::new(
            Arc::new(connector),
            config,
            backoff,
            queue,
            event_sender,
            stop.clone(),
            Arc::clone(&state),
        );
        let handle = tokio::spawn(watcher.supervise());

        let service = Self {
            commands,
            stop,
            state,
            watcher: Some(handle),
        };
        (service, event_receiver)
    }

    /// Clonable handle for UI event handlers
    pub fn command_sender(&self) -> CommandSender {
        self.commands.clone()
    }

    pub fn enqueue_command(&self, command: impl Into<OutboundCommand>) -> bool {
        self.commands.enqueue(command)
    }

    /// Ask the watcher and any active connection to stop. Safe to call repeatedly.
    pub fn request_stop(&self) {
        let changed = self.state.send_if_modified(|state| {
            if *state == WatcherState::Running {
                *state = WatcherState::Stopping;
                true
            } else {
                false
            }
        });
        if changed {
            info!("User initiated shutdown, sending stop signal");
        }
        self.stop.cancel();
    }

    pub fn state(&self) -> WatcherState {
        *self.state.borrow()
    }

    /// Stop and wait for the watcher to finish.
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        self.request_stop();
        if let Some(handle) = self.watcher.take() {
            handle.await.context("watcher task panicked")?;
        }
        Ok(())
    }
}

impl Drop for LinkService {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
