//! Connection Watcher
//!
//! Keeps exactly one connection attempt alive until stopped. Each attempt gets
//! a fresh child of the watcher's stop token, so stopping the watcher also
//! stops the running attempt, while an attempt cancelling itself after a fatal
//! error leaves the watcher untouched.

use crate::domain::models::AppEvent;
use crate::domain::settings::LinkSettings;
use crate::infrastructure::bluetooth::connection::{CloseReason, Connection, ConnectionConfig};
use crate::infrastructure::bluetooth::queue::CommandQueue;
use crate::infrastructure::bluetooth::transport::Connector;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Running,
    /// Stop requested; waiting for the active attempt to close
    Stopping,
    Stopped,
}

/// Exponential reconnect delay with additive jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    jitter: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, jitter: Duration) -> Self {
        Self {
            initial,
            max,
            jitter,
            current: initial,
        }
    }

    pub fn from_settings(settings: &LinkSettings) -> Self {
        Self::new(
            Duration::from_millis(settings.backoff_initial_ms),
            Duration::from_millis(settings.backoff_max_ms),
            Duration::from_millis(settings.backoff_jitter_ms),
        )
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Delay before the next attempt; the base doubles each call up to `max`.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        base + self.sample_jitter()
    }

    fn sample_jitter(&self) -> Duration {
        let max_ms = self.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }
}

/// Supervisor for connection attempts.
pub struct Watcher<C: Connector> {
    connector: Arc<C>,
    config: ConnectionConfig,
    backoff: Backoff,
    commands: CommandQueue,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    stop: CancellationToken,
    state: Arc<watch::Sender<WatcherState>>,
}

impl<C: Connector> Watcher<C> {
    pub fn new(
        connector: Arc<C>,
        config: ConnectionConfig,
        backoff: Backoff,
        commands: CommandQueue,
        event_sender: mpsc::UnboundedSender<AppEvent>,
        stop: CancellationToken,
        state: Arc<watch::Sender<WatcherState>>,
    ) -> Self {
        Self {
            connector,
            config,
            backoff,
            commands,
            event_sender,
            stop,
            state,
        }
    }

    /// Run attempts back to back until the stop token fires.
    pub async fn supervise(mut self) {
        info!("Watcher started for {}", self.connector.peer());
        let mut attempts: u64 = 0;

        while !self.stop.is_cancelled() {
            attempts += 1;
            debug!("Starting connection attempt {}", attempts);

            let reason = self.run_attempt().await;
            if self.stop.is_cancelled() {
                break;
            }

            if reason != CloseReason::ConnectFailed {
                self.backoff.reset();
            }
            let delay = self.backoff.next_delay();
            debug!("Attempt {} ended ({:?}); retrying in {:?}", attempts, reason, delay);

            tokio::select! {
                () = self.stop.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.state.send_replace(WatcherState::Stopped);
        info!("Watcher is exiting after {} attempts", attempts);
    }

    async fn run_attempt(&self) -> CloseReason {
        let mut connection = Connection::new(
            Arc::clone(&self.connector),
            self.config.clone(),
            self.commands.clone(),
            self.event_sender.clone(),
            self.stop.child_token(),
        );

        let handle = tokio::spawn(async move { connection.run().await });
        match handle.await {
            Ok(reason) => reason,
            Err(e) => {
                error!("Connection task failed: {}", e);
                CloseReason::Lost
            }
        }
    }
}
