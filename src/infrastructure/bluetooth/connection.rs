//! Connection Attempt
//!
//! Owns one transport session from connect to close: reads bytes through the
//! [`Framer`], publishes telemetry and status, and writes queued commands.

use crate::domain::models::{AppEvent, ConnectionStatus};
use crate::domain::settings::LinkSettings;
use crate::infrastructure::bluetooth::protocol::{Framer, DEFAULT_MAX_FRAME_LEN};
use crate::infrastructure::bluetooth::queue::CommandQueue;
use crate::infrastructure::bluetooth::transport::{Connector, Transport, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Bytes requested per read
const READ_CHUNK: usize = 64;

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Give up on a connect after this long
    pub connect_timeout: Duration,
    /// Upper bound on a single read; also bounds how long a queued command waits
    pub read_timeout: Duration,
    pub max_frame_len: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_millis(100),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl From<&LinkSettings> for ConnectionConfig {
    fn from(settings: &LinkSettings) -> Self {
        Self {
            connect_timeout: settings.connect_timeout(),
            read_timeout: settings.read_timeout(),
            max_frame_len: settings.max_frame_len,
        }
    }
}

/// Why an attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The transport never opened
    ConnectFailed,
    /// An open session failed
    Lost,
    /// Cancellation was requested from outside
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    Connecting,
    Connected,
    Closed(CloseReason),
}

/// A single connection attempt.
///
/// `cancel` belongs to this attempt alone. The watcher cancels it to stop the
/// attempt; the attempt cancels it itself after a fatal transport error.
pub struct Connection<C: Connector> {
    connector: Arc<C>,
    config: ConnectionConfig,
    commands: CommandQueue,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    cancel: CancellationToken,
    framer: Framer,
    status: AttemptStatus,
    lost: bool,
}

impl<C: Connector> Connection<C> {
    pub fn new(
        connector: Arc<C>,
        config: ConnectionConfig,
        commands: CommandQueue,
        event_sender: mpsc::UnboundedSender<AppEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let framer = Framer::new(config.max_frame_len);
        Self {
            connector,
            config,
            commands,
            event_sender,
            cancel,
            framer,
            status: AttemptStatus::Connecting,
            lost: false,
        }
    }

    pub fn status(&self) -> AttemptStatus {
        self.status
    }

    /// Run the attempt to completion.
    pub async fn run(&mut self) -> CloseReason {
        // Step 1: Open the transport
        let mut transport = match self.open().await {
            Ok(transport) => transport,
            Err(reason) => return self.finish(reason),
        };

        // Step 2: Announce the session
        self.status = AttemptStatus::Connected;
        self.send_status(ConnectionStatus::Connected);

        // Step 3: Pump bytes and commands until cancelled
        let reason = self.pump(&mut transport).await;

        transport.close().await;
        self.finish(reason)
    }

    async fn open(&self) -> Result<C::Transport, CloseReason> {
        let peer = self.connector.peer();
        info!("Attempting connection with {}", peer);

        let attempt = tokio::time::timeout(self.config.connect_timeout, self.connector.connect());
        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                info!("Stop requested while connecting to {}", peer);
                return Err(CloseReason::Stopped);
            }
            result = attempt => result,
        };

        match result {
            Ok(Ok(transport)) => {
                info!("Successfully connected with {}", peer);
                Ok(transport)
            }
            Ok(Err(e)) => {
                warn!("Failed to establish connection with {}: {}", peer, e);
                Err(CloseReason::ConnectFailed)
            }
            Err(_) => {
                warn!(
                    "Connection with {} timed out after {:?}",
                    peer, self.config.connect_timeout
                );
                Err(CloseReason::ConnectFailed)
            }
        }
    }

    async fn pump(&mut self, transport: &mut C::Transport) -> CloseReason {
        let mut buf = [0u8; READ_CHUNK];

        loop {
            if let Some(reason) = self.cancelled() {
                return reason;
            }

            let read = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                result = tokio::time::timeout(self.config.read_timeout, transport.read(&mut buf)) => Some(result),
            };

            match read {
                // Stop requested mid-read; handled below
                None => {}
                Some(Err(_elapsed)) => {}
                Some(Ok(Ok(n))) => self.handle_bytes(&buf[..n]),
                Some(Ok(Err(e))) if e.is_transient() => trace!("No data: {}", e),
                Some(Ok(Err(e))) => self.connection_lost(&e),
            }

            if let Some(reason) = self.cancelled() {
                return reason;
            }

            if let Some(command) = self.commands.try_dequeue() {
                debug!(
                    "Sending command {}",
                    String::from_utf8_lossy(command.as_bytes())
                );
                let written = tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => Ok(()),
                    result = transport.write_all(command.as_bytes()) => result,
                };
                if let Err(e) = written {
                    self.connection_lost(&e);
                }
            }
        }
    }

    fn cancelled(&self) -> Option<CloseReason> {
        if !self.cancel.is_cancelled() {
            return None;
        }
        Some(if self.lost {
            CloseReason::Lost
        } else {
            CloseReason::Stopped
        })
    }

    fn handle_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            match self.framer.feed(byte) {
                Ok(Some(message)) => {
                    debug!(
                        "Telemetry: mph={} gust={} temp={}",
                        message.mph, message.gust, message.temp
                    );
                    let _ = self.event_sender.send(AppEvent::Telemetry(message));
                }
                Ok(None) => {}
                Err(e) => warn!("Dropped frame: {}", e),
            }
        }
    }

    fn connection_lost(&mut self, error: &TransportError) {
        warn!("The connection was lost: {}", error);
        self.lost = true;
        self.send_status(ConnectionStatus::Lost);
        self.cancel.cancel();
    }

    fn finish(&mut self, reason: CloseReason) -> CloseReason {
        self.status = AttemptStatus::Closed(reason);
        match reason {
            // Already announced when the failure was detected
            CloseReason::Lost => {}
            CloseReason::ConnectFailed | CloseReason::Stopped => {
                self.send_status(ConnectionStatus::Disconnected)
            }
        }
        debug!("Connection attempt closed: {:?}", reason);
        reason
    }

    fn send_status(&self, status: ConnectionStatus) {
        let _ = self.event_sender.send(AppEvent::ConnectionStatus(status));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::models::Temperature;
    use crate::infrastructure::bluetooth::queue::command_channel;
    use crate::infrastructure::bluetooth::transport::IoTransport;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    /// Hands out pre-arranged sessions; the test keeps the far ends.
    #[derive(Default)]
    pub(crate) struct ScriptedConnector {
        sessions: Mutex<VecDeque<Option<DuplexStream>>>,
        connects: Mutex<usize>,
    }

    impl ScriptedConnector {
        /// Queue a session that connects; returns the station's end.
        pub(crate) fn accept(&self) -> DuplexStream {
            let (local, remote) = tokio::io::duplex(1024);
            self.sessions.lock().unwrap().push_back(Some(local));
            remote
        }

        /// Queue a session that fails to connect.
        pub(crate) fn refuse(&self) {
            self.sessions.lock().unwrap().push_back(None);
        }

        pub(crate) fn connect_count(&self) -> usize {
            *self.connects.lock().unwrap()
        }
    }

    impl Connector for ScriptedConnector {
        type Transport = IoTransport<DuplexStream>;

        async fn connect(&self) -> Result<Self::Transport, TransportError> {
            *self.connects.lock().unwrap() += 1;
            let next = self.sessions.lock().unwrap().pop_front();
            match next {
                Some(Some(stream)) => Ok(IoTransport::new(stream)),
                _ => Err(TransportError::Connect {
                    peer: self.peer(),
                    source: io::Error::from(io::ErrorKind::ConnectionRefused),
                }),
            }
        }

        fn peer(&self) -> String {
            "scripted".to_string()
        }
    }

    pub(crate) fn fast_config() -> ConnectionConfig {
        ConnectionConfig {
            connect_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_millis(20),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<AppEvent>) -> Vec<AppEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_connect_failure_reports_disconnected() {
        let connector = Arc::new(ScriptedConnector::default());
        connector.refuse();
        let (_sender, queue) = command_channel();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut connection =
            Connection::new(connector, fast_config(), queue, tx, CancellationToken::new());
        assert_eq!(connection.status(), AttemptStatus::Connecting);

        let reason = connection.run().await;
        assert_eq!(reason, CloseReason::ConnectFailed);
        assert_eq!(
            connection.status(),
            AttemptStatus::Closed(CloseReason::ConnectFailed)
        );
        assert_eq!(
            drain(&mut rx),
            vec![AppEvent::ConnectionStatus(ConnectionStatus::Disconnected)]
        );
    }

    #[tokio::test]
    async fn test_byte_by_byte_frame_then_peer_loss() {
        let connector = Arc::new(ScriptedConnector::default());
        let mut station = connector.accept();
        let (_sender, queue) = command_channel();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let mut connection = Connection::new(connector, fast_config(), queue, tx, token.clone());
        let task = tokio::spawn(async move {
            let reason = connection.run().await;
            (reason, connection.status())
        });

        for &b in br#"{"mph":5,"gust":10,"temp":"70F"}"# {
            station.write_all(&[b]).await.unwrap();
            tokio::task::yield_now().await;
        }
        station.write_all(b"{bad json}").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(station);

        let (reason, status) = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, CloseReason::Lost);
        assert_eq!(status, AttemptStatus::Closed(CloseReason::Lost));
        assert!(token.is_cancelled());

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3, "{events:?}");
        assert_eq!(
            events[0],
            AppEvent::ConnectionStatus(ConnectionStatus::Connected)
        );
        match &events[1] {
            AppEvent::Telemetry(msg) => {
                assert_eq!(msg.mph, 5.0);
                assert_eq!(msg.gust, 10.0);
                assert_eq!(msg.temp, Temperature::Text("70F".into()));
            }
            other => panic!("expected telemetry, got {other:?}"),
        }
        assert_eq!(events[2], AppEvent::ConnectionStatus(ConnectionStatus::Lost));
    }

    #[tokio::test]
    async fn test_commands_written_in_order() {
        let connector = Arc::new(ScriptedConnector::default());
        let mut station = connector.accept();
        let (sender, queue) = command_channel();
        let (tx, _rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        sender.enqueue("A");
        sender.enqueue("B");
        sender.enqueue("C");

        let mut connection = Connection::new(connector, fast_config(), queue, tx, token.clone());
        let task = tokio::spawn(async move { connection.run().await });

        let mut wire = [0u8; 3];
        tokio::time::timeout(Duration::from_secs(2), station.read_exact(&mut wire))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&wire, b"ABC");

        token.cancel();
        assert_eq!(task.await.unwrap(), CloseReason::Stopped);
    }

    #[tokio::test]
    async fn test_stop_while_blocked_in_read() {
        let connector = Arc::new(ScriptedConnector::default());
        let mut station = connector.accept();
        let (_sender, queue) = command_channel();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let config = ConnectionConfig {
            read_timeout: Duration::from_secs(60),
            ..fast_config()
        };
        let mut connection = Connection::new(connector, config, queue, tx, token.clone());
        let task = tokio::spawn(async move { connection.run().await });

        // Let it connect and block on a read that will never complete.
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        token.cancel();

        let reason = tokio::time::timeout(Duration::from_millis(500), task)
            .await
            .expect("connection did not observe cancellation")
            .unwrap();
        assert_eq!(reason, CloseReason::Stopped);

        // Transport was shut down: the station sees EOF.
        let mut buf = [0u8; 1];
        assert_eq!(station.read(&mut buf).await.unwrap(), 0);

        assert_eq!(
            drain(&mut rx),
            vec![
                AppEvent::ConnectionStatus(ConnectionStatus::Connected),
                AppEvent::ConnectionStatus(ConnectionStatus::Disconnected),
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_while_connecting() {
        struct NeverConnects;
        impl Connector for NeverConnects {
            type Transport = IoTransport<DuplexStream>;
            async fn connect(&self) -> Result<Self::Transport, TransportError> {
                std::future::pending().await
            }
            fn peer(&self) -> String {
                "nowhere".to_string()
            }
        }

        let (_sender, queue) = command_channel();
        let (tx, _rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let mut connection =
            Connection::new(Arc::new(NeverConnects), fast_config(), queue, tx, token.clone());
        let task = tokio::spawn(async move { connection.run().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        let reason = tokio::time::timeout(Duration::from_millis(500), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, CloseReason::Stopped);
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        struct Slow;
        impl Connector for Slow {
            type Transport = IoTransport<DuplexStream>;
            async fn connect(&self) -> Result<Self::Transport, TransportError> {
                std::future::pending().await
            }
            fn peer(&self) -> String {
                "slow".to_string()
            }
        }

        let (_sender, queue) = command_channel();
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = ConnectionConfig {
            connect_timeout: Duration::from_millis(30),
            ..fast_config()
        };
        let mut connection =
            Connection::new(Arc::new(Slow), config, queue, tx, CancellationToken::new());
        assert_eq!(connection.run().await, CloseReason::ConnectFailed);
    }
}
