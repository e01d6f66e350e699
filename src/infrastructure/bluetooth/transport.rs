//! Transport Abstraction
//!
//! A [`Connector`] opens one session to the fixed peer; the resulting
//! [`Transport`] is owned by a single connection attempt and dropped with it.

use std::fmt;
use std::future::Future;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {peer}: {source}")]
    Connect {
        peer: String,
        #[source]
        source: io::Error,
    },
    #[error("peer closed the connection")]
    Closed,
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// "No data right now". Everything else ends the session.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

/// One open session to the station.
pub trait Transport: Send {
    /// Read whatever is available into `buf`, waiting until at least one byte
    /// arrives. A closed peer is reported as [`TransportError::Closed`].
    fn read(&mut self, buf: &mut [u8]) -> impl Future<Output = Result<usize, TransportError>> + Send;

    fn write_all(&mut self, bytes: &[u8]) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Release the session. Errors are logged, not returned.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens sessions to one fixed peer.
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport + 'static;

    fn connect(&self) -> impl Future<Output = Result<Self::Transport, TransportError>> + Send;

    /// Human-readable peer, for logs
    fn peer(&self) -> String;
}

/// [`Transport`] over any tokio byte stream.
pub struct IoTransport<S> {
    stream: S,
}

impl<S> IoTransport<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

impl<S> fmt::Debug for IoTransport<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoTransport").finish_non_exhaustive()
    }
}

impl<S> Transport for IoTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.stream.read(buf).await? {
            0 => Err(TransportError::Closed),
            n => Ok(n),
        }
    }

    async fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("Shutdown error ignored: {}", e);
        }
    }
}

/// Connects through a serial-over-TCP bridge.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl Connector for TcpConnector {
    type Transport = IoTransport<TcpStream>;

    async fn connect(&self) -> Result<Self::Transport, TransportError> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|source| TransportError::Connect {
                peer: self.peer(),
                source,
            })?;
        stream.set_nodelay(true)?;
        Ok(IoTransport::new(stream))
    }

    fn peer(&self) -> String {
        format!("tcp://{}", self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_error_classification() {
        let would_block = TransportError::from(io::Error::from(io::ErrorKind::WouldBlock));
        let timed_out = TransportError::from(io::Error::from(io::ErrorKind::TimedOut));
        let reset = TransportError::from(io::Error::from(io::ErrorKind::ConnectionReset));

        assert!(would_block.is_transient());
        assert!(timed_out.is_transient());
        assert!(!reset.is_transient());
        assert!(!TransportError::Closed.is_transient());
    }

    #[tokio::test]
    async fn test_io_transport_reports_eof_as_closed() {
        let (local, remote) = tokio::io::duplex(64);
        let mut transport = IoTransport::new(local);
        drop(remote);

        let mut buf = [0u8; 8];
        let err = transport.read(&mut buf).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[tokio::test]
    async fn test_tcp_connector_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"{}").await.unwrap();
            let mut cmd = [0u8; 3];
            socket.read_exact(&mut cmd).await.unwrap();
            cmd
        });

        let connector = TcpConnector::new(address.clone());
        assert_eq!(connector.peer(), format!("tcp://{}", address));

        let mut transport = connector.connect().await.unwrap();
        let mut buf = [0u8; 2];
        let mut got = 0;
        while got < 2 {
            got += transport.read(&mut buf[got..]).await.unwrap();
        }
        assert_eq!(&buf, b"{}");

        transport.write_all(b"@R@").await.unwrap();
        assert_eq!(&server.await.unwrap(), b"@R@");
        transport.close().await;
    }

    #[tokio::test]
    async fn test_tcp_connect_failure() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let err = TcpConnector::new(address).connect().await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
