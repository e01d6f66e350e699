//! RFCOMM Transport
//!
//! Classic Bluetooth serial link through BlueZ. The device must already be
//! paired.
//!
//! Note: BlueZ's default `pnat` plugin can force a re-pair on every connect.
//! Adding `DisablePlugins = pnat` to `/etc/bluetooth/main.conf` avoids that.

#[cfg(target_os = "linux")]
pub use linux::RfcommConnector;

#[cfg(target_os = "linux")]
mod linux {
    use crate::domain::models::BdAddr;
    use crate::infrastructure::bluetooth::transport::{
        Connector, IoTransport, TransportError,
    };
    use bluer::rfcomm::{SocketAddr, Stream};
    use bluer::Address;
    use tracing::debug;

    /// Connects to one RFCOMM channel on one device.
    #[derive(Debug, Clone)]
    pub struct RfcommConnector {
        address: BdAddr,
        channel: u8,
    }

    impl RfcommConnector {
        pub fn new(address: BdAddr, channel: u8) -> Self {
            Self { address, channel }
        }

        fn socket_addr(&self) -> SocketAddr {
            SocketAddr::new(Address::new(self.address.octets()), self.channel)
        }
    }

    impl Connector for RfcommConnector {
        type Transport = IoTransport<Stream>;

        async fn connect(&self) -> Result<Self::Transport, TransportError> {
            debug!(
                "Opening RFCOMM socket to {} channel {}",
                self.address, self.channel
            );
            let stream = Stream::connect(self.socket_addr())
                .await
                .map_err(|source| TransportError::Connect {
                    peer: self.peer(),
                    source,
                })?;
            Ok(IoTransport::new(stream))
        }

        fn peer(&self) -> String {
            format!("rfcomm://{}/{}", self.address, self.channel)
        }
    }

}
