//! RFCOMM transport implementation for Bluetooth serial boards

use crate::connector::line::LineChannel;
use crate::connector::traits::{Connector, ConnectorError, DeviceStream};
use async_trait::async_trait;
use bluer::rfcomm::{SocketAddr as RfcommAddr, Stream as RfcommStream};
use bluer::Address;
use std::io;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

/// Default RFCOMM channel of HC-05 style serial modules
pub const DEFAULT_RFCOMM_CHANNEL: u8 = 1;

/// Upper bound on a single RFCOMM connect attempt
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
impl DeviceStream for RfcommStream {
    fn probe(&self) -> io::Result<()> {
        // Fails with ENOTCONN once the remote end has gone away
        self.peer_addr().map(|_| ())
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        tokio::io::AsyncWriteExt::shutdown(self).await
    }
}

/// Configuration for RFCOMM connector
#[derive(Debug, Clone)]
pub struct RfcommConfig {
    /// Device addresses, tried in order
    pub addresses: Vec<Address>,
    /// RFCOMM channel number
    pub channel: u8,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for RfcommConfig {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            channel: DEFAULT_RFCOMM_CHANNEL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: Duration::from_secs(1),
        }
    }
}

/// RFCOMM connector for Bluetooth sensor boards
pub struct RfcommConnector {
    config: RfcommConfig,
    channel: LineChannel<RfcommStream>,
    peer: Option<Address>,
}

impl RfcommConnector {
    /// Create a new RFCOMM connector
    pub fn new(config: RfcommConfig) -> Self {
        let channel = LineChannel::new(config.read_timeout);
        Self {
            config,
            channel,
            peer: None,
        }
    }

    /// Create connector for a single known address
    pub fn with_address(address: Address, channel: u8) -> Self {
        Self::new(RfcommConfig {
            addresses: vec![address],
            channel,
            ..Default::default()
        })
    }

    /// Address of the connected board
    pub fn peer(&self) -> Option<Address> {
        self.peer
    }

    /// Make sure the default adapter is up before dialing
    async fn power_adapter() -> Result<(), ConnectorError> {
        let adapter_error = |e: bluer::Error| ConnectorError::Connect {
            target: "bluetooth adapter".into(),
            reason: e.to_string(),
        };

        let session = bluer::Session::new().await.map_err(adapter_error)?;
        let adapter = session.default_adapter().await.map_err(adapter_error)?;
        adapter.set_powered(true).await.map_err(adapter_error)?;
        Ok(())
    }
}

#[async_trait]
impl Connector for RfcommConnector {
    async fn connect(&mut self) -> Result<(), ConnectorError> {
        self.close_connection().await;

        if self.config.addresses.is_empty() {
            return Err(ConnectorError::NoDevice(Vec::new()));
        }

        Self::power_adapter().await?;

        let mut last_error = None;
        for &address in &self.config.addresses {
            let socket_addr = RfcommAddr::new(address, self.config.channel);
            info!(%address, channel = self.config.channel, "Connecting over RFCOMM");

            let reason = match timeout(self.config.connect_timeout, RfcommStream::connect(socket_addr)).await {
                Ok(Ok(stream)) => {
                    info!(%address, "RFCOMM connected");
                    self.channel.attach(stream);
                    self.peer = Some(address);
                    return Ok(());
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("timed out after {:?}", self.config.connect_timeout),
            };

            warn!(%address, %reason, "RFCOMM connect failed");
            last_error = Some(ConnectorError::Connect {
                target: address.to_string(),
                reason,
            });
        }

        Err(last_error.unwrap_or(ConnectorError::NotConnected))
    }

    async fn is_connected(&mut self) -> bool {
        self.channel.probe().await
    }

    async fn retrieve_data(&mut self) -> Result<String, ConnectorError> {
        self.channel.read_line().await
    }

    async fn write_data(&mut self, message: &str) -> Result<(), ConnectorError> {
        self.channel.write_line(message).await
    }

    async fn close_connection(&mut self) {
        self.channel.close().await;
        self.peer = None;
    }

    fn name(&self) -> &'static str {
        "Bluetooth"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RfcommConfig::default();
        assert!(config.addresses.is_empty());
        assert_eq!(config.channel, DEFAULT_RFCOMM_CHANNEL);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_connector_with_address() {
        let addr = Address::new([0x98, 0xD3, 0x31, 0xFC, 0x20, 0x34]);
        let connector = RfcommConnector::with_address(addr, 5);
        assert_eq!(connector.config.addresses, vec![addr]);
        assert_eq!(connector.config.channel, 5);
        assert!(connector.peer().is_none());
        assert_eq!(connector.name(), "Bluetooth");
    }

    #[tokio::test]
    async fn test_connect_without_addresses_fails_fast() {
        let mut connector = RfcommConnector::new(RfcommConfig::default());
        assert!(matches!(
            connector.connect().await,
            Err(ConnectorError::NoDevice(_))
        ));
        assert!(!connector.is_connected().await);
    }
}
