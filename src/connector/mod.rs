//! Device links
//!
//! One [`Connector`] trait with a concrete struct per link type.

mod line;
mod rfcomm;
mod serial;
mod simulated;
mod traits;

pub use rfcomm::{RfcommConfig, RfcommConnector, DEFAULT_RFCOMM_CHANNEL};
pub use serial::{SerialConnector, DEFAULT_BAUD_RATE};
pub use simulated::SimulatedConnector;
pub use traits::{Connector, ConnectorError};

use crate::config::{AppConfig, ConnectionKind};
use rfcomm::DEFAULT_CONNECT_TIMEOUT;

/// Build the connector named by `connection_type`
pub fn build_connector(config: &AppConfig) -> Result<Box<dyn Connector>, ConnectorError> {
    let read_timeout = config.read_timeout();

    let connector: Box<dyn Connector> = match config.connection_type {
        ConnectionKind::Serial => Box::new(SerialConnector::new(
            config.connection_list.clone(),
            config.baud_rate,
            read_timeout,
        )),
        ConnectionKind::Bluetooth => {
            let addresses = config
                .bluetooth_addresses()
                .map_err(|e| ConnectorError::Connect {
                    target: "bluetooth".into(),
                    reason: e.to_string(),
                })?;
            Box::new(RfcommConnector::new(RfcommConfig {
                addresses,
                channel: config.bluetooth_channel,
                connect_timeout: DEFAULT_CONNECT_TIMEOUT,
                read_timeout,
            }))
        }
        ConnectionKind::Simulated => Box::new(SimulatedConnector::new(read_timeout)),
    };

    Ok(connector)
}
