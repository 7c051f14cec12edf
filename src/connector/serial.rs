//! Serial transport using tokio-serial

use crate::config::choose_serial_connection;
use crate::connector::line::LineChannel;
use crate::connector::traits::{Connector, ConnectorError, DeviceStream};
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::{info, warn};

/// Default baud rate of the sensor board
pub const DEFAULT_BAUD_RATE: u32 = 9600;

#[async_trait]
impl DeviceStream for SerialStream {
    fn probe(&self) -> io::Result<()> {
        // An unplugged adapter fails this ioctl
        self.bytes_to_read().map(|_| ()).map_err(io::Error::from)
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        tokio::io::AsyncWriteExt::shutdown(self).await
    }
}

/// Serial connector picking the first device path that exists
pub struct SerialConnector {
    candidates: Vec<String>,
    baud_rate: u32,
    channel: LineChannel<SerialStream>,
    port: Option<String>,
}

impl SerialConnector {
    pub fn new(candidates: Vec<String>, baud_rate: u32, read_timeout: Duration) -> Self {
        Self {
            candidates,
            baud_rate,
            channel: LineChannel::new(read_timeout),
            port: None,
        }
    }

    /// Path of the currently open port
    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }
}

#[async_trait]
impl Connector for SerialConnector {
    async fn connect(&mut self) -> Result<(), ConnectorError> {
        self.close_connection().await;

        let path = choose_serial_connection(&self.candidates)
            .ok_or_else(|| ConnectorError::NoDevice(self.candidates.clone()))?
            .to_string();

        let stream = tokio_serial::new(&path, self.baud_rate)
            .timeout(self.channel.read_timeout())
            .open_native_async()
            .map_err(|e| ConnectorError::Connect {
                target: path.clone(),
                reason: e.to_string(),
            })?;

        // Drop whatever the board printed before we were listening
        if let Err(e) = stream.clear(ClearBuffer::Input) {
            warn!(port = %path, error = %e, "Failed to flush serial input");
        }

        info!(port = %path, baud = self.baud_rate, "Serial port opened");
        self.channel.attach(stream);
        self.port = Some(path);
        Ok(())
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
        self.port = None;
    }

    fn name(&self) -> &'static str {
        "Serial"
    }
}
