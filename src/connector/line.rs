//! Line framing shared by every stream-backed connector

use crate::connector::traits::{ConnectorError, DeviceStream};
use iow_shared::codec::{self, LineDecoder};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Owns one device stream and turns it into lines
pub struct LineChannel<S> {
    stream: Option<S>,
    decoder: LineDecoder,
    read_timeout: Duration,
}

impl<S: DeviceStream> LineChannel<S> {
    pub fn new(read_timeout: Duration) -> Self {
        Self {
            stream: None,
            decoder: LineDecoder::new(),
            read_timeout,
        }
    }

    /// Take ownership of a freshly opened stream
    pub fn attach(&mut self, stream: S) {
        self.decoder.clear();
        self.stream = Some(stream);
    }

    pub fn is_attached(&self) -> bool {
        self.stream.is_some()
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Probe the stream, closing it if the probe fails
    pub async fn probe(&mut self) -> bool {
        let result = match &self.stream {
            Some(stream) => stream.probe(),
            None => return false,
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Device probe failed, closing link");
                self.close().await;
                false
            }
        }
    }

    /// Next complete line, or an empty string if none arrived in time.
    ///
    /// A partial line stays buffered until its terminator is read. Blank
    /// lines are skipped so an empty result always means a timeout.
    pub async fn read_line(&mut self) -> Result<String, ConnectorError> {
        loop {
            match self.decoder.decode_next() {
                Ok(Some(line)) if line.is_empty() => continue,
                Ok(Some(line)) => return Ok(line),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Discarding unterminated input"),
            }

            let stream = self.stream.as_mut().ok_or(ConnectorError::NotConnected)?;
            let read = timeout(self.read_timeout, stream.read_buf(self.decoder.buffer_mut())).await;

            match read {
                Err(_) => return Ok(String::new()),
                Ok(Ok(0)) => {
                    self.close().await;
                    return Err(ConnectorError::Disconnected(
                        "device closed the connection".into(),
                    ));
                }
                Ok(Ok(n)) => debug!(bytes = n, "Read from device"),
                Ok(Err(e)) => {
                    self.close().await;
                    return Err(ConnectorError::Disconnected(format!("read error: {e}")));
                }
            }
        }
    }

    /// Write `message` followed by a newline and flush
    pub async fn write_line(&mut self, message: &str) -> Result<(), ConnectorError> {
        let encoded = codec::encode(message)?;
        let stream = self.stream.as_mut().ok_or(ConnectorError::NotConnected)?;

        let mut result = stream.write_all(&encoded).await;
        if result.is_ok() {
            result = stream.flush().await;
        }

        if let Err(e) = result {
            self.close().await;
            return Err(ConnectorError::Disconnected(format!("write error: {e}")));
        }
        Ok(())
    }

    /// Drop the stream; close-time errors are logged and ignored
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = DeviceStream::shutdown(&mut stream).await {
                debug!(error = %e, "Ignoring error while closing device stream");
            }
        }
        self.decoder.clear();
    }
}
