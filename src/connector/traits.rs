//! Connector trait abstraction for pluggable device links

use async_trait::async_trait;
use iow_shared::codec::CodecError;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Errors raised by a device link
#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("No device present among {0:?}")]
    NoDevice(Vec<String>),

    #[error("Failed to connect to {target}: {reason}")]
    Connect { target: String, reason: String },

    #[error("Not connected")]
    NotConnected,

    #[error("Connection lost: {0}")]
    Disconnected(String),

    #[error("Invalid outgoing message: {0}")]
    Codec(#[from] CodecError),
}

/// A byte stream to a device that can be probed for liveness
#[async_trait]
pub trait DeviceStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Cheap check that the underlying handle is still usable
    fn probe(&self) -> io::Result<()>;

    /// Close the stream gracefully
    async fn shutdown(&mut self) -> io::Result<()>;
}

/// A line-oriented device link
///
/// Implementations own their connection state; a failed probe, read or
/// write closes the handle before the error is returned.
#[async_trait]
pub trait Connector: Send {
    /// Establish the link
    async fn connect(&mut self) -> Result<(), ConnectorError>;

    /// Probe the link; a failed probe closes it and returns false
    async fn is_connected(&mut self) -> bool;

    /// Next line without its terminator, or an empty string on read timeout
    async fn retrieve_data(&mut self) -> Result<String, ConnectorError>;

    /// Write one line; the terminator is appended
    async fn write_data(&mut self, message: &str) -> Result<(), ConnectorError>;

    /// Close the link; safe to call repeatedly
    async fn close_connection(&mut self);

    /// Human-readable name for this link
    fn name(&self) -> &'static str;
}
