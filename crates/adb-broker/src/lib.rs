//! Broker boundary for reaching a networked Android device.
//!
//! The local ADB server acts as the broker: it owns the actual device
//! connection and exposes a small request/reply surface over TCP. Callers only
//! need two operations, connecting to a device by host and port and running a
//! shell instruction on a connected device, so both are expressed as traits and
//! the TCP client is one implementation next to an in-memory recorder.

use std::time::Duration;

use async_trait::async_trait;

pub mod client;
pub mod memory;

pub use client::{AdbServerBroker, DEFAULT_BROKER_ADDR};
pub use memory::{BrokerCall, RecordingBroker};

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("broker request timed out after {0:?}")]
    Timeout(Duration),
    #[error("broker refused request: {0}")]
    Refused(String),
    #[error("malformed broker reply: {0}")]
    Protocol(String),
    #[error("device {0} did not confirm the connection")]
    NotConnected(String),
}

/// Establishes device links through the broker.
#[async_trait]
pub trait DeviceBroker: Send + Sync {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn DeviceLink>, BrokerError>;
}

/// A device the broker reports as connected.
#[async_trait]
pub trait DeviceLink: Send + Sync {
    /// Serial the broker assigned to the device. Empty means unconfirmed.
    fn serial(&self) -> &str;

    async fn run(&self, instruction: &str) -> Result<String, BrokerError>;
}
