//! Device side of the relay: the command vocabulary, the per-user session
//! cache in front of the broker, and the dispatcher that joins the two.

use std::fmt;

use adb_broker::BrokerError;

pub mod command;
pub mod dispatch;
pub mod session;

pub use command::{Command, Direction, PackageName};
pub use dispatch::{execute, Dispatcher};
pub use session::{SessionGuard, SessionManager, PROBE_INSTRUCTION};

/// Where the single managed device listens. Fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEndpoint {
    pub host: String,
    pub port: u16,
}

impl DeviceEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for DeviceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("invalid navigation direction {0:?}")]
    InvalidDirection(String),
    #[error("invalid package name {0:?}")]
    InvalidPackage(String),
    #[error("failed to connect to {endpoint}: {source}")]
    Connection {
        endpoint: String,
        #[source]
        source: BrokerError,
    },
    #[error("instruction `{instruction}` failed: {source}")]
    Command {
        instruction: String,
        #[source]
        source: BrokerError,
    },
}
