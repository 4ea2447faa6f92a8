use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{BrokerError, DeviceBroker, DeviceLink};

/// Every request a [`RecordingBroker`] received, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCall {
    Connect { host: String, port: u16 },
    Run { serial: String, instruction: String },
}

/// In-memory broker for tests and local wiring. Records every call and lets the
/// caller make the device unreachable or sever links that were already handed out.
#[derive(Clone)]
pub struct RecordingBroker {
    inner: Arc<Inner>,
}

struct Inner {
    calls: Mutex<Vec<BrokerCall>>,
    reachable: AtomicBool,
    /// Links created before this generation fail every instruction.
    severed_before: AtomicU64,
    generation: AtomicU64,
    failing_prefixes: Mutex<Vec<String>>,
}

impl Default for RecordingBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                calls: Mutex::new(Vec::new()),
                reachable: AtomicBool::new(true),
                severed_before: AtomicU64::new(0),
                generation: AtomicU64::new(0),
                failing_prefixes: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.inner.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Break every link handed out so far; later connects produce healthy links.
    pub fn sever_links(&self) {
        let current = self.inner.generation.load(Ordering::SeqCst);
        self.inner
            .severed_before
            .store(current + 1, Ordering::SeqCst);
    }

    /// Make instructions starting with `prefix` fail on every link.
    pub async fn fail_instructions(&self, prefix: impl Into<String>) {
        self.inner.failing_prefixes.lock().await.push(prefix.into());
    }

    pub async fn calls(&self) -> Vec<BrokerCall> {
        self.inner.calls.lock().await.clone()
    }

    pub async fn connect_count(&self) -> usize {
        self.inner
            .calls
            .lock()
            .await
            .iter()
            .filter(|call| matches!(call, BrokerCall::Connect { .. }))
            .count()
    }

    /// Instructions run on any link, excluding the given liveness probe.
    pub async fn instructions_except(&self, probe: &str) -> Vec<String> {
        self.inner
            .calls
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                BrokerCall::Run { instruction, .. } if instruction != probe => {
                    Some(instruction.clone())
                }
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl DeviceBroker for RecordingBroker {
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn DeviceLink>, BrokerError> {
        self.inner.calls.lock().await.push(BrokerCall::Connect {
            host: host.to_string(),
            port,
        });
        if !self.inner.reachable.load(Ordering::SeqCst) {
            return Err(BrokerError::Refused(format!(
                "failed to connect to {host}:{port}"
            )));
        }
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(RecordedLink {
            inner: Arc::clone(&self.inner),
            serial: format!("{host}:{port}"),
            generation,
        }))
    }
}

struct RecordedLink {
    inner: Arc<Inner>,
    serial: String,
    generation: u64,
}

#[async_trait]
impl DeviceLink for RecordedLink {
    fn serial(&self) -> &str {
        &self.serial
    }

    async fn run(&self, instruction: &str) -> Result<String, BrokerError> {
        self.inner.calls.lock().await.push(BrokerCall::Run {
            serial: self.serial.clone(),
            instruction: instruction.to_string(),
        });
        if self.generation < self.inner.severed_before.load(Ordering::SeqCst) {
            return Err(BrokerError::Refused(format!("device '{}' not found", self.serial)));
        }
        let failing = self
            .inner
            .failing_prefixes
            .lock()
            .await
            .iter()
            .any(|prefix| instruction.starts_with(prefix.as_str()));
        if failing {
            return Err(BrokerError::Refused(format!(
                "instruction rejected on {}",
                self.serial
            )));
        }
        Ok(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_connects_and_runs() {
        let broker = RecordingBroker::new();
        let link = broker.connect("tv.local", 5555).await.unwrap();
        assert_eq!(link.serial(), "tv.local:5555");
        link.run("input keyevent 3").await.unwrap();

        assert_eq!(
            broker.calls().await,
            vec![
                BrokerCall::Connect {
                    host: "tv.local".into(),
                    port: 5555
                },
                BrokerCall::Run {
                    serial: "tv.local:5555".into(),
                    instruction: "input keyevent 3".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn severed_links_fail_but_new_links_work() {
        let broker = RecordingBroker::new();
        let old = broker.connect("tv.local", 5555).await.unwrap();
        broker.sever_links();
        assert!(old.run("echo test").await.is_err());

        let fresh = broker.connect("tv.local", 5555).await.unwrap();
        assert!(fresh.run("echo test").await.is_ok());
    }

    #[tokio::test]
    async fn unreachable_device_refuses_connect() {
        let broker = RecordingBroker::new();
        broker.set_reachable(false);
        assert!(broker.connect("tv.local", 5555).await.is_err());
        assert_eq!(broker.connect_count().await, 1);
    }
}
