//! Per-user device sessions.
//!
//! Each user id owns one slot in the cache. The slot is an async mutex held for
//! the whole acquire-and-execute sequence of a request, so two requests from the
//! same user never race to connect and never share the link concurrently.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use adb_broker::{BrokerError, DeviceBroker, DeviceLink};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{DeviceEndpoint, DeviceError};
use crate::metrics;

/// No-op round trip used to detect a stale link.
pub const PROBE_INSTRUCTION: &str = "echo test";

pub struct DeviceSession {
    user_id: String,
    link: Box<dyn DeviceLink>,
    last_used: Instant,
}

impl DeviceSession {
    fn new(user_id: &str, link: Box<dyn DeviceLink>) -> Self {
        Self {
            user_id: user_id.to_string(),
            link,
            last_used: Instant::now(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn serial(&self) -> &str {
        self.link.serial()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    async fn run(&mut self, instruction: &str) -> Result<String, BrokerError> {
        self.last_used = Instant::now();
        self.link.run(instruction).await
    }
}

type Slot = Option<DeviceSession>;

/// Exclusive access to one user's connected session.
pub struct SessionGuard {
    slot: OwnedMutexGuard<Slot>,
}

impl SessionGuard {
    pub fn serial(&self) -> Option<&str> {
        self.slot.as_ref().map(DeviceSession::serial)
    }

    pub async fn run(&mut self, instruction: &str) -> Result<String, BrokerError> {
        match self.slot.as_mut() {
            Some(session) => session.run(instruction).await,
            None => Err(BrokerError::NotConnected("no device session".into())),
        }
    }
}

#[derive(Clone)]
pub struct SessionManager {
    endpoint: DeviceEndpoint,
    broker: Arc<dyn DeviceBroker>,
    sessions: Arc<DashMap<String, Arc<Mutex<Slot>>>>,
}

impl SessionManager {
    pub fn new(endpoint: DeviceEndpoint, broker: Arc<dyn DeviceBroker>) -> Self {
        Self {
            endpoint,
            broker,
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn endpoint(&self) -> &DeviceEndpoint {
        &self.endpoint
    }

    /// Return a live session for `user_id`, connecting or reconnecting once if needed.
    pub async fn acquire(&self, user_id: &str) -> Result<SessionGuard, DeviceError> {
        let (slot, mut guard) = self.lock_current(user_id).await;

        let stale = match guard.as_mut() {
            Some(session) => match session.run(PROBE_INSTRUCTION).await {
                Ok(_) => false,
                Err(err) => {
                    info!(user_id, error = %err, "device connection lost, attempting to reconnect");
                    true
                }
            },
            None => true,
        };

        if stale {
            // The old link goes before the new one is opened.
            *guard = None;
            match self.connect(user_id).await {
                Ok(session) => *guard = Some(session),
                Err(err) => {
                    self.retire(user_id, &slot);
                    return Err(err);
                }
            }
        }

        Ok(SessionGuard { slot: guard })
    }

    pub async fn has_session(&self, user_id: &str) -> bool {
        let Some(slot) = self.sessions.get(user_id).map(|entry| Arc::clone(entry.value())) else {
            return false;
        };
        let guard = slot.lock().await;
        guard.is_some()
    }

    /// Close the user's session. Waits for an in-flight request to finish first.
    /// Returns whether a connected session was dropped.
    pub async fn forget(&self, user_id: &str) -> bool {
        let Some(slot) = self.sessions.get(user_id).map(|entry| Arc::clone(entry.value())) else {
            return false;
        };
        let mut guard = slot.lock().await;
        let dropped = guard.take().is_some();
        self.retire(user_id, &slot);
        dropped
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Drop sessions unused for longer than `ttl`. Slots held by an in-flight
    /// request are kept. Returns how many entries were removed.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|user_id, slot| match slot.try_lock() {
            Ok(mut guard) => match guard.as_ref().map(DeviceSession::idle_for) {
                Some(idle) if idle <= ttl => true,
                Some(_) => {
                    debug!(user_id = %user_id, "evicting idle device session");
                    *guard = None;
                    false
                }
                None => false,
            },
            Err(_) => true,
        });
        before.saturating_sub(self.sessions.len())
    }

    pub fn spawn_idle_sweeper(&self, ttl: Duration, interval: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let evicted = manager.evict_idle(ttl);
                if evicted > 0 {
                    info!(evicted, remaining = manager.len(), "evicted idle device sessions");
                }
            }
        })
    }

    fn slot(&self, user_id: &str) -> Arc<Mutex<Slot>> {
        Arc::clone(self.sessions.entry(user_id.to_string()).or_default().value())
    }

    /// Lock the slot currently mapped to `user_id`. A slot retired while we
    /// waited for it is skipped so every user has a single live slot.
    async fn lock_current(&self, user_id: &str) -> (Arc<Mutex<Slot>>, OwnedMutexGuard<Slot>) {
        loop {
            let slot = self.slot(user_id);
            let guard = Arc::clone(&slot).lock_owned().await;
            if self.is_current(user_id, &slot) {
                return (slot, guard);
            }
            debug!(user_id, "device slot retired while waiting, retrying");
        }
    }

    fn is_current(&self, user_id: &str, slot: &Arc<Mutex<Slot>>) -> bool {
        self.sessions
            .get(user_id)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), slot))
    }

    /// Remove `slot` from the map unless it was already replaced.
    fn retire(&self, user_id: &str, slot: &Arc<Mutex<Slot>>) {
        self.sessions
            .remove_if(user_id, |_, current| Arc::ptr_eq(current, slot));
    }

    async fn connect(&self, user_id: &str) -> Result<DeviceSession, DeviceError> {
        let endpoint = self.endpoint.to_string();
        let result = self
            .broker
            .connect(&self.endpoint.host, self.endpoint.port)
            .await
            .and_then(|link| {
                if link.serial().trim().is_empty() {
                    Err(BrokerError::NotConnected(endpoint.clone()))
                } else {
                    Ok(link)
                }
            });

        match result {
            Ok(link) => {
                metrics::DEVICE_CONNECTS.with_label_values(&["ok"]).inc();
                info!(user_id, endpoint = %endpoint, serial = %link.serial(), "connected to device");
                Ok(DeviceSession::new(user_id, link))
            }
            Err(source) => {
                metrics::DEVICE_CONNECTS.with_label_values(&["error"]).inc();
                error!(user_id, endpoint = %endpoint, error = %source, "failed to connect to device");
                Err(DeviceError::Connection { endpoint, source })
            }
        }
    }
}

/// Sweep cadence for a given idle TTL: often enough to evict within ~10% of the TTL.
pub fn sweep_interval(ttl: Duration) -> Duration {
    let interval = ttl / 10;
    if interval < Duration::from_secs(1) {
        warn!(?ttl, "device idle ttl is very short; sweeping every second");
        Duration::from_secs(1)
    } else {
        interval
    }
}
