use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// Cooldown bookkeeping for one device. `None` means the pump has never
/// fired since the entry was created.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceTimerState {
    pub last_pump_a_trigger: Option<DateTime<Utc>>,
    pub last_pump_b_trigger: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct DeviceEntry {
    state: DeviceTimerState,
    /// Last time an evaluation touched this device; drives idle eviction.
    last_seen: DateTime<Utc>,
}

/// The only mutable shared state in the control core: one
/// [`DeviceTimerState`] per serial number, created lazily on the first
/// reading and owned exclusively by this store.
///
/// Two layers of locking: an outer `RwLock` over the map (held only to
/// look up or insert an entry) and an inner per-device `Mutex` that
/// serialises evaluations for one serial number while leaving other
/// devices fully parallel.
#[derive(Clone, Default)]
pub struct DeviceTimerStore {
    inner: Arc<RwLock<HashMap<String, Arc<Mutex<DeviceEntry>>>>>,
}

impl DeviceTimerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with exclusive access to the device's timer state.
    ///
    /// `f` receives a snapshot of the current state and returns a result
    /// plus the state to commit. The new state is committed only when `f`
    /// returns `Ok`; on error the prior state is retained untouched.
    ///
    /// `f` is synchronous on purpose: rule evaluation is cheap and
    /// CPU-only, so no I/O ever suspends while the per-device lock is held.
    pub async fn with_state<T, F>(&self, serial_number: &str, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&DeviceTimerState) -> anyhow::Result<(T, DeviceTimerState)>,
    {
        let entry = self.entry(serial_number).await;
        let mut guard = entry.lock().await;

        let (result, new_state) = f(&guard.state)?;
        guard.state = new_state;
        guard.last_seen = Utc::now();
        Ok(result)
    }

    /// Return the per-device entry, creating it on first sight.
    async fn entry(&self, serial_number: &str) -> Arc<Mutex<DeviceEntry>> {
        if let Some(entry) = self.inner.read().await.get(serial_number) {
            return Arc::clone(entry);
        }

        let mut map = self.inner.write().await;
        // Racing inserter may have won between the read and write locks.
        let entry = map.entry(serial_number.to_owned()).or_insert_with(|| {
            Arc::new(Mutex::new(DeviceEntry {
                state: DeviceTimerState::default(),
                last_seen: Utc::now(),
            }))
        });
        Arc::clone(entry)
    }

    /// Drop state for devices that have not sent telemetry for `max_idle`.
    /// Returns the number of evicted devices.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_idle).unwrap_or(chrono::Duration::hours(6));

        let mut map = self.inner.write().await;
        let before = map.len();
        // An in-flight evaluation holds the entry's Mutex, not the map
        // lock, so a failed try_lock marks the device as active.
        map.retain(|_, entry| match entry.try_lock() {
            Ok(guard) => guard.last_seen >= cutoff,
            Err(_) => true,
        });
        let evicted = before - map.len();
        if evicted > 0 {
            debug!(evicted, "Evicted idle device timer state");
        }
        evicted
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}
