//! Shared device registry.
//!
//! The UPnP and web surfaces read device state through this registry.
//! Each device's snapshot is written only by that device's command task;
//! readers take point-in-time copies under a short read lock.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use airbridge_core::device::{DeviceId, DeviceSnapshot};

/// Handle to one device's live snapshot.
pub type SharedSnapshot = Arc<RwLock<DeviceSnapshot>>;

#[derive(Clone, Default)]
pub struct DeviceRegistry {
    inner: Arc<RwLock<HashMap<DeviceId, SharedSnapshot>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: DeviceId, snapshot: SharedSnapshot) {
        self.inner.write().unwrap().insert(id, snapshot);
    }

    pub fn remove(&self, id: &DeviceId) {
        self.inner.write().unwrap().remove(id);
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.inner.read().unwrap().contains_key(id)
    }

    /// Point-in-time copy of one device's state.
    pub fn snapshot(&self, id: &DeviceId) -> Option<DeviceSnapshot> {
        let map = self.inner.read().unwrap();
        map.get(id).map(|s| s.read().unwrap().clone())
    }

    /// Point-in-time copies of every device, sorted by name for stable
    /// listings.
    pub fn snapshots(&self) -> Vec<DeviceSnapshot> {
        let map = self.inner.read().unwrap();
        let mut all: Vec<DeviceSnapshot> =
            map.values().map(|s| s.read().unwrap().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.inner.read().unwrap().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
