//! Persistent per-device state.
//!
//! The store listens for `DSP_CHANGED` and `VOLUME_CHANGED` events and
//! writes each device's DSP configuration and last volume/mute to a JSON
//! file keyed by device id. On device creation the saved entry is applied
//! back by publishing a synthetic `CMD_SET_DSP`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::device::DeviceId;
use crate::dsp::DspConfig;
use crate::events::{EventPayload, EventType};

/// Persisted record for one device.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceRecord {
    #[serde(default)]
    pub dsp_enabled: bool,
    #[serde(default)]
    pub dsp_config: DspConfig,
    #[serde(default = "default_volume")]
    pub volume: u8,
    #[serde(default)]
    pub muted: bool,
}

fn default_volume() -> u8 {
    100
}

impl Default for DeviceRecord {
    fn default() -> Self {
        Self {
            dsp_enabled: false,
            dsp_config: DspConfig::default(),
            volume: 100,
            muted: false,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    devices: HashMap<String, DeviceRecord>,
}

/// JSON-file-backed device state store.
pub struct ConfigStore {
    path: PathBuf,
    data: Mutex<StoreData>,
}

impl ConfigStore {
    /// Open the store, loading any existing file.
    pub fn open(state_dir: &std::path::Path) -> Arc<Self> {
        let path = state_dir.join("devices.json");
        let data = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<StoreData>(&text) {
                Ok(data) => {
                    info!(devices = data.devices.len(), "loaded persisted device state");
                    data
                }
                Err(err) => {
                    warn!(%err, "persisted state unreadable, starting fresh");
                    StoreData::default()
                }
            },
            Err(_) => StoreData::default(),
        };
        Arc::new(Self {
            path,
            data: Mutex::new(data),
        })
    }

    /// Saved record for a device, if one exists.
    pub fn device(&self, id: &DeviceId) -> Option<DeviceRecord> {
        self.data.lock().unwrap().devices.get(id.as_str()).cloned()
    }

    /// Store the DSP part of a device's record.
    pub fn set_dsp(&self, id: &DeviceId, enabled: bool, config: DspConfig) {
        let mut data = self.data.lock().unwrap();
        let record = data.devices.entry(id.as_str().to_string()).or_default();
        record.dsp_enabled = enabled;
        record.dsp_config = config;
        self.save(&data);
    }

    /// Store the volume part of a device's record.
    pub fn set_volume(&self, id: &DeviceId, volume: u8, muted: bool) {
        let mut data = self.data.lock().unwrap();
        let record = data.devices.entry(id.as_str().to_string()).or_default();
        record.volume = volume;
        record.muted = muted;
        self.save(&data);
    }

    fn save(&self, data: &StoreData) {
        match serde_json::to_string_pretty(data) {
            Ok(text) => {
                if let Err(err) = std::fs::write(&self.path, text) {
                    warn!(path = %self.path.display(), %err, "failed to persist device state");
                }
            }
            Err(err) => warn!(%err, "failed to serialize device state"),
        }
    }

    /// Start the auto-save listener. The subscription is taken before
    /// this returns, so events published immediately after are captured.
    pub fn spawn_listener(self: Arc<Self>, bus: &EventBus) -> tokio::task::JoinHandle<()> {
        let mut sub = bus.subscribe(&[EventType::DspChanged, EventType::VolumeChanged], None);
        tokio::spawn(async move {
            while let Some(event) = sub.recv().await {
                let Some(device_id) = event.device_id else {
                    continue;
                };
                match event.payload {
                    EventPayload::DspChanged { enabled, config } => {
                        debug!(device = %device_id, "persisting dsp config");
                        self.set_dsp(&device_id, enabled, config);
                    }
                    EventPayload::VolumeChanged { volume, muted } => {
                        self.set_volume(&device_id, volume, muted);
                    }
                    _ => {}
                }
            }
        })
    }
}
