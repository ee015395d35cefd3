//! Device lifecycle management.
//!
//! Periodically scans for AirPlay receivers and keeps one virtual device
//! per receiver: new receivers get a device named `"{receiver} [D]"`,
//! receivers missing for N consecutive scans are destroyed. Optionally
//! maintains a single local-speaker device. Persisted DSP and volume
//! settings are re-applied to new devices by publishing synthetic
//! commands.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use airbridge_core::bus::EventBus;
use airbridge_core::config::BridgeConfig;
use airbridge_core::device::{DeviceId, DeviceKind};
use airbridge_core::events::{Event, EventPayload};
use airbridge_core::store::ConfigStore;
use airbridge_sink::{AirPlayEndpoint, Sink};

use crate::pipeline::PipelineSettings;
use crate::registry::DeviceRegistry;
use crate::scanner::ReceiverScanner;
use crate::virtual_device::{DeviceHandle, DeviceSpec, VirtualDevice};

/// Creates the sink for a new virtual device. Injected at composition so
/// this crate never names concrete session types.
pub trait SinkFactory: Send + Sync {
    fn create(&self, kind: DeviceKind, endpoint: Option<&AirPlayEndpoint>) -> Box<dyn Sink>;
}

impl<F> SinkFactory for F
where
    F: Fn(DeviceKind, Option<&AirPlayEndpoint>) -> Box<dyn Sink> + Send + Sync,
{
    fn create(&self, kind: DeviceKind, endpoint: Option<&AirPlayEndpoint>) -> Box<dyn Sink> {
        self(kind, endpoint)
    }
}

/// Manager tuning derived from the bridge config.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub discovery_interval: Duration,
    pub scan_window: Duration,
    pub offline_scan_threshold: u32,
    pub enable_server_speaker: bool,
    pub sample_rate: u32,
    pub channels: u16,
    pub pipeline: PipelineSettings,
}

impl ManagerSettings {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            discovery_interval: Duration::from_secs(config.discovery_interval_s.max(1)),
            scan_window: Duration::from_secs(5),
            offline_scan_threshold: config.offline_scan_threshold.max(1),
            enable_server_speaker: config.enable_server_speaker,
            sample_rate: config.sample_rate,
            channels: config.channels,
            pipeline: PipelineSettings::new(config.cache_dir.clone(), config.buffer_gate_bytes),
        }
    }
}

struct ManagedDevice {
    handle: DeviceHandle,
    endpoint_id: Option<String>,
    missed_scans: u32,
}

/// The device manager task.
pub struct DeviceManager {
    settings: ManagerSettings,
    bus: Arc<EventBus>,
    registry: DeviceRegistry,
    store: Arc<ConfigStore>,
    scanner: Arc<dyn ReceiverScanner>,
    sinks: Arc<dyn SinkFactory>,
    devices: HashMap<DeviceId, ManagedDevice>,
}

impl DeviceManager {
    pub fn new(
        settings: ManagerSettings,
        bus: Arc<EventBus>,
        registry: DeviceRegistry,
        store: Arc<ConfigStore>,
        scanner: Arc<dyn ReceiverScanner>,
        sinks: Arc<dyn SinkFactory>,
    ) -> Self {
        Self {
            settings,
            bus,
            registry,
            store,
            scanner,
            sinks,
            devices: HashMap::new(),
        }
    }

    /// Run discovery until `shutdown` fires, then stop every device.
    pub async fn run(mut self, mut shutdown: mpsc::Receiver<()>) {
        if self.settings.enable_server_speaker {
            self.create_local_speaker();
        }

        let mut interval = tokio::time::interval(self.settings.discovery_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => self.scan_once().await,
                _ = shutdown.recv() => break,
            }
        }

        info!("device manager stopping, shutting down {} device(s)", self.devices.len());
        for (_, managed) in self.devices.drain() {
            let id = managed.handle.id.clone();
            managed.handle.shutdown().await;
            self.registry.remove(&id);
        }
    }

    async fn scan_once(&mut self) {
        let scanner = Arc::clone(&self.scanner);
        let window = self.settings.scan_window;
        let result = tokio::task::spawn_blocking(move || scanner.scan(window)).await;

        let endpoints = match result {
            Ok(Ok(endpoints)) => endpoints,
            Ok(Err(err)) => {
                warn!(%err, "receiver scan failed, retrying next interval");
                return;
            }
            Err(err) => {
                warn!(%err, "scan task failed");
                return;
            }
        };
        debug!(count = endpoints.len(), "scan complete");
        self.apply_scan(&endpoints).await;
    }

    /// Reconcile the device set against one scan result.
    pub async fn apply_scan(&mut self, endpoints: &[AirPlayEndpoint]) {
        for endpoint in endpoints {
            let id = DeviceId::from_airplay(&endpoint.identifier);
            match self.devices.get_mut(&id) {
                Some(managed) => managed.missed_scans = 0,
                None => self.create_airplay_device(id, endpoint),
            }
        }

        let seen: Vec<&str> = endpoints.iter().map(|e| e.identifier.as_str()).collect();
        let mut expired = Vec::new();
        for (id, managed) in self.devices.iter_mut() {
            let Some(endpoint_id) = &managed.endpoint_id else {
                continue; // local speaker never expires
            };
            if !seen.contains(&endpoint_id.as_str()) {
                managed.missed_scans += 1;
                debug!(device = %id, missed = managed.missed_scans, "receiver missing from scan");
                if managed.missed_scans >= self.settings.offline_scan_threshold {
                    expired.push(id.clone());
                }
            }
        }
        for id in expired {
            self.destroy_device(&id).await;
        }
    }

    fn create_airplay_device(&mut self, id: DeviceId, endpoint: &AirPlayEndpoint) {
        let name = format!("{} [D]", endpoint.name);
        info!(device = %id, %name, addr = %endpoint.address, "creating airplay device");
        let sink = self.sinks.create(DeviceKind::AirPlay, Some(endpoint));
        self.create_device(id, name, DeviceKind::AirPlay, Some(endpoint.identifier.clone()), sink);
    }

    fn create_local_speaker(&mut self) {
        let sink = self.sinks.create(DeviceKind::LocalSpeaker, None);
        let id = DeviceId::local_speaker();
        info!(device = %id, "creating local speaker device");
        self.create_device(id, "Server Speaker [D]".into(), DeviceKind::LocalSpeaker, None, sink);
    }

    fn create_device(
        &mut self,
        id: DeviceId,
        name: String,
        kind: DeviceKind,
        endpoint_id: Option<String>,
        sink: Box<dyn Sink>,
    ) {
        let spec = DeviceSpec {
            id: id.clone(),
            name,
            kind,
            sample_rate: self.settings.sample_rate,
            channels: self.settings.channels,
            pipeline: self.settings.pipeline.clone(),
        };
        let handle = VirtualDevice::spawn(spec, Arc::clone(&self.bus), sink);
        self.registry.insert(id.clone(), Arc::clone(&handle.snapshot));
        let snapshot = handle.snapshot.read().unwrap().clone();
        self.devices.insert(
            id.clone(),
            ManagedDevice {
                handle,
                endpoint_id,
                missed_scans: 0,
            },
        );

        // Re-apply persisted settings through the normal command path.
        if let Some(record) = self.store.device(&id) {
            debug!(device = %id, "applying persisted device settings");
            self.bus.publish(Event::set_dsp(
                id.clone(),
                record.dsp_enabled,
                Some(record.dsp_config),
            ));
            self.bus.publish(Event::set_volume(id.clone(), record.volume));
            if record.muted {
                self.bus.publish(Event::set_mute(id.clone(), true));
            }
        }

        self.bus.publish(Event::new(
            id,
            EventPayload::DeviceAdded {
                snapshot: Box::new(snapshot),
            },
        ));
    }

    async fn destroy_device(&mut self, id: &DeviceId) {
        let Some(managed) = self.devices.remove(id) else {
            return;
        };
        info!(device = %id, "destroying device (receiver offline)");
        managed.handle.shutdown().await;
        self.registry.remove(id);
        self.bus.publish(Event::new(id.clone(), EventPayload::DeviceRemoved));
    }

    /// Device count (tests and diagnostics).
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }
}
