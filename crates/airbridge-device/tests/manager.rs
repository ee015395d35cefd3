//! Device manager lifecycle: discovery reconciliation, offline expiry,
//! persisted settings re-application.

mod support;

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use airbridge_core::bus::EventBus;
use airbridge_core::device::{DeviceId, DeviceKind};
use airbridge_core::dsp::DspConfig;
use airbridge_core::events::EventType;
use airbridge_core::store::ConfigStore;
use airbridge_device::{DeviceManager, DeviceRegistry, ManagerSettings, PipelineSettings, ReceiverScanner};
use airbridge_sink::{AirPlayEndpoint, Sink};
use support::RecordingSink;

struct NullScanner;

impl ReceiverScanner for NullScanner {
    fn scan(&self, _window: Duration) -> airbridge_core::error::Result<Vec<AirPlayEndpoint>> {
        Ok(Vec::new())
    }
}

fn endpoint(identifier: &str, name: &str) -> AirPlayEndpoint {
    AirPlayEndpoint {
        identifier: identifier.into(),
        name: name.into(),
        address: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 40)),
        port: 7000,
        model: None,
    }
}

struct Fixture {
    manager: DeviceManager,
    bus: Arc<EventBus>,
    registry: DeviceRegistry,
    store: Arc<ConfigStore>,
    _tempdir: tempfile::TempDir,
}

fn fixture(enable_server_speaker: bool) -> Fixture {
    let tempdir = tempfile::tempdir().unwrap();
    let bus = EventBus::new();
    let registry = DeviceRegistry::new();
    let store = ConfigStore::open(tempdir.path());
    let settings = ManagerSettings {
        discovery_interval: Duration::from_secs(30),
        scan_window: Duration::from_millis(10),
        offline_scan_threshold: 3,
        enable_server_speaker,
        sample_rate: 44_100,
        channels: 2,
        pipeline: PipelineSettings::new(tempdir.path().to_path_buf(), 1024),
    };
    let sinks = |_kind: DeviceKind, _endpoint: Option<&AirPlayEndpoint>| -> Box<dyn Sink> {
        Box::new(RecordingSink::new())
    };
    let manager = DeviceManager::new(
        settings,
        Arc::clone(&bus),
        registry.clone(),
        Arc::clone(&store),
        Arc::new(NullScanner),
        Arc::new(sinks),
    );
    Fixture {
        manager,
        bus,
        registry,
        store,
        _tempdir: tempdir,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn new_receiver_creates_a_suffixed_device() {
    let mut fx = fixture(false);
    let mut added = fx.bus.subscribe(&[EventType::DeviceAdded], None);

    fx.manager.apply_scan(&[endpoint("AA:BB", "Kitchen")]).await;
    assert_eq!(fx.manager.device_count(), 1);

    let event = tokio::time::timeout(Duration::from_secs(2), added.recv())
        .await
        .unwrap()
        .unwrap();
    let id = DeviceId::from_airplay("AA:BB");
    assert_eq!(event.device_id, Some(id.clone()));

    let snap = fx.registry.snapshot(&id).unwrap();
    assert_eq!(snap.name, "Kitchen [D]");
    assert_eq!(snap.kind, DeviceKind::AirPlay);
}

#[tokio::test(flavor = "multi_thread")]
async fn rediscovered_receiver_is_not_duplicated() {
    let mut fx = fixture(false);
    fx.manager.apply_scan(&[endpoint("AA:BB", "Kitchen")]).await;
    fx.manager.apply_scan(&[endpoint("AA:BB", "Kitchen")]).await;
    assert_eq!(fx.manager.device_count(), 1);
    assert_eq!(fx.registry.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn receiver_missing_for_n_scans_is_destroyed() {
    let mut fx = fixture(false);
    let mut removed = fx.bus.subscribe(&[EventType::DeviceRemoved], None);

    fx.manager.apply_scan(&[endpoint("AA:BB", "Kitchen")]).await;
    assert_eq!(fx.manager.device_count(), 1);

    fx.manager.apply_scan(&[]).await;
    fx.manager.apply_scan(&[]).await;
    assert_eq!(fx.manager.device_count(), 1, "below the threshold");

    fx.manager.apply_scan(&[]).await;
    assert_eq!(fx.manager.device_count(), 0);
    assert!(fx.registry.is_empty());

    let event = tokio::time::timeout(Duration::from_secs(2), removed.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.device_id, Some(DeviceId::from_airplay("AA:BB")));
}

#[tokio::test(flavor = "multi_thread")]
async fn reappearing_receiver_resets_the_miss_counter() {
    let mut fx = fixture(false);
    fx.manager.apply_scan(&[endpoint("AA:BB", "Kitchen")]).await;
    fx.manager.apply_scan(&[]).await;
    fx.manager.apply_scan(&[]).await;
    fx.manager.apply_scan(&[endpoint("AA:BB", "Kitchen")]).await;
    fx.manager.apply_scan(&[]).await;
    fx.manager.apply_scan(&[]).await;
    assert_eq!(fx.manager.device_count(), 1, "counter was reset on reappearance");
}

#[tokio::test(flavor = "multi_thread")]
async fn persisted_dsp_is_reapplied_to_a_new_device() {
    let mut fx = fixture(false);
    let id = DeviceId::from_airplay("AA:BB");
    let mut config = DspConfig::default();
    config.eq.bands[2].gain_db = 4.5;
    fx.store.set_dsp(&id, true, config.clone());
    fx.store.set_volume(&id, 35, false);

    fx.manager.apply_scan(&[endpoint("AA:BB", "Kitchen")]).await;

    // The synthetic commands are applied by the device task; poll the
    // registry snapshot briefly.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let snap = fx.registry.snapshot(&id).unwrap();
        if snap.dsp_enabled && snap.volume == 35 {
            assert_eq!(snap.dsp_config, config);
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "persisted settings never applied: {snap:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn local_speaker_device_is_created_when_enabled() {
    let fx = fixture(true);
    let bus = Arc::clone(&fx.bus);
    let registry = fx.registry.clone();
    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel(1);
    let task = tokio::spawn(fx.manager.run(shutdown_rx));

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    let id = DeviceId::local_speaker();
    while !registry.contains(&id) {
        assert!(std::time::Instant::now() < deadline, "local speaker never appeared");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let snap = registry.snapshot(&id).unwrap();
    assert_eq!(snap.kind, DeviceKind::LocalSpeaker);
    assert_eq!(snap.name, "Server Speaker [D]");

    shutdown_tx.send(()).await.unwrap();
    task.await.unwrap();
    assert!(registry.is_empty(), "shutdown removes devices");
    drop(bus);
}
