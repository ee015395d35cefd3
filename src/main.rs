//! airbridge: DLNA/UPnP to AirPlay audio bridge.
//!
//! Wires the pieces together: config, persisted state, the event bus,
//! the device manager with mDNS discovery, the UPnP surface (SSDP +
//! SOAP + GENA), and the web API. Exits non-zero on irrecoverable
//! startup failures (unbindable ports, unwritable directories, missing
//! ffmpeg).

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use airbridge_core::{BridgeConfig, ConfigStore, DeviceKind, EventBus};
use airbridge_device::{DeviceManager, DeviceRegistry, ManagerSettings, MdnsScanner, SinkFactory};
use airbridge_sink::{AirPlayEndpoint, AirPlaySession, AirPlaySink, LocalSink, RtpSession, Sink};
use airbridge_upnp::{local_ip, SsdpResponder, UpnpService};
use airbridge_web::WebServer;

/// Production sink wiring: AirPlay receivers get an ALAC/RTP sink, the
/// local speaker a cpal stream.
struct BridgeSinkFactory {
    sample_rate: u32,
}

impl SinkFactory for BridgeSinkFactory {
    fn create(&self, kind: DeviceKind, endpoint: Option<&AirPlayEndpoint>) -> Box<dyn Sink> {
        match (kind, endpoint) {
            (DeviceKind::AirPlay, Some(endpoint)) => {
                let session: Box<dyn AirPlaySession> = Box::new(RtpSession::new(
                    (endpoint.address, endpoint.port).into(),
                    self.sample_rate,
                ));
                Box::new(AirPlaySink::new(endpoint.clone(), session))
            }
            _ => Box::new(LocalSink::new()),
        }
    }
}

fn config_path() -> PathBuf {
    std::env::var_os("AIRBRIDGE_CONFIG")
        .map(PathBuf::from)
        .or_else(|| std::env::args_os().nth(1).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("airbridge.json"))
}

async fn run() -> airbridge_core::Result<()> {
    let config = BridgeConfig::load(&config_path())?;
    config.prepare_dirs()?;
    airbridge_media::check_ffmpeg()?;

    let ip = local_ip();
    info!(%ip, http = config.http_port, web = config.web_port, "airbridge starting");

    let bus = EventBus::new();
    let registry = DeviceRegistry::new();
    let store = ConfigStore::open(&config.state_dir);
    Arc::clone(&store).spawn_listener(&bus);

    // Local speaker requires an output device; downgrade gracefully.
    let mut manager_settings = ManagerSettings::from_config(&config);
    if manager_settings.enable_server_speaker && !LocalSink::host_has_output() {
        warn!("server speaker enabled but no audio output device found, skipping");
        manager_settings.enable_server_speaker = false;
    }

    let scanner = Arc::new(MdnsScanner::new()?);
    let sinks = Arc::new(BridgeSinkFactory {
        sample_rate: config.sample_rate,
    });
    let manager = DeviceManager::new(
        manager_settings,
        Arc::clone(&bus),
        registry.clone(),
        Arc::clone(&store),
        scanner,
        sinks,
    );

    let upnp = UpnpService::new(registry.clone(), Arc::clone(&bus), ip, config.http_port);
    let ssdp = SsdpResponder::new(registry.clone(), ip, config.http_port);
    let web = WebServer::new(registry.clone(), Arc::clone(&bus), config.web_port);

    let (manager_stop, manager_stop_rx) = tokio::sync::mpsc::channel(1);
    let (upnp_stop, upnp_stop_rx) = tokio::sync::mpsc::channel(1);
    let (ssdp_stop, ssdp_stop_rx) = tokio::sync::mpsc::channel(1);
    let (web_stop, web_stop_rx) = tokio::sync::mpsc::channel(1);

    let mut manager_task = tokio::spawn(manager.run(manager_stop_rx));
    let mut upnp_task = tokio::spawn(upnp.serve(upnp_stop_rx));
    let mut ssdp_task = tokio::spawn(ssdp.run(ssdp_stop_rx));
    let mut web_task = tokio::spawn(web.serve(web_stop_rx));

    info!("all services started");

    // Any service ending before the shutdown signal is a startup or
    // runtime failure (port binds surface only once the task runs);
    // bring the process down with its error.
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
        result = &mut upnp_task => return result.map_err(std::io::Error::other)?,
        result = &mut web_task => return result.map_err(std::io::Error::other)?,
        result = &mut ssdp_task => return result.map_err(std::io::Error::other)?,
        result = &mut manager_task => {
            result.map_err(std::io::Error::other)?;
            return Err(std::io::Error::other("device manager exited unexpectedly").into());
        }
    }

    let _ = manager_stop.send(()).await;
    let _ = upnp_stop.send(()).await;
    let _ = ssdp_stop.send(()).await;
    let _ = web_stop.send(()).await;
    let _ = manager_task.await;
    let _ = upnp_task.await;
    let _ = ssdp_task.await;
    let _ = web_task.await;
    info!("shutdown complete");
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run().await {
        error!(%err, "startup failed");
        std::process::exit(1);
    }
}
