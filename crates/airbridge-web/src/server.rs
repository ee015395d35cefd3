//! The web API server.
//!
//! ```text
//! GET  /api/devices                devices overview
//! GET  /api/devices/{id}           full snapshot
//! GET  /api/devices/{id}/dsp      dsp config
//! POST /api/devices/{id}/dsp      set dsp ({enabled, config})
//! POST /api/devices/{id}/dsp/reset
//! POST /api/devices/{id}/volume   set volume ({volume})
//! ```

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use airbridge_core::bus::EventBus;
use airbridge_core::device::{DeviceId, DeviceSnapshot};
use airbridge_core::dsp::DspConfig;
use airbridge_core::error::{Result, UpnpError};
use airbridge_core::events::Event;
use airbridge_device::DeviceRegistry;

struct WebState {
    registry: DeviceRegistry,
    bus: Arc<EventBus>,
}

/// The web control server.
pub struct WebServer {
    state: Arc<WebState>,
    port: u16,
}

/// Overview row in `GET /api/devices`.
#[derive(Debug, Serialize)]
struct DeviceOverview {
    device_id: String,
    name: String,
    kind: &'static str,
    transport_state: &'static str,
    volume: u8,
    muted: bool,
    metadata: airbridge_core::device::TrackMetadata,
    dsp_enabled: bool,
}

impl From<DeviceSnapshot> for DeviceOverview {
    fn from(snap: DeviceSnapshot) -> Self {
        Self {
            device_id: snap.device_id.as_str().to_string(),
            name: snap.name,
            kind: snap.kind.as_str(),
            transport_state: snap.transport_state.as_str(),
            volume: snap.volume,
            muted: snap.muted,
            metadata: snap.metadata,
            dsp_enabled: snap.dsp_enabled,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SetDspRequest {
    enabled: bool,
    #[serde(default)]
    config: Option<DspConfig>,
}

#[derive(Debug, Deserialize)]
struct SetVolumeRequest {
    volume: u8,
}

impl WebServer {
    pub fn new(registry: DeviceRegistry, bus: Arc<EventBus>, port: u16) -> Self {
        Self {
            state: Arc::new(WebState { registry, bus }),
            port,
        }
    }

    /// The router (separable for tests).
    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/devices", get(list_devices))
            .route("/api/devices/:device_id", get(get_device))
            .route("/api/devices/:device_id/dsp", get(get_dsp).post(set_dsp))
            .route("/api/devices/:device_id/dsp/reset", post(reset_dsp))
            .route("/api/devices/:device_id/volume", post(set_volume))
            .with_state(Arc::clone(&self.state))
    }

    pub async fn serve(self, mut shutdown: tokio::sync::mpsc::Receiver<()>) -> Result<()> {
        let listener =
            tokio::net::TcpListener::bind((std::net::Ipv4Addr::UNSPECIFIED, self.port))
                .await
                .map_err(|source| UpnpError::Bind {
                    what: "web http",
                    port: self.port,
                    source,
                })?;
        info!(port = self.port, "web server listening");
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await
            .map_err(|source| UpnpError::Bind {
                what: "web http serve",
                port: self.port,
                source,
            })?;
        Ok(())
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": "device not found"}))).into_response()
}

fn snapshot_of(state: &WebState, device_id: &str) -> Option<DeviceSnapshot> {
    state.registry.snapshot(&DeviceId::from(device_id))
}

async fn list_devices(State(state): State<Arc<WebState>>) -> Response {
    let devices: Vec<DeviceOverview> = state
        .registry
        .snapshots()
        .into_iter()
        .map(DeviceOverview::from)
        .collect();
    Json(devices).into_response()
}

async fn get_device(
    State(state): State<Arc<WebState>>,
    Path(device_id): Path<String>,
) -> Response {
    match snapshot_of(&state, &device_id) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => not_found(),
    }
}

async fn get_dsp(
    State(state): State<Arc<WebState>>,
    Path(device_id): Path<String>,
) -> Response {
    match snapshot_of(&state, &device_id) {
        Some(snapshot) => Json(json!({
            "enabled": snapshot.dsp_enabled,
            "config": snapshot.dsp_config,
        }))
        .into_response(),
        None => not_found(),
    }
}

async fn set_dsp(
    State(state): State<Arc<WebState>>,
    Path(device_id): Path<String>,
    Json(request): Json<SetDspRequest>,
) -> Response {
    if snapshot_of(&state, &device_id).is_none() {
        return not_found();
    }
    if let Some(config) = &request.config {
        // Validate here so the caller gets a 400; the device validates
        // again before applying.
        if let Err(err) = config.validate() {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": err.to_string()})),
            )
                .into_response();
        }
    }
    state.bus.publish(Event::set_dsp(
        DeviceId::from(device_id.as_str()),
        request.enabled,
        request.config,
    ));
    Json(json!({"status": "ok"})).into_response()
}

async fn reset_dsp(
    State(state): State<Arc<WebState>>,
    Path(device_id): Path<String>,
) -> Response {
    if snapshot_of(&state, &device_id).is_none() {
        return not_found();
    }
    state
        .bus
        .publish(Event::reset_dsp(DeviceId::from(device_id.as_str())));
    Json(json!({"status": "ok"})).into_response()
}

async fn set_volume(
    State(state): State<Arc<WebState>>,
    Path(device_id): Path<String>,
    Json(request): Json<SetVolumeRequest>,
) -> Response {
    if snapshot_of(&state, &device_id).is_none() {
        return not_found();
    }
    state.bus.publish(Event::set_volume(
        DeviceId::from(device_id.as_str()),
        request.volume.min(100),
    ));
    Json(json!({"status": "ok"})).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use airbridge_core::device::DeviceKind;
    use airbridge_core::events::{EventPayload, EventType};
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::RwLock;
    use tower::ServiceExt;

    fn wired() -> (WebServer, Arc<EventBus>, DeviceId) {
        let registry = DeviceRegistry::new();
        let bus = EventBus::new();
        let id = DeviceId::from("dev-a");
        let mut snap = DeviceSnapshot::new(id.clone(), "Kitchen [D]".into(), DeviceKind::AirPlay);
        snap.volume = 30;
        snap.dsp_enabled = true;
        registry.insert(id.clone(), Arc::new(RwLock::new(snap)));
        let server = WebServer::new(registry, Arc::clone(&bus), 0);
        (server, bus, id)
    }

    async fn get_json(server: &WebServer, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = server
            .router()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn post_json(
        server: &WebServer,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let response = server
            .router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    mod reads {
        use super::*;

        #[tokio::test]
        async fn device_list_has_the_overview_fields() {
            let (server, ..) = wired();
            let (status, value) = get_json(&server, "/api/devices").await;
            assert_eq!(status, StatusCode::OK);
            let row = &value.as_array().unwrap()[0];
            assert_eq!(row["device_id"], "dev-a");
            assert_eq!(row["name"], "Kitchen [D]");
            assert_eq!(row["kind"], "airplay");
            assert_eq!(row["transport_state"], "NO_MEDIA_PRESENT");
            assert_eq!(row["volume"], 30);
            assert_eq!(row["dsp_enabled"], true);
        }

        #[tokio::test]
        async fn dsp_endpoint_returns_the_full_config() {
            let (server, ..) = wired();
            let (status, value) = get_json(&server, "/api/devices/dev-a/dsp").await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(value["enabled"], true);
            assert_eq!(value["config"]["eq"]["engine"], "iir");
        }

        #[tokio::test]
        async fn unknown_device_is_404() {
            let (server, ..) = wired();
            let (status, _) = get_json(&server, "/api/devices/nope/dsp").await;
            assert_eq!(status, StatusCode::NOT_FOUND);
        }
    }

    mod writes {
        use super::*;

        #[tokio::test]
        async fn set_dsp_publishes_the_command() {
            let (server, bus, id) = wired();
            let mut commands = bus.subscribe(&[EventType::CmdSetDsp], Some(id));
            let body = json!({
                "enabled": true,
                "config": {
                    "eq": { "engine": "iir",
                            "bands": [ {"freq_hz": 1000.0, "gain_db": 6.0, "q": 1.0, "type": "peaking"} ] },
                    "compressor": { "enabled": false },
                    "stereo": { "enabled": false }
                }
            });
            let (status, _) = post_json(&server, "/api/devices/dev-a/dsp", body).await;
            assert_eq!(status, StatusCode::OK);
            match commands.try_recv().unwrap().payload {
                EventPayload::SetDsp { enabled, config } => {
                    assert!(enabled);
                    assert_eq!(config.unwrap().eq.bands.len(), 1);
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        #[tokio::test]
        async fn invalid_dsp_config_is_rejected_with_400() {
            let (server, bus, id) = wired();
            let mut commands = bus.subscribe(&[EventType::CmdSetDsp], Some(id));
            let body = json!({
                "enabled": true,
                "config": {
                    "eq": { "engine": "iir",
                            "bands": [ {"freq_hz": 1000.0, "gain_db": 99.0, "q": 1.0, "type": "peaking"} ] },
                    "compressor": { "enabled": false },
                    "stereo": { "enabled": false }
                }
            });
            let (status, value) = post_json(&server, "/api/devices/dev-a/dsp", body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(value["error"].as_str().unwrap().contains("gain"));
            assert!(commands.try_recv().is_none(), "no command published");
        }

        #[tokio::test]
        async fn dsp_reset_publishes_the_command() {
            let (server, bus, id) = wired();
            let mut commands = bus.subscribe(&[EventType::CmdResetDsp], Some(id));
            let (status, _) = post_json(&server, "/api/devices/dev-a/dsp/reset", json!({})).await;
            assert_eq!(status, StatusCode::OK);
            assert!(matches!(
                commands.try_recv().unwrap().payload,
                EventPayload::ResetDsp
            ));
        }

        #[tokio::test]
        async fn volume_publishes_clamped() {
            let (server, bus, id) = wired();
            let mut commands = bus.subscribe(&[EventType::CmdSetVolume], Some(id));
            let (status, _) =
                post_json(&server, "/api/devices/dev-a/volume", json!({"volume": 250})).await;
            assert_eq!(status, StatusCode::OK);
            match commands.try_recv().unwrap().payload {
                EventPayload::SetVolume { volume } => assert_eq!(volume, 100),
                other => panic!("unexpected {other:?}"),
            }
        }

        #[tokio::test]
        async fn write_to_unknown_device_is_404() {
            let (server, ..) = wired();
            let (status, _) =
                post_json(&server, "/api/devices/nope/volume", json!({"volume": 10})).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
        }
    }
}
