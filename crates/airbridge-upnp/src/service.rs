//! The per-device UPnP HTTP surface and the NOTIFY dispatcher.
//!
//! Routes, all under the single UPnP port:
//!
//! ```text
//! GET  /device/{id}/device.xml              description
//! GET  /device/{id}/{Service}.xml           SCPDs
//! POST /device/{id}/ctl/{Service}           SOAP control
//! SUBSCRIBE / UNSUBSCRIBE /device/{id}/evt/{Service}
//! ```
//!
//! SOAP actions translate into command events on the bus; reads are
//! answered from registry snapshots. The dispatcher task listens for
//! STATE_CHANGED and fans NOTIFYs out to AVTransport subscribers.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::Router;
use tracing::{debug, info, warn};

use airbridge_core::bus::EventBus;
use airbridge_core::device::{format_hms, parse_hms, DeviceId, DeviceSnapshot};
use airbridge_core::error::{Result, UpnpError};
use airbridge_core::events::{Event, EventType};
use airbridge_device::DeviceRegistry;

use crate::didl::parse_didl_metadata;
use crate::gena::{send_notify, GenaTable};
use crate::soap;
use crate::xml;

/// How long SetAVTransportURI waits for ffprobe before giving up.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

struct ServiceState {
    registry: DeviceRegistry,
    bus: Arc<EventBus>,
    gena: GenaTable,
    http_client: reqwest::Client,
}

/// The UPnP control/description/eventing service.
pub struct UpnpService {
    state: Arc<ServiceState>,
    local_ip: IpAddr,
    http_port: u16,
}

impl UpnpService {
    pub fn new(
        registry: DeviceRegistry,
        bus: Arc<EventBus>,
        local_ip: IpAddr,
        http_port: u16,
    ) -> Self {
        Self {
            state: Arc::new(ServiceState {
                registry,
                bus,
                gena: GenaTable::new(),
                http_client: reqwest::Client::new(),
            }),
            local_ip,
            http_port,
        }
    }

    pub fn gena(&self) -> GenaTable {
        self.state.gena.clone()
    }

    /// The HTTP router (separable for tests).
    pub fn router(&self) -> Router {
        Router::new()
            .route("/device/:device_id/device.xml", get(device_xml))
            .route(
                "/device/:device_id/AVTransport.xml",
                get(|| async { scpd(xml::AV_TRANSPORT_SCPD) }),
            )
            .route(
                "/device/:device_id/RenderingControl.xml",
                get(|| async { scpd(xml::RENDERING_CONTROL_SCPD) }),
            )
            .route(
                "/device/:device_id/ConnectionManager.xml",
                get(|| async { scpd(xml::CONNECTION_MANAGER_SCPD) }),
            )
            .route("/device/:device_id/ctl/AVTransport", post(av_transport_control))
            .route(
                "/device/:device_id/ctl/RenderingControl",
                post(rendering_control),
            )
            .route(
                "/device/:device_id/ctl/ConnectionManager",
                post(connection_manager_control),
            )
            .route("/device/:device_id/evt/:service", any(event_subscription))
            .with_state(Arc::clone(&self.state))
    }

    /// Serve HTTP and dispatch NOTIFYs until shutdown.
    pub async fn serve(self, mut shutdown: tokio::sync::mpsc::Receiver<()>) -> Result<()> {
        let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::UNSPECIFIED, self.http_port))
            .await
            .map_err(|source| UpnpError::Bind {
                what: "upnp http",
                port: self.http_port,
                source,
            })?;
        info!(ip = %self.local_ip, port = self.http_port, "upnp service listening");

        let dispatcher = tokio::spawn(notify_dispatcher(Arc::clone(&self.state)));
        let router = self.router();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await
            .map_err(|source| UpnpError::Bind {
                what: "upnp http serve",
                port: self.http_port,
                source,
            })?;
        dispatcher.abort();
        Ok(())
    }
}

/// STATE_CHANGED → NOTIFY fan-out. Failed deliveries drop their
/// subscription; other subscribers are unaffected.
async fn notify_dispatcher(state: Arc<ServiceState>) {
    let mut sub = state.bus.subscribe(&[EventType::StateChanged], None);
    while let Some(event) = sub.recv().await {
        let Some(device_id) = event.device_id else {
            continue;
        };
        let Some(snapshot) = state.registry.snapshot(&device_id) else {
            state.gena.remove_device(&device_id);
            continue;
        };
        let body = xml::last_change_body(&snapshot);
        for delivery in state.gena.deliveries_for(&device_id, "AVTransport") {
            let client = state.http_client.clone();
            let gena = state.gena.clone();
            let body = body.clone();
            tokio::spawn(async move {
                if let Err(err) = send_notify(&client, &delivery, body).await {
                    debug!(sid = %delivery.sid, %err, "notify failed");
                    gena.drop_subscription(&delivery.device_id, &delivery.sid);
                }
            });
        }
    }
}

fn xml_response(body: String) -> Response {
    ([("content-type", "text/xml; charset=\"utf-8\"")], body).into_response()
}

fn scpd(document: &'static str) -> Response {
    xml_response(document.to_string())
}

fn soap_fault(code: u16, description: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        [("content-type", "text/xml; charset=\"utf-8\"")],
        soap::fault(code, description),
    )
        .into_response()
}

fn lookup(state: &ServiceState, device_id: &str) -> Option<(DeviceId, DeviceSnapshot)> {
    let id = DeviceId::from(device_id);
    state.registry.snapshot(&id).map(|snap| (id, snap))
}

async fn device_xml(
    State(state): State<Arc<ServiceState>>,
    Path(device_id): Path<String>,
) -> Response {
    match lookup(&state, &device_id) {
        Some((_, snapshot)) => xml_response(xml::device_description(&snapshot)),
        None => (StatusCode::NOT_FOUND, "device not found").into_response(),
    }
}

async fn av_transport_control(
    State(state): State<Arc<ServiceState>>,
    Path(device_id): Path<String>,
    body: Bytes,
) -> Response {
    let Some((id, snapshot)) = lookup(&state, &device_id) else {
        return (StatusCode::NOT_FOUND, "device not found").into_response();
    };
    let body = String::from_utf8_lossy(&body).into_owned();
    let Some(action) = soap::parse_action(&body) else {
        return soap_fault(401, "Invalid Action");
    };
    debug!(device = %id, %action, "avtransport action");

    let service = "AVTransport";
    match action.as_str() {
        "SetAVTransportURI" => {
            let Some(raw_uri) = soap::argument(&body, "CurrentURI") else {
                return soap_fault(402, "Invalid Args");
            };
            let uri = xml::xml_unescape(raw_uri);
            let didl = soap::argument(&body, "CurrentURIMetaData")
                .map(xml::xml_unescape)
                .unwrap_or_default();
            let mut metadata = parse_didl_metadata(&didl);

            // The DIDL often omits duration; ask ffprobe, bounded, and
            // only delay the command, not the SOAP response.
            let needs_probe = metadata.as_ref().map(|m| m.duration_s <= 0.0).unwrap_or(true);
            let bus = Arc::clone(&state.bus);
            if needs_probe {
                let probe_uri = uri.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    let probed = airbridge_media::probe_url(&probe_uri, PROBE_TIMEOUT).await;
                    match probed {
                        Ok(info) if info.duration_s > 0.0 => {
                            let mut meta = metadata.take().unwrap_or_default();
                            meta.duration_s = info.duration_s;
                            debug!(device = %id, duration = info.duration_s, codec = %info.codec, "probed media");
                            bus.publish(Event::set_uri(id, probe_uri, Some(meta)));
                        }
                        other => {
                            if let Err(err) = other {
                                debug!(device = %id, %err, "media probe failed");
                            }
                            bus.publish(Event::set_uri(id, probe_uri, metadata.take()));
                        }
                    }
                });
            } else {
                bus.publish(Event::set_uri(id, uri, metadata));
            }
            xml_response(soap::response(&action, service, ""))
        }
        "Play" => {
            state
                .bus
                .publish(Event::play(id, None, snapshot.elapsed_s));
            xml_response(soap::response(&action, service, ""))
        }
        "Pause" => {
            state.bus.publish(Event::pause(id));
            xml_response(soap::response(&action, service, ""))
        }
        "Stop" => {
            state.bus.publish(Event::stop(id));
            xml_response(soap::response(&action, service, ""))
        }
        "Seek" => {
            let Some(target) = soap::argument(&body, "Target") else {
                return soap_fault(402, "Invalid Args");
            };
            let position = parse_hms(target);
            // Duplicate-seek filter: some controllers re-send the
            // current position on every progress poll.
            if (position - snapshot.elapsed_s).abs() < 1.0 {
                debug!(device = %device_id, position, "seek to current position ignored");
            } else {
                state.bus.publish(Event::seek(id, position));
            }
            xml_response(soap::response(&action, service, ""))
        }
        "GetPositionInfo" => {
            let position = format_hms(snapshot.elapsed_s);
            let duration = format_hms(snapshot.duration_s);
            let uri = xml::xml_escape(&snapshot.uri);
            xml_response(soap::response(
                &action,
                service,
                &format!(
                    "\n      <Track>1</Track>\
                     \n      <TrackDuration>{duration}</TrackDuration>\
                     \n      <TrackMetaData></TrackMetaData>\
                     \n      <TrackURI>{uri}</TrackURI>\
                     \n      <RelTime>{position}</RelTime>\
                     \n      <AbsTime>{position}</AbsTime>\
                     \n      <RelCount>2147483647</RelCount>\
                     \n      <AbsCount>2147483647</AbsCount>"
                ),
            ))
        }
        "GetTransportInfo" => xml_response(soap::response(
            &action,
            service,
            &format!(
                "\n      <CurrentTransportState>{}</CurrentTransportState>\
                 \n      <CurrentTransportStatus>OK</CurrentTransportStatus>\
                 \n      <CurrentSpeed>1</CurrentSpeed>",
                snapshot.transport_state.as_str()
            ),
        )),
        "GetMediaInfo" => {
            let duration = format_hms(snapshot.duration_s);
            let uri = xml::xml_escape(&snapshot.uri);
            xml_response(soap::response(
                &action,
                service,
                &format!(
                    "\n      <NrTracks>1</NrTracks>\
                     \n      <MediaDuration>{duration}</MediaDuration>\
                     \n      <CurrentURI>{uri}</CurrentURI>\
                     \n      <CurrentURIMetaData></CurrentURIMetaData>\
                     \n      <NextURI></NextURI>\
                     \n      <NextURIMetaData></NextURIMetaData>\
                     \n      <PlayMedium>NETWORK</PlayMedium>\
                     \n      <RecordMedium>NOT_IMPLEMENTED</RecordMedium>\
                     \n      <WriteStatus>NOT_IMPLEMENTED</WriteStatus>"
                ),
            ))
        }
        "GetCurrentTransportActions" => xml_response(soap::response(
            &action,
            service,
            &format!(
                "<Actions>{}</Actions>",
                snapshot.transport_state.available_actions()
            ),
        )),
        _ => {
            warn!(device = %device_id, %action, "unsupported avtransport action");
            soap_fault(401, "Invalid Action")
        }
    }
}

async fn rendering_control(
    State(state): State<Arc<ServiceState>>,
    Path(device_id): Path<String>,
    body: Bytes,
) -> Response {
    let Some((id, snapshot)) = lookup(&state, &device_id) else {
        return (StatusCode::NOT_FOUND, "device not found").into_response();
    };
    let body = String::from_utf8_lossy(&body).into_owned();
    let Some(action) = soap::parse_action(&body) else {
        return soap_fault(401, "Invalid Action");
    };

    let service = "RenderingControl";
    match action.as_str() {
        "GetVolume" => xml_response(soap::response(
            &action,
            service,
            &format!("<CurrentVolume>{}</CurrentVolume>", snapshot.volume),
        )),
        "SetVolume" => {
            let Some(volume) = soap::argument(&body, "DesiredVolume")
                .and_then(|v| v.trim().parse::<i64>().ok())
            else {
                return soap_fault(402, "Invalid Args");
            };
            let volume = volume.clamp(0, 100) as u8;
            state.bus.publish(Event::set_volume(id, volume));
            xml_response(soap::response(&action, service, ""))
        }
        "GetMute" => xml_response(soap::response(
            &action,
            service,
            &format!("<CurrentMute>{}</CurrentMute>", u8::from(snapshot.muted)),
        )),
        "SetMute" => {
            let Some(muted) = soap::argument(&body, "DesiredMute") else {
                return soap_fault(402, "Invalid Args");
            };
            let muted = matches!(muted.trim(), "1" | "true" | "yes");
            state.bus.publish(Event::set_mute(id, muted));
            xml_response(soap::response(&action, service, ""))
        }
        _ => soap_fault(401, "Invalid Action"),
    }
}

async fn connection_manager_control(
    State(state): State<Arc<ServiceState>>,
    Path(device_id): Path<String>,
    _body: Bytes,
) -> Response {
    if lookup(&state, &device_id).is_none() {
        return (StatusCode::NOT_FOUND, "device not found").into_response();
    }
    xml_response(soap::response(
        "GetProtocolInfo",
        "ConnectionManager",
        &format!(
            "<Source></Source><Sink>{}</Sink>",
            xml::SINK_PROTOCOL_INFO
        ),
    ))
}

async fn event_subscription(
    State(state): State<Arc<ServiceState>>,
    Path((device_id, service)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let Some((id, snapshot)) = lookup(&state, &device_id) else {
        return (StatusCode::NOT_FOUND, "device not found").into_response();
    };
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    match method.as_str() {
        "SUBSCRIBE" => {
            let lease = GenaTable::parse_timeout(header("TIMEOUT"));
            if let Some(sid) = header("SID") {
                // Renewal.
                return match state.gena.renew(&id, sid, lease) {
                    Ok(()) => subscription_ok(sid, lease),
                    Err(_) => StatusCode::PRECONDITION_FAILED.into_response(),
                };
            }
            let Some(callback) = header("CALLBACK")
                .and_then(|raw| raw.split('<').nth(1))
                .and_then(|raw| raw.split('>').next())
                .map(str::to_string)
            else {
                return StatusCode::BAD_REQUEST.into_response();
            };
            let delivery = state.gena.subscribe(&id, &service, callback, lease);

            // Initial event (SEQ 0) for AVTransport subscribers.
            if service == "AVTransport" {
                let client = state.http_client.clone();
                let gena = state.gena.clone();
                let body = xml::last_change_body(&snapshot);
                let initial = delivery.clone();
                tokio::spawn(async move {
                    if let Err(err) = send_notify(&client, &initial, body).await {
                        debug!(sid = %initial.sid, %err, "initial notify failed");
                        gena.drop_subscription(&initial.device_id, &initial.sid);
                    }
                });
            }
            subscription_ok(&delivery.sid, lease)
        }
        "UNSUBSCRIBE" => match header("SID") {
            Some(sid) => match state.gena.unsubscribe(&id, sid) {
                Ok(()) => StatusCode::OK.into_response(),
                Err(_) => StatusCode::PRECONDITION_FAILED.into_response(),
            },
            None => StatusCode::PRECONDITION_FAILED.into_response(),
        },
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

fn subscription_ok(sid: &str, lease: Duration) -> Response {
    (
        StatusCode::OK,
        [
            ("SID", sid.to_string()),
            ("TIMEOUT", format!("Second-{}", lease.as_secs())),
        ],
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use airbridge_core::device::{DeviceKind, TransportState};
    use airbridge_core::events::EventPayload;
    use std::sync::RwLock;
    use tower::ServiceExt;

    // Drive the router without a socket via tower's oneshot.
    async fn call_once(
        router: Router,
        request: axum::http::Request<axum::body::Body>,
    ) -> axum::http::Response<axum::body::Body> {
        router.oneshot(request).await.unwrap()
    }

    fn wired() -> (UpnpService, Arc<EventBus>, DeviceRegistry, DeviceId) {
        let registry = DeviceRegistry::new();
        let bus = EventBus::new();
        let id = DeviceId::from("abc");
        let mut snap =
            DeviceSnapshot::new(id.clone(), "Kitchen [D]".into(), DeviceKind::AirPlay);
        snap.uri = "http://x/t.flac".into();
        snap.transport_state = TransportState::Playing;
        snap.elapsed_s = 12.0;
        snap.duration_s = 180.0;
        snap.volume = 30;
        registry.insert(id.clone(), Arc::new(RwLock::new(snap)));
        let service = UpnpService::new(
            registry.clone(),
            Arc::clone(&bus),
            IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            8088,
        );
        (service, bus, registry, id)
    }

    fn soap_request(path: &str, action: &str, service: &str, args: &str) -> axum::http::Request<axum::body::Body> {
        let body = format!(
            r#"<?xml version="1.0"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><u:{action} xmlns:u="urn:schemas-upnp-org:service:{service}:1"><InstanceID>0</InstanceID>{args}</u:{action}></s:Body></s:Envelope>"#
        );
        axum::http::Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "text/xml")
            .body(axum::body::Body::from(body))
            .unwrap()
    }

    async fn body_text(response: axum::http::Response<axum::body::Body>) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    mod descriptions {
        use super::*;

        #[tokio::test]
        async fn device_xml_is_served() {
            let (service, _bus, _registry, _id) = wired();
            let request = axum::http::Request::builder()
                .uri("/device/abc/device.xml")
                .body(axum::body::Body::empty())
                .unwrap();
            let response = call_once(service.router(), request).await;
            assert_eq!(response.status(), StatusCode::OK);
            let text = body_text(response).await;
            assert!(text.contains("Kitchen [D]"));
        }

        #[tokio::test]
        async fn unknown_device_is_404() {
            let (service, ..) = wired();
            let request = axum::http::Request::builder()
                .uri("/device/nope/device.xml")
                .body(axum::body::Body::empty())
                .unwrap();
            let response = call_once(service.router(), request).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }

    mod transport_actions {
        use super::*;

        #[tokio::test]
        async fn play_publishes_the_command() {
            let (service, bus, _registry, id) = wired();
            let mut commands = bus.subscribe(&[EventType::CmdPlay], Some(id));
            let response = call_once(
                service.router(),
                soap_request(
                    "/device/abc/ctl/AVTransport",
                    "Play",
                    "AVTransport",
                    "<Speed>1</Speed>",
                ))
                .await;
            assert_eq!(response.status(), StatusCode::OK);
            let event = commands.try_recv().expect("command published");
            assert!(matches!(event.payload, EventPayload::Play { .. }));
        }

        #[tokio::test]
        async fn seek_parses_rel_time_target() {
            let (service, bus, _registry, id) = wired();
            let mut commands = bus.subscribe(&[EventType::CmdSeek], Some(id));
            let response = call_once(
                service.router(),
                soap_request(
                    "/device/abc/ctl/AVTransport",
                    "Seek",
                    "AVTransport",
                    "<Unit>REL_TIME</Unit><Target>00:01:30</Target>",
                ))
                .await;
            assert_eq!(response.status(), StatusCode::OK);
            match commands.try_recv().unwrap().payload {
                EventPayload::Seek { position_s } => assert_eq!(position_s, 90.0),
                other => panic!("unexpected {other:?}"),
            }
        }

        #[tokio::test]
        async fn seek_to_current_position_is_filtered() {
            let (service, bus, _registry, id) = wired();
            let mut commands = bus.subscribe(&[EventType::CmdSeek], Some(id));
            let response = call_once(
                service.router(),
                soap_request(
                    "/device/abc/ctl/AVTransport",
                    "Seek",
                    "AVTransport",
                    "<Unit>REL_TIME</Unit><Target>00:00:12</Target>",
                ))
                .await;
            assert_eq!(response.status(), StatusCode::OK);
            assert!(commands.try_recv().is_none(), "duplicate seek suppressed");
        }

        #[tokio::test]
        async fn get_position_info_reads_the_snapshot() {
            let (service, ..) = wired();
            let response = call_once(
                service.router(),
                soap_request(
                    "/device/abc/ctl/AVTransport",
                    "GetPositionInfo",
                    "AVTransport",
                    "",
                ))
                .await;
            let text = body_text(response).await;
            assert!(text.contains("<RelTime>00:00:12</RelTime>"));
            assert!(text.contains("<TrackDuration>00:03:00</TrackDuration>"));
        }

        #[tokio::test]
        async fn get_transport_info_reports_playing() {
            let (service, ..) = wired();
            let response = call_once(
                service.router(),
                soap_request(
                    "/device/abc/ctl/AVTransport",
                    "GetTransportInfo",
                    "AVTransport",
                    "",
                ))
                .await;
            let text = body_text(response).await;
            assert!(text.contains("<CurrentTransportState>PLAYING</CurrentTransportState>"));
        }

        #[tokio::test]
        async fn malformed_soap_is_a_fault() {
            let (service, ..) = wired();
            let request = axum::http::Request::builder()
                .method("POST")
                .uri("/device/abc/ctl/AVTransport")
                .body(axum::body::Body::from("not soap"))
                .unwrap();
            let response = call_once(service.router(), request).await;
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
            let text = body_text(response).await;
            assert!(text.contains("UPnPError"));
        }

        #[tokio::test]
        async fn set_uri_with_didl_publishes_metadata() {
            let (service, bus, _registry, id) = wired();
            let mut commands = bus.subscribe(&[EventType::CmdSetUri], Some(id));
            let didl = xml::xml_escape(
                r#"<item><dc:title>Song</dc:title><res duration="0:03:20">u</res></item>"#,
            );
            let args = format!(
                "<CurrentURI>http://x/song.mp3</CurrentURI><CurrentURIMetaData>{didl}</CurrentURIMetaData>"
            );
            let response = call_once(
                service.router(),
                soap_request(
                    "/device/abc/ctl/AVTransport",
                    "SetAVTransportURI",
                    "AVTransport",
                    &args,
                ))
                .await;
            assert_eq!(response.status(), StatusCode::OK);
            // Duration known from DIDL, so no probe round trip.
            match commands.try_recv().unwrap().payload {
                EventPayload::SetUri { uri, metadata } => {
                    assert_eq!(uri, "http://x/song.mp3");
                    let metadata = metadata.unwrap();
                    assert_eq!(metadata.title.as_deref(), Some("Song"));
                    assert_eq!(metadata.duration_s, 200.0);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    mod rendering_actions {
        use super::*;

        #[tokio::test]
        async fn set_volume_clamps_and_publishes() {
            let (service, bus, _registry, id) = wired();
            let mut commands = bus.subscribe(&[EventType::CmdSetVolume], Some(id));
            let response = call_once(
                service.router(),
                soap_request(
                    "/device/abc/ctl/RenderingControl",
                    "SetVolume",
                    "RenderingControl",
                    "<Channel>Master</Channel><DesiredVolume>400</DesiredVolume>",
                ))
                .await;
            assert_eq!(response.status(), StatusCode::OK);
            match commands.try_recv().unwrap().payload {
                EventPayload::SetVolume { volume } => assert_eq!(volume, 100),
                other => panic!("unexpected {other:?}"),
            }
        }

        #[tokio::test]
        async fn get_volume_reads_the_snapshot() {
            let (service, ..) = wired();
            let response = call_once(
                service.router(),
                soap_request(
                    "/device/abc/ctl/RenderingControl",
                    "GetVolume",
                    "RenderingControl",
                    "<Channel>Master</Channel>",
                ))
                .await;
            let text = body_text(response).await;
            assert!(text.contains("<CurrentVolume>30</CurrentVolume>"));
        }

        #[tokio::test]
        async fn set_mute_parses_the_flag() {
            let (service, bus, _registry, id) = wired();
            let mut commands = bus.subscribe(&[EventType::CmdSetMute], Some(id));
            call_once(
                service.router(),
                soap_request(
                    "/device/abc/ctl/RenderingControl",
                    "SetMute",
                    "RenderingControl",
                    "<Channel>Master</Channel><DesiredMute>1</DesiredMute>",
                ))
                .await;
            match commands.try_recv().unwrap().payload {
                EventPayload::SetMute { muted } => assert!(muted),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    mod connection_manager {
        use super::*;

        #[tokio::test]
        async fn protocol_info_lists_audio_formats() {
            let (service, ..) = wired();
            let response = call_once(
                service.router(),
                soap_request(
                    "/device/abc/ctl/ConnectionManager",
                    "GetProtocolInfo",
                    "ConnectionManager",
                    "",
                ))
                .await;
            let text = body_text(response).await;
            assert!(text.contains("audio/flac"));
            assert!(text.contains("audio/mpeg"));
        }
    }

    mod gena_endpoints {
        use super::*;

        fn subscribe_request(callback: &str) -> axum::http::Request<axum::body::Body> {
            axum::http::Request::builder()
                .method("SUBSCRIBE")
                .uri("/device/abc/evt/AVTransport")
                .header("CALLBACK", format!("<{callback}>"))
                .header("NT", "upnp:event")
                .header("TIMEOUT", "Second-300")
                .body(axum::body::Body::empty())
                .unwrap()
        }

        #[tokio::test]
        async fn subscribe_returns_sid_and_timeout() {
            let (service, ..) = wired();
            let router = service.router();
            let response = call_once(router, subscribe_request("http://cp/cb")).await;
            assert_eq!(response.status(), StatusCode::OK);
            let sid = response.headers().get("SID").unwrap().to_str().unwrap();
            assert!(sid.starts_with("uuid:"));
            assert_eq!(
                response.headers().get("TIMEOUT").unwrap().to_str().unwrap(),
                "Second-300"
            );
        }

        #[tokio::test]
        async fn renewal_of_unknown_sid_is_412() {
            let (service, ..) = wired();
            let request = axum::http::Request::builder()
                .method("SUBSCRIBE")
                .uri("/device/abc/evt/AVTransport")
                .header("SID", "uuid:unknown")
                .header("TIMEOUT", "Second-300")
                .body(axum::body::Body::empty())
                .unwrap();
            let response = call_once(service.router(), request).await;
            assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
        }

        #[tokio::test]
        async fn subscribe_without_callback_is_400() {
            let (service, ..) = wired();
            let request = axum::http::Request::builder()
                .method("SUBSCRIBE")
                .uri("/device/abc/evt/AVTransport")
                .body(axum::body::Body::empty())
                .unwrap();
            let response = call_once(service.router(), request).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }

        #[tokio::test]
        async fn unsubscribe_unknown_sid_is_412() {
            let (service, ..) = wired();
            let request = axum::http::Request::builder()
                .method("UNSUBSCRIBE")
                .uri("/device/abc/evt/AVTransport")
                .header("SID", "uuid:unknown")
                .body(axum::body::Body::empty())
                .unwrap();
            let response = call_once(service.router(), request).await;
            assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
        }
    }
}
