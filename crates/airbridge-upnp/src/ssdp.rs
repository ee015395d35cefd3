//! SSDP discovery responder.
//!
//! Listens on UDP 1900 (multicast group 239.255.255.250) for M-SEARCH
//! and answers once per virtual device and matching search target; also
//! announces every device with periodic `ssdp:alive` NOTIFYs.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use airbridge_core::device::DeviceSnapshot;
use airbridge_core::error::{Result, UpnpError};
use airbridge_device::DeviceRegistry;

pub const SSDP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub const SSDP_PORT: u16 = 1900;

/// Interval between ssdp:alive bursts.
const NOTIFY_INTERVAL: Duration = Duration::from_secs(30);

/// Search targets every MediaRenderer answers for.
const SEARCH_TARGETS: [&str; 5] = [
    "upnp:rootdevice",
    "urn:schemas-upnp-org:device:MediaRenderer:1",
    "urn:schemas-upnp-org:service:AVTransport:1",
    "urn:schemas-upnp-org:service:RenderingControl:1",
    "urn:schemas-upnp-org:service:ConnectionManager:1",
];

pub struct SsdpResponder {
    registry: DeviceRegistry,
    local_ip: IpAddr,
    http_port: u16,
}

impl SsdpResponder {
    pub fn new(registry: DeviceRegistry, local_ip: IpAddr, http_port: u16) -> Self {
        Self {
            registry,
            local_ip,
            http_port,
        }
    }

    fn location(&self, snapshot: &DeviceSnapshot) -> String {
        format!(
            "http://{}:{}/device/{}/device.xml",
            self.local_ip,
            self.http_port,
            snapshot.device_id.as_str()
        )
    }

    fn search_response(&self, snapshot: &DeviceSnapshot, st: &str) -> String {
        format!(
            "HTTP/1.1 200 OK\r\n\
             LOCATION: {location}\r\n\
             ST: {st}\r\n\
             USN: {udn}::{st}\r\n\
             CACHE-CONTROL: max-age=1800\r\n\
             SERVER: airbridge UPnP/1.0\r\n\
             EXT:\r\n\
             \r\n",
            location = self.location(snapshot),
            udn = snapshot.device_id.udn(),
        )
    }

    fn alive_notify(&self, snapshot: &DeviceSnapshot, nt: &str) -> String {
        format!(
            "NOTIFY * HTTP/1.1\r\n\
             HOST: {SSDP_MULTICAST_ADDR}:{SSDP_PORT}\r\n\
             NT: {nt}\r\n\
             NTS: ssdp:alive\r\n\
             USN: {udn}::{nt}\r\n\
             LOCATION: {location}\r\n\
             CACHE-CONTROL: max-age=1800\r\n\
             SERVER: airbridge UPnP/1.0\r\n\
             \r\n",
            udn = snapshot.device_id.udn(),
            location = self.location(snapshot),
        )
    }

    fn bind_multicast(&self) -> Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|source| UpnpError::Bind {
                what: "ssdp socket",
                port: SSDP_PORT,
                source,
            })?;
        socket.set_reuse_address(true).ok();
        socket.set_nonblocking(true).map_err(|source| UpnpError::Bind {
            what: "ssdp socket",
            port: SSDP_PORT,
            source,
        })?;
        let addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, SSDP_PORT).into();
        socket.bind(&addr.into()).map_err(|source| UpnpError::Bind {
            what: "ssdp",
            port: SSDP_PORT,
            source,
        })?;
        let IpAddr::V4(local) = self.local_ip else {
            return Err(UpnpError::Bind {
                what: "ssdp multicast (ipv4 only)",
                port: SSDP_PORT,
                source: std::io::Error::new(std::io::ErrorKind::Unsupported, "ipv6 local ip"),
            }
            .into());
        };
        socket
            .join_multicast_v4(&SSDP_MULTICAST_ADDR, &local)
            .map_err(|source| UpnpError::Bind {
                what: "ssdp multicast join",
                port: SSDP_PORT,
                source,
            })?;
        let socket = UdpSocket::from_std(socket.into()).map_err(|source| UpnpError::Bind {
            what: "ssdp tokio socket",
            port: SSDP_PORT,
            source,
        })?;
        Ok(socket)
    }

    /// Run the responder until shutdown.
    pub async fn run(self, mut shutdown: tokio::sync::mpsc::Receiver<()>) -> Result<()> {
        let socket = self.bind_multicast()?;
        info!(port = SSDP_PORT, "ssdp responder listening");

        let mut notify_timer = tokio::time::interval(NOTIFY_INTERVAL);
        notify_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut buf = vec![0u8; 4096];

        loop {
            tokio::select! {
                received = socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, peer)) => {
                            let message = String::from_utf8_lossy(&buf[..len]);
                            if message.starts_with("M-SEARCH") {
                                self.answer_search(&socket, &message, peer).await;
                            }
                        }
                        Err(err) => {
                            warn!(%err, "ssdp recv failed");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
                _ = notify_timer.tick() => self.send_alive(&socket).await,
                _ = shutdown.recv() => break,
            }
        }
        info!("ssdp responder stopped");
        Ok(())
    }

    async fn answer_search(&self, socket: &UdpSocket, message: &str, peer: SocketAddr) {
        let wants_all = message.contains("ssdp:all");
        debug!(%peer, "m-search received");
        for snapshot in self.registry.snapshots() {
            for st in SEARCH_TARGETS {
                if wants_all || message.contains(st) {
                    let response = self.search_response(&snapshot, st);
                    if let Err(err) = socket.send_to(response.as_bytes(), peer).await {
                        debug!(%err, "m-search response send failed");
                    }
                }
            }
        }
    }

    async fn send_alive(&self, socket: &UdpSocket) {
        let dest: SocketAddr = (SSDP_MULTICAST_ADDR, SSDP_PORT).into();
        let snapshots = self.registry.snapshots();
        for snapshot in &snapshots {
            for nt in SEARCH_TARGETS {
                let notify = self.alive_notify(snapshot, nt);
                if let Err(err) = socket.send_to(notify.as_bytes(), dest).await {
                    debug!(%err, "ssdp alive send failed");
                }
            }
        }
        if !snapshots.is_empty() {
            debug!(devices = snapshots.len(), "ssdp alive sent");
        }
    }
}
