//! AirPlay receiver discovery over mDNS.
//!
//! Scans `_raop._tcp.local.` (the audio service every AirPlay receiver
//! advertises) for a bounded window and reports the receivers found.
//! Scan failures are transient: the manager logs and retries on the next
//! interval.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use mdns_sd::{ServiceDaemon, ServiceEvent};
use tracing::{debug, warn};

use airbridge_core::error::{Error, Result};
use airbridge_sink::AirPlayEndpoint;

/// RAOP service type every AirPlay audio receiver advertises.
pub const RAOP_SERVICE_TYPE: &str = "_raop._tcp.local.";

/// Seam for the device manager; mocked in tests.
pub trait ReceiverScanner: Send + Sync {
    /// Scan for receivers, blocking for up to `window`.
    fn scan(&self, window: Duration) -> Result<Vec<AirPlayEndpoint>>;
}

/// mDNS-backed scanner.
pub struct MdnsScanner {
    daemon: ServiceDaemon,
}

impl MdnsScanner {
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| Error::Discovery(format!("mdns daemon: {e}")))?;
        Ok(Self { daemon })
    }

    /// Parse one resolved RAOP service into an endpoint.
    ///
    /// RAOP instance names are `AABBCCDDEEFF@Receiver Name`; the MAC part
    /// is the stable identifier.
    fn parse_service(info: &mdns_sd::ServiceInfo) -> Option<AirPlayEndpoint> {
        let instance = info.get_fullname().split('.').next()?;
        let (identifier, name) = match instance.split_once('@') {
            Some((mac, name)) => (mac.to_string(), name.to_string()),
            None => (instance.to_string(), instance.to_string()),
        };
        let address: IpAddr = info.get_addresses().iter().next().copied()?;
        Some(AirPlayEndpoint {
            identifier,
            name,
            address,
            port: info.get_port(),
            model: info.get_property_val_str("am").map(str::to_string),
        })
    }
}

impl ReceiverScanner for MdnsScanner {
    fn scan(&self, window: Duration) -> Result<Vec<AirPlayEndpoint>> {
        let receiver = self
            .daemon
            .browse(RAOP_SERVICE_TYPE)
            .map_err(|e| Error::Discovery(format!("mdns browse: {e}")))?;

        let mut found: HashMap<String, AirPlayEndpoint> = HashMap::new();
        let deadline = Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match receiver.recv_timeout(remaining) {
                Ok(ServiceEvent::ServiceResolved(info)) => {
                    if let Some(endpoint) = Self::parse_service(&info) {
                        debug!(name = %endpoint.name, addr = %endpoint.address, "receiver resolved");
                        found.insert(endpoint.identifier.clone(), endpoint);
                    }
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }

        if let Err(e) = self.daemon.stop_browse(RAOP_SERVICE_TYPE) {
            warn!(%e, "stop_browse failed");
        }
        Ok(found.into_values().collect())
    }
}
