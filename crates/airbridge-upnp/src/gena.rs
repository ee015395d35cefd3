//! GENA eventing: subscription table and NOTIFY fan-out.
//!
//! Control points SUBSCRIBE with a callback URL; every relevant state
//! change sends them a NOTIFY with the LastChange property set. SEQ is
//! strictly increasing per subscription (0 on the initial event). A
//! failed delivery or an expired lease drops that subscription only.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reqwest::Method;
use tracing::{debug, info, warn};

use airbridge_core::device::DeviceId;
use airbridge_core::error::UpnpError;

/// Bound on one NOTIFY POST.
pub const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Lease applied when the subscriber requests none.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(1800);

#[derive(Debug, Clone)]
struct GenaSubscription {
    callback: String,
    service: String,
    expires: Instant,
    next_seq: u32,
}

/// One queued NOTIFY delivery.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub device_id: DeviceId,
    pub sid: String,
    pub callback: String,
    pub seq: u32,
}

/// The subscription table, shared between the HTTP handlers and the
/// NOTIFY dispatcher.
#[derive(Clone, Default)]
pub struct GenaTable {
    inner: Arc<Mutex<HashMap<DeviceId, HashMap<String, GenaSubscription>>>>,
}

impl GenaTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `TIMEOUT: Second-N` header into a lease duration.
    pub fn parse_timeout(header: Option<&str>) -> Duration {
        header
            .and_then(|h| h.trim().strip_prefix("Second-"))
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_LEASE)
    }

    /// Register a new subscription; returns the SID. The caller sends
    /// the initial (SEQ 0) event.
    pub fn subscribe(
        &self,
        device_id: &DeviceId,
        service: &str,
        callback: String,
        lease: Duration,
    ) -> Delivery {
        let sid = format!("uuid:{}", uuid::Uuid::new_v4());
        let mut table = self.inner.lock().unwrap();
        let subs = table.entry(device_id.clone()).or_default();
        subs.insert(
            sid.clone(),
            GenaSubscription {
                callback: callback.clone(),
                service: service.to_string(),
                expires: Instant::now() + lease,
                // SEQ 0 goes to the initial event the caller sends now.
                next_seq: 1,
            },
        );
        info!(device = %device_id, %sid, %service, "gena subscription added");
        Delivery {
            device_id: device_id.clone(),
            sid,
            callback,
            seq: 0,
        }
    }

    /// Renew an existing subscription; 412 (unknown) surfaces as an
    /// error.
    pub fn renew(&self, device_id: &DeviceId, sid: &str, lease: Duration) -> Result<(), UpnpError> {
        let mut table = self.inner.lock().unwrap();
        let sub = table
            .get_mut(device_id)
            .and_then(|subs| subs.get_mut(sid))
            .ok_or_else(|| UpnpError::UnknownSubscription(sid.to_string()))?;
        sub.expires = Instant::now() + lease;
        debug!(device = %device_id, sid, "gena subscription renewed");
        Ok(())
    }

    pub fn unsubscribe(&self, device_id: &DeviceId, sid: &str) -> Result<(), UpnpError> {
        let mut table = self.inner.lock().unwrap();
        let removed = table
            .get_mut(device_id)
            .and_then(|subs| subs.remove(sid))
            .is_some();
        if removed {
            debug!(device = %device_id, sid, "gena subscription removed");
            Ok(())
        } else {
            Err(UpnpError::UnknownSubscription(sid.to_string()))
        }
    }

    /// Drop a subscription after a failed delivery.
    pub fn drop_subscription(&self, device_id: &DeviceId, sid: &str) {
        let mut table = self.inner.lock().unwrap();
        if let Some(subs) = table.get_mut(device_id) {
            if subs.remove(sid).is_some() {
                warn!(device = %device_id, sid, "gena subscription dropped after notify failure");
            }
        }
    }

    /// Allocate deliveries for one device's AVTransport subscribers,
    /// pruning expired leases and bumping each SEQ.
    pub fn deliveries_for(&self, device_id: &DeviceId, service: &str) -> Vec<Delivery> {
        let now = Instant::now();
        let mut table = self.inner.lock().unwrap();
        let Some(subs) = table.get_mut(device_id) else {
            return Vec::new();
        };
        subs.retain(|sid, sub| {
            let live = sub.expires > now;
            if !live {
                debug!(device = %device_id, sid, "gena subscription expired");
            }
            live
        });
        subs.iter_mut()
            .filter(|(_, sub)| sub.service == service)
            .map(|(sid, sub)| {
                let seq = sub.next_seq;
                sub.next_seq += 1;
                Delivery {
                    device_id: device_id.clone(),
                    sid: sid.clone(),
                    callback: sub.callback.clone(),
                    seq,
                }
            })
            .collect()
    }

    pub fn subscription_count(&self, device_id: &DeviceId) -> usize {
        self.inner
            .lock()
            .unwrap()
            .get(device_id)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    /// Forget every subscription for a removed device.
    pub fn remove_device(&self, device_id: &DeviceId) {
        self.inner.lock().unwrap().remove(device_id);
    }
}

/// Send one NOTIFY. The caller drops the subscription on error.
pub async fn send_notify(
    client: &reqwest::Client,
    delivery: &Delivery,
    body: String,
) -> Result<(), UpnpError> {
    let method = Method::from_bytes(b"NOTIFY").expect("valid method token");
    let response = client
        .request(method, &delivery.callback)
        .header("NT", "upnp:event")
        .header("NTS", "upnp:propchange")
        .header("SID", &delivery.sid)
        .header("SEQ", delivery.seq.to_string())
        .header("Content-Type", "text/xml; charset=utf-8")
        .timeout(NOTIFY_TIMEOUT)
        .body(body)
        .send()
        .await
        .map_err(|e| UpnpError::Notify(e.to_string()))?;
    if response.status().is_success() {
        Ok(())
    } else {
        Err(UpnpError::Notify(format!("status {}", response.status())))
    }
}
