//! mDNS/DNS-SD discovery of `_googlecast._tcp.local.` receivers (spec §4.2).
//!
//! The teacher never implemented discovery (punchtop's app layer rolled its
//! own TXT-record parser over the legacy `mdns` crate). This module is
//! grounded instead on the `mdns-sd` `ServiceDaemon`/`ServiceEvent` pattern
//! used for the same service type in the reference pack's popcorn-fx
//! Chromecast player, adapted from a one-shot "first responder" lookup into
//! a long-lived registry with add/update/remove events.

use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::model::{CastInfo, CastType, ServiceEndpoint};

/// Lazily resolves `CastInfo::cast_type`/`manufacturer` when mDNS's `ca` TXT
/// record is missing. mDNS stays authoritative for addressing (spec §4.2
/// Open Question 2); this is the only remaining role for the legacy
/// DIAL/HTTP device-description probe, modeled as an injectable trait
/// object rather than a hardcoded HTTP client so callers can fake it in
/// tests or skip it entirely.
#[async_trait]
pub trait CastTypeProbe: Send + Sync {
    async fn probe(&self, info: &CastInfo) -> Option<(CastType, Option<String>)>;
}

/// `_googlecast._tcp.local.` service type, per Google's Cast discovery spec.
pub(crate) const SERVICE_TYPE: &str = "_googlecast._tcp.local.";

/// Default cast control port advertised when mDNS carries none.
pub(crate) const DEFAULT_CAST_PORT: u16 = 8009;

/// Discovery failure modes.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The underlying `mdns-sd` daemon could not be started or stopped.
    #[error("mdns daemon error: {0}")]
    Daemon(#[from] mdns_sd::Error),
    /// A `discover_listed` call's deadline elapsed before every requested
    /// name/uuid was resolved.
    #[error("timed out waiting for {0} receiver(s) to resolve")]
    Timeout(usize),
}

/// Added, refreshed, or expired registry entry (spec §4.2).
#[derive(Clone, Debug)]
pub enum DiscoveryEvent {
    /// A previously unseen receiver resolved.
    Added(CastInfo),
    /// A known receiver re-announced, e.g. with a new address.
    Updated(CastInfo),
    /// A receiver's mDNS record expired or was explicitly removed.
    Removed(Uuid),
}

/// Long-lived mDNS browser and receiver registry.
///
/// Clone is cheap (an `Arc` handle); every clone shares the same daemon,
/// registry, and event bus.
#[derive(Clone)]
pub struct Discovery {
    inner: Arc<Inner>,
}

struct Inner {
    daemon: ServiceDaemon,
    registry: RwLock<HashMap<Uuid, CastInfo>>,
    /// Uuids seeded from `start`'s `known_hosts` rather than discovered over
    /// mDNS. An expired mDNS record for one of these must not drop the
    /// registry entry (spec §4.2 invariant).
    static_hosts: HashSet<Uuid>,
    events: broadcast::Sender<DiscoveryEvent>,
}

impl Discovery {
    /// Start the mDNS daemon and begin browsing for `_googlecast._tcp.local.`
    /// instances, seeding the registry with any `known_hosts` that should be
    /// reachable even if mDNS never announces them (spec §4.2).
    pub fn start(known_hosts: impl IntoIterator<Item = CastInfo>) -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new()?;
        let receiver = daemon.browse(SERVICE_TYPE)?;

        let mut registry = HashMap::new();
        let mut static_hosts = HashSet::new();
        for info in known_hosts {
            static_hosts.insert(info.uuid);
            registry.insert(info.uuid, info);
        }

        let (events, _) = broadcast::channel(64);
        let inner = Arc::new(Inner {
            daemon,
            registry: RwLock::new(registry),
            static_hosts,
            events,
        });

        tokio::spawn(run_event_loop(inner.clone(), receiver));

        Ok(Self { inner })
    }

    /// Stop browsing. The registry snapshot returned by `list` remains
    /// readable, but no further `DiscoveryEvent`s will be published.
    pub fn stop(&self) -> Result<(), DiscoveryError> {
        self.inner.daemon.stop_browse(SERVICE_TYPE)?;
        Ok(())
    }

    /// Snapshot of every currently known receiver.
    pub async fn list(&self) -> Vec<CastInfo> {
        self.inner.registry.read().await.values().cloned().collect()
    }

    /// Look up a single receiver by id.
    pub async fn get(&self, uuid: Uuid) -> Option<CastInfo> {
        self.inner.registry.read().await.get(&uuid).cloned()
    }

    /// Subscribe to registry changes.
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.inner.events.subscribe()
    }

    /// Resolve `cast_type`/`manufacturer` for `uuid` via `probe` if still
    /// unknown, updating the registry entry in place.
    pub async fn ensure_cast_type(&self, uuid: Uuid, probe: &dyn CastTypeProbe) -> Option<CastInfo> {
        let mut info = self.get(uuid).await?;
        if info.cast_type.is_none() {
            if let Some((cast_type, manufacturer)) = probe.probe(&info).await {
                info.cast_type = Some(cast_type);
                info.manufacturer = manufacturer;
                self.inner.registry.write().await.insert(uuid, info.clone());
            }
        }
        Some(info)
    }

    /// Block until every receiver named by `friendly_names` or `uuids` has
    /// been resolved, or `timeout` elapses (spec §4.2 `discover_listed`).
    pub async fn discover_listed(
        &self,
        friendly_names: &[String],
        uuids: &[Uuid],
        timeout: Duration,
    ) -> Result<Vec<CastInfo>, DiscoveryError> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut subscription = self.subscribe();

        loop {
            let snapshot = self.list().await;
            let matches: Vec<CastInfo> = snapshot
                .into_iter()
                .filter(|info| {
                    uuids.contains(&info.uuid) || friendly_names.contains(&info.friendly_name)
                })
                .collect();

            let wanted = uuids.len() + friendly_names.len();
            if matches.len() >= wanted {
                return Ok(matches);
            }

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(DiscoveryError::Timeout(wanted - matches.len()));
            }

            let _ = tokio::time::timeout(remaining, subscription.recv()).await;
        }
    }
}

async fn run_event_loop(inner: Arc<Inner>, receiver: mdns_sd::Receiver<ServiceEvent>) {
    while let Ok(event) = receiver.recv_async().await {
        match event {
            ServiceEvent::ServiceResolved(info) => {
                if let Some(cast_info) = parse_service_info(&info) {
                    let uuid = cast_info.uuid;
                    let is_new = {
                        let mut registry = inner.registry.write().await;
                        let is_new = !registry.contains_key(&uuid);
                        registry.insert(uuid, cast_info.clone());
                        is_new
                    };
                    let event = if is_new {
                        DiscoveryEvent::Added(cast_info)
                    } else {
                        DiscoveryEvent::Updated(cast_info)
                    };
                    let _ = inner.events.send(event);
                }
            }
            ServiceEvent::ServiceRemoved(_ty, fullname) => {
                if let Some(uuid) = uuid_from_instance_name(&fullname) {
                    if inner.static_hosts.contains(&uuid) {
                        debug!("ignoring mdns expiry for statically configured host {}", uuid);
                    } else {
                        inner.registry.write().await.remove(&uuid);
                        let _ = inner.events.send(DiscoveryEvent::Removed(uuid));
                    }
                }
            }
            _ => {}
        }
    }
}

/// Build a `CastInfo` from a resolved `ServiceInfo`'s TXT records
/// (`id`, `fn`, `md`, `ca`, spec §4.2). Returns `None` if the mandatory `id`
/// record is missing or isn't a parseable uuid.
fn parse_service_info(info: &ServiceInfo) -> Option<CastInfo> {
    let id = info.get_property_val_str("id")?;
    let uuid = Uuid::parse_str(id).ok()?;

    let friendly_name = info
        .get_property_val_str("fn")
        .unwrap_or_else(|| info.get_hostname())
        .to_owned();
    let model_name = info.get_property_val_str("md").unwrap_or_default().to_owned();
    let cast_type = info
        .get_property_val_str("ca")
        .and_then(|bits| bits.parse::<u32>().ok())
        .map(capability_bits_to_cast_type);

    let port = if info.get_port() == 0 {
        DEFAULT_CAST_PORT
    } else {
        info.get_port()
    };

    let services: Vec<ServiceEndpoint> = info
        .get_addresses()
        .iter()
        .map(|addr| ServiceEndpoint::Host(SocketAddr::new(IpAddr::from(*addr), port)))
        .collect();
    let host = match services.first() {
        Some(ServiceEndpoint::Host(addr)) => Some(*addr),
        _ => None,
    };

    Some(CastInfo {
        services,
        uuid,
        model_name,
        friendly_name,
        host,
        port,
        cast_type,
        manufacturer: None,
    })
}

/// Decode the `ca` TXT record's capability bitmask into a `CastType`.
/// Bit 5 (`0x20`) marks multizone groups, bit 2 (`0x04`) marks video-capable
/// receivers; anything else is treated as audio-only.
fn capability_bits_to_cast_type(bits: u32) -> CastType {
    if bits & 0x20 != 0 {
        CastType::Group
    } else if bits & 0x04 != 0 {
        CastType::Video
    } else {
        CastType::Audio
    }
}

fn uuid_from_instance_name(fullname: &str) -> Option<Uuid> {
    fullname
        .split('.')
        .next()
        .and_then(|instance| Uuid::parse_str(instance).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_bits_classify_group_over_video() {
        assert_eq!(capability_bits_to_cast_type(0x24), CastType::Group);
        assert_eq!(capability_bits_to_cast_type(0x04), CastType::Video);
        assert_eq!(capability_bits_to_cast_type(0x00), CastType::Audio);
    }

    #[tokio::test]
    async fn discover_listed_times_out_with_no_matches() {
        let discovery = Discovery::start(std::iter::empty()).expect("daemon starts");
        let err = discovery
            .discover_listed(&["Living Room".to_owned()], &[], Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Timeout(1)));
    }
}
