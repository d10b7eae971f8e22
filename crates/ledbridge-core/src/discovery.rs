// ── Device discovery ──
//
// A `DiscoverySource` turns some announcement feed into a stream of
// `DiscoveredDevice`s. The bridge runs one source for its whole life;
// source errors are logged and the feed keeps going.

use std::net::IpAddr;
use std::time::Duration;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::WLED_SERVICE_TYPE;
use crate::error::CoreError;
use crate::model::MacAddress;

const DISCOVERY_CHANNEL_SIZE: usize = 64;

/// Pause before reopening a failed mDNS browse.
const BROWSE_RESTART_DELAY: Duration = Duration::from_secs(30);

/// One "device up" announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub name: String,
    pub ip: IpAddr,
    /// From the TXT record; WLED always publishes it.
    pub mac: Option<MacAddress>,
}

/// A feed of device announcements.
pub trait DiscoverySource: Send {
    /// Start the feed. The receiver closes when the source stops or
    /// `cancel` fires.
    fn start(
        self: Box<Self>,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<DiscoveredDevice>, CoreError>;
}

// ── mDNS ─────────────────────────────────────────────────────────────

/// Browses `_wled._tcp.local.` with `mdns-sd`.
pub struct MdnsDiscovery {
    service_type: String,
}

impl MdnsDiscovery {
    pub fn new() -> Self {
        Self {
            service_type: WLED_SERVICE_TYPE.to_owned(),
        }
    }

    pub fn with_service_type(service_type: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
        }
    }
}

impl Default for MdnsDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoverySource for MdnsDiscovery {
    fn start(
        self: Box<Self>,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<DiscoveredDevice>, CoreError> {
        let service_type = self.service_type;
        let first = MdnsSession::open(&service_type)?;
        let (tx, rx) = mpsc::channel(DISCOVERY_CHANNEL_SIZE);

        info!(service = %service_type, "mDNS discovery started");

        let reopen = move || MdnsSession::open(&service_type);
        tokio::spawn(browse_forever(first, reopen, tx, cancel, BROWSE_RESTART_DELAY));
        Ok(rx)
    }
}

// ── Browse sessions ──────────────────────────────────────────────────

/// One open browse. A failed session is closed and replaced.
trait BrowseSession: Send + 'static {
    /// Devices from the next event; empty for events that resolve nothing.
    fn next_batch(&mut self) -> impl Future<Output = Result<Vec<DiscoveredDevice>, String>> + Send;

    fn close(self);
}

struct MdnsSession {
    daemon: ServiceDaemon,
    browse: mdns_sd::Receiver<ServiceEvent>,
    service_type: String,
}

impl MdnsSession {
    fn open(service_type: &str) -> Result<Self, CoreError> {
        let daemon = ServiceDaemon::new().map_err(discovery_err)?;
        let browse = daemon.browse(service_type).map_err(discovery_err)?;
        Ok(Self {
            daemon,
            browse,
            service_type: service_type.to_owned(),
        })
    }
}

impl BrowseSession for MdnsSession {
    async fn next_batch(&mut self) -> Result<Vec<DiscoveredDevice>, String> {
        match self.browse.recv_async().await {
            Ok(ServiceEvent::ServiceResolved(service)) => {
                Ok(devices_from_service(&service, &self.service_type))
            }
            Ok(other) => {
                trace!(event = ?other, "mDNS event");
                Ok(Vec::new())
            }
            Err(e) => Err(e.to_string()),
        }
    }

    fn close(self) {
        if let Err(e) = self.daemon.shutdown() {
            debug!(error = %e, "mDNS daemon shutdown failed");
        }
    }
}

/// Forward announcements until cancelled or nobody listens. A failing
/// session is closed and reopened after `restart_delay`.
async fn browse_forever<S: BrowseSession>(
    first: S,
    reopen: impl Fn() -> Result<S, CoreError> + Send,
    tx: mpsc::Sender<DiscoveredDevice>,
    cancel: CancellationToken,
    restart_delay: Duration,
) {
    let mut session = Some(first);
    loop {
        let mut current = match session.take() {
            Some(current) => current,
            None => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    () = sleep(restart_delay) => {}
                }
                match reopen() {
                    Ok(current) => {
                        info!("mDNS browse restarted");
                        current
                    }
                    Err(e) => {
                        warn!(error = %e, "mDNS browse restart failed");
                        continue;
                    }
                }
            }
        };

        let restart = loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break false,
                batch = current.next_batch() => match batch {
                    Ok(devices) => {
                        if !forward(&tx, devices).await {
                            break false;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "mDNS browse failed, restarting");
                        break true;
                    }
                }
            }
        };

        current.close();
        if !restart {
            break;
        }
    }
}

fn discovery_err(e: mdns_sd::Error) -> CoreError {
    CoreError::Discovery {
        message: e.to_string(),
    }
}

/// Returns `false` once nobody is listening.
async fn forward(tx: &mpsc::Sender<DiscoveredDevice>, devices: Vec<DiscoveredDevice>) -> bool {
    for device in devices {
        if tx.send(device).await.is_err() {
            return false;
        }
    }
    true
}

/// One entry per IPv4 address the service resolved to.
fn devices_from_service(service: &ServiceInfo, service_type: &str) -> Vec<DiscoveredDevice> {
    let name = service
        .get_fullname()
        .strip_suffix(service_type)
        .map(|n| n.trim_end_matches('.'))
        .unwrap_or_else(|| service.get_fullname())
        .to_owned();
    let mac = service
        .get_property_val_str("mac")
        .map(MacAddress::new)
        .filter(|m| !m.is_empty());

    let mut addresses: Vec<IpAddr> = service
        .get_addresses_v4()
        .into_iter()
        .map(|v4| IpAddr::V4(*v4))
        .collect();
    addresses.sort();

    addresses
        .into_iter()
        .map(|ip| DiscoveredDevice {
            name: name.clone(),
            ip,
            mac: mac.clone(),
        })
        .collect()
}

// ── Channel-fed ──────────────────────────────────────────────────────

/// Announcements pushed by hand, used for static setups and tests.
pub struct ChannelDiscovery {
    rx: mpsc::Receiver<DiscoveredDevice>,
}

impl ChannelDiscovery {
    /// Returns the source and the sender feeding it.
    pub fn new() -> (Self, mpsc::Sender<DiscoveredDevice>) {
        let (tx, rx) = mpsc::channel(DISCOVERY_CHANNEL_SIZE);
        (Self { rx }, tx)
    }
}

impl DiscoverySource for ChannelDiscovery {
    fn start(
        self: Box<Self>,
        _cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<DiscoveredDevice>, CoreError> {
        Ok(self.rx)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn service_maps_to_devices() {
        let mut props = HashMap::new();
        props.insert("mac".to_owned(), "A4:CF:12:FD:AE:01".to_owned());
        let service = ServiceInfo::new(
            WLED_SERVICE_TYPE,
            "wled-desk",
            "wled-desk.local.",
            "192.168.1.40",
            80,
            props,
        )
        .unwrap();

        let devices = devices_from_service(&service, WLED_SERVICE_TYPE);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "wled-desk");
        assert_eq!(devices[0].ip, IpAddr::from([192, 168, 1, 40]));
        assert_eq!(devices[0].mac.as_ref().unwrap().as_str(), "a4cf12fdae01");
    }

    #[tokio::test]
    async fn channel_source_forwards_announcements() {
        let (source, tx) = ChannelDiscovery::new();
        let mut rx = Box::new(source).start(CancellationToken::new()).unwrap();

        let device = DiscoveredDevice {
            name: "desk".into(),
            ip: IpAddr::from([10, 0, 0, 2]),
            mac: None,
        };
        tx.send(device.clone()).await.unwrap();
        assert_eq!(rx.recv().await, Some(device));

        drop(tx);
        assert_eq!(rx.recv().await, None);
    }

    struct ScriptedSession {
        batches: VecDeque<Result<Vec<DiscoveredDevice>, String>>,
    }

    impl BrowseSession for ScriptedSession {
        async fn next_batch(&mut self) -> Result<Vec<DiscoveredDevice>, String> {
            match self.batches.pop_front() {
                Some(batch) => batch,
                None => std::future::pending().await,
            }
        }

        fn close(self) {}
    }

    #[tokio::test]
    async fn failed_browse_is_reopened() {
        let device = DiscoveredDevice {
            name: "wled-desk".into(),
            ip: IpAddr::from([10, 0, 0, 7]),
            mac: Some(MacAddress::new("a4cf12fdae01")),
        };
        let failing = ScriptedSession {
            batches: VecDeque::from([Ok(Vec::new()), Err("channel closed".to_owned())]),
        };
        let opens = Arc::new(AtomicUsize::new(0));
        let reopen = {
            let opens = Arc::clone(&opens);
            let device = device.clone();
            move || {
                opens.fetch_add(1, Ordering::SeqCst);
                Ok(ScriptedSession {
                    batches: VecDeque::from([Ok(vec![device.clone()])]),
                })
            }
        };

        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let feed = tokio::spawn(browse_forever(
            failing,
            reopen,
            tx,
            cancel.clone(),
            Duration::from_millis(10),
        ));

        let found = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(found, Some(device));
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert!(!feed.is_finished());

        cancel.cancel();
        feed.await.unwrap();
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn failed_reopen_is_retried() {
        let failing = ScriptedSession {
            batches: VecDeque::from([Err("socket error".to_owned())]),
        };
        let opens = Arc::new(AtomicUsize::new(0));
        let reopen = {
            let opens = Arc::clone(&opens);
            move || {
                if opens.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err(CoreError::Discovery {
                        message: "no interfaces".into(),
                    });
                }
                Ok(ScriptedSession {
                    batches: VecDeque::from([Ok(vec![DiscoveredDevice {
                        name: "porch".into(),
                        ip: IpAddr::from([10, 0, 0, 8]),
                        mac: None,
                    }])]),
                })
            }
        };

        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let feed = tokio::spawn(browse_forever(
            failing,
            reopen,
            tx,
            cancel.clone(),
            Duration::from_millis(10),
        ));

        let found = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(found.unwrap().name, "porch");
        assert_eq!(opens.load(Ordering::SeqCst), 3);

        cancel.cancel();
        feed.await.unwrap();
    }
}
