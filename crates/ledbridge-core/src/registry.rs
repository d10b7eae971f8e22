// ── Device registry ──
//
// In-memory map from device IP to its `DeviceRecord`. MAC lookups go
// through a secondary index, since the IP may change on DHCP renewal
// while the MAC stays put. Every mutation rebuilds a snapshot that
// subscribers receive through a `watch` channel.

use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::model::{DeviceRecord, MacAddress};

pub struct DeviceRegistry {
    by_ip: DashMap<IpAddr, DeviceRecord>,
    mac_to_ip: DashMap<MacAddress, IpAddr>,
    snapshot: watch::Sender<Arc<Vec<DeviceRecord>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            by_ip: DashMap::new(),
            mac_to_ip: DashMap::new(),
            snapshot,
        }
    }

    /// Insert a record unless its IP is already known. Returns `true` if new.
    pub fn insert(&self, record: DeviceRecord) -> bool {
        if self.by_ip.contains_key(&record.ip) {
            return false;
        }
        if let Some(mac) = &record.mac {
            self.mac_to_ip.insert(mac.clone(), record.ip);
        }
        self.by_ip.insert(record.ip, record);
        self.rebuild_snapshot();
        true
    }

    /// Apply `update` to the record at `ip`. Returns the updated copy.
    pub fn update(&self, ip: IpAddr, update: impl FnOnce(&mut DeviceRecord)) -> Option<DeviceRecord> {
        let updated = {
            let mut entry = self.by_ip.get_mut(&ip)?;
            let previous_mac = entry.mac.clone();
            update(entry.value_mut());
            if entry.mac != previous_mac {
                if let Some(old) = previous_mac {
                    self.mac_to_ip.remove(&old);
                }
            }
            entry.value().clone()
        };
        if let Some(mac) = &updated.mac {
            self.mac_to_ip.insert(mac.clone(), ip);
        }
        self.rebuild_snapshot();
        Some(updated)
    }

    /// Move a device to a new IP, keeping the rest of its record.
    /// Returns the previous IP when the device was known under another one.
    pub fn relocate(&self, mac: &MacAddress, ip: IpAddr) -> Option<IpAddr> {
        let old_ip = self.ip_for(mac)?;
        if old_ip == ip {
            return None;
        }
        let (_, mut record) = self.by_ip.remove(&old_ip)?;
        record.ip = ip;
        self.by_ip.insert(ip, record);
        self.mac_to_ip.insert(mac.clone(), ip);
        self.rebuild_snapshot();
        Some(old_ip)
    }

    pub fn remove(&self, ip: IpAddr) -> Option<DeviceRecord> {
        let (_, record) = self.by_ip.remove(&ip)?;
        if let Some(mac) = &record.mac {
            self.mac_to_ip.remove(mac);
        }
        self.rebuild_snapshot();
        Some(record)
    }

    pub fn get(&self, ip: IpAddr) -> Option<DeviceRecord> {
        self.by_ip.get(&ip).map(|r| r.value().clone())
    }

    pub fn ip_for(&self, mac: &MacAddress) -> Option<IpAddr> {
        self.mac_to_ip.get(mac).map(|r| *r.value())
    }

    pub fn by_mac(&self, mac: &MacAddress) -> Option<DeviceRecord> {
        self.ip_for(mac).and_then(|ip| self.get(ip))
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.by_ip.contains_key(&ip)
    }

    pub fn len(&self) -> usize {
        self.by_ip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ip.is_empty()
    }

    /// `true` while at least one device is connected.
    pub fn any_connected(&self) -> bool {
        self.by_ip.iter().any(|r| r.connected)
    }

    /// Current records sorted by IP (cheap `Arc` clone).
    pub fn snapshot(&self) -> Arc<Vec<DeviceRecord>> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> DeviceStream {
        DeviceStream::new(self.snapshot.subscribe())
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn rebuild_snapshot(&self) {
        let mut records: Vec<DeviceRecord> = self.by_ip.iter().map(|r| r.value().clone()).collect();
        records.sort_by_key(|r| r.ip);
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(records));
    }
}

// ── DeviceStream ─────────────────────────────────────────────────────

/// Subscription to registry changes.
pub struct DeviceStream {
    current: Arc<Vec<DeviceRecord>>,
    receiver: watch::Receiver<Arc<Vec<DeviceRecord>>>,
}

impl DeviceStream {
    fn new(receiver: watch::Receiver<Arc<Vec<DeviceRecord>>>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// Snapshot captured at creation (or at the last `changed()`).
    pub fn current(&self) -> &Arc<Vec<DeviceRecord>> {
        &self.current
    }

    /// Wait for the next change. `None` once the registry is dropped.
    pub async fn changed(&mut self) -> Option<Arc<Vec<DeviceRecord>>> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = Arc::clone(&snap);
        Some(snap)
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> WatchStream<Arc<Vec<DeviceRecord>>> {
        WatchStream::new(self.receiver)
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([192, 168, 1, last])
    }

    #[test]
    fn insert_is_keyed_by_ip() {
        let registry = DeviceRegistry::new();
        assert!(registry.insert(DeviceRecord::new(ip(10))));
        assert!(!registry.insert(DeviceRecord::new(ip(10))));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn update_maintains_mac_index() {
        let registry = DeviceRegistry::new();
        registry.insert(DeviceRecord::new(ip(10)));
        let mac = MacAddress::new("aabbccddeeff");

        registry.update(ip(10), |r| {
            r.mac = Some(mac.clone());
            r.connected = true;
        });
        assert_eq!(registry.ip_for(&mac), Some(ip(10)));
        assert!(registry.by_mac(&mac).unwrap().connected);
        assert!(registry.any_connected());
        assert!(registry.update(ip(99), |_| {}).is_none());
    }

    #[test]
    fn relocate_moves_the_record() {
        let registry = DeviceRegistry::new();
        let mac = MacAddress::new("aabbccddeeff");
        registry.insert(DeviceRecord::new(ip(10)).with_mac(mac.clone()));

        assert_eq!(registry.relocate(&mac, ip(11)), Some(ip(10)));
        assert!(registry.get(ip(10)).is_none());
        assert_eq!(registry.get(ip(11)).unwrap().ip, ip(11));
        assert_eq!(registry.relocate(&mac, ip(11)), None);
    }

    #[test]
    fn remove_clears_the_index() {
        let registry = DeviceRegistry::new();
        let mac = MacAddress::new("aabbccddeeff");
        registry.insert(DeviceRecord::new(ip(10)).with_mac(mac.clone()));

        let stream = registry.subscribe();
        assert_eq!(stream.current().len(), 1);
        assert!(registry.remove(ip(10)).is_some());
        assert!(registry.ip_for(&mac).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let registry = DeviceRegistry::new();
        let mut stream = registry.subscribe();
        registry.insert(DeviceRecord::new(ip(20)));

        let snap = stream.changed().await.unwrap();
        assert_eq!(snap[0].ip, ip(20));
        assert_eq!(stream.current().len(), 1);
    }
}
