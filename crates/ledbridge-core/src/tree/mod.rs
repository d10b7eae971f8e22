// ── Object/state tree ──
//
// Hierarchical, dot-separated store mirroring every device:
// `<mac>._info.leds.count`, `<mac>.seg.0.col.0_HEX`, ...
// Objects carry metadata, states carry values. Every state write is
// broadcast so the manager can relay unacknowledged (user) writes.

mod object;

pub use object::{CommonMeta, ObjectKind, StateValue, TreeEvent, TreeObject};

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::CoreError;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct StoredState {
    value: StateValue,
    /// Replacement written (acknowledged) once the state expires.
    /// `None` removes the state instead.
    on_expire: Option<Value>,
}

/// Thread-safe object/state tree with push-based change notification.
pub struct StateTree {
    objects: DashMap<String, TreeObject>,
    states: DashMap<String, StoredState>,
    events: broadcast::Sender<TreeEvent>,
    object_writes: AtomicU64,
}

impl StateTree {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            objects: DashMap::new(),
            states: DashMap::new(),
            events,
            object_writes: AtomicU64::new(0),
        }
    }

    // ── Objects ──────────────────────────────────────────────────────

    /// Create the object unless one already exists. Returns `true` if created.
    pub fn set_object_not_exists(&self, id: &str, object: TreeObject) -> bool {
        let created = match self.objects.entry(id.to_owned()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(object);
                true
            }
        };
        if created {
            self.object_writes.fetch_add(1, Ordering::Relaxed);
        }
        created
    }

    /// Create or overwrite the object.
    pub fn set_object(&self, id: &str, object: TreeObject) {
        self.objects.insert(id.to_owned(), object);
        self.object_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// Apply `update` to an existing object. Returns `false` if absent.
    pub fn extend_object(&self, id: &str, update: impl FnOnce(&mut TreeObject)) -> bool {
        let Some(mut entry) = self.objects.get_mut(id) else {
            return false;
        };
        update(entry.value_mut());
        drop(entry);
        self.object_writes.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn get_object(&self, id: &str) -> Option<TreeObject> {
        self.objects.get(id).map(|r| r.value().clone())
    }

    /// Total object creations/rewrites since construction.
    pub fn object_writes(&self) -> u64 {
        self.object_writes.load(Ordering::Relaxed)
    }

    /// All device root objects with their ids.
    pub fn devices(&self) -> Vec<(String, TreeObject)> {
        let mut devices: Vec<_> = self
            .objects
            .iter()
            .filter(|r| r.value().kind == ObjectKind::Device)
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        devices.sort_by(|a, b| a.0.cmp(&b.0));
        devices
    }

    /// Sorted ids of every object at or below `prefix`.
    pub fn object_ids(&self, prefix: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .objects
            .iter()
            .map(|r| r.key().clone())
            .filter(|id| is_under(id, prefix))
            .collect();
        ids.sort();
        ids
    }

    // ── States ───────────────────────────────────────────────────────

    /// Write a value. `ack = true` means it reflects the device.
    pub fn set_state(&self, id: &str, val: Value, ack: bool) {
        self.store(id, val, ack, None, None);
    }

    /// Write an acknowledged value that reverts to `on_expire` after `ttl`.
    pub fn set_state_expiring(&self, id: &str, val: Value, ttl: Duration, on_expire: Value) {
        let expires_at = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl));
        self.store(id, val, true, expires_at, Some(on_expire));
    }

    /// User write (`ack = false`): a command for the device.
    pub fn write_user(&self, id: &str, val: Value) -> Result<(), CoreError> {
        match self.objects.get(id).map(|r| (r.kind, r.common.write)) {
            Some((ObjectKind::State, true)) => {
                self.set_state(id, val, false);
                Ok(())
            }
            _ => Err(CoreError::InvalidPath {
                path: id.to_owned(),
            }),
        }
    }

    /// Mark a pending user write as applied, keeping its value.
    pub fn acknowledge(&self, id: &str, val: Value) {
        self.set_state(id, val, true);
    }

    pub fn get_state(&self, id: &str) -> Option<StateValue> {
        self.get_state_at(id, Utc::now())
    }

    /// Read a state as of `now`, applying expiry first.
    pub fn get_state_at(&self, id: &str, now: DateTime<Utc>) -> Option<StateValue> {
        let stored = self.states.get(id).map(|r| r.value().clone())?;
        match stored.value.expires_at {
            Some(deadline) if deadline <= now => self.expire(id, stored.on_expire, now),
            _ => Some(stored.value),
        }
    }

    /// Apply expiry to every state whose deadline has passed.
    pub fn expire_due(&self) -> usize {
        let now = Utc::now();
        let due: Vec<(String, Option<Value>)> = self
            .states
            .iter()
            .filter(|r| r.value.expires_at.is_some_and(|d| d <= now))
            .map(|r| (r.key().clone(), r.on_expire.clone()))
            .collect();
        let count = due.len();
        for (id, on_expire) in due {
            self.expire(&id, on_expire, now);
        }
        count
    }

    // ── Deletion ─────────────────────────────────────────────────────

    /// Delete every object and state at or below `prefix`. Returns the
    /// number of objects removed.
    pub fn del_prefix(&self, prefix: &str) -> usize {
        let before = self.objects.len();
        self.objects.retain(|id, _| !is_under(id, prefix));
        self.states.retain(|id, _| !is_under(id, prefix));
        let removed = before.saturating_sub(self.objects.len());
        let _ = self.events.send(TreeEvent::Deleted {
            prefix: prefix.to_owned(),
        });
        removed
    }

    // ── Subscriptions ────────────────────────────────────────────────

    pub fn subscribe(&self) -> broadcast::Receiver<TreeEvent> {
        self.events.subscribe()
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn store(
        &self,
        id: &str,
        val: Value,
        ack: bool,
        expires_at: Option<DateTime<Utc>>,
        on_expire: Option<Value>,
    ) {
        let value = StateValue {
            val,
            ack,
            ts: Utc::now(),
            expires_at,
        };
        self.states.insert(
            id.to_owned(),
            StoredState {
                value: value.clone(),
                on_expire,
            },
        );
        // No subscribers is fine
        let _ = self.events.send(TreeEvent::State {
            id: id.to_owned(),
            state: value,
        });
    }

    fn expire(&self, id: &str, on_expire: Option<Value>, now: DateTime<Utc>) -> Option<StateValue> {
        if let Some(val) = on_expire {
            let value = StateValue {
                val,
                ack: true,
                ts: now,
                expires_at: None,
            };
            self.states.insert(
                id.to_owned(),
                StoredState {
                    value: value.clone(),
                    on_expire: None,
                },
            );
            let _ = self.events.send(TreeEvent::State {
                id: id.to_owned(),
                state: value.clone(),
            });
            Some(value)
        } else {
            self.states.remove(id);
            None
        }
    }
}

impl Default for StateTree {
    fn default() -> Self {
        Self::new()
    }
}

/// `id` equals `prefix` or is a descendant of it.
pub(crate) fn is_under(id: &str, prefix: &str) -> bool {
    id.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn writable_state() -> TreeObject {
        TreeObject::state(CommonMeta {
            write: true,
            ..CommonMeta::named("x")
        })
    }

    #[test]
    fn set_object_not_exists_only_creates_once() {
        let tree = StateTree::new();
        assert!(tree.set_object_not_exists("aabb", TreeObject::device("Desk")));
        assert!(!tree.set_object_not_exists("aabb", TreeObject::device("Other")));
        assert_eq!(tree.get_object("aabb").unwrap().common.name, "Desk");
        assert_eq!(tree.object_writes(), 1);
    }

    #[test]
    fn del_prefix_respects_segment_boundaries() {
        let tree = StateTree::new();
        tree.set_object("aabb", TreeObject::device("A"));
        tree.set_object("aabb.on", writable_state());
        tree.set_object("aabbcc", TreeObject::device("B"));
        tree.set_state("aabb.on", json!(true), true);
        tree.set_state("aabbcc.on", json!(true), true);

        assert_eq!(tree.del_prefix("aabb"), 2);
        assert!(tree.get_object("aabbcc").is_some());
        assert!(tree.get_state("aabb.on").is_none());
        assert!(tree.get_state("aabbcc.on").is_some());
    }

    #[test]
    fn user_writes_need_a_writable_state() {
        let tree = StateTree::new();
        tree.set_object("m.on", writable_state());
        tree.set_object("m._info.ver", TreeObject::state(CommonMeta::named("ver")));

        tree.write_user("m.on", json!(false)).unwrap();
        assert!(!tree.get_state("m.on").unwrap().ack);
        assert!(tree.write_user("m._info.ver", json!("x")).is_err());
        assert!(tree.write_user("m.missing", json!(1)).is_err());
    }

    #[test]
    fn expiring_state_reverts_to_acknowledged_fallback() {
        let tree = StateTree::new();
        tree.set_state_expiring("m._info._online", json!(true), Duration::from_secs(10), json!(false));

        let now = Utc::now();
        assert_eq!(tree.get_state_at("m._info._online", now).unwrap().val, json!(true));

        let later = now + chrono::Duration::seconds(11);
        let expired = tree.get_state_at("m._info._online", later).unwrap();
        assert_eq!(expired.val, json!(false));
        assert!(expired.ack);
        assert!(expired.expires_at.is_none());
    }

    #[test]
    fn writes_are_broadcast() {
        let tree = StateTree::new();
        let mut rx = tree.subscribe();
        tree.set_state("m.bri", json!(10), false);

        match rx.try_recv().unwrap() {
            TreeEvent::State { id, state } => {
                assert_eq!(id, "m.bri");
                assert!(!state.ack);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn devices_lists_roots_only() {
        let tree = StateTree::new();
        tree.set_object("b", TreeObject::device("B"));
        tree.set_object("a", TreeObject::device("A").with_native("ip", "10.0.0.2"));
        tree.set_object("a._info", TreeObject::channel("info"));

        let devices = tree.devices();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].0, "a");
        assert_eq!(devices[0].1.native["ip"], "10.0.0.2");
    }
}
