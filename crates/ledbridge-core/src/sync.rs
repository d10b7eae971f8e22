// ── Tree synchronizer ──
//
// Walks a device's `info` / `state` JSON and mirrors it into the tree.
// Objects are only rewritten when their metadata differs from the copy
// cached at the last write; values are written every pass.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use serde_json::{Map, Value, json};
use tracing::{debug, trace};

use ledbridge_api::DeviceSnapshot;

use crate::attributes::{Attribute, AttributeTable, channel_name, color_spec};
use crate::model::{Color, ColorSlot, MacAddress};
use crate::tree::{CommonMeta, StateTree, TreeObject, is_under};

/// Id of the bridge-wide connection indicator.
pub const CONNECTION_STATE: &str = "info.connection";

/// Counts from one synchronization pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub metadata_writes: usize,
    pub value_writes: usize,
}

impl SyncReport {
    fn merge(&mut self, other: SyncReport) {
        self.metadata_writes += other.metadata_writes;
        self.value_writes += other.value_writes;
    }
}

/// Label set attached to `fx` / `pal` entries.
type Labels = Arc<BTreeMap<String, String>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LabelKind {
    Effects,
    Palettes,
}

impl LabelKind {
    fn for_field(field: &str) -> Option<Self> {
        match field {
            "fx" => Some(Self::Effects),
            "pal" => Some(Self::Palettes),
            _ => None,
        }
    }
}

/// Mirrors device JSON into a [`StateTree`].
pub struct TreeSync {
    tree: Arc<StateTree>,
    attributes: AttributeTable,
    /// Last object written per path.
    written: DashMap<String, TreeObject>,
    effects: DashMap<MacAddress, Labels>,
    palettes: DashMap<MacAddress, Labels>,
    /// `fx` / `pal` paths that already carry their label set.
    labelled: DashSet<String>,
    online_ttl: Duration,
}

impl TreeSync {
    pub fn new(tree: Arc<StateTree>, online_ttl: Duration) -> Self {
        Self {
            tree,
            attributes: AttributeTable::new(),
            written: DashMap::new(),
            effects: DashMap::new(),
            palettes: DashMap::new(),
            labelled: DashSet::new(),
            online_ttl,
        }
    }

    pub fn tree(&self) -> &Arc<StateTree> {
        &self.tree
    }

    // ── Whole-device passes ──────────────────────────────────────────

    /// Full pass over a `/json` payload: device root, info, state, extras.
    pub fn sync_snapshot(&self, mac: &MacAddress, ip: IpAddr, snapshot: &DeviceSnapshot) -> SyncReport {
        let name = snapshot.info.get("name").and_then(Value::as_str).unwrap_or_default();

        let mut report = self.init_device(mac, name, ip);
        if !snapshot.effects.is_empty() {
            self.set_effects(mac, &snapshot.effects);
        }
        if !snapshot.palettes.is_empty() {
            self.set_palettes(mac, &snapshot.palettes);
        }
        report.merge(self.sync_info(mac, &snapshot.info));
        report.merge(self.sync_state(mac, &snapshot.state));
        report.merge(self.create_extras(mac));

        debug!(
            mac = %mac,
            metadata_writes = report.metadata_writes,
            value_writes = report.value_writes,
            "tree synchronized"
        );
        report
    }

    /// Device root (carrying `native.ip`), the `_info` channel and `_online`.
    pub fn init_device(&self, mac: &MacAddress, name: &str, ip: IpAddr) -> SyncReport {
        let mut report = SyncReport::default();
        let root = mac.as_str();
        let label = if name.is_empty() { root } else { name };

        report.metadata_writes += usize::from(self.write_object(
            root,
            TreeObject::device(label).with_native("ip", ip.to_string()),
        ));
        report.metadata_writes += usize::from(self.ensure_channel(&format!("{root}._info"), "_info"));
        report.metadata_writes += usize::from(self.write_object(
            &format!("{root}._info._online"),
            TreeObject::state(CommonMeta::from_spec(&Attribute::Online.spec(), "_online")),
        ));
        report
    }

    /// Mirror `info` under `<mac>._info`.
    pub fn sync_info(&self, mac: &MacAddress, info: &Value) -> SyncReport {
        let mut report = SyncReport::default();
        if let Some(map) = info.as_object() {
            self.visit_object(mac, &format!("{mac}._info"), map, &mut report);
        }
        report
    }

    /// Mirror `state` directly under `<mac>`.
    pub fn sync_state(&self, mac: &MacAddress, state: &Value) -> SyncReport {
        let mut report = SyncReport::default();
        if let Some(map) = state.as_object() {
            self.visit_object(mac, mac.as_str(), map, &mut report);
        }
        report
    }

    /// Writable entries the JSON API never reports.
    pub fn create_extras(&self, mac: &MacAddress) -> SyncReport {
        let mut report = SyncReport::default();
        report.metadata_writes += usize::from(self.ensure_channel(&format!("{mac}.udpn"), "udpn"));
        for (path, attr) in [
            ("tt", Attribute::Tt),
            ("psave", Attribute::Psave),
            ("udpn.nn", Attribute::Nn),
            ("time", Attribute::Time),
            ("rawCommand", Attribute::RawCommand),
        ] {
            let field = path.rsplit('.').next().unwrap_or(path);
            report.metadata_writes += usize::from(self.write_object(
                &format!("{mac}.{path}"),
                TreeObject::state(CommonMeta::from_spec(&attr.spec(), field)),
            ));
        }
        report
    }

    // ── Connection indicators ────────────────────────────────────────

    /// `<mac>._info._online`, reverting to `false` after two poll intervals.
    pub fn set_online(&self, mac: &MacAddress, online: bool) {
        let id = format!("{mac}._info._online");
        if online {
            self.tree
                .set_state_expiring(&id, Value::Bool(true), self.online_ttl, Value::Bool(false));
        } else {
            self.tree.set_state(&id, Value::Bool(false), true);
        }
    }

    /// Latch a device that stopped answering: offline, light off, zero brightness.
    pub fn mark_offline(&self, mac: &MacAddress) {
        self.set_online(mac, false);
        if self.tree.get_object(&format!("{mac}.on")).is_some() {
            self.tree.set_state(&format!("{mac}.on"), Value::Bool(false), true);
        }
        if self.tree.get_object(&format!("{mac}.bri")).is_some() {
            self.tree.set_state(&format!("{mac}.bri"), json!(0), true);
        }
    }

    /// Bridge-wide indicator: `true` while at least one device is connected.
    pub fn set_connection(&self, connected: bool) {
        self.write_object(
            CONNECTION_STATE,
            TreeObject::state(CommonMeta::from_spec(&Attribute::Connection.spec(), "connection")),
        );
        self.tree.set_state(CONNECTION_STATE, Value::Bool(connected), true);
    }

    // ── Effect / palette labels ──────────────────────────────────────

    pub fn set_effects(&self, mac: &MacAddress, names: &[String]) {
        self.effects.insert(mac.clone(), labels_from(names));
        self.attach_labels(mac, LabelKind::Effects);
    }

    pub fn set_palettes(&self, mac: &MacAddress, names: &[String]) {
        self.palettes.insert(mac.clone(), labels_from(names));
        self.attach_labels(mac, LabelKind::Palettes);
    }

    pub fn has_labels(&self, mac: &MacAddress) -> bool {
        self.effects.contains_key(mac) && self.palettes.contains_key(mac)
    }

    /// Effect name for an ID, if the list has been fetched.
    pub fn effect_name(&self, mac: &MacAddress, id: u64) -> Option<String> {
        self.effects
            .get(mac)
            .and_then(|labels| labels.get(&id.to_string()).cloned())
    }

    /// Give the device object a user-chosen name. The cached copy keeps
    /// the reported name, so later passes leave the override in place.
    pub fn rename_device(&self, mac: &MacAddress, name: &str) -> bool {
        self.tree
            .extend_object(mac.as_str(), |object| object.common.name = name.to_owned())
    }

    // ── Deletion ─────────────────────────────────────────────────────

    /// Remove the device subtree and every cache keyed by its MAC.
    pub fn remove_device(&self, mac: &MacAddress) -> usize {
        let removed = self.remove_path(mac.as_str());
        self.effects.remove(mac);
        self.palettes.remove(mac);
        removed
    }

    /// Remove a subtree (e.g. `<mac>.seg.2`) so the next pass recreates it.
    pub fn remove_path(&self, prefix: &str) -> usize {
        let removed = self.tree.del_prefix(prefix);
        self.written.retain(|path, _| !is_under(path, prefix));
        self.labelled.retain(|path| !is_under(path, prefix));
        removed
    }

    // ── Walk ─────────────────────────────────────────────────────────

    fn visit_object(&self, mac: &MacAddress, base: &str, map: &Map<String, Value>, report: &mut SyncReport) {
        for (key, value) in map {
            let path = format!("{base}.{key}");
            self.visit_value(mac, &path, key, value, report);
        }
    }

    fn visit_value(&self, mac: &MacAddress, path: &str, key: &str, value: &Value, report: &mut SyncReport) {
        match value {
            Value::Object(map) => {
                report.metadata_writes += usize::from(self.ensure_channel(path, key));
                self.visit_object(mac, path, map, report);
            }
            Value::Array(items) if key == "col" => self.visit_colors(path, items, report),
            Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
                report.metadata_writes += usize::from(self.ensure_channel(path, key));
                for (i, item) in items.iter().enumerate() {
                    let item_path = format!("{path}.{i}");
                    let name = if key == "seg" {
                        format!("Segment {i}")
                    } else {
                        format!("{key} {i}")
                    };
                    report.metadata_writes +=
                        usize::from(self.write_object(&item_path, TreeObject::channel(name)));
                    if let Some(map) = item.as_object() {
                        self.visit_object(mac, &item_path, map, report);
                    }
                }
            }
            // Scalars and arrays of scalars are single leaves.
            _ => self.write_leaf(mac, path, key, value.clone(), report),
        }
    }

    fn visit_colors(&self, path: &str, slots: &[Value], report: &mut SyncReport) {
        report.metadata_writes += usize::from(self.ensure_channel(path, "col"));

        for (index, raw) in slots.iter().enumerate() {
            let Some(slot) = ColorSlot::from_index(index) else {
                break;
            };
            let Some(color) = Color::from_json(raw) else {
                trace!(path, index, "Skipping unreadable colour slot");
                continue;
            };

            for (hex, key, val) in [
                (false, slot.rgb_key(), color.to_rgb_string()),
                (true, slot.hex_key(), color.to_hex()),
            ] {
                let leaf = format!("{path}.{key}");
                report.metadata_writes += usize::from(
                    self.write_object(&leaf, TreeObject::state(CommonMeta::from_spec(&color_spec(slot, hex), &key))),
                );
                self.tree.set_state(&leaf, Value::String(val), true);
                report.value_writes += 1;
            }
        }
    }

    fn write_leaf(&self, mac: &MacAddress, path: &str, field: &str, value: Value, report: &mut SyncReport) {
        let mut common = CommonMeta::from_spec(&self.attributes.spec_for(field), field);
        if let Some(kind) = LabelKind::for_field(field) {
            if let Some(labels) = self.labels(mac, kind) {
                common.states = Some(labels.as_ref().clone());
                self.labelled.insert(path.to_owned());
            }
        }

        report.metadata_writes += usize::from(self.write_object(path, TreeObject::state(common)));
        self.tree.set_state(path, value, true);
        report.value_writes += 1;
    }

    // ── Object writes ────────────────────────────────────────────────

    fn ensure_channel(&self, path: &str, key: &str) -> bool {
        let name = channel_name(key).unwrap_or(key);
        self.write_object(path, TreeObject::channel(name))
    }

    /// Write `object` unless it matches the cached copy. Returns `true` on write.
    fn write_object(&self, path: &str, object: TreeObject) -> bool {
        if self.written.get(path).is_some_and(|cached| *cached == object) {
            return false;
        }
        self.tree.set_object(path, object.clone());
        self.written.insert(path.to_owned(), object);
        true
    }

    fn labels(&self, mac: &MacAddress, kind: LabelKind) -> Option<Labels> {
        let map = match kind {
            LabelKind::Effects => &self.effects,
            LabelKind::Palettes => &self.palettes,
        };
        map.get(mac).map(|r| Arc::clone(r.value()))
    }

    /// Attach a freshly fetched label set to existing entries, once per path.
    fn attach_labels(&self, mac: &MacAddress, kind: LabelKind) {
        let Some(labels) = self.labels(mac, kind) else {
            return;
        };
        let field = match kind {
            LabelKind::Effects => "fx",
            LabelKind::Palettes => "pal",
        };

        let pending: Vec<String> = self
            .written
            .iter()
            .map(|r| r.key().clone())
            .filter(|path| is_under(path, mac.as_str()))
            .filter(|path| path.rsplit('.').next() == Some(field))
            .filter(|path| !self.labelled.contains(path))
            .collect();

        for path in pending {
            let states = labels.as_ref().clone();
            self.tree.extend_object(&path, |object| object.common.states = Some(states.clone()));
            if let Some(mut cached) = self.written.get_mut(&path) {
                cached.common.states = Some(states);
            }
            self.labelled.insert(path);
        }
    }
}

fn labels_from(names: &[String]) -> Labels {
    Arc::new(
        names
            .iter()
            .enumerate()
            .map(|(i, name)| (i.to_string(), name.clone()))
            .collect(),
    )
}
