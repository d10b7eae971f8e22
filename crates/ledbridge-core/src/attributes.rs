// ── Attribute table ──
//
// One canonical table describing every field the WLED JSON API reports,
// keyed by the field's short name. The synchronizer looks each leaf up
// here to build its metadata; anything not listed gets a generic,
// read-only fallback and is reported once.

use std::str::FromStr;

use dashmap::DashSet;
use strum::{Display, EnumIter, EnumString};
use tracing::warn;

use crate::model::ColorSlot;

// ── Value types ──────────────────────────────────────────────────────

/// Declared value type of a tree state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ValueType {
    Boolean,
    Number,
    String,
    Mixed,
}

/// Static metadata for one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeSpec {
    pub name: &'static str,
    pub value_type: ValueType,
    pub role: &'static str,
    pub unit: &'static str,
    pub write: bool,
    pub range: Option<(i64, i64)>,
}

impl AttributeSpec {
    const fn new(name: &'static str, value_type: ValueType) -> Self {
        Self {
            name,
            value_type,
            role: "state",
            unit: "",
            write: false,
            range: None,
        }
    }

    const fn role(mut self, role: &'static str) -> Self {
        self.role = role;
        self
    }

    const fn unit(mut self, unit: &'static str) -> Self {
        self.unit = unit;
        self
    }

    const fn writable(mut self) -> Self {
        self.write = true;
        self
    }

    const fn byte(mut self) -> Self {
        self.range = Some((0, 255));
        self
    }
}

// ── Known fields ─────────────────────────────────────────────────────

/// Every field with curated metadata, parsed from its short name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Attribute {
    // state
    On,
    Bri,
    Transition,
    Ps,
    Pl,
    Dur,
    Fade,
    Mode,
    Tbri,
    Rem,
    Send,
    Recv,
    Mainseg,
    Lor,
    // state, write-only extras
    Tt,
    Psave,
    Nn,
    Time,
    #[strum(serialize = "rawCommand")]
    RawCommand,
    // segment
    Id,
    Start,
    Stop,
    Len,
    Grp,
    Spc,
    Fx,
    Sx,
    Ix,
    Pal,
    C1,
    C2,
    C3,
    Sel,
    Rev,
    Mi,
    Frz,
    Cln,
    // info
    Connection,
    #[strum(serialize = "_online", serialize = "online")]
    Online,
    Ver,
    Vid,
    Count,
    Rgbw,
    Pin,
    Pwr,
    Maxpwr,
    Maxseg,
    Name,
    Udpport,
    Live,
    Fxcount,
    Palcount,
    Bssid,
    Signal,
    Channel,
    Rssi,
    Arch,
    Core,
    Freeheap,
    Uptime,
    Opt,
    Brand,
    Product,
    Btype,
    Mac,
    Ip,
    U,
    T,
    Pmt,
    Ws,
}

impl Attribute {
    /// Look up a field by its short name.
    pub fn lookup(field: &str) -> Option<Self> {
        Self::from_str(field).ok()
    }

    #[allow(clippy::too_many_lines)]
    pub fn spec(self) -> AttributeSpec {
        use ValueType::{Boolean, Mixed, Number, String};

        match self {
            Self::On => AttributeSpec::new("On / Off", Boolean).role("switch").writable(),
            Self::Bri => AttributeSpec::new("Brightness of the light", Number)
                .role("value.brightness")
                .writable()
                .byte(),
            Self::Transition => AttributeSpec::new(
                "Duration of the crossfade between different colors/brightness levels",
                Number,
            )
            .role("value.transition")
            .writable(),
            Self::Ps => AttributeSpec::new("ID of currently set preset", Number).writable(),
            Self::Pl => AttributeSpec::new("ID of currently set playlist", Number).writable(),
            Self::Dur => AttributeSpec::new("Duration of nightlight in minutes", Number)
                .unit("min")
                .writable(),
            Self::Fade => AttributeSpec::new(
                "Gradually dim over the course of the nightlight duration",
                Boolean,
            )
            .writable(),
            Self::Mode => AttributeSpec::new("Nightlight mode", Number).writable(),
            Self::Tbri => AttributeSpec::new("Target brightness of nightlight feature", Number)
                .role("value.brightness")
                .writable()
                .byte(),
            Self::Rem => AttributeSpec::new("Remaining nightlight in seconds", Number).unit("s"),
            Self::Send => AttributeSpec::new(
                "Send WLED broadcast (UDP sync) packet on state change",
                Boolean,
            )
            .role("switch")
            .writable(),
            Self::Recv => AttributeSpec::new("Receive broadcast packets", Boolean)
                .role("switch")
                .writable(),
            Self::Mainseg => AttributeSpec::new("Main Segment", Number).writable(),
            Self::Lor => AttributeSpec::new(
                "Live data override. 0 is off, 1 is override until live data ends, 2 is override until reboot",
                Number,
            )
            .writable(),
            Self::Tt => AttributeSpec::new(
                "Similar to transition, but applies to just the current API call",
                Number,
            )
            .writable(),
            Self::Psave => {
                AttributeSpec::new("Save current light config to specified preset slot", Number)
                    .writable()
            }
            Self::Nn => AttributeSpec::new(
                "Dont send a broadcast packet (applies to just the current API call)",
                Boolean,
            )
            .writable(),
            Self::Time => AttributeSpec::new("Set module time to unix timestamp", Number)
                .role("date")
                .writable(),
            Self::RawCommand => AttributeSpec::new("Raw HTTP API Command", String)
                .role("text")
                .writable(),
            Self::Id => AttributeSpec::new("Zero-indexed ID of the segment", Number),
            Self::Start => AttributeSpec::new("LED the segment starts at", Number).writable(),
            Self::Stop => AttributeSpec::new(
                "LED the segment stops at, not included in range",
                Number,
            )
            .writable(),
            Self::Len => AttributeSpec::new(
                "Length of the segment (stop - start). stop has preference",
                Number,
            )
            .writable(),
            Self::Grp => AttributeSpec::new("Grouping (how many consecutive LEDs of the same segment will be grouped to the same color)", Number).writable(),
            Self::Spc => AttributeSpec::new("Spacing (how many LEDs are turned off and skipped between each group)", Number).writable(),
            Self::Fx => AttributeSpec::new("ID of the effect", Number).writable().byte(),
            Self::Sx => AttributeSpec::new("Relative effect speed", Number)
                .writable()
                .byte(),
            Self::Ix => AttributeSpec::new("Effect intensity", Number).writable().byte(),
            Self::Pal => AttributeSpec::new("ID of the color palette", Number)
                .writable()
                .byte(),
            Self::C1 => AttributeSpec::new("Effect custom slider 1", Number)
                .writable()
                .byte(),
            Self::C2 => AttributeSpec::new("Effect custom slider 2", Number)
                .writable()
                .byte(),
            Self::C3 => AttributeSpec::new("Effect custom slider 3", Number)
                .writable()
                .byte(),
            Self::Sel => AttributeSpec::new(
                "Selected segments will have their state (color/FX) updated",
                Boolean,
            )
            .role("switch")
            .writable(),
            Self::Rev => AttributeSpec::new(
                "Flips the segment, causing animations to change direction",
                Boolean,
            )
            .role("switch")
            .writable(),
            Self::Mi => AttributeSpec::new("Mirrors the segment", Boolean)
                .role("switch")
                .writable(),
            Self::Frz => AttributeSpec::new("Freezes the segment's current effect frame", Boolean)
                .role("switch")
                .writable(),
            Self::Cln => AttributeSpec::new(
                "Clones the segment with the given id, exactly mirroring its LED contents",
                Number,
            )
            .writable(),
            Self::Connection => AttributeSpec::new("Bridge working state", Boolean)
                .role("indicator.connected"),
            Self::Online => AttributeSpec::new("Device connection state", Boolean)
                .role("indicator.connected"),
            Self::Ver => AttributeSpec::new("Version name", String),
            Self::Vid => AttributeSpec::new("Build ID (YYMMDDB, B = daily build index)", Number),
            Self::Count => AttributeSpec::new("Total LED count", Number).role("value"),
            Self::Rgbw => AttributeSpec::new("true if LEDs are 4-channel (RGBW)", Boolean),
            Self::Pin => AttributeSpec::new("LED strip pin(s)", Mixed),
            Self::Pwr => AttributeSpec::new(
                "Current LED power usage in milliamps as determined by the ABL. 0 if ABL is disabled",
                Number,
            )
            .role("value.power")
            .unit("mA"),
            Self::Maxpwr => AttributeSpec::new(
                "Maximum power budget in milliamps for the ABL. 0 if ABL is disabled",
                Number,
            )
            .role("value.power")
            .unit("mA"),
            Self::Maxseg => {
                AttributeSpec::new("Maximum number of segments supported by this version", Number)
            }
            Self::Name => AttributeSpec::new(
                "Friendly name of the light. Intended for display in lists and titles",
                String,
            )
            .role("info.name"),
            Self::Udpport => AttributeSpec::new(
                "The UDP port for realtime packets and WLED broadcast",
                Number,
            )
            .role("info.port"),
            Self::Live => AttributeSpec::new(
                "If true, the software is currently receiving realtime data via UDP or E1.31",
                Boolean,
            ),
            Self::Fxcount => AttributeSpec::new("Number of effects included", Number),
            Self::Palcount => AttributeSpec::new("Number of palettes configured", Number),
            Self::Bssid => {
                AttributeSpec::new("The BSSID of the currently connected network", String)
                    .role("info.address")
            }
            Self::Signal => AttributeSpec::new(
                "Relative signal quality of the current connection",
                Number,
            )
            .role("info.status")
            .unit("%"),
            Self::Channel => AttributeSpec::new("The current WiFi channel", Number)
                .role("info.address"),
            Self::Rssi => AttributeSpec::new("WiFi signal strength", Number)
                .role("value.rssi")
                .unit("dBm"),
            Self::Arch => AttributeSpec::new("Name of the platform", String),
            Self::Core => AttributeSpec::new("Version of the underlying (Arduino core) SDK", String),
            Self::Freeheap => AttributeSpec::new(
                "Bytes of heap memory (RAM) currently available. Problematic if <10k",
                Number,
            )
            .role("info.status")
            .unit("B"),
            Self::Uptime => AttributeSpec::new("Time since the last boot/reset in seconds", Number)
                .role("info.status")
                .unit("s"),
            Self::Opt => AttributeSpec::new("Used for debugging purposes only", Number),
            Self::Brand => AttributeSpec::new(
                "The producer/vendor of the light. Always WLED for standard installations",
                String,
            )
            .role("info.name"),
            Self::Product => AttributeSpec::new(
                "The product name. Always DIY light for standard installations",
                String,
            )
            .role("info.name"),
            Self::Btype => AttributeSpec::new("The origin of the build", String),
            Self::Mac => AttributeSpec::new(
                "The hexadecimal hardware MAC address of the light, lowercase and without colons",
                String,
            )
            .role("info.mac"),
            Self::Ip => AttributeSpec::new("IP address of the light", String).role("info.ip"),
            Self::U => AttributeSpec::new("Filesystem bytes used", Number).unit("kB"),
            Self::T => AttributeSpec::new("Filesystem bytes total", Number).unit("kB"),
            Self::Pmt => AttributeSpec::new("Presets last modified time", Number),
            Self::Ws => AttributeSpec::new(
                "Number of connected WebSocket clients. -1 indicates that WS is unsupported in this build",
                Number,
            ),
        }
    }
}

/// Metadata for a segment colour slot entry (`col.<n>` or `col.<n>_HEX`).
pub fn color_spec(slot: ColorSlot, hex: bool) -> AttributeSpec {
    let (name, role) = match (slot, hex) {
        (ColorSlot::Primary, false) => ("Primary Color RGB", "level.color.rgb"),
        (ColorSlot::Secondary, false) => ("Secondary Color RGB (background)", "level.color.rgb"),
        (ColorSlot::Tertiary, false) => ("Tertiary Color RGB", "level.color.rgb"),
        (ColorSlot::Primary, true) => ("Primary Color HEX", "level.color.hex"),
        (ColorSlot::Secondary, true) => ("Secondary Color HEX (background)", "level.color.hex"),
        (ColorSlot::Tertiary, true) => ("Tertiary Color HEX", "level.color.hex"),
    };
    AttributeSpec::new(name, ValueType::String).role(role).writable()
}

/// Display names for the fixed channels of the tree.
pub fn channel_name(key: &str) -> Option<&'static str> {
    Some(match key {
        "_info" => "Basic information",
        "leds" => "LED stripe configuration",
        "wifi" => "Wifi configuration",
        "fs" => "Filesystem",
        "nl" => "Nightlight",
        "udpn" => "Broadcast (UDP sync)",
        "seg" => "Segmentation",
        "ccnf" => "Cycle configuration",
        "col" => "Colors",
        _ => return None,
    })
}

// ── Table with fallback ──────────────────────────────────────────────

/// Attribute lookup with the generic fallback for unknown fields.
///
/// Each unknown field name is warned about once per table.
#[derive(Debug, Default)]
pub struct AttributeTable {
    reported: DashSet<String>,
}

impl AttributeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spec_for(&self, field: &str) -> AttributeSpec {
        if let Some(attr) = Attribute::lookup(field) {
            return attr.spec();
        }
        if self.reported.insert(field.to_owned()) {
            warn!(field, "No attribute definition, using generic metadata");
        }
        AttributeSpec::new("", ValueType::Mixed)
    }

    /// Number of distinct unknown fields seen so far.
    pub fn unknown_count(&self) -> usize {
        self.reported.len()
    }
}
