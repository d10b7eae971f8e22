// ledbridge-core: device lifecycle, state tree and command relay between
// ledbridge-api and consumers (CLI, home-automation hosts).

pub mod admin;
pub mod attributes;
pub mod config;
pub mod discovery;
pub mod error;
pub mod manager;
pub mod model;
pub mod registry;
pub mod sync;
pub mod translator;
pub mod tree;
pub mod validation;
pub mod watchdog;

// ── Primary re-exports ──────────────────────────────────────────────
pub use admin::{AdminCommand, AdminResponse};
pub use config::{BridgeConfig, WLED_SERVICE_TYPE};
pub use discovery::{ChannelDiscovery, DiscoveredDevice, DiscoverySource, MdnsDiscovery};
pub use error::CoreError;
pub use manager::{Delivery, DeviceManager};
pub use registry::{DeviceRegistry, DeviceStream};
pub use sync::{CONNECTION_STATE, SyncReport, TreeSync};
pub use translator::{CommandPath, DeviceCommand, Outbound, ParsedPath, parse_path, translate};
pub use tree::{CommonMeta, ObjectKind, StateTree, StateValue, TreeEvent, TreeObject};
pub use validation::{ValidationError, validate_byte_value, validate_segment_colors};
pub use watchdog::{LinkState, RetryPolicy, Transport, Watchdog};

// Re-export model types at the crate root for ergonomics.
pub use model::{Color, ColorError, ColorSlot, DeviceRecord, MacAddress};
