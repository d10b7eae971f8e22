// ── Domain model ──
//
// Identity, registry records and colour values shared by the tree,
// translator and manager.

pub mod color;
pub mod device;
pub mod mac;

pub use color::{Color, ColorError, ColorSlot};
pub use device::DeviceRecord;
pub use mac::MacAddress;
