// ledbridge-api: Async Rust client for the WLED JSON and WebSocket APIs

pub mod client;
pub mod error;
pub mod models;
pub mod transport;
pub mod websocket;

pub use client::WledClient;
pub use error::Error;
pub use models::{CommandAck, DeviceIdentity, DeviceSnapshot, StateUpdate};
pub use transport::TransportConfig;
pub use websocket::{WsConnection, WsEvent, WsHandle, WsMessage};
