//! Real-time push gateway: connection lifecycle, group fan-out and presence.

pub mod events;
pub mod heartbeat;
pub mod layer;
pub mod notify;
pub mod presence;
pub mod server;
pub mod session;

pub use events::{EventTag, EventType};
pub use notify::Notifier;
