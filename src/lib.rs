//! setu-link - Versioned binary object exchange over unreliable links
//!
//! The crate mirrors a catalog of fixed-width binary objects between peers
//! over byte-stream transports. Its layers, bottom up:
//!
//! - [`obj`]: object registry with type/instance identity, per-type
//!   meta-objects and change notifications
//! - [`link`]: framed wire protocol (CRC-8 checksummed frames, receive state
//!   machine, acked sends and request/response transactions)
//! - [`telemetry`]: session layer with handshake, heartbeat, connection
//!   timeout and bulk object refresh
//! - [`relay`]: bridges the registry to a second peer with echo suppression
//! - [`app`]: the serial-to-UDP gateway daemon

pub mod app;
pub mod config;
pub mod error;
pub mod link;
pub mod obj;
pub mod objects;
pub mod relay;
pub mod telemetry;
pub mod transport;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{Error, Result};
pub use link::engine::LinkEngine;
pub use obj::{Metadata, ObjectRegistry, TypeDescriptor};
pub use relay::ObjectRelay;
pub use telemetry::TelemetryManager;
