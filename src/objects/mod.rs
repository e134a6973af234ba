//! Built-in object types
//!
//! The full catalog of concrete object types is code-generated elsewhere and
//! out of scope here; only the link-stats pair the session layer depends on
//! ships with the crate.

pub mod stats;

pub use stats::{
    LinkStats, LinkStatus, DEVICE_LINK_STATS_ID, GROUND_LINK_STATS_ID, LINK_STATS_NUM_BYTES,
};
