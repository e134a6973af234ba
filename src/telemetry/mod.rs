//! Telemetry session layer: connection monitoring over a link engine

mod manager;
mod monitor;

pub use manager::TelemetryManager;
pub use monitor::{
    MonitorConfig, TelemetryMonitor, CONNECTION_TIMEOUT_MS, RETRIEVE_TIMEOUT_MS,
    STATS_CONNECT_PERIOD_MS, STATS_UPDATE_PERIOD_MS,
};
