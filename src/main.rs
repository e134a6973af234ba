//! setu-link - Object telemetry gateway
//!
//! Bridges a serial device link to a UDP ground-station link: versioned
//! binary objects received from the device are mirrored into a shared
//! registry and relayed onward, and ground-station writes flow back the
//! same way.

use setu_link::app::GatewayApp;
use setu_link::config::AppConfig;
use setu_link::error::Result;
use std::env;

/// Parse config path from command line arguments.
///
/// Supports:
/// - `setu-link <path>` (positional)
/// - `setu-link --config <path>` (flag-based)
/// - `setu-link -c <path>` (short flag)
///
/// Defaults to `/etc/setulink.toml` if not specified.
fn parse_config_path() -> String {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    "/etc/setulink.toml".to_string()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("setu-link v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = parse_config_path();
    log::info!("Using config: {}", config_path);
    let config = match AppConfig::from_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            log::warn!("Could not load {} ({}), using defaults", config_path, e);
            AppConfig::default()
        }
    };

    let mut app = GatewayApp::new(config)?;
    app.run()
}
