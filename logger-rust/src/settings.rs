//! Process settings and configuration-store keys.
//!
//! Process-level knobs come from `WX_`-prefixed environment variables;
//! everything user-facing lives in the `station_config` key-value table
//! so the web application can change it without restarting the daemon.

use std::time::Duration;

/// Environment-derived settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// SQLite database path.
    pub db_path: String,
    /// IPC listen port on localhost.
    pub ipc_port: u16,
    /// Serial read timeout.
    pub serial_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: std::env::var("WX_DB_PATH").unwrap_or_else(|_| "wx_station.db".to_string()),
            ipc_port: std::env::var("WX_IPC_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(6514),
            serial_timeout: Duration::from_millis(
                std::env::var("WX_SERIAL_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(2000),
            ),
        }
    }
}

/// Keys in the `station_config` store the daemon reads.
pub mod keys {
    /// Gate for auto-connect at startup ("true"/"false").
    pub const SETUP_COMPLETE: &str = "setup_complete";
    pub const SERIAL_PORT: &str = "serial_port";
    pub const BAUD_RATE: &str = "baud_rate";
    /// Polling engine period in seconds.
    pub const POLL_INTERVAL: &str = "poll_interval";
    /// IANA timezone used for local-midnight extremes grouping.
    pub const STATION_TIMEZONE: &str = "station_timezone";
}

/// Default polling period in seconds.
pub const DEFAULT_POLL_INTERVAL: u64 = 10;
