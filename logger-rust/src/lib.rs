//! # wx-logger
//!
//! WeatherLink data logger daemon.
//!
//! Owns the serial connection to the station, polls it for sensor
//! images, computes derived meteorological values, writes the
//! time-series database, backfills archive records from the station's
//! SRAM ring, and exposes an IPC server so other local processes can
//! query status and send hardware commands without ever touching the
//! serial port themselves.

pub mod archive_sync;
pub mod calculations;
pub mod daemon;
pub mod error;
pub mod ipc;
pub mod link_driver;
pub mod poller;
pub mod pressure_trend;
pub mod serial;
pub mod settings;
pub mod store;

pub use daemon::Daemon;
pub use error::{LinkError, LinkResult};
pub use settings::Settings;
