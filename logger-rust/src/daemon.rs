//! Daemon supervisor.
//!
//! Owns every component — store, IPC server, link driver, poller — and
//! tears them down in reverse dependency order. IPC commands dispatch
//! here; device operations serialise against the poller through the
//! driver's I/O lock, so no command ever lands mid-exchange.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use wx_types::commands::{DEFAULT_BAUD, LEGACY_BAUD};
use wx_types::{CalibrationOffsets, SerialDevice, StationFamily};

use crate::archive_sync::sync_archive;
use crate::error::LinkError;
use crate::ipc::IpcServer;
use crate::link_driver::LinkDriver;
use crate::poller::{Poller, RainState};
use crate::serial::list_serial_ports;
use crate::settings::{keys, Settings, DEFAULT_POLL_INTERVAL};
use crate::store::Store;

/// Everything that exists only while a station is connected.
struct ActiveLink {
    driver: LinkDriver,
    poller: Arc<Poller>,
    poller_task: JoinHandle<()>,
    sync_task: JoinHandle<()>,
}

pub struct Daemon {
    pub settings: Settings,
    pub store: Arc<Store>,
    pub ipc: Arc<IpcServer>,
    active: RwLock<Option<ActiveLink>>,
    state_file: PathBuf,
}

impl Daemon {
    pub fn new(settings: Settings, store: Arc<Store>) -> Arc<Self> {
        let state_file = PathBuf::from(&settings.db_path)
            .parent()
            .map(|dir| dir.join(".logger_state.json"))
            .unwrap_or_else(|| PathBuf::from(".logger_state.json"));
        Arc::new(Self {
            settings,
            store,
            ipc: Arc::new(IpcServer::new()),
            active: RwLock::new(None),
            state_file,
        })
    }

    pub async fn start_ipc(self: &Arc<Self>) -> std::io::Result<()> {
        self.ipc.start(self.settings.ipc_port, self.clone()).await
    }

    // ── Serial lifecycle ──────────────────────────────────────────────────

    /// Open the configured port at startup when setup is complete;
    /// otherwise wait for a `connect` command over IPC.
    pub async fn auto_connect(&self) {
        if !self.setup_complete().await {
            info!("setup not complete — waiting for connect command via IPC");
            return;
        }
        let (port, baud) = self.serial_config().await;
        if let Err(e) = self.connect(&port, baud).await {
            error!("auto-connect failed: {e}");
        }
    }

    /// Open serial, detect the station, read calibration, kick off the
    /// archive backfill, and start the poller.
    pub async fn connect(&self, port: &str, baud: u32) -> Result<StationFamily, LinkError> {
        self.teardown().await;
        info!("connecting to {port} at {baud} baud...");
        let driver = LinkDriver::new(port, baud, self.settings.serial_timeout);
        driver.open().await?;
        self.attach(driver).await
    }

    /// Attach to an already-open device (tests, prepared links).
    pub async fn connect_with_device(
        &self,
        device: Box<dyn SerialDevice>,
        label: &str,
    ) -> Result<StationFamily, LinkError> {
        self.teardown().await;
        self.attach(LinkDriver::with_device(device, label)).await
    }

    async fn attach(&self, driver: LinkDriver) -> Result<StationFamily, LinkError> {
        let family = driver.detect_family().await?;
        info!("station: {}", family.display_name());
        driver.read_calibration().await?;

        // Archive sync runs in the background; it shares the I/O lock
        // with the poller so exchanges interleave, never overlap.
        let sync_driver = driver.clone();
        let sync_store = self.store.clone();
        let sync_task = tokio::spawn(async move {
            match sync_archive(&sync_driver, &sync_store).await {
                Ok(outcome) => info!("archive sync: {} new records", outcome.inserted),
                Err(e) => warn!("archive sync failed: {e}"),
            }
        });

        let poll_interval = self.poll_interval().await;
        let poller = Arc::new(Poller::new(
            driver.clone(),
            self.store.clone(),
            self.ipc.clone(),
            poll_interval,
            self.station_tz().await,
        ));
        self.restore_rain_state(&poller).await;

        let poller_task = tokio::spawn(poller.clone().run());
        info!("poller started ({poll_interval:?} interval)");

        *self.active.write().await = Some(ActiveLink {
            driver,
            poller,
            poller_task,
            sync_task,
        });
        Ok(family)
    }

    /// Stop the poller (checkpointing rain state), cancel background
    /// work, and close the port.
    pub async fn teardown(&self) {
        let Some(active) = self.active.write().await.take() else {
            return;
        };

        self.save_rain_state(&active.poller).await;
        active.poller.stop();
        active.sync_task.abort();

        let mut task = active.poller_task;
        if tokio::time::timeout(Duration::from_secs(6), &mut task)
            .await
            .is_err()
        {
            warn!("poller did not stop within the 6s deadline — aborting");
            task.abort();
        }
        active.driver.close().await;
    }

    pub async fn shutdown(&self) {
        info!("shutting down logger daemon...");
        // Hard deadline: if cleanup hangs on a stuck worker thread,
        // force the process down.
        std::thread::spawn(|| {
            std::thread::sleep(Duration::from_secs(10));
            warn!("shutdown deadline exceeded — forcing exit");
            std::process::exit(0);
        });

        self.teardown().await;
        self.ipc.stop().await;
        info!("logger daemon stopped");
    }

    // ── Rain-state checkpoint ─────────────────────────────────────────────

    async fn save_rain_state(&self, poller: &Poller) {
        let state = poller.rain_state().await;
        match serde_json::to_string(&state) {
            Ok(body) => match tokio::fs::write(&self.state_file, body).await {
                Ok(()) => info!("rain state saved to {}", self.state_file.display()),
                Err(e) => warn!("failed to save rain state: {e}"),
            },
            Err(e) => warn!("failed to encode rain state: {e}"),
        }
    }

    async fn restore_rain_state(&self, poller: &Poller) {
        let Ok(body) = tokio::fs::read_to_string(&self.state_file).await else {
            return;
        };
        match serde_json::from_str::<RainState>(&body) {
            Ok(state) => {
                poller.restore_rain_state(state).await;
                info!("restored rain state from {}", self.state_file.display());
            }
            Err(e) => warn!("failed to restore rain state: {e}"),
        }
    }

    // ── Configuration-store helpers ───────────────────────────────────────

    async fn setup_complete(&self) -> bool {
        matches!(
            self.store.get_config(keys::SETUP_COMPLETE).await,
            Ok(Some(v)) if v == "true"
        )
    }

    async fn serial_config(&self) -> (String, u32) {
        let port = self
            .store
            .get_config(keys::SERIAL_PORT)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(default_serial_port);
        let baud = self
            .store
            .get_config(keys::BAUD_RATE)
            .await
            .ok()
            .flatten()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_BAUD);
        (port, baud)
    }

    async fn poll_interval(&self) -> Duration {
        let secs = self
            .store
            .get_config(keys::POLL_INTERVAL)
            .await
            .ok()
            .flatten()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_POLL_INTERVAL);
        Duration::from_secs(secs.max(1))
    }

    async fn station_tz(&self) -> Option<chrono_tz::Tz> {
        let name = self
            .store
            .get_config(keys::STATION_TIMEZONE)
            .await
            .ok()
            .flatten()?;
        if name.is_empty() {
            return None;
        }
        match name.parse() {
            Ok(tz) => Some(tz),
            Err(_) => {
                warn!("invalid station_timezone {name:?}, using UTC");
                None
            }
        }
    }

    // ── IPC dispatch ──────────────────────────────────────────────────────

    /// Route one decoded IPC request. Errors become
    /// `{ok:false, error}` replies; the connection always survives.
    pub async fn dispatch(&self, cmd: &str, msg: Value) -> Result<Value, String> {
        match cmd {
            "status" => Ok(self.status().await),
            "probe" => self.h_probe(&msg).await,
            "auto_detect" => self.h_auto_detect().await,
            "connect" => self.h_connect(&msg).await,
            "reconnect" => self.h_reconnect().await,
            "read_station_time" => self.h_read_station_time().await,
            "sync_station_time" => self.h_sync_station_time().await,
            "read_config" => self.h_read_config().await,
            "write_config" => self.h_write_config(&msg).await,
            "clear_rain_daily" => self.h_clear_rain_daily().await,
            "clear_rain_yearly" => self.h_clear_rain_yearly().await,
            "force_archive" => self.h_force_archive().await,
            other => Err(format!("Unknown command: {other}")),
        }
    }

    /// The connected driver, or the error every device command returns
    /// while the port is closed.
    async fn driver(&self) -> Result<LinkDriver, String> {
        let guard = self.active.read().await;
        match guard.as_ref() {
            Some(active) if active.driver.connected() => Ok(active.driver.clone()),
            _ => Err("Not connected".to_string()),
        }
    }

    /// `status` never fails and never waits on the I/O lock.
    pub async fn status(&self) -> Value {
        let guard = self.active.read().await;
        match guard.as_ref() {
            Some(active) => {
                let meta = active.driver.meta();
                let stats = active.poller.stats().await;
                json!({
                    "connected": meta.connected,
                    "type_code": meta.family.map(|f| f.code() as i64).unwrap_or(-1),
                    "type_name": meta.family.map(|f| f.display_name()).unwrap_or("Unknown"),
                    "link_revision": meta.revision.letter(),
                    "poll_interval": active.poller.poll_interval.as_secs(),
                    "last_poll": stats.last_poll,
                    "uptime_seconds": stats.uptime_seconds,
                    "crc_errors": active.driver.crc_error_count(),
                    "timeouts": stats.timeouts,
                })
            }
            None => json!({
                "connected": false,
                "type_code": -1,
                "type_name": "Not connected",
                "link_revision": "unknown",
                "poll_interval": 0,
                "last_poll": Value::Null,
                "uptime_seconds": 0,
                "crc_errors": 0,
                "timeouts": 0,
            }),
        }
    }

    async fn h_probe(&self, msg: &Value) -> Result<Value, String> {
        let port = msg
            .get("port")
            .and_then(Value::as_str)
            .ok_or("probe requires a port")?
            .to_string();
        let baud = msg
            .get("baud")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_BAUD as u64) as u32;

        // Already connected to that port: answer without touching the bus.
        {
            let guard = self.active.read().await;
            if let Some(active) = guard.as_ref() {
                let meta = active.driver.meta();
                if meta.connected && meta.port == port {
                    return Ok(json!({
                        "success": true,
                        "station_type": meta.family.map(|f| f.display_name()).unwrap_or("Unknown"),
                        "station_code": meta.family.map(|f| f.code()),
                    }));
                }
            }
        }

        let family = probe_port(&port, baud).await.map_err(|e| e.to_string())?;
        Ok(json!({
            "success": true,
            "station_type": family.display_name(),
            "station_code": family.code(),
        }))
    }

    async fn h_auto_detect(&self) -> Result<Value, String> {
        {
            let guard = self.active.read().await;
            if let Some(active) = guard.as_ref() {
                let meta = active.driver.meta();
                if meta.connected {
                    if let Some(family) = meta.family {
                        return Ok(json!({
                            "found": true,
                            "port": meta.port,
                            "baud_rate": meta.baud,
                            "station_type": family.display_name(),
                            "station_code": family.code(),
                            "attempts": [],
                        }));
                    }
                }
            }
        }

        let mut attempts = Vec::new();
        for port in list_serial_ports() {
            for baud in [DEFAULT_BAUD, LEGACY_BAUD] {
                match probe_port(&port, baud).await {
                    Ok(family) => {
                        attempts.push(json!({"port": port, "baud": baud, "result": "found"}));
                        return Ok(json!({
                            "found": true,
                            "port": port,
                            "baud_rate": baud,
                            "station_type": family.display_name(),
                            "station_code": family.code(),
                            "attempts": attempts,
                        }));
                    }
                    Err(e) => {
                        attempts.push(json!({"port": port, "baud": baud, "error": e.to_string()}));
                    }
                }
            }
        }
        Ok(json!({"found": false, "attempts": attempts}))
    }

    async fn h_connect(&self, msg: &Value) -> Result<Value, String> {
        let port = msg
            .get("port")
            .and_then(Value::as_str)
            .ok_or("connect requires a port")?;
        let baud = msg
            .get("baud")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_BAUD as u64) as u32;
        let family = self.connect(port, baud).await.map_err(|e| e.to_string())?;
        Ok(json!({"success": true, "station_type": family.display_name()}))
    }

    async fn h_reconnect(&self) -> Result<Value, String> {
        let (port, baud) = self.serial_config().await;
        let family = self
            .connect(&port, baud)
            .await
            .map_err(|e| e.to_string())?;
        Ok(json!({"success": true, "station_type": family.display_name()}))
    }

    async fn h_read_station_time(&self) -> Result<Value, String> {
        let driver = self.driver().await?;
        let time = driver.read_station_time().await.map_err(|e| e.to_string())?;
        serde_json::to_value(time).map_err(|e| e.to_string())
    }

    async fn h_sync_station_time(&self) -> Result<Value, String> {
        let driver = self.driver().await?;
        let now = Local::now().naive_local();
        let ok = driver.write_station_time(now).await.is_ok();
        Ok(json!({
            "success": ok,
            "synced_to": now.format("%H:%M:%S %m/%d/%Y").to_string(),
        }))
    }

    async fn h_read_config(&self) -> Result<Value, String> {
        let driver = self.driver().await?;
        let archive_period = driver.read_archive_period().await.ok();
        let sample_period = driver.read_sample_period().await.ok();
        let cal = driver.calibration();
        Ok(json!({
            "archive_period": archive_period,
            "sample_period": sample_period,
            "calibration": {
                "inside_temp": cal.inside_temp,
                "outside_temp": cal.outside_temp,
                "barometer": cal.barometer,
                "outside_humidity": cal.outside_humidity,
                "rain_cal": cal.rain_cal,
            },
        }))
    }

    async fn h_write_config(&self, msg: &Value) -> Result<Value, String> {
        let driver = self.driver().await?;
        let mut results = serde_json::Map::new();

        if let Some(minutes) = msg.get("archive_period").and_then(Value::as_u64) {
            let outcome = driver.set_archive_period(minutes.min(255) as u8).await;
            results.insert("archive_period".into(), write_result(outcome)?);
        }

        if let Some(seconds) = msg.get("sample_period").and_then(Value::as_u64) {
            let outcome = driver.set_sample_period(seconds.min(65535) as u16).await;
            results.insert("sample_period".into(), write_result(outcome)?);
        }

        if let Some(cal) = msg.get("calibration") {
            #[derive(Deserialize)]
            struct CalPatch {
                inside_temp: i16,
                outside_temp: i16,
                barometer: u16,
                outside_humidity: i16,
                rain_cal: u16,
            }
            let patch: CalPatch = serde_json::from_value(cal.clone())
                .map_err(|e| format!("invalid calibration: {e}"))?;
            let outcome = driver
                .write_calibration(CalibrationOffsets {
                    inside_temp: patch.inside_temp,
                    outside_temp: patch.outside_temp,
                    barometer: patch.barometer,
                    outside_humidity: patch.outside_humidity,
                    rain_cal: patch.rain_cal.max(1),
                })
                .await;
            results.insert(
                "calibration".into(),
                Value::String(if outcome.is_ok() { "ok" } else { "failed" }.into()),
            );
        }

        Ok(json!({"results": results}))
    }

    async fn h_clear_rain_daily(&self) -> Result<Value, String> {
        let driver = self.driver().await?;
        Ok(json!({"success": driver.clear_rain_daily().await.is_ok()}))
    }

    async fn h_clear_rain_yearly(&self) -> Result<Value, String> {
        let driver = self.driver().await?;
        Ok(json!({"success": driver.clear_rain_yearly().await.is_ok()}))
    }

    async fn h_force_archive(&self) -> Result<Value, String> {
        let driver = self.driver().await?;
        Ok(json!({"success": driver.force_archive().await.is_ok()}))
    }
}

/// Out-of-range parameters surface verbatim; other failures degrade to
/// a per-field "failed".
fn write_result(outcome: Result<(), LinkError>) -> Result<Value, String> {
    match outcome {
        Ok(()) => Ok(Value::String("ok".into())),
        Err(e @ LinkError::InvalidRange(_)) => Err(e.to_string()),
        Err(_) => Ok(Value::String("failed".into())),
    }
}

/// One-shot open/detect/close on an unowned port.
async fn probe_port(port: &str, baud: u32) -> Result<StationFamily, LinkError> {
    let tmp = LinkDriver::new(port, baud, Duration::from_secs(3));
    tmp.open().await?;
    let detected = tmp.detect_family().await;
    tmp.close().await;
    detected
}

fn default_serial_port() -> String {
    if cfg!(windows) {
        "COM3".to_string()
    } else {
        "/dev/ttyUSB0".to_string()
    }
}
