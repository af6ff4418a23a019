//! LOOP polling engine.
//!
//! One long-lived task: poll the station, derive rain rate from bucket
//! tips, compute heat index / dew point / wind chill / feels-like / θ_e,
//! classify the pressure trend, persist the enriched reading, and push
//! a `sensor_update` to IPC subscribers. Every recoverable error is
//! absorbed — the loop never aborts on a timeout, CRC failure, or store
//! error.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, error, info, warn};

use wx_types::messages::{
    cardinal_direction, BarometerGroup, BroadcastMessage, CurrentConditions, DailyExtremes,
    DerivedGroup, HumidityGroup, PressureTrend, QuantityCell, RainGroup, TemperatureGroup,
    WindGroup,
};
use wx_types::{DerivedReading, SensorReading, StationFamily};

use crate::calculations::{
    dew_point, equivalent_potential_temperature, feels_like, heat_index, wind_chill,
};
use crate::error::LinkError;
use crate::ipc::IpcServer;
use crate::link_driver::LinkDriver;
use crate::pressure_trend::{analyze_pressure_trend, TREND_WINDOW_HOURS};
use crate::store::Store;

/// Fifteen minutes without a tip means the rain has stopped.
const TIP_CUTOFF_SECS: f64 = 900.0;

/// Rain-tip bookkeeping, checkpointed across restarts so the derived
/// rate survives a daemon bounce.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RainState {
    pub last_rain_total: Option<u16>,
    pub last_tip_time: Option<DateTime<Utc>>,
    pub rate_in_per_hr: f64,
}

impl RainState {
    /// Fold one rain-total observation into the state and return the
    /// current rate in tenths of in/hr.
    ///
    /// On a new tip the rate comes from the time since the previous
    /// tip. With no tip, the rate decays: it cannot exceed
    /// 0.01 in / elapsed or a tip would already have occurred. After
    /// 15 minutes without a tip the rate drops to zero.
    pub fn update(&mut self, now: DateTime<Utc>, rain_total: u16) -> u16 {
        if let Some(last_total) = self.last_rain_total {
            // Negative delta means the counter wrapped or was reset.
            let clicks_delta = (rain_total as i32 - last_total as i32).max(0);

            if clicks_delta > 0 {
                if let Some(tip) = self.last_tip_time {
                    let elapsed_hr = (now - tip).num_milliseconds() as f64 / 3_600_000.0;
                    if elapsed_hr > 0.0 {
                        self.rate_in_per_hr = clicks_delta as f64 * 0.01 / elapsed_hr;
                    }
                }
                // First tip since startup just records the time.
                self.last_tip_time = Some(now);
            } else if let Some(tip) = self.last_tip_time {
                let elapsed_s = (now - tip).num_milliseconds() as f64 / 1000.0;
                if elapsed_s > TIP_CUTOFF_SECS {
                    self.rate_in_per_hr = 0.0;
                } else {
                    let elapsed_hr = elapsed_s / 3600.0;
                    if elapsed_hr > 0.0 {
                        self.rate_in_per_hr = self.rate_in_per_hr.min(0.01 / elapsed_hr);
                    }
                }
            }
        }
        self.last_rain_total = Some(rain_total);
        (self.rate_in_per_hr * 10.0).round() as u16
    }
}

/// Point-in-time counters for the `status` command.
#[derive(Debug, Clone, Serialize)]
pub struct PollerStats {
    pub last_poll: Option<DateTime<Utc>>,
    pub timeouts: u64,
    pub uptime_seconds: u64,
}

pub struct Poller {
    driver: LinkDriver,
    store: Arc<Store>,
    ipc: Arc<IpcServer>,
    pub poll_interval: Duration,
    tz: Option<Tz>,
    rain: Mutex<RainState>,
    last_poll: RwLock<Option<DateTime<Utc>>>,
    timeouts: AtomicU64,
    started: Instant,
    running: AtomicBool,
    stop_notify: Notify,
}

impl Poller {
    pub fn new(
        driver: LinkDriver,
        store: Arc<Store>,
        ipc: Arc<IpcServer>,
        poll_interval: Duration,
        tz: Option<Tz>,
    ) -> Self {
        Self {
            driver,
            store,
            ipc,
            poll_interval,
            tz,
            rain: Mutex::new(RainState::default()),
            last_poll: RwLock::new(None),
            timeouts: AtomicU64::new(0),
            started: Instant::now(),
            running: AtomicBool::new(false),
            stop_notify: Notify::new(),
        }
    }

    pub async fn stats(&self) -> PollerStats {
        PollerStats {
            last_poll: *self.last_poll.read().await,
            timeouts: self.timeouts.load(Ordering::Relaxed),
            uptime_seconds: self.started.elapsed().as_secs(),
        }
    }

    pub async fn rain_state(&self) -> RainState {
        self.rain.lock().await.clone()
    }

    pub async fn restore_rain_state(&self, state: RainState) {
        *self.rain.lock().await = state;
    }

    /// Cooperative stop: the in-flight LOOP completes, retries and the
    /// inter-poll sleep see the flag promptly.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.driver.request_stop();
        self.stop_notify.notify_waiters();
    }

    /// Main polling loop. Runs until [`Poller::stop`].
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::Relaxed);
        info!("poller starting with {:?} interval", self.poll_interval);

        while self.running.load(Ordering::Relaxed) {
            match self.driver.poll_loop().await {
                Ok(reading) => {
                    *self.last_poll.write().await = Some(Utc::now());
                    info!(
                        "LOOP OK: outside_temp={:?} wind={:?} baro={:?}",
                        reading.outside_temp, reading.wind_speed, reading.barometer
                    );
                    self.process_reading(reading).await;
                }
                Err(LinkError::Cancelled) => break,
                Err(LinkError::Timeout) => {
                    let n = self.timeouts.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!("LOOP poll returned no data (timeout #{n})");
                }
                Err(e) => {
                    if !self.running.load(Ordering::Relaxed) {
                        break;
                    }
                    self.timeouts.fetch_add(1, Ordering::Relaxed);
                    error!("polling error: {e}");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.stop_notify.notified() => break,
            }
        }
        info!("poller stopped");
    }

    /// Enrich, persist, and broadcast one reading.
    async fn process_reading(&self, mut reading: SensorReading) {
        let now = Utc::now();
        let family = self.driver.family();

        // Stations without a rain-rate sensor get a tip-timer rate.
        if reading.rain_rate.is_none() {
            if let Some(total) = reading.rain_total {
                let tenths = self.rain.lock().await.update(now, total);
                reading.rain_rate = Some(tenths);
            }
        }

        // Yearly rain lives in processor memory, not the LOOP packet.
        // Best-effort: a failed read leaves the field empty.
        if family.is_some() {
            if let Ok(yearly) = self.driver.read_rain_yearly().await {
                reading.rain_yearly = Some(yearly);
            }
        }

        let mut hi = None;
        let mut dp = None;
        let mut theta = None;
        if let (Some(t), Some(h)) = (reading.outside_temp, reading.outside_humidity) {
            hi = heat_index(t, h);
            dp = dew_point(t, h);
            if let Some(b) = reading.barometer {
                theta = equivalent_potential_temperature(t, h, b);
            }
        }

        let wc = match (reading.outside_temp, reading.wind_speed) {
            (Some(t), Some(w)) => wind_chill(t, w),
            _ => None,
        };

        let fl = match (reading.outside_temp, reading.outside_humidity, reading.wind_speed) {
            (Some(t), Some(h), Some(w)) => Some(feels_like(t, h, w)),
            _ => None,
        };

        let trend = self.pressure_trend().await;

        let derived = DerivedReading {
            timestamp: now,
            station_type: family.map(StationFamily::code).unwrap_or(0),
            reading: reading.clone(),
            heat_index: hi,
            dew_point: dp,
            wind_chill: wc,
            feels_like: fl,
            theta_e: theta,
            pressure_trend: trend,
        };

        if let Err(e) = self.store.insert_reading(&derived).await {
            // Skip the broadcast: subscribers only ever see persisted rows.
            error!("failed to store reading: {e}");
            return;
        }

        let extremes = match self.store.daily_extremes(self.local_midnight(now)).await {
            Ok(extremes) => extremes,
            Err(e) => {
                warn!("daily extremes query failed: {e}");
                None
            }
        };

        let conditions =
            self.build_conditions(&reading, hi, dp, wc, fl, theta, trend, extremes, now, family);
        self.ipc
            .broadcast(&BroadcastMessage::SensorUpdate { data: conditions })
            .await;
    }

    /// Classify the barometric tendency over the last three hours.
    async fn pressure_trend(&self) -> Option<PressureTrend> {
        let cutoff = Utc::now() - chrono::Duration::hours(TREND_WINDOW_HOURS);
        let window = match self.store.barometer_window(cutoff).await {
            Ok(window) => window,
            Err(e) => {
                debug!("pressure window query failed: {e}");
                return None;
            }
        };
        if window.len() < 2 {
            return None;
        }
        let readings: Vec<(f64, i64)> = window
            .iter()
            .map(|(ts, bar)| (ts.timestamp() as f64, *bar))
            .collect();
        analyze_pressure_trend(&readings).map(|r| r.trend)
    }

    /// Start of today in the configured station timezone (UTC when
    /// unset), as a UTC instant for timestamp comparison.
    fn local_midnight(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        if let Some(tz) = self.tz {
            let local_day = now.with_timezone(&tz).date_naive();
            if let Some(midnight) = local_day.and_hms_opt(0, 0, 0) {
                if let Some(instant) = tz.from_local_datetime(&midnight).earliest() {
                    return instant.with_timezone(&Utc);
                }
            }
        }
        now.date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always valid")
            .and_utc()
    }

    /// Convert a reading into the display-unit conditions document.
    #[allow(clippy::too_many_arguments)]
    fn build_conditions(
        &self,
        reading: &SensorReading,
        hi: Option<i16>,
        dp: Option<i16>,
        wc: Option<i16>,
        fl: Option<i16>,
        theta: Option<i16>,
        trend: Option<PressureTrend>,
        extremes: Option<DailyExtremes>,
        now: DateTime<Utc>,
        family: Option<StationFamily>,
    ) -> CurrentConditions {
        let temp_f = |tenths: Option<i16>| tenths.map(|v| v as f64 / 10.0);
        let round2 = |v: f64| (v * 100.0).round() / 100.0;

        CurrentConditions {
            timestamp: now,
            station_type: family
                .map(|f| f.display_name().to_string())
                .unwrap_or_else(|| "Unknown".to_string()),
            temperature: TemperatureGroup {
                inside: QuantityCell::new(temp_f(reading.inside_temp), "F"),
                outside: QuantityCell::new(temp_f(reading.outside_temp), "F"),
            },
            humidity: HumidityGroup {
                inside: QuantityCell::new(reading.inside_humidity.map(f64::from), "%"),
                outside: QuantityCell::new(reading.outside_humidity.map(f64::from), "%"),
            },
            wind: WindGroup {
                speed: QuantityCell::new(reading.wind_speed.map(f64::from), "mph"),
                direction: QuantityCell::new(reading.wind_direction.map(f64::from), "°"),
                cardinal: reading
                    .wind_direction
                    .map(|d| cardinal_direction(d).to_string()),
            },
            barometer: BarometerGroup {
                value: reading.barometer.map(|v| v as f64 / 1000.0),
                unit: "inHg".to_string(),
                trend,
            },
            rain: RainGroup {
                daily: reading
                    .rain_total
                    .map(|c| QuantityCell::new(Some(round2(c as f64 * 0.01)), "in")),
                yearly: reading
                    .rain_yearly
                    .map(|c| QuantityCell::new(Some(round2(c as f64 * 0.01)), "in")),
                rate: reading
                    .rain_rate
                    .map(|r| QuantityCell::new(Some(round2(r as f64 / 10.0)), "in/hr")),
            },
            derived: DerivedGroup {
                heat_index: QuantityCell::new(temp_f(hi), "F"),
                dew_point: QuantityCell::new(temp_f(dp), "F"),
                wind_chill: QuantityCell::new(temp_f(wc), "F"),
                feels_like: QuantityCell::new(temp_f(fl), "F"),
                theta_e: QuantityCell::new(theta.map(|v| v as f64 / 10.0), "K"),
            },
            solar_radiation: reading
                .solar_radiation
                .map(|v| QuantityCell::new(Some(v as f64), "W/m²")),
            uv_index: reading
                .uv_index
                .map(|v| QuantityCell::new(Some(v as f64 / 10.0), "")),
            daily_extremes: extremes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(base: DateTime<Utc>, secs: i64) -> DateTime<Utc> {
        base + chrono::Duration::seconds(secs)
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn first_reading_only_seeds_the_total() {
        let mut rain = RainState::default();
        assert_eq!(rain.update(base(), 100), 0);
        assert_eq!(rain.last_rain_total, Some(100));
        assert_eq!(rain.last_tip_time, None);
    }

    #[test]
    fn tips_every_30s_read_1_2_in_per_hr() {
        let mut rain = RainState::default();
        let t0 = base();
        rain.update(t0, 100);
        // First tip records the time but has no reference interval yet.
        assert_eq!(rain.update(at(t0, 30), 101), 0);
        // Steady tips 30 s apart: 0.01 in / (30/3600) hr = 1.2 in/hr.
        assert_eq!(rain.update(at(t0, 60), 102), 12);
        assert_eq!(rain.update(at(t0, 90), 103), 12);
        assert_eq!(rain.update(at(t0, 120), 104), 12);
    }

    #[test]
    fn rate_decays_when_tips_stop() {
        let mut rain = RainState::default();
        let t0 = base();
        rain.update(t0, 100);
        rain.update(at(t0, 30), 101);
        assert_eq!(rain.update(at(t0, 60), 102), 12);

        // 60 s since the last tip: the rate cannot exceed
        // 0.01 / (60/3600) = 0.6 in/hr.
        assert_eq!(rain.update(at(t0, 120), 102), 6);
        // 120 s: capped at 0.3 in/hr.
        assert_eq!(rain.update(at(t0, 180), 102), 3);
    }

    #[test]
    fn rate_zeroes_after_15_minutes() {
        let mut rain = RainState::default();
        let t0 = base();
        rain.update(t0, 100);
        rain.update(at(t0, 30), 101);
        rain.update(at(t0, 60), 102);

        assert_eq!(rain.update(at(t0, 60 + 901), 102), 0);
        assert_eq!(rain.rate_in_per_hr, 0.0);
    }

    #[test]
    fn counter_reset_is_not_a_tip() {
        let mut rain = RainState::default();
        let t0 = base();
        rain.update(t0, 100);
        rain.update(at(t0, 30), 101);
        rain.update(at(t0, 60), 102);

        // The station counter reset (e.g. cleared daily accumulator):
        // treated as no new tips, then the total re-seeds.
        let rate = rain.update(at(t0, 90), 0);
        assert!(rate <= 12);
        assert_eq!(rain.last_rain_total, Some(0));
    }

    #[test]
    fn checkpoint_round_trip() {
        let mut rain = RainState::default();
        let t0 = base();
        rain.update(t0, 100);
        rain.update(at(t0, 30), 101);
        rain.update(at(t0, 60), 102);

        let json = serde_json::to_string(&rain).unwrap();
        let restored: RainState = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.last_rain_total, Some(102));
        assert_eq!(restored.last_tip_time, rain.last_tip_time);
        assert!((restored.rate_in_per_hr - rain.rate_in_per_hr).abs() < 1e-9);
    }
}
