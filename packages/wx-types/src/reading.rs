//! Sensor readings and calibration.
//!
//! All numeric fields stay in the station's native units at this layer:
//! temperatures in tenths °F, barometer in thousandths inHg, rain in
//! bucket clicks, UV in tenths of an index. Unit conversion happens only
//! at the IPC presentation boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::messages::PressureTrend;

/// Parsed sensor data from one LOOP packet. `None` means the station
/// reported an invalid-data marker or carries no such sensor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Tenths °F, signed.
    pub inside_temp: Option<i16>,
    /// Tenths °F, signed.
    pub outside_temp: Option<i16>,
    /// Tenths °F; GroWeather reports soil temperature in place of inside.
    pub soil_temp: Option<i16>,
    /// Percent 1-100.
    pub inside_humidity: Option<u8>,
    /// Percent 1-100.
    pub outside_humidity: Option<u8>,
    /// mph.
    pub wind_speed: Option<u8>,
    /// Degrees 0-359.
    pub wind_direction: Option<u16>,
    /// Thousandths inHg.
    pub barometer: Option<u16>,
    /// Bucket clicks.
    pub rain_total: Option<u16>,
    /// Tenths in/hr (station-supplied or tip-timer derived).
    pub rain_rate: Option<u16>,
    /// Bucket clicks, read separately from station memory.
    pub rain_yearly: Option<u16>,
    /// W/m².
    pub solar_radiation: Option<u16>,
    /// Tenths of an index.
    pub uv_index: Option<u8>,
    /// MED × 10.
    pub uv_dose: Option<u16>,
    /// 0 = dry .. 15 = wet.
    pub leaf_wetness: Option<u8>,
    /// Miles × 10 (24-bit).
    pub wind_run_total: Option<u32>,
    /// Hundredths of an inch.
    pub et_total: Option<u16>,
    /// Tenths °F-day (24-bit).
    pub degree_days_total: Option<u32>,
    /// Langleys × 10 (24-bit).
    pub solar_energy_total: Option<u32>,
}

/// Calibration offsets read from station memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationOffsets {
    /// Tenths °F to add.
    pub inside_temp: i16,
    /// Tenths °F to add.
    pub outside_temp: i16,
    /// Thousandths inHg to subtract.
    pub barometer: u16,
    /// Percent to add (result clamped to 1..=100).
    pub outside_humidity: i16,
    /// Clicks per inch; never below 1.
    pub rain_cal: u16,
}

impl Default for CalibrationOffsets {
    fn default() -> Self {
        Self {
            inside_temp: 0,
            outside_temp: 0,
            barometer: 0,
            outside_humidity: 0,
            rain_cal: 100,
        }
    }
}

impl CalibrationOffsets {
    /// Apply the offsets to a raw reading:
    /// temperatures add, barometer subtracts, humidity adds then clamps.
    pub fn apply(&self, mut reading: SensorReading) -> SensorReading {
        if let Some(t) = reading.inside_temp {
            reading.inside_temp = Some(t.saturating_add(self.inside_temp));
        }
        if let Some(t) = reading.outside_temp {
            reading.outside_temp = Some(t.saturating_add(self.outside_temp));
        }
        if let Some(b) = reading.barometer {
            reading.barometer = Some(b.saturating_sub(self.barometer));
        }
        if let Some(h) = reading.outside_humidity {
            let adjusted = (h as i16 + self.outside_humidity).clamp(1, 100);
            reading.outside_humidity = Some(adjusted as u8);
        }
        reading
    }
}

/// A reading enriched with derived quantities, as persisted and broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedReading {
    /// Assigned at decode time, UTC, monotonic non-decreasing.
    pub timestamp: DateTime<Utc>,
    pub station_type: u8,
    #[serde(flatten)]
    pub reading: SensorReading,
    /// Tenths °F.
    pub heat_index: Option<i16>,
    /// Tenths °F.
    pub dew_point: Option<i16>,
    /// Tenths °F.
    pub wind_chill: Option<i16>,
    /// Tenths °F.
    pub feels_like: Option<i16>,
    /// Tenths of a kelvin.
    pub theta_e: Option<i16>,
    pub pressure_trend: Option<PressureTrend>,
}

/// Station clock as read from processor memory. Basic units carry no
/// year nibbles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationTime {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub day: u8,
    pub month: u8,
    pub year: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading() -> SensorReading {
        SensorReading {
            inside_temp: Some(720),
            outside_temp: Some(451),
            barometer: Some(30120),
            outside_humidity: Some(78),
            ..Default::default()
        }
    }

    #[test]
    fn offsets_follow_the_calibration_law() {
        let offsets = CalibrationOffsets {
            inside_temp: 15,
            outside_temp: -20,
            barometer: 120,
            outside_humidity: 5,
            rain_cal: 100,
        };
        let calibrated = offsets.apply(reading());
        assert_eq!(calibrated.inside_temp, Some(735));
        assert_eq!(calibrated.outside_temp, Some(431));
        assert_eq!(calibrated.barometer, Some(30000));
        assert_eq!(calibrated.outside_humidity, Some(83));
    }

    #[test]
    fn humidity_clamps_to_valid_range() {
        let mut offsets = CalibrationOffsets {
            outside_humidity: 50,
            ..Default::default()
        };
        assert_eq!(offsets.apply(reading()).outside_humidity, Some(100));

        offsets.outside_humidity = -90;
        assert_eq!(offsets.apply(reading()).outside_humidity, Some(1));
    }

    #[test]
    fn missing_fields_stay_missing() {
        let offsets = CalibrationOffsets {
            inside_temp: 100,
            outside_temp: 100,
            barometer: 100,
            outside_humidity: 10,
            rain_cal: 100,
        };
        let calibrated = offsets.apply(SensorReading::default());
        assert_eq!(calibrated, SensorReading::default());
    }
}
