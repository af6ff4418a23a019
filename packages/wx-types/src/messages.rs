//! Broadcast payloads pushed to IPC subscribers.
//!
//! Everything crossing the IPC boundary is a tagged type, never a loose
//! map. The `CurrentConditions` document presents display units (°F,
//! mph, inHg, in, in/hr, W/m²) with nested `{value, unit}` cells so
//! subscribers render without unit tables of their own.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 3-hour barometric tendency classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PressureTrend {
    Rising,
    Steady,
    Falling,
}

impl PressureTrend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rising => "rising",
            Self::Steady => "steady",
            Self::Falling => "falling",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "rising" => Some(Self::Rising),
            "steady" => Some(Self::Steady),
            "falling" => Some(Self::Falling),
            _ => None,
        }
    }
}

/// One displayable quantity. `value: null` means the sensor is absent or
/// reported invalid data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantityCell {
    pub value: Option<f64>,
    pub unit: String,
}

impl QuantityCell {
    pub fn new(value: Option<f64>, unit: &str) -> Self {
        Self {
            value,
            unit: unit.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemperatureGroup {
    pub inside: QuantityCell,
    pub outside: QuantityCell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumidityGroup {
    pub inside: QuantityCell,
    pub outside: QuantityCell,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindGroup {
    pub speed: QuantityCell,
    pub direction: QuantityCell,
    pub cardinal: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BarometerGroup {
    pub value: Option<f64>,
    pub unit: String,
    pub trend: Option<PressureTrend>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RainGroup {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily: Option<QuantityCell>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yearly: Option<QuantityCell>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<QuantityCell>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedGroup {
    pub heat_index: QuantityCell,
    pub dew_point: QuantityCell,
    pub wind_chill: QuantityCell,
    pub feels_like: QuantityCell,
    pub theta_e: QuantityCell,
}

/// Today's extremes since local midnight, attached when available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyExtremes {
    pub outside_temp_hi: Option<QuantityCell>,
    pub outside_temp_lo: Option<QuantityCell>,
    pub inside_temp_hi: Option<QuantityCell>,
    pub inside_temp_lo: Option<QuantityCell>,
    pub wind_speed_hi: Option<QuantityCell>,
    pub barometer_hi: Option<QuantityCell>,
    pub barometer_lo: Option<QuantityCell>,
    pub humidity_hi: Option<QuantityCell>,
    pub humidity_lo: Option<QuantityCell>,
    pub rain_rate_hi: Option<QuantityCell>,
}

/// The live-conditions document pushed to subscribers and mirrored by
/// the REST layer, so one frontend type covers both sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentConditions {
    pub timestamp: DateTime<Utc>,
    pub station_type: String,
    pub temperature: TemperatureGroup,
    pub humidity: HumidityGroup,
    pub wind: WindGroup,
    pub barometer: BarometerGroup,
    pub rain: RainGroup,
    pub derived: DerivedGroup,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solar_radiation: Option<QuantityCell>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uv_index: Option<QuantityCell>,
    pub daily_extremes: Option<DailyExtremes>,
}

/// Unsolicited messages pushed over a subscribed IPC connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BroadcastMessage {
    #[serde(rename = "sensor_update")]
    SensorUpdate { data: CurrentConditions },
}

pub const CARDINAL_DIRECTIONS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

/// Nearest 16-point compass name for a direction in degrees.
pub fn cardinal_direction(degrees: u16) -> &'static str {
    let idx = ((degrees as f64 / 22.5).round() as usize) % 16;
    CARDINAL_DIRECTIONS[idx]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cardinal_names() {
        assert_eq!(cardinal_direction(0), "N");
        assert_eq!(cardinal_direction(90), "E");
        assert_eq!(cardinal_direction(225), "SW");
        assert_eq!(cardinal_direction(359), "N");
    }

    #[test]
    fn broadcast_wire_tag() {
        let msg = BroadcastMessage::SensorUpdate {
            data: CurrentConditions {
                timestamp: Utc::now(),
                station_type: "Weather Monitor II".into(),
                temperature: TemperatureGroup {
                    inside: QuantityCell::new(Some(72.0), "F"),
                    outside: QuantityCell::new(None, "F"),
                },
                humidity: HumidityGroup {
                    inside: QuantityCell::new(Some(45.0), "%"),
                    outside: QuantityCell::new(Some(78.0), "%"),
                },
                wind: WindGroup {
                    speed: QuantityCell::new(Some(12.0), "mph"),
                    direction: QuantityCell::new(Some(225.0), "°"),
                    cardinal: Some("SW".into()),
                },
                barometer: BarometerGroup {
                    value: Some(30.12),
                    unit: "inHg".into(),
                    trend: Some(PressureTrend::Steady),
                },
                rain: RainGroup {
                    daily: None,
                    yearly: None,
                    rate: None,
                },
                derived: DerivedGroup {
                    heat_index: QuantityCell::new(None, "F"),
                    dew_point: QuantityCell::new(None, "F"),
                    wind_chill: QuantityCell::new(None, "F"),
                    feels_like: QuantityCell::new(None, "F"),
                    theta_e: QuantityCell::new(None, "K"),
                },
                solar_radiation: None,
                uv_index: None,
                daily_extremes: None,
            },
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "sensor_update");
        assert_eq!(json["data"]["barometer"]["trend"], "steady");
        assert_eq!(json["data"]["wind"]["cardinal"], "SW");
    }
}
