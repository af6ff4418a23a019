//! Barometric pressure trend classification.

use wx_types::messages::PressureTrend;

/// Classification threshold in thousandths of inHg (0.020 inHg).
pub const TREND_THRESHOLD: i64 = 20;

/// Analysis window.
pub const TREND_WINDOW_HOURS: i64 = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct TrendResult {
    pub trend: PressureTrend,
    /// Change in thousandths inHg over the window.
    pub change: i64,
    /// Thousandths inHg per hour.
    pub rate_per_hour: f64,
}

/// Classify the barometric tendency from `(unix_seconds, thousandths)`
/// readings sorted ascending. Needs at least two points.
pub fn analyze_pressure_trend(readings: &[(f64, i64)]) -> Option<TrendResult> {
    if readings.len() < 2 {
        return None;
    }

    let (oldest_time, oldest_bar) = readings[0];
    let (newest_time, newest_bar) = readings[readings.len() - 1];

    let elapsed_hours = (newest_time - oldest_time) / 3600.0;
    if elapsed_hours <= 0.0 {
        return None;
    }

    let change = newest_bar - oldest_bar;
    let rate = change as f64 / elapsed_hours;

    let trend = if change > TREND_THRESHOLD {
        PressureTrend::Rising
    } else if change < -TREND_THRESHOLD {
        PressureTrend::Falling
    } else {
        PressureTrend::Steady
    };

    Some(TrendResult {
        trend,
        change,
        rate_per_hour: (rate * 10.0).round() / 10.0,
    })
}
