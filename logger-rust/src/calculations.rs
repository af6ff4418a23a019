//! Derived meteorological quantities.
//!
//! Heat index, dew point, wind chill, feels-like composite, equivalent
//! potential temperature, and the interval rain-rate helper. All
//! temperatures are tenths of degrees Fahrenheit unless noted.

// THI table from the vendor reference.
// Rows: 68F to 122F (55 rows); columns: 0% to 100% humidity in 10% steps.
// Values above 125 exist only to anchor interpolation.
const THI_TABLE: [[i16; 11]; 55] = [
    [61, 63, 63, 64, 66, 66, 68, 68, 70, 70, 70],        // 68
    [63, 64, 65, 65, 67, 67, 69, 69, 71, 71, 72],        // 69
    [65, 65, 66, 66, 68, 68, 70, 70, 72, 72, 74],        // 70
    [66, 66, 67, 67, 69, 69, 71, 71, 73, 73, 75],        // 71
    [67, 67, 68, 69, 70, 71, 72, 72, 74, 74, 76],        // 72
    [68, 68, 69, 71, 71, 73, 73, 74, 75, 75, 77],        // 73
    [69, 69, 70, 72, 72, 74, 74, 76, 76, 76, 78],        // 74
    [70, 71, 71, 73, 73, 75, 75, 77, 77, 78, 79],        // 75
    [71, 72, 73, 74, 74, 76, 76, 78, 79, 80, 80],        // 76
    [72, 73, 75, 75, 75, 77, 77, 79, 81, 81, 82],        // 77
    [74, 74, 76, 76, 77, 78, 79, 80, 82, 83, 84],        // 78
    [75, 75, 77, 77, 79, 79, 81, 81, 83, 85, 87],        // 79
    [76, 76, 78, 78, 80, 80, 82, 83, 85, 87, 90],        // 80
    [77, 77, 79, 79, 81, 81, 83, 85, 87, 89, 93],        // 81
    [78, 78, 80, 80, 82, 83, 84, 87, 89, 92, 96],        // 82
    [79, 79, 81, 81, 83, 85, 85, 89, 91, 95, 99],        // 83
    [79, 80, 81, 82, 84, 86, 87, 91, 94, 98, 103],       // 84
    [80, 81, 81, 83, 85, 87, 89, 93, 97, 101, 108],      // 85
    [81, 82, 82, 84, 86, 88, 91, 95, 99, 104, 113],      // 86
    [82, 83, 83, 85, 87, 90, 93, 97, 102, 109, 120],     // 87
    [83, 84, 84, 86, 88, 92, 95, 99, 105, 114, 131],     // 88
    [84, 84, 85, 87, 90, 94, 97, 102, 109, 120, 144],    // 89
    [84, 85, 86, 89, 92, 95, 99, 105, 113, 128, 150],    // 90
    [84, 86, 87, 91, 93, 96, 101, 108, 118, 136, 150],   // 91
    [85, 87, 88, 92, 94, 98, 104, 112, 124, 144, 150],   // 92
    [86, 88, 89, 93, 96, 100, 107, 116, 130, 150, 150],  // 93
    [87, 89, 90, 94, 98, 102, 110, 120, 137, 150, 150],  // 94
    [88, 90, 91, 95, 99, 104, 113, 124, 144, 150, 150],  // 95
    [89, 91, 93, 97, 101, 107, 117, 128, 150, 150, 150], // 96
    [90, 92, 95, 99, 103, 110, 121, 132, 150, 150, 150], // 97
    [90, 93, 96, 100, 105, 113, 125, 150, 150, 150, 150], // 98
    [90, 94, 97, 101, 107, 116, 129, 150, 150, 150, 150], // 99
    [91, 95, 98, 103, 110, 119, 133, 150, 150, 150, 150], // 100
    [92, 96, 99, 105, 112, 122, 137, 150, 150, 150, 150], // 101
    [93, 97, 100, 106, 114, 125, 150, 150, 150, 150, 150], // 102
    [94, 98, 102, 107, 117, 128, 150, 150, 150, 150, 150], // 103
    [95, 99, 104, 109, 120, 132, 150, 150, 150, 150, 150], // 104
    [95, 100, 105, 111, 123, 135, 150, 150, 150, 150, 150], // 105
    [95, 101, 106, 113, 126, 150, 150, 150, 150, 150, 150], // 106
    [96, 102, 107, 115, 130, 150, 150, 150, 150, 150, 150], // 107
    [97, 103, 108, 117, 133, 150, 150, 150, 150, 150, 150], // 108
    [98, 104, 110, 119, 137, 150, 150, 150, 150, 150, 150], // 109
    [99, 105, 112, 122, 142, 150, 150, 150, 150, 150, 150], // 110
    [100, 106, 113, 125, 150, 150, 150, 150, 150, 150, 150], // 111
    [100, 107, 115, 128, 150, 150, 150, 150, 150, 150, 150], // 112
    [100, 108, 117, 131, 150, 150, 150, 150, 150, 150, 150], // 113
    [101, 109, 119, 134, 150, 150, 150, 150, 150, 150, 150], // 114
    [102, 110, 121, 136, 150, 150, 150, 150, 150, 150, 150], // 115
    [103, 111, 123, 140, 150, 150, 150, 150, 150, 150, 150], // 116
    [104, 112, 125, 143, 150, 150, 150, 150, 150, 150, 150], // 117
    [105, 113, 127, 150, 150, 150, 150, 150, 150, 150, 150], // 118
    [106, 114, 129, 150, 150, 150, 150, 150, 150, 150, 150], // 119
    [107, 116, 131, 150, 150, 150, 150, 150, 150, 150, 150], // 120
    [108, 117, 133, 150, 150, 150, 150, 150, 150, 150, 150], // 121
    [108, 118, 136, 150, 150, 150, 150, 150, 150, 150, 150], // 122
];

const THI_BASE_TEMP: f64 = 68.0;
const THI_MAX_TEMP: f64 = 122.0;

// Wind chill factor tables from the vendor reference ChillCalc.
const CHILL_TABLE_ONE: [f64; 11] = [156.0, 151.0, 146.0, 141.0, 133.0, 123.0, 110.0, 87.0, 61.0, 14.0, 0.0];
const CHILL_TABLE_TWO: [f64; 11] = [0.0, 16.0, 16.0, 16.0, 25.0, 33.0, 41.0, 74.0, 82.0, 152.0, 0.0];

/// Heat index via bilinear interpolation over the THI table.
/// Inputs outside 68-122 °F or 0-100 % return `None`, as do table
/// regions above 125 °F (interpolation artifacts, not real values).
pub fn heat_index(temp_tenths_f: i16, humidity: u8) -> Option<i16> {
    let temp_f = temp_tenths_f as f64 / 10.0;

    if !(THI_BASE_TEMP..=THI_MAX_TEMP).contains(&temp_f) || humidity > 100 {
        return None;
    }

    let row_idx = temp_f - THI_BASE_TEMP;
    let col_idx = humidity as f64 / 10.0;

    let row_lo = row_idx.floor() as usize;
    let row_hi = (row_lo + 1).min(THI_TABLE.len() - 1);
    let row_frac = row_idx - row_lo as f64;

    let col_lo = col_idx.floor() as usize;
    let col_hi = (col_lo + 1).min(10);
    let col_frac = col_idx - col_lo as f64;

    let v00 = THI_TABLE[row_lo][col_lo] as f64;
    let v01 = THI_TABLE[row_lo][col_hi] as f64;
    let v10 = THI_TABLE[row_hi][col_lo] as f64;
    let v11 = THI_TABLE[row_hi][col_hi] as f64;

    let v0 = v00 + (v01 - v00) * col_frac;
    let v1 = v10 + (v11 - v10) * col_frac;
    let result = v0 + (v1 - v0) * row_frac;

    if result > 125.0 {
        return None;
    }
    Some((result * 10.0).round() as i16)
}

/// Dew point via the Magnus formula (a = 17.502, b = 240.97).
/// Humidity must be in (0, 100].
pub fn dew_point(temp_tenths_f: i16, humidity: u8) -> Option<i16> {
    if humidity == 0 || humidity > 100 {
        return None;
    }

    let temp_c = (temp_tenths_f as f64 / 10.0 - 32.0) * 5.0 / 9.0;
    let rh_frac = humidity as f64 / 100.0;

    let a = 17.502;
    let b = 240.97;

    let gamma = rh_frac.ln() + (a * temp_c) / (b + temp_c);
    let dp_c = (b * gamma) / (a - gamma);

    let dp_f = dp_c * 9.0 / 5.0 + 32.0;
    Some((dp_f * 10.0).round() as i16)
}

/// Wind chill via the vendor's two-table interpolation:
/// `index = 10 - speed/5`, `cf = one[i] + two[i]/16 · (speed mod 5)`,
/// `chill = cf · (T - 91.4)/256 + T`, clamped to not exceed T. Speed is
/// capped at 50 mph; undefined at or above 91.4 °F; zero wind returns T.
pub fn wind_chill(temp_tenths_f: i16, wind_speed_mph: u8) -> Option<i16> {
    let temp_f = temp_tenths_f as f64 / 10.0;

    if temp_f >= 91.4 {
        return None;
    }
    if wind_speed_mph == 0 {
        return Some(temp_tenths_f);
    }

    let speed = wind_speed_mph.min(50) as usize;
    let index = 10 - speed / 5;

    let cf = CHILL_TABLE_ONE[index] + (CHILL_TABLE_TWO[index] / 16.0) * (speed % 5) as f64;
    let chill_f = cf * ((temp_f - 91.4) / 256.0) + temp_f;
    let chill_f = chill_f.min(temp_f);

    Some((chill_f * 10.0).round() as i16)
}

/// Feels-like composite: heat index when hot and humid, wind chill when
/// cold and windy, otherwise the actual temperature.
pub fn feels_like(temp_tenths_f: i16, humidity: u8, wind_speed_mph: u8) -> i16 {
    let temp_f = temp_tenths_f as f64 / 10.0;

    if temp_f > 80.0 && humidity > 40 {
        if let Some(hi) = heat_index(temp_tenths_f, humidity) {
            return hi;
        }
    }

    if temp_f < 50.0 && wind_speed_mph > 3 {
        if let Some(wc) = wind_chill(temp_tenths_f, wind_speed_mph) {
            return wc;
        }
    }

    temp_tenths_f
}

/// Equivalent potential temperature θ_e, Bolton (1980), in tenths of a
/// kelvin.
pub fn equivalent_potential_temperature(
    temp_tenths_f: i16,
    humidity: u8,
    pressure_thousandths_inhg: u16,
) -> Option<i16> {
    if humidity == 0 || humidity > 100 || pressure_thousandths_inhg == 0 {
        return None;
    }

    let temp_f = temp_tenths_f as f64 / 10.0;
    let temp_c = (temp_f - 32.0) * 5.0 / 9.0;
    let temp_k = temp_c + 273.15;
    let pressure_hpa = pressure_thousandths_inhg as f64 / 1000.0 * 33.8639;
    let rh = humidity as f64 / 100.0;

    // Saturation vapor pressure, actual vapor pressure, mixing ratio.
    let es = 6.112 * ((17.67 * temp_c) / (temp_c + 243.5)).exp();
    let e = rh * es;
    let r = 621.97 * e / (pressure_hpa - e);

    // Lifted condensation level temperature.
    let t_lcl = 1.0 / (1.0 / (temp_k - 55.0) - rh.ln() / 2840.0) + 55.0;

    let mut theta_e = temp_k * (1000.0 / pressure_hpa).powf(0.2854);
    theta_e *= ((3.376 / t_lcl - 0.00254) * r * (1.0 + 0.81e-3 * r)).exp();

    Some((theta_e * 10.0).round() as i16)
}

/// Rain rate in inches per hour from an accumulation delta over a known
/// interval. `None` on rollover or degenerate inputs.
pub fn rain_rate_inches_per_hour(
    rain_clicks_now: u16,
    rain_clicks_prev: u16,
    rain_cal: u16,
    interval_seconds: f64,
) -> Option<f64> {
    if rain_cal == 0 || interval_seconds <= 0.0 {
        return None;
    }
    if rain_clicks_now < rain_clicks_prev {
        return None; // counter rollover
    }

    let delta_inches = (rain_clicks_now - rain_clicks_prev) as f64 / rain_cal as f64;
    let rate = delta_inches * 3600.0 / interval_seconds;
    Some((rate * 100.0).round() / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    mod heat_index_tests {
        use super::*;

        #[test]
        fn at_80f_50pct() {
            let result = heat_index(800, 50).unwrap();
            assert!((790..=830).contains(&result));
        }

        #[test]
        fn at_90f_80pct_is_high() {
            let result = heat_index(900, 80).unwrap();
            assert!(result > 1000);
        }

        #[test]
        fn below_table_is_none() {
            assert_eq!(heat_index(670, 50), None);
        }

        #[test]
        fn above_table_is_none() {
            assert_eq!(heat_index(1230, 50), None);
        }

        #[test]
        fn at_table_corner() {
            let result = heat_index(680, 0).unwrap();
            assert!((600..=620).contains(&result));
        }

        #[test]
        fn interpolates_between_rows() {
            let r80 = heat_index(800, 50).unwrap();
            let r81 = heat_index(810, 50).unwrap();
            let mid = heat_index(805, 50).unwrap();
            assert!(r80 <= mid && mid <= r81);
        }

        #[test]
        fn artifact_region_is_none() {
            // 122F at 100% interpolates above 125 — not a real value.
            assert_eq!(heat_index(1220, 100), None);
        }
    }

    mod dew_point_tests {
        use super::*;

        #[test]
        fn at_70f_50pct() {
            let result = dew_point(700, 50).unwrap();
            assert!((490..=520).contains(&result));
        }

        #[test]
        fn saturated_air_equals_temp() {
            let result = dew_point(700, 100).unwrap();
            assert!((result - 700).abs() < 10);
        }

        #[test]
        fn zero_humidity_is_none() {
            assert_eq!(dew_point(700, 0), None);
        }

        #[test]
        fn never_exceeds_temperature() {
            for temp in (300..1000).step_by(100) {
                for rh in (10..=100).step_by(10) {
                    if let Some(dp) = dew_point(temp, rh as u8) {
                        assert!(dp <= temp + 5, "dp {dp} > temp {temp} at rh {rh}");
                    }
                }
            }
        }
    }

    mod wind_chill_tests {
        use super::*;

        #[test]
        fn at_30f_10mph_chills() {
            let result = wind_chill(300, 10).unwrap();
            assert!(result < 300);
        }

        #[test]
        fn above_91_4f_is_none() {
            assert_eq!(wind_chill(920, 10), None);
        }

        #[test]
        fn zero_wind_returns_temp() {
            assert_eq!(wind_chill(300, 0), Some(300));
        }

        #[test]
        fn capped_at_50mph() {
            assert_eq!(wind_chill(300, 50), wind_chill(300, 60));
        }

        #[test]
        fn chill_increases_with_wind() {
            let r5 = wind_chill(300, 5).unwrap();
            let r20 = wind_chill(300, 20).unwrap();
            assert!(r20 < r5);
        }

        #[test]
        fn never_exceeds_temperature() {
            let result = wind_chill(300, 5).unwrap();
            assert!(result <= 300);
        }
    }

    mod feels_like_tests {
        use super::*;

        #[test]
        fn hot_humid_uses_heat_index() {
            assert_eq!(feels_like(900, 80, 5), heat_index(900, 80).unwrap());
        }

        #[test]
        fn cold_windy_uses_wind_chill() {
            assert_eq!(feels_like(300, 50, 15), wind_chill(300, 15).unwrap());
        }

        #[test]
        fn moderate_conditions_use_actual() {
            assert_eq!(feels_like(650, 50, 5), 650);
        }

        #[test]
        fn cold_but_calm_uses_actual() {
            assert_eq!(feels_like(300, 50, 2), 300);
        }
    }

    mod theta_e_tests {
        use super::*;

        #[test]
        fn standard_conditions() {
            let result = equivalent_potential_temperature(700, 50, 30000).unwrap();
            // Surface theta_e is typically 300-360K.
            assert!((3000..=3700).contains(&result));
        }

        #[test]
        fn hot_humid_is_higher() {
            let cool = equivalent_potential_temperature(600, 40, 30000).unwrap();
            let hot = equivalent_potential_temperature(900, 90, 30000).unwrap();
            assert!(hot > cool);
        }

        #[test]
        fn zero_humidity_is_none() {
            assert_eq!(equivalent_potential_temperature(700, 0, 30000), None);
        }

        #[test]
        fn zero_pressure_is_none() {
            assert_eq!(equivalent_potential_temperature(700, 50, 0), None);
        }
    }

    mod rain_rate_tests {
        use super::*;

        #[test]
        fn basic_rate() {
            // 10 clicks at 100 clicks/inch in 10 seconds = 36 in/hr.
            let result = rain_rate_inches_per_hour(110, 100, 100, 10.0).unwrap();
            assert!((result - 36.0).abs() < 0.1);
        }

        #[test]
        fn no_rain_is_zero() {
            assert_eq!(rain_rate_inches_per_hour(100, 100, 100, 10.0), Some(0.0));
        }

        #[test]
        fn zero_cal_is_none() {
            assert_eq!(rain_rate_inches_per_hour(110, 100, 0, 10.0), None);
        }

        #[test]
        fn rollover_is_none() {
            assert_eq!(rain_rate_inches_per_hour(50, 100, 100, 10.0), None);
        }
    }
}
