//! LOOP packet and archive record encoders — the inverse of the
//! wx-types parsers, used by the simulated station and by round-trip
//! tests.

use wx_types::commands::SOH;
use wx_types::crc::calculate;
use wx_types::{bcd_encode, SensorReading, StationFamily};

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_i16(out: &mut Vec<u8>, v: i16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn push_u24(out: &mut Vec<u8>, v: u32) {
    out.push((v & 0xFF) as u8);
    out.push(((v >> 8) & 0xFF) as u8);
    out.push(((v >> 16) & 0xFF) as u8);
}

fn temp_or_invalid(v: Option<i16>) -> i16 {
    v.unwrap_or(0x7FFF)
}

fn hum_or_invalid(v: Option<u8>) -> u8 {
    v.unwrap_or(0x80)
}

/// Encode the LOOP data bytes (without SOH/CRC) for a family.
pub fn loop_data(reading: &SensorReading, family: StationFamily) -> Vec<u8> {
    let mut d = Vec::with_capacity(family.loop_data_size());
    match family {
        StationFamily::GroWeather => {
            push_u16(&mut d, 0); // archive pointer
            d.push(0); // bar/power status
            push_i16(&mut d, temp_or_invalid(reading.soil_temp));
            push_i16(&mut d, temp_or_invalid(reading.outside_temp));
            d.push(reading.wind_speed.unwrap_or(0));
            push_u16(&mut d, reading.wind_direction.unwrap_or(0x7FFF));
            push_u16(&mut d, reading.barometer.unwrap_or(0));
            d.push(reading.rain_rate.unwrap_or(0) as u8);
            d.push(hum_or_invalid(reading.outside_humidity));
            push_u16(&mut d, reading.rain_total.unwrap_or(0));
            push_u16(&mut d, reading.solar_radiation.unwrap_or(0xFFF));
            push_u24(&mut d, reading.wind_run_total.unwrap_or(0));
            push_u16(&mut d, reading.et_total.unwrap_or(0));
            push_u24(&mut d, reading.degree_days_total.unwrap_or(0));
            push_u24(&mut d, reading.solar_energy_total.unwrap_or(0));
            push_u24(&mut d, 0); // alarm/AOM status
            d.push(reading.leaf_wetness.unwrap_or(0));
        }
        StationFamily::Energy => {
            push_u16(&mut d, 0);
            d.push(0);
            push_i16(&mut d, temp_or_invalid(reading.inside_temp));
            push_i16(&mut d, temp_or_invalid(reading.outside_temp));
            d.push(reading.wind_speed.unwrap_or(0));
            push_u16(&mut d, reading.wind_direction.unwrap_or(0x7FFF));
            push_u16(&mut d, reading.barometer.unwrap_or(0));
            d.push(reading.rain_rate.unwrap_or(0) as u8);
            d.push(hum_or_invalid(reading.outside_humidity));
            push_u16(&mut d, reading.rain_total.unwrap_or(0));
            push_u16(&mut d, reading.solar_radiation.unwrap_or(0xFFF));
            push_u24(&mut d, 0); // alarm/AOM status
            d.extend_from_slice(&[0u8; 6]); // reserved
        }
        StationFamily::Health => {
            push_u16(&mut d, 0);
            d.push(0);
            push_i16(&mut d, temp_or_invalid(reading.inside_temp));
            push_i16(&mut d, temp_or_invalid(reading.outside_temp));
            d.push(reading.wind_speed.unwrap_or(0));
            push_u16(&mut d, reading.wind_direction.unwrap_or(0x7FFF));
            push_u16(&mut d, reading.barometer.unwrap_or(0));
            d.push(reading.rain_rate.unwrap_or(0) as u8);
            push_u16(&mut d, reading.rain_total.unwrap_or(0));
            push_u16(&mut d, reading.solar_radiation.unwrap_or(0xFFF));
            d.push(hum_or_invalid(reading.inside_humidity));
            d.push(hum_or_invalid(reading.outside_humidity));
            d.push(reading.uv_index.unwrap_or(0xFF));
            push_u16(&mut d, reading.uv_dose.unwrap_or(0));
            push_u24(&mut d, 0); // alarm/AOM status
        }
        _ => {
            push_i16(&mut d, temp_or_invalid(reading.inside_temp));
            push_i16(&mut d, temp_or_invalid(reading.outside_temp));
            d.push(reading.wind_speed.unwrap_or(0));
            push_u16(&mut d, reading.wind_direction.unwrap_or(0x7FFF));
            push_u16(&mut d, reading.barometer.unwrap_or(0));
            d.push(hum_or_invalid(reading.inside_humidity));
            d.push(hum_or_invalid(reading.outside_humidity));
            push_u16(&mut d, reading.rain_total.unwrap_or(0));
            push_u16(&mut d, 0); // unused
        }
    }
    debug_assert_eq!(d.len(), family.loop_data_size());
    d
}

/// Frame LOOP data as `SOH || data || CRC`.
pub fn loop_packet(reading: &SensorReading, family: StationFamily) -> Vec<u8> {
    let data = loop_data(reading, family);
    let crc = calculate(&data);
    let mut out = Vec::with_capacity(data.len() + 3);
    out.push(SOH);
    out.extend_from_slice(&data);
    out.extend_from_slice(&crc.to_be_bytes());
    out
}

/// Values for one encoded basic-family archive record.
#[derive(Debug, Clone)]
pub struct BasicArchiveSpec {
    pub hour: u8,
    pub minute: u8,
    pub day: u8,
    pub month: u8,
    pub barometer: u16,
    pub inside_humidity: u8,
    pub outside_humidity: u8,
    pub rain_in_period: u16,
    pub inside_temp_avg: i16,
    pub outside_temp_avg: i16,
    pub wind_speed_avg: u8,
    pub wind_direction: u8,
    pub outside_temp_hi: i16,
    pub wind_gust: u8,
    pub outside_temp_lo: i16,
}

impl Default for BasicArchiveSpec {
    fn default() -> Self {
        Self {
            hour: 12,
            minute: 0,
            day: 1,
            month: 6,
            barometer: 29950,
            inside_humidity: 45,
            outside_humidity: 70,
            rain_in_period: 0,
            inside_temp_avg: 705,
            outside_temp_avg: 630,
            wind_speed_avg: 5,
            wind_direction: 8,
            outside_temp_hi: 660,
            wind_gust: 14,
            outside_temp_lo: 600,
        }
    }
}

/// Encode a 21-byte Monitor/Wizard/Perception archive record.
pub fn basic_archive_record(spec: &BasicArchiveSpec) -> Vec<u8> {
    let mut d = Vec::with_capacity(21);
    push_u16(&mut d, spec.barometer);
    d.push(spec.inside_humidity);
    d.push(spec.outside_humidity);
    push_u16(&mut d, spec.rain_in_period);
    push_i16(&mut d, spec.inside_temp_avg);
    push_i16(&mut d, spec.outside_temp_avg);
    d.push(spec.wind_speed_avg);
    d.push(spec.wind_direction);
    push_i16(&mut d, spec.outside_temp_hi);
    d.push(spec.wind_gust);
    d.push(bcd_encode(spec.hour));
    d.push(bcd_encode(spec.minute));
    d.push(bcd_encode(spec.day));
    d.push(spec.month);
    push_i16(&mut d, spec.outside_temp_lo);
    debug_assert_eq!(d.len(), 21);
    d
}
