//! Archive record decoding and circular SRAM buffer enumeration.
//!
//! The station keeps interval summaries in a 32 KB SRAM ring delimited by
//! two link-memory pointers. Records carry a BCD timestamp without a
//! year; the year is inferred from the clock, rolled back one year when
//! the decoded date would land in the future.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::memory_map::{sentinel, SRAM_MAX_ADDR};
use crate::station::StationFamily;
use crate::{bcd_decode, ProtocolError};

/// One decoded archive record. Fields are the superset across families;
/// a family leaves the cells it does not record as `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub archive_address: u16,
    pub record_time: NaiveDateTime,
    pub station_type: u8,
    pub barometer: Option<u16>,
    pub inside_humidity: Option<u8>,
    pub outside_humidity: Option<u8>,
    pub rain_in_period: Option<u16>,
    pub inside_temp_avg: Option<i16>,
    pub outside_temp_avg: Option<i16>,
    pub wind_speed_avg: Option<u8>,
    pub wind_direction: Option<u8>,
    pub outside_temp_hi: Option<i16>,
    pub outside_temp_lo: Option<i16>,
    pub wind_gust: Option<u8>,
    pub solar_rad_avg: Option<u16>,
    pub solar_energy: Option<u16>,
    pub wind_run: Option<u16>,
    pub et: Option<u8>,
    pub degree_days: Option<u16>,
    pub uv_avg: Option<u8>,
    pub uv_dose: Option<u16>,
    pub rain_rate_hi: Option<u8>,
}

impl ArchiveRecord {
    fn empty(address: u16, record_time: NaiveDateTime, station_type: u8) -> Self {
        Self {
            archive_address: address,
            record_time,
            station_type,
            barometer: None,
            inside_humidity: None,
            outside_humidity: None,
            rain_in_period: None,
            inside_temp_avg: None,
            outside_temp_avg: None,
            wind_speed_avg: None,
            wind_direction: None,
            outside_temp_hi: None,
            outside_temp_lo: None,
            wind_gust: None,
            solar_rad_avg: None,
            solar_energy: None,
            wind_run: None,
            et: None,
            degree_days: None,
            uv_avg: None,
            uv_dose: None,
            rain_rate_hi: None,
        }
    }
}

fn u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

fn i16_le(data: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([data[offset], data[offset + 1]])
}

fn valid_archive_dir(value: u8) -> Option<u8> {
    if value == sentinel::WIND_DIR {
        return None;
    }
    Some(value)
}

fn valid_archive_hum(value: u8) -> Option<u8> {
    if value == 0xFF {
        return None;
    }
    Some(value)
}

/// Decode a 4-byte archive timestamp: hours (BCD), minutes (BCD),
/// day (BCD), month (binary low nibble). Year inferred from `now`;
/// dates in the future fall back one year.
pub fn decode_archive_timestamp(
    raw: &[u8],
    offset: usize,
    now: NaiveDateTime,
) -> Option<NaiveDateTime> {
    if raw.len() < offset + 4 {
        return None;
    }

    let hours = bcd_decode(raw[offset]);
    let minutes = bcd_decode(raw[offset + 1]);
    let day = bcd_decode(raw[offset + 2]);
    let month = raw[offset + 3] & 0x0F;

    if hours > 23 || minutes > 59 || !(1..=31).contains(&day) || !(1..=12).contains(&month) {
        return None;
    }

    let build = |year: i32| {
        NaiveDate::from_ymd_opt(year, month as u32, day as u32)
            .and_then(|d| d.and_hms_opt(hours as u32, minutes as u32, 0))
    };

    let dt = build(now.year())?;
    if dt > now {
        return build(now.year() - 1);
    }
    Some(dt)
}

/// Parse an archive record for the given family.
pub fn parse_archive_record(
    data: &[u8],
    address: u16,
    family: StationFamily,
    now: NaiveDateTime,
) -> Result<ArchiveRecord, ProtocolError> {
    let size = family.archive_record_size();
    if data.len() < size {
        return Err(ProtocolError::TooShort {
            got: data.len(),
            expected: size,
        });
    }

    match family {
        StationFamily::GroWeather => parse_groweather(data, address, family, now),
        StationFamily::Energy => parse_energy(data, address, family, now),
        StationFamily::Health => parse_health(data, address, family, now),
        _ => parse_basic(data, address, family, now),
    }
}

/// 21-byte Monitor/Wizard/Perception record, timestamp at offset 15.
fn parse_basic(
    data: &[u8],
    address: u16,
    family: StationFamily,
    now: NaiveDateTime,
) -> Result<ArchiveRecord, ProtocolError> {
    let ts = decode_archive_timestamp(data, 15, now).ok_or(ProtocolError::BadTimestamp)?;
    let mut rec = ArchiveRecord::empty(address, ts, family.code());
    rec.barometer = Some(u16_le(data, 0));
    rec.inside_humidity = valid_archive_hum(data[2]);
    rec.outside_humidity = valid_archive_hum(data[3]);
    rec.rain_in_period = Some(u16_le(data, 4));
    rec.inside_temp_avg = Some(i16_le(data, 6));
    rec.outside_temp_avg = Some(i16_le(data, 8));
    rec.wind_speed_avg = Some(data[10]);
    rec.wind_direction = valid_archive_dir(data[11]);
    rec.outside_temp_hi = Some(i16_le(data, 12));
    rec.wind_gust = Some(data[14]);
    rec.outside_temp_lo = Some(i16_le(data, 19));
    Ok(rec)
}

/// 32-byte GroWeather record, timestamp at offset 12.
fn parse_groweather(
    data: &[u8],
    address: u16,
    family: StationFamily,
    now: NaiveDateTime,
) -> Result<ArchiveRecord, ProtocolError> {
    let ts = decode_archive_timestamp(data, 12, now).ok_or(ProtocolError::BadTimestamp)?;
    let mut rec = ArchiveRecord::empty(address, ts, family.code());
    rec.barometer = Some(u16_le(data, 0));
    rec.outside_humidity = valid_archive_hum(data[2]);
    rec.wind_speed_avg = Some(data[3]);
    rec.wind_gust = Some(data[4]);
    rec.wind_direction = valid_archive_dir(data[5]);
    rec.rain_in_period = Some(u16_le(data, 6));
    rec.inside_temp_avg = Some(i16_le(data, 8));
    rec.outside_temp_avg = Some(i16_le(data, 10));
    rec.outside_temp_hi = Some(i16_le(data, 16));
    rec.outside_temp_lo = Some(i16_le(data, 18));
    rec.degree_days = Some(u16_le(data, 20));
    rec.et = Some(data[22]);
    rec.wind_run = Some(u16_le(data, 24));
    rec.solar_rad_avg = Some(u16_le(data, 26));
    rec.solar_energy = Some(u16_le(data, 28));
    rec.rain_rate_hi = Some(data[30]);
    Ok(rec)
}

/// 32-byte Energy record, timestamp at offset 12. Degree-days is a
/// single byte here, unlike GroWeather.
fn parse_energy(
    data: &[u8],
    address: u16,
    family: StationFamily,
    now: NaiveDateTime,
) -> Result<ArchiveRecord, ProtocolError> {
    let ts = decode_archive_timestamp(data, 12, now).ok_or(ProtocolError::BadTimestamp)?;
    let mut rec = ArchiveRecord::empty(address, ts, family.code());
    rec.barometer = Some(u16_le(data, 0));
    rec.outside_humidity = valid_archive_hum(data[2]);
    rec.wind_speed_avg = Some(data[3]);
    rec.wind_gust = Some(data[4]);
    rec.wind_direction = valid_archive_dir(data[5]);
    rec.rain_in_period = Some(u16_le(data, 6));
    rec.inside_temp_avg = Some(i16_le(data, 8));
    rec.outside_temp_avg = Some(i16_le(data, 10));
    rec.outside_temp_hi = Some(i16_le(data, 16));
    rec.outside_temp_lo = Some(i16_le(data, 18));
    rec.degree_days = Some(data[20] as u16);
    rec.wind_run = Some(u16_le(data, 24));
    rec.solar_rad_avg = Some(u16_le(data, 26));
    rec.solar_energy = Some(u16_le(data, 28));
    rec.rain_rate_hi = Some(data[30]);
    Ok(rec)
}

/// 30-byte Health record, timestamp at offset 12.
fn parse_health(
    data: &[u8],
    address: u16,
    family: StationFamily,
    now: NaiveDateTime,
) -> Result<ArchiveRecord, ProtocolError> {
    let ts = decode_archive_timestamp(data, 12, now).ok_or(ProtocolError::BadTimestamp)?;
    let mut rec = ArchiveRecord::empty(address, ts, family.code());
    rec.barometer = Some(u16_le(data, 0));
    rec.wind_speed_avg = Some(data[2]);
    rec.wind_gust = Some(data[3]);
    rec.wind_direction = valid_archive_dir(data[4]);
    rec.rain_rate_hi = Some(data[5]);
    rec.rain_in_period = Some(u16_le(data, 6));
    rec.inside_temp_avg = Some(i16_le(data, 8));
    rec.outside_temp_avg = Some(i16_le(data, 10));
    rec.outside_temp_hi = Some(i16_le(data, 16));
    rec.outside_temp_lo = Some(i16_le(data, 18));
    rec.inside_humidity = valid_archive_hum(data[20]);
    rec.outside_humidity = valid_archive_hum(data[21]);
    rec.uv_avg = Some(data[22]);
    rec.uv_dose = Some(u16_le(data, 24));
    rec.solar_rad_avg = Some(u16_le(data, 26));
    Ok(rec)
}

/// Enumerate record start addresses in the circular buffer, oldest first.
///
/// Empty when `old_ptr == new_ptr`; wraps at [`SRAM_MAX_ADDR`] when
/// `new_ptr < old_ptr`.
pub fn iter_archive_addresses(old_ptr: u16, new_ptr: u16, record_size: u16) -> Vec<u16> {
    if old_ptr == new_ptr || record_size == 0 {
        return Vec::new();
    }

    let mut addresses = Vec::new();
    if new_ptr > old_ptr {
        let mut addr = old_ptr;
        while addr < new_ptr {
            addresses.push(addr);
            addr += record_size;
        }
    } else {
        let mut addr = old_ptr;
        while addr < SRAM_MAX_ADDR {
            addresses.push(addr);
            addr += record_size;
        }
        let mut addr = 0;
        while addr < new_ptr {
            addresses.push(addr);
            addr += record_size;
        }
    }
    addresses
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bcd_encode;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn make_basic_record(hour: u8, minute: u8, day: u8, month: u8) -> Vec<u8> {
        let mut data = vec![0u8; 21];
        data[0..2].copy_from_slice(&29950u16.to_le_bytes());
        data[2] = 44;
        data[3] = 67;
        data[4..6].copy_from_slice(&3u16.to_le_bytes());
        data[6..8].copy_from_slice(&705i16.to_le_bytes());
        data[8..10].copy_from_slice(&632i16.to_le_bytes());
        data[10] = 6;
        data[11] = 9; // direction code
        data[12..14].copy_from_slice(&660i16.to_le_bytes());
        data[14] = 18;
        data[15] = bcd_encode(hour);
        data[16] = bcd_encode(minute);
        data[17] = bcd_encode(day);
        data[18] = month;
        data[19..21].copy_from_slice(&601i16.to_le_bytes());
        data
    }

    #[test]
    fn parses_basic_record() {
        let data = make_basic_record(11, 30, 14, 6);
        let rec = parse_archive_record(&data, 0x0100, StationFamily::Monitor, now()).unwrap();
        assert_eq!(rec.barometer, Some(29950));
        assert_eq!(rec.inside_humidity, Some(44));
        assert_eq!(rec.outside_humidity, Some(67));
        assert_eq!(rec.rain_in_period, Some(3));
        assert_eq!(rec.inside_temp_avg, Some(705));
        assert_eq!(rec.outside_temp_avg, Some(632));
        assert_eq!(rec.wind_speed_avg, Some(6));
        assert_eq!(rec.wind_direction, Some(9));
        assert_eq!(rec.outside_temp_hi, Some(660));
        assert_eq!(rec.wind_gust, Some(18));
        assert_eq!(rec.outside_temp_lo, Some(601));
        assert_eq!(
            rec.record_time,
            NaiveDate::from_ymd_opt(2024, 6, 14)
                .unwrap()
                .and_hms_opt(11, 30, 0)
                .unwrap()
        );
    }

    #[test]
    fn future_date_rolls_back_a_year() {
        // Decoded December date against a June clock lands in the future,
        // so it must belong to the previous year.
        let data = make_basic_record(8, 0, 24, 12);
        let rec = parse_archive_record(&data, 0, StationFamily::Monitor, now()).unwrap();
        assert_eq!(rec.record_time.year(), 2023);
        assert_eq!(rec.record_time.month(), 12);
    }

    #[test]
    fn zero_month_is_rejected() {
        let data = make_basic_record(8, 0, 24, 0);
        let err = parse_archive_record(&data, 0, StationFamily::Monitor, now()).unwrap_err();
        assert_eq!(err, ProtocolError::BadTimestamp);
    }

    #[test]
    fn zero_day_is_rejected() {
        let data = make_basic_record(8, 0, 0, 6);
        let err = parse_archive_record(&data, 0, StationFamily::Monitor, now()).unwrap_err();
        assert_eq!(err, ProtocolError::BadTimestamp);
    }

    #[test]
    fn invalid_wind_direction_is_none() {
        let mut data = make_basic_record(8, 0, 14, 6);
        data[11] = 0xFF;
        let rec = parse_archive_record(&data, 0, StationFamily::Monitor, now()).unwrap();
        assert_eq!(rec.wind_direction, None);
    }

    #[test]
    fn short_record_is_rejected() {
        let err = parse_archive_record(&[0u8; 10], 0, StationFamily::Monitor, now()).unwrap_err();
        assert!(matches!(err, ProtocolError::TooShort { .. }));
    }

    #[test]
    fn health_record_offsets() {
        let mut data = vec![0u8; 30];
        data[0..2].copy_from_slice(&30111u16.to_le_bytes());
        data[2] = 5;
        data[3] = 12;
        data[4] = 0xFF;
        data[5] = 2;
        data[12] = bcd_encode(10);
        data[13] = bcd_encode(15);
        data[14] = bcd_encode(1);
        data[15] = 6;
        data[20] = 48;
        data[21] = 0xFF;
        data[22] = 31;
        data[24..26].copy_from_slice(&12u16.to_le_bytes());
        data[26..28].copy_from_slice(&512u16.to_le_bytes());

        let rec = parse_archive_record(&data, 0x20, StationFamily::Health, now()).unwrap();
        assert_eq!(rec.barometer, Some(30111));
        assert_eq!(rec.wind_speed_avg, Some(5));
        assert_eq!(rec.wind_gust, Some(12));
        assert_eq!(rec.wind_direction, None);
        assert_eq!(rec.rain_rate_hi, Some(2));
        assert_eq!(rec.inside_humidity, Some(48));
        assert_eq!(rec.outside_humidity, None);
        assert_eq!(rec.uv_avg, Some(31));
        assert_eq!(rec.uv_dose, Some(12));
        assert_eq!(rec.solar_rad_avg, Some(512));
    }

    #[test]
    fn empty_buffer_enumerates_nothing() {
        assert!(iter_archive_addresses(0x0100, 0x0100, 21).is_empty());
    }

    #[test]
    fn forward_span() {
        let addrs = iter_archive_addresses(0x0000, 0x0040, 21);
        assert_eq!(addrs, vec![0x0000, 0x0015, 0x002A, 0x003F]);
    }

    #[test]
    fn wrap_around_span() {
        // Pointers wrapping through SRAM_MAX_ADDR: the
        // sequence starts at old_ptr, wraps at 0x7F00, and stops short of
        // new_ptr.
        let addrs = iter_archive_addresses(0x7E80, 0x0040, 21);
        assert_eq!(addrs.first(), Some(&0x7E80));
        assert!(addrs.contains(&0x0000));
        assert!(addrs.iter().all(|&a| a < SRAM_MAX_ADDR));
        assert!(addrs.last().unwrap() < &0x0040);

        // ((0x7F00 - 0x7E80) ceil 21) + (0x0040 ceil 21) addresses
        let head = (0x7F00u32 - 0x7E80).div_ceil(21) as usize;
        let tail = 0x0040u32.div_ceil(21) as usize;
        assert_eq!(addrs.len(), head + tail);
    }

    #[test]
    fn addresses_strictly_increase_modulo_ring() {
        let addrs = iter_archive_addresses(0x7E80, 0x0040, 21);
        for pair in addrs.windows(2) {
            let delta = (pair[1] as i32 - pair[0] as i32).rem_euclid(SRAM_MAX_ADDR as i32);
            assert!(delta > 0);
        }
    }
}
