//! # wx-simulator
//!
//! Byte-exact WeatherLink station simulator.
//!
//! `SimulatedStation` interprets the wire protocol one command at a
//! time: LOOP, WRD/WWR, RRD, SRD, SAP/SSP, STOP/START, ARC, IMG,
//! DBT/EBT. It shares the memory map and CRC codec with the logger, so
//! the two can never drift apart on framing. `SimulatedPort` exposes a
//! station through the `SerialDevice` trait for in-process driver tests;
//! the `wx-sim` binary serves the same byte protocol over TCP.
//!
//! Fault injection covers the recovery paths the logger must survive:
//! corrupted CRCs (retry-and-flush) and swallowed responses (timeouts).

pub mod encode;

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};

use chrono::{Datelike, Local, NaiveDateTime, Timelike};
use tracing::debug;

use wx_types::commands::{ACK, CR, SOH};
use wx_types::crc::calculate;
use wx_types::memory_map::{self, MemCell};
use wx_types::transport::SerialDevice;
use wx_types::{bcd_encode, SensorReading, StationFamily};

const SRAM_SIZE: usize = 0x8000;

const TOKENS: [&[u8]; 15] = [
    b"LOOP", b"WRD", b"WWR", b"RRD", b"SRD", b"SAP", b"SSP", b"STOP", b"START", b"ARC", b"IMG",
    b"DBT", b"EBT", b"DMP", b"CRC",
];

/// An in-memory station: family, sensor image, processor memory banks,
/// link memory, and the archive SRAM ring.
pub struct SimulatedStation {
    pub family: StationFamily,
    pub reading: SensorReading,
    bank0: [u8; 256],
    bank1: [u8; 256],
    link_bank1: [u8; 256],
    sram: Vec<u8>,
    clock: NaiveDateTime,
    stopped: bool,
    input: VecDeque<u8>,
    output: VecDeque<u8>,
    /// Corrupt the CRC of the next N framed responses.
    pub corrupt_next_crc: u32,
    /// Swallow the next N responses entirely (ACK included).
    pub drop_next_response: u32,
    /// ARC commands received.
    pub force_archive_count: u32,
    /// LOOP commands served.
    pub loop_count: u32,
}

impl SimulatedStation {
    pub fn new(family: StationFamily) -> Self {
        let mut station = Self {
            family,
            reading: default_reading(family),
            bank0: [0; 256],
            bank1: [0; 256],
            link_bank1: [0; 256],
            sram: vec![0; SRAM_SIZE],
            clock: Local::now().naive_local(),
            stopped: false,
            input: VecDeque::new(),
            output: VecDeque::new(),
            corrupt_next_crc: 0,
            drop_next_response: 0,
            force_archive_count: 0,
            loop_count: 0,
        };
        station.bank0[memory_map::basic::MODEL.address as usize] = family.code();
        station.set_rain_cal(100);
        station.set_archive_pointers(0, 0);
        station.set_archive_period(30);
        station.set_sample_period(8);
        station
    }

    // ── Configuration helpers ─────────────────────────────────────────────

    pub fn set_clock(&mut self, clock: NaiveDateTime) {
        self.clock = clock;
    }

    pub fn clock(&self) -> NaiveDateTime {
        self.clock
    }

    pub fn set_calibration(&mut self, inside: i16, outside: i16, bar: u16, hum: i16) {
        self.write_cell(memory_map::basic::INSIDE_TEMP_CAL, &inside.to_le_bytes());
        self.write_cell(memory_map::basic::OUTSIDE_TEMP_CAL, &outside.to_le_bytes());
        self.write_cell(memory_map::basic::BAR_CAL, &bar.to_le_bytes());
        self.write_cell(memory_map::basic::OUTSIDE_HUMIDITY_CAL, &hum.to_le_bytes());
    }

    pub fn set_rain_cal(&mut self, clicks_per_inch: u16) {
        self.write_cell(memory_map::basic::RAIN_CAL, &clicks_per_inch.to_le_bytes());
    }

    pub fn set_rain_yearly(&mut self, clicks: u16) {
        let cell = if self.family.is_gro_family() {
            memory_map::groweather::RAIN_YEARLY
        } else {
            memory_map::basic::RAIN_YEARLY
        };
        self.write_cell(cell, &clicks.to_le_bytes());
    }

    pub fn set_archive_pointers(&mut self, new_ptr: u16, old_ptr: u16) {
        let (new_cell, old_cell) = if self.family.is_gro_family() {
            (
                memory_map::gro_link::NEW_ARCHIVE_PTR,
                memory_map::gro_link::OLD_ARCHIVE_PTR,
            )
        } else {
            (
                memory_map::link::NEW_ARCHIVE_PTR,
                memory_map::link::OLD_ARCHIVE_PTR,
            )
        };
        self.write_link_cell(new_cell, &new_ptr.to_le_bytes());
        self.write_link_cell(old_cell, &old_ptr.to_le_bytes());
    }

    pub fn set_archive_period(&mut self, minutes: u8) {
        let cell = if self.family.is_gro_family() {
            memory_map::gro_link::ARCHIVE_PERIOD
        } else {
            memory_map::link::ARCHIVE_PERIOD
        };
        self.write_link_cell(cell, &[minutes]);
    }

    pub fn set_sample_period(&mut self, seconds: u8) {
        self.write_link_cell(
            memory_map::link::SAMPLE_PERIOD,
            &[(0u8).wrapping_sub(seconds)],
        );
    }

    /// Place an encoded archive record at an SRAM address. Records are
    /// laid out linearly, exactly as SRD will read them back.
    pub fn store_archive_record(&mut self, address: u16, record: &[u8]) {
        for (i, &b) in record.iter().enumerate() {
            let addr = (address as usize + i) % SRAM_SIZE;
            self.sram[addr] = b;
        }
    }

    fn write_cell(&mut self, cell: MemCell, data: &[u8]) {
        let bank = if cell.bank == 0 {
            &mut self.bank0
        } else {
            &mut self.bank1
        };
        for (i, &b) in data.iter().take(cell.byte_len()).enumerate() {
            bank[cell.address as usize + i] = b;
        }
    }

    fn write_link_cell(&mut self, cell: MemCell, data: &[u8]) {
        for (i, &b) in data.iter().take(cell.byte_len()).enumerate() {
            self.link_bank1[cell.address as usize + i] = b;
        }
    }

    /// Refresh the clock cells from `self.clock` so WRD reads see a
    /// consistent image.
    fn refresh_clock_cells(&mut self) {
        let (time_cell, date_cell) = if self.family.is_gro_family() {
            (memory_map::groweather::TIME, memory_map::groweather::DATE)
        } else {
            (memory_map::basic::TIME, memory_map::basic::DATE)
        };
        let c = self.clock;
        let time = [
            bcd_encode(c.hour() as u8),
            bcd_encode(c.minute() as u8),
            bcd_encode(c.second() as u8),
        ];
        self.write_cell(time_cell, &time);

        if self.family.is_gro_family() {
            let yr = ((c.year() - 1900) & 0xFF) as u8;
            let date = [
                bcd_encode(c.day() as u8),
                ((yr & 0x0F) << 4) | (c.month() as u8 & 0x0F),
                (yr >> 4) & 0x0F,
            ];
            self.write_cell(date_cell, &date);
        } else {
            let date = [bcd_encode(c.day() as u8), c.month() as u8 & 0x0F];
            self.write_cell(date_cell, &date);
        }
    }

    // ── Wire interface ────────────────────────────────────────────────────

    /// Feed TX bytes from the host; responses accumulate in the output
    /// queue.
    pub fn push_bytes(&mut self, data: &[u8]) {
        self.input.extend(data.iter().copied());
        while self.try_execute() {}
    }

    /// Drain up to `buf.len()` response bytes.
    pub fn pull_bytes(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.output.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.output.pop_front().unwrap();
        }
        n
    }

    pub fn clear(&mut self) {
        self.input.clear();
        self.output.clear();
    }

    fn respond(&mut self, bytes: &[u8]) {
        if self.drop_next_response > 0 {
            self.drop_next_response -= 1;
            debug!("sim: swallowing response ({} bytes)", bytes.len());
            return;
        }
        self.output.extend(bytes.iter().copied());
    }

    /// Append `data || CRC`, honouring the corrupt-CRC fault counter.
    fn respond_framed(&mut self, data: &[u8]) {
        let mut crc = calculate(data);
        if self.corrupt_next_crc > 0 {
            self.corrupt_next_crc -= 1;
            crc = !crc;
            debug!("sim: corrupting response CRC");
        }
        let mut framed = data.to_vec();
        framed.extend_from_slice(&crc.to_be_bytes());
        self.respond(&framed);
    }

    /// Try to parse and execute one command off the input queue.
    /// Returns false when more bytes are needed (or the input is junk
    /// that was discarded).
    fn try_execute(&mut self) -> bool {
        let buf: Vec<u8> = self.input.iter().copied().collect();
        if buf.is_empty() {
            return false;
        }

        // Each arm reports how many bytes it consumed; 0 = need more.
        let consumed = if buf.starts_with(b"LOOP") {
            self.exec_loop(&buf)
        } else if buf.starts_with(b"WRD") {
            self.exec_wrd(&buf)
        } else if buf.starts_with(b"WWR") {
            self.exec_wwr(&buf)
        } else if buf.starts_with(b"RRD") {
            self.exec_rrd(&buf)
        } else if buf.starts_with(b"SRD") {
            self.exec_srd(&buf)
        } else if buf.starts_with(b"SAP") {
            self.exec_sap(&buf)
        } else if buf.starts_with(b"SSP") {
            self.exec_ssp(&buf)
        } else if buf.starts_with(b"STOP") {
            self.exec_simple(&buf, 4, |s| s.stopped = true)
        } else if buf.starts_with(b"START") {
            self.exec_simple(&buf, 5, |s| s.stopped = false)
        } else if buf.starts_with(b"ARC") {
            self.exec_simple(&buf, 3, |s| s.force_archive_count += 1)
        } else if buf.starts_with(b"IMG") || buf.starts_with(b"DBT") || buf.starts_with(b"EBT") {
            self.exec_simple(&buf, 3, |_| {})
        } else if buf.starts_with(b"DMP") {
            self.exec_simple(&buf, 3, |_| {})
        } else if buf.starts_with(b"CRC1") || buf.starts_with(b"CRC0") {
            self.exec_simple(&buf, 4, |_| {})
        } else if TOKENS.iter().any(|t| t.starts_with(buf.as_slice())) {
            // Partial command token: wait for the rest.
            0
        } else {
            // Unknown leading byte (stray CRC prefix or line noise):
            // discard one byte and resync.
            1
        };

        if consumed == 0 {
            return false;
        }
        for _ in 0..consumed {
            self.input.pop_front();
        }
        consumed > 0
    }

    fn exec_simple(&mut self, buf: &[u8], token_len: usize, apply: fn(&mut Self)) -> usize {
        let total = token_len + 1;
        if buf.len() < total {
            return 0;
        }
        if buf[token_len] != CR {
            return 1;
        }
        apply(self);
        self.respond(&[ACK]);
        total
    }

    fn exec_loop(&mut self, buf: &[u8]) -> usize {
        // LOOP + 2-byte count + CR
        if buf.len() < 7 {
            return 0;
        }
        if buf[6] != CR {
            return 1;
        }
        self.loop_count += 1;
        self.respond(&[ACK]);
        let data = encode::loop_data(&self.reading, self.family);
        let mut packet = vec![SOH];
        packet.extend_from_slice(&data);
        // Frame manually so the fault counter applies to the data CRC.
        let mut crc = calculate(&data);
        if self.corrupt_next_crc > 0 {
            self.corrupt_next_crc -= 1;
            crc = !crc;
            debug!("sim: corrupting LOOP CRC");
        }
        packet.extend_from_slice(&crc.to_be_bytes());
        self.respond(&packet);
        7
    }

    fn exec_wrd(&mut self, buf: &[u8]) -> usize {
        // WRD + cmd byte + address + CR
        if buf.len() < 6 {
            return 0;
        }
        if buf[5] != CR {
            return 1;
        }
        let n_nibbles = (buf[3] >> 4) as usize;
        let bank_code = buf[3] & 0x0F;
        let address = buf[4] as usize;
        let n_bytes = n_nibbles.div_ceil(2).max(1);

        self.refresh_clock_cells();
        let bank = if bank_code == 0x02 {
            &self.bank0
        } else {
            &self.bank1
        };
        let mut data = vec![0u8; n_bytes];
        for (i, slot) in data.iter_mut().enumerate() {
            *slot = bank[(address + i) & 0xFF];
        }

        self.respond(&[ACK]);
        self.respond_framed(&data);
        6
    }

    fn exec_wwr(&mut self, buf: &[u8]) -> usize {
        // WWR + cmd byte + address + data + CR; data length comes from
        // the nibble count in the command byte.
        if buf.len() < 5 {
            return 0;
        }
        let n_nibbles = (buf[3] >> 4) as usize;
        let bank_code = buf[3] & 0x0F;
        let address = buf[4] as usize;
        let n_bytes = n_nibbles.div_ceil(2).max(1);
        let total = 5 + n_bytes + 1;
        if buf.len() < total {
            return 0;
        }
        if buf[total - 1] != CR {
            return 1;
        }

        let data = &buf[5..5 + n_bytes];
        {
            let bank = if bank_code == 0x01 {
                &mut self.bank0
            } else {
                &mut self.bank1
            };
            for (i, &b) in data.iter().enumerate() {
                bank[(address + i) & 0xFF] = b;
            }
        }
        self.sync_clock_from_memory(bank_code, address, n_bytes);
        self.respond(&[ACK]);
        total
    }

    /// A WWR overlapping the clock cells updates the simulated clock so
    /// read-back matches what the host wrote.
    fn sync_clock_from_memory(&mut self, bank_code: u8, address: usize, len: usize) {
        if bank_code != 0x03 {
            return;
        }
        let (time_cell, date_cell) = if self.family.is_gro_family() {
            (memory_map::groweather::TIME, memory_map::groweather::DATE)
        } else {
            (memory_map::basic::TIME, memory_map::basic::DATE)
        };
        let overlaps = |cell: MemCell| {
            let start = cell.address as usize;
            address < start + cell.byte_len() && start < address + len
        };
        if !overlaps(time_cell) && !overlaps(date_cell) {
            return;
        }

        let t = time_cell.address as usize;
        let d = date_cell.address as usize;
        let hour = wx_types::bcd_decode(self.bank1[t]) as u32;
        let minute = wx_types::bcd_decode(self.bank1[t + 1]) as u32;
        let second = wx_types::bcd_decode(self.bank1[t + 2]) as u32;
        let day = wx_types::bcd_decode(self.bank1[d]) as u32;

        let (month, year) = if self.family.is_gro_family() {
            let month = (self.bank1[d + 1] & 0x0F) as u32;
            let yr = ((self.bank1[d + 2] & 0x0F) << 4) | (self.bank1[d + 1] >> 4);
            (month, 1900 + yr as i32)
        } else {
            ((self.bank1[d + 1] & 0x0F) as u32, self.clock.year())
        };

        if let Some(date) = chrono::NaiveDate::from_ymd_opt(year, month, day) {
            if let Some(dt) = date.and_hms_opt(hour, minute, second) {
                self.clock = dt;
            }
        }
    }

    fn exec_rrd(&mut self, buf: &[u8]) -> usize {
        // RRD + bank + address + (n-1) + CR
        if buf.len() < 7 {
            return 0;
        }
        if buf[6] != CR {
            return 1;
        }
        let address = buf[4] as usize;
        let n_nibbles = buf[5] as usize + 1;
        let n_bytes = n_nibbles.div_ceil(2).max(1);

        let mut data = vec![0u8; n_bytes];
        for (i, slot) in data.iter_mut().enumerate() {
            *slot = self.link_bank1[(address + i) & 0xFF];
        }
        self.respond(&[ACK]);
        self.respond_framed(&data);
        7
    }

    fn exec_srd(&mut self, buf: &[u8]) -> usize {
        // SRD + 2-byte address + 2-byte (len-1) + CR
        if buf.len() < 8 {
            return 0;
        }
        if buf[7] != CR {
            return 1;
        }
        let address = u16::from_le_bytes([buf[3], buf[4]]) as usize;
        let len = u16::from_le_bytes([buf[5], buf[6]]) as usize + 1;

        let mut data = vec![0u8; len];
        for (i, slot) in data.iter_mut().enumerate() {
            *slot = self.sram[(address + i) % SRAM_SIZE];
        }
        self.respond(&[ACK]);
        self.respond_framed(&data);
        8
    }

    fn exec_sap(&mut self, buf: &[u8]) -> usize {
        if buf.len() < 5 {
            return 0;
        }
        if buf[4] != CR {
            return 1;
        }
        let minutes = buf[3];
        self.set_archive_period(minutes);
        self.respond(&[ACK]);
        5
    }

    fn exec_ssp(&mut self, buf: &[u8]) -> usize {
        if buf.len() < 5 {
            return 0;
        }
        if buf[4] != CR {
            return 1;
        }
        let raw = buf[3];
        self.write_link_cell(memory_map::link::SAMPLE_PERIOD, &[raw]);
        self.respond(&[ACK]);
        5
    }
}

fn default_reading(family: StationFamily) -> SensorReading {
    let mut reading = SensorReading {
        inside_temp: Some(712),
        outside_temp: Some(584),
        inside_humidity: Some(42),
        outside_humidity: Some(66),
        wind_speed: Some(7),
        wind_direction: Some(230),
        barometer: Some(29980),
        rain_total: Some(0),
        ..Default::default()
    };
    if family == StationFamily::GroWeather {
        reading.inside_temp = None;
        reading.soil_temp = Some(540);
    }
    if !family.is_basic() {
        reading.rain_rate = Some(0);
        reading.solar_radiation = Some(450);
    }
    if family == StationFamily::Health {
        reading.uv_index = Some(48);
        reading.uv_dose = Some(20);
    }
    reading
}

/// Shared handle to a station so tests can reconfigure it while the
/// driver owns the port.
pub type StationHandle = Arc<Mutex<SimulatedStation>>;

/// `SerialDevice` over a simulated station.
pub struct SimulatedPort {
    station: StationHandle,
}

impl SimulatedPort {
    pub fn new(family: StationFamily) -> (Self, StationHandle) {
        let station = Arc::new(Mutex::new(SimulatedStation::new(family)));
        (
            Self {
                station: station.clone(),
            },
            station,
        )
    }

    pub fn from_handle(station: StationHandle) -> Self {
        Self { station }
    }
}

impl SerialDevice for SimulatedPort {
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.station.lock().unwrap().pull_bytes(buf);
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        Ok(n)
    }

    fn write_all_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        self.station.lock().unwrap().push_bytes(data);
        Ok(())
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        self.station.lock().unwrap().clear();
        Ok(())
    }
}
