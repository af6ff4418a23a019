//! High-level WeatherLink driver.
//!
//! Orchestrates the serial transport, command codec, memory map, and
//! packet parsers: station detection, LOOP polling, memory reads and
//! writes, archive access, clock sync, and calibration.
//!
//! ## Concurrency
//!
//! All wire logic lives in the synchronous [`LinkInner`] behind one
//! `Mutex`. The async [`LinkDriver`] façade dispatches each operation to
//! `spawn_blocking`, so a complete request → ACK → payload round-trip
//! holds the lock without ever suspending mid-exchange, and compound
//! sequences (STOP / write / START) are plain nested calls inside a
//! single critical section. A shared cancellation flag is honoured
//! between retry attempts; an in-flight exchange is never aborted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{Datelike, NaiveDateTime, Timelike};
use tracing::{debug, info, warn};

use wx_types::archive::{parse_archive_record, ArchiveRecord};
use wx_types::commands::{self, MAX_RETRIES};
use wx_types::crc;
use wx_types::loop_packet::parse_loop_packet;
use wx_types::memory_map::{self, MemCell};
use wx_types::{
    bcd_decode, bcd_encode, CalibrationOffsets, LinkRevision, ProtocolError, SensorReading,
    SerialDevice, StationFamily, StationTime,
};

use crate::error::{LinkError, LinkResult};
use crate::serial::{open_device, SerialTransport};

/// Snapshot of driver identity, readable without touching the I/O lock
/// (so `status` never waits behind a slow exchange).
#[derive(Debug, Clone)]
pub struct LinkMeta {
    pub connected: bool,
    pub family: Option<StationFamily>,
    pub revision: LinkRevision,
    pub calibration: CalibrationOffsets,
    pub port: String,
    pub baud: u32,
}

struct LinkInner {
    transport: Option<SerialTransport>,
    family: Option<StationFamily>,
    calibration: CalibrationOffsets,
    port: String,
    baud: u32,
    timeout: Duration,
    cancel: Arc<AtomicBool>,
    crc_errors: Arc<AtomicU64>,
    meta: Arc<RwLock<LinkMeta>>,
}

impl LinkInner {
    fn update_meta(&self) {
        if let Ok(mut meta) = self.meta.write() {
            meta.connected = self.transport.is_some();
            meta.family = self.family;
            meta.calibration = self.calibration;
        }
    }

    fn transport(&mut self) -> LinkResult<&mut SerialTransport> {
        self.transport.as_mut().ok_or(LinkError::NotConnected)
    }

    /// Run one exchange with the retry-and-flush discipline: every
    /// failed attempt flushes the input buffer before the next try, and
    /// the cancellation flag is checked between attempts.
    fn with_retries<T>(
        &mut self,
        what: &str,
        mut attempt: impl FnMut(&mut Self) -> LinkResult<T>,
    ) -> LinkResult<T> {
        let mut last = LinkError::Timeout;
        for n in 0..=MAX_RETRIES {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(LinkError::Cancelled);
            }
            match attempt(self) {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() => {
                    warn!("{what} attempt {}/{} failed: {e}", n + 1, MAX_RETRIES + 1);
                    if n < MAX_RETRIES {
                        if let Ok(t) = self.transport() {
                            let _ = t.flush();
                        }
                    }
                    last = e;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last)
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    fn open(&mut self) -> LinkResult<()> {
        if self.transport.is_some() {
            return Ok(());
        }
        let device = open_device(&self.port, self.baud, self.timeout)?;
        self.transport = Some(SerialTransport::new(device));
        info!("opened serial port {} at {} baud", self.port, self.baud);
        self.update_meta();
        Ok(())
    }

    fn close(&mut self) {
        if self.transport.take().is_some() {
            info!("closed serial port {}", self.port);
        }
        self.update_meta();
    }

    // ── Station identity & calibration ────────────────────────────────────

    fn detect_family(&mut self) -> LinkResult<StationFamily> {
        let data = self.read_station_memory(memory_map::basic::MODEL)?;
        let code = data.first().copied().unwrap_or(0) & 0x0F;
        let family = StationFamily::from_code(code).unwrap_or_else(|| {
            warn!("unknown model code 0x{code:X}, defaulting to Monitor");
            StationFamily::Monitor
        });
        self.family = Some(family);
        self.update_meta();
        info!("detected station type: {} (code={code})", family.display_name());
        Ok(family)
    }

    /// Read the five calibration cells. A cell that fails to read keeps
    /// its previous value; a zero rain calibration falls back to the
    /// factory 100 clicks/inch.
    fn read_calibration(&mut self) -> LinkResult<CalibrationOffsets> {
        self.transport()?.flush()?;

        if let Ok(data) = self.read_station_memory(memory_map::basic::INSIDE_TEMP_CAL) {
            if data.len() >= 2 {
                self.calibration.inside_temp = i16::from_le_bytes([data[0], data[1]]);
            }
        }
        if let Ok(data) = self.read_station_memory(memory_map::basic::OUTSIDE_TEMP_CAL) {
            if data.len() >= 2 {
                self.calibration.outside_temp = i16::from_le_bytes([data[0], data[1]]);
            }
        }
        if let Ok(data) = self.read_station_memory(memory_map::basic::BAR_CAL) {
            if data.len() >= 2 {
                self.calibration.barometer = u16::from_le_bytes([data[0], data[1]]);
            }
        }
        if let Ok(data) = self.read_station_memory(memory_map::basic::OUTSIDE_HUMIDITY_CAL) {
            if data.len() >= 2 {
                self.calibration.outside_humidity = i16::from_le_bytes([data[0], data[1]]);
            }
        }
        if let Ok(data) = self.read_station_memory(memory_map::basic::RAIN_CAL) {
            if data.len() >= 2 {
                let cal = u16::from_le_bytes([data[0], data[1]]);
                if cal > 0 {
                    self.calibration.rain_cal = cal;
                }
            }
        }

        self.update_meta();
        info!("calibration offsets: {:?}", self.calibration);
        Ok(self.calibration)
    }

    fn write_calibration(&mut self, offsets: CalibrationOffsets) -> LinkResult<()> {
        let _ = self.stop_polling();
        let mut ok = true;
        ok &= self
            .write_station_memory(
                memory_map::basic::INSIDE_TEMP_CAL,
                &offsets.inside_temp.to_le_bytes(),
            )
            .is_ok();
        ok &= self
            .write_station_memory(
                memory_map::basic::OUTSIDE_TEMP_CAL,
                &offsets.outside_temp.to_le_bytes(),
            )
            .is_ok();
        ok &= self
            .write_station_memory(memory_map::basic::BAR_CAL, &offsets.barometer.to_le_bytes())
            .is_ok();
        ok &= self
            .write_station_memory(
                memory_map::basic::OUTSIDE_HUMIDITY_CAL,
                &offsets.outside_humidity.to_le_bytes(),
            )
            .is_ok();
        ok &= self
            .write_station_memory(memory_map::basic::RAIN_CAL, &offsets.rain_cal.to_le_bytes())
            .is_ok();
        let _ = self.start_polling();

        if ok {
            self.calibration = offsets;
            self.update_meta();
            info!("calibration offsets written: {offsets:?}");
            Ok(())
        } else {
            warn!("calibration write partial failure");
            // Re-read so the cached offsets reflect what the station holds.
            let _ = self.read_calibration();
            Err(LinkError::Protocol("calibration write partial failure".into()))
        }
    }

    // ── LOOP polling ──────────────────────────────────────────────────────

    fn poll_loop(&mut self) -> LinkResult<SensorReading> {
        let family = self
            .family
            .ok_or_else(|| LinkError::Protocol("station family not detected".into()))?;
        let reading = self.with_retries("LOOP", move |inner| inner.send_loop_once(family))?;
        Ok(self.calibration.apply(reading))
    }

    fn send_loop_once(&mut self, family: StationFamily) -> LinkResult<SensorReading> {
        let t = self.transport()?;
        t.flush()?;
        t.send(&commands::loop_command(1))?;
        t.wait_for_ack()?;

        let total = 1 + family.loop_data_size() + 2;
        let raw = t.receive(total)?;
        if raw.len() < total {
            warn!("incomplete LOOP response: {}/{} bytes", raw.len(), total);
            return Err(LinkError::Timeout);
        }

        match parse_loop_packet(&raw, family) {
            Ok(reading) => Ok(reading),
            Err(ProtocolError::CrcMismatch) => {
                self.crc_errors.fetch_add(1, Ordering::Relaxed);
                Err(LinkError::CrcMismatch)
            }
            Err(e) => Err(LinkError::Protocol(e.to_string())),
        }
    }

    // ── Memory access ─────────────────────────────────────────────────────

    fn read_station_memory(&mut self, cell: MemCell) -> LinkResult<Vec<u8>> {
        let MemCell { bank, address, nibbles } = cell;
        self.with_retries("WRD", move |inner| {
            let t = inner.transport()?;
            t.send(&commands::wrd_command(nibbles, bank, address))?;
            t.wait_for_ack()?;

            let n_bytes = (nibbles as usize + 1) / 2;
            // Always read data + 2 CRC bytes: the link sends a trailing
            // CRC regardless of revision, and leaving it in the buffer
            // corrupts the next exchange.
            let data = t.receive(n_bytes + 2)?;
            if data.len() < n_bytes {
                warn!(
                    "WRD bank {bank} addr 0x{address:02X}: short read {}/{n_bytes}",
                    data.len()
                );
                return Err(LinkError::Timeout);
            }
            if data.len() >= n_bytes + 2 {
                if crc::validate(&data[..n_bytes + 2]) {
                    debug!("WRD CRC OK");
                } else {
                    debug!("WRD CRC mismatch (non-Rev-E units may not send a valid CRC)");
                }
            }
            Ok(data[..n_bytes].to_vec())
        })
    }

    fn write_station_memory(&mut self, cell: MemCell, data: &[u8]) -> LinkResult<()> {
        let MemCell { bank, address, nibbles } = cell;
        let payload = data.to_vec();
        self.with_retries("WWR", move |inner| {
            let t = inner.transport()?;
            t.send(&commands::wwr_command(nibbles, bank, address, &payload))?;
            t.wait_for_ack()
        })
    }

    fn read_link_memory(&mut self, cell: MemCell) -> LinkResult<Vec<u8>> {
        let MemCell { bank, address, nibbles } = cell;
        self.with_retries("RRD", move |inner| {
            let t = inner.transport()?;
            t.send(&commands::rrd_command(bank, address, nibbles))?;
            t.wait_for_ack()?;

            let n_bytes = (nibbles as usize + 1) / 2;
            let data = t.receive(n_bytes + 2)?;
            if data.len() < n_bytes {
                warn!(
                    "RRD bank {bank} addr 0x{address:02X}: short read {}/{n_bytes}",
                    data.len()
                );
                return Err(LinkError::Timeout);
            }
            if data.len() >= n_bytes + 2 && !crc::validate(&data[..n_bytes + 2]) {
                debug!("RRD bank {bank} addr 0x{address:02X}: CRC mismatch (may be non-Rev-E unit)");
            }
            Ok(data[..n_bytes].to_vec())
        })
    }

    /// Read archive SRAM. Unlike the processor-memory reads, SRD
    /// responses always carry a valid CRC, so a mismatch fails the
    /// attempt.
    fn read_archive(&mut self, address: u16, n_bytes: usize) -> LinkResult<Vec<u8>> {
        self.with_retries("SRD", move |inner| {
            let t = inner.transport()?;
            t.flush()?;
            t.send(&commands::srd_command(address, n_bytes as u16))?;
            t.wait_for_ack()?;

            let data = t.receive(n_bytes + 2)?;
            if data.len() < n_bytes + 2 {
                warn!("SRD addr 0x{address:04X}: short read {}/{}", data.len(), n_bytes + 2);
                return Err(LinkError::Timeout);
            }
            if !crc::validate(&data) {
                inner.crc_errors.fetch_add(1, Ordering::Relaxed);
                warn!("SRD addr 0x{address:04X}: CRC failed");
                return Err(LinkError::CrcMismatch);
            }
            Ok(data[..n_bytes].to_vec())
        })
    }

    // ── Archive bookkeeping ───────────────────────────────────────────────

    fn archive_pointer_cells(&self) -> LinkResult<(MemCell, MemCell)> {
        let family = self
            .family
            .ok_or_else(|| LinkError::Protocol("station family not detected".into()))?;
        Ok(if family.is_gro_family() {
            (
                memory_map::gro_link::NEW_ARCHIVE_PTR,
                memory_map::gro_link::OLD_ARCHIVE_PTR,
            )
        } else {
            (
                memory_map::link::NEW_ARCHIVE_PTR,
                memory_map::link::OLD_ARCHIVE_PTR,
            )
        })
    }

    /// Returns (new_ptr, old_ptr) from link memory.
    fn read_archive_pointers(&mut self) -> LinkResult<(u16, u16)> {
        let (new_cell, old_cell) = self.archive_pointer_cells()?;

        let new_data = self.read_link_memory(new_cell)?;
        if new_data.len() < 2 {
            return Err(LinkError::Timeout);
        }
        let old_data = self.read_link_memory(old_cell)?;
        if old_data.len() < 2 {
            return Err(LinkError::Timeout);
        }

        Ok((
            u16::from_le_bytes([new_data[0], new_data[1]]),
            u16::from_le_bytes([old_data[0], old_data[1]]),
        ))
    }

    fn read_archive_period(&mut self) -> LinkResult<u8> {
        let family = self
            .family
            .ok_or_else(|| LinkError::Protocol("station family not detected".into()))?;
        let cell = if family.is_gro_family() {
            memory_map::gro_link::ARCHIVE_PERIOD
        } else {
            memory_map::link::ARCHIVE_PERIOD
        };
        let data = self.read_link_memory(cell)?;
        data.first().copied().ok_or(LinkError::Timeout)
    }

    /// Sample period in seconds; the link stores 256 - seconds.
    fn read_sample_period(&mut self) -> LinkResult<u16> {
        let data = self.read_link_memory(memory_map::link::SAMPLE_PERIOD)?;
        let raw = data.first().copied().ok_or(LinkError::Timeout)?;
        Ok(if raw == 0 { 256 } else { 256 - raw as u16 })
    }

    fn set_archive_period(&mut self, minutes: u8) -> LinkResult<()> {
        if !(1..=120).contains(&minutes) {
            return Err(LinkError::InvalidRange(
                "archive period must be 1-120 minutes".into(),
            ));
        }
        let t = self.transport()?;
        t.flush()?;
        t.send(&commands::sap_command(minutes))?;
        t.wait_for_ack()?;
        info!("archive period set to {minutes} minutes");
        Ok(())
    }

    fn set_sample_period(&mut self, seconds: u16) -> LinkResult<()> {
        if !(1..=255).contains(&seconds) {
            return Err(LinkError::InvalidRange(
                "sample period must be 1-255 seconds".into(),
            ));
        }
        let t = self.transport()?;
        t.flush()?;
        t.send(&commands::ssp_command(seconds as u8))?;
        t.wait_for_ack()?;
        info!("sample period set to {seconds} seconds");
        Ok(())
    }

    fn force_archive(&mut self) -> LinkResult<()> {
        let t = self.transport()?;
        t.flush()?;
        t.send(&commands::arc_command())?;
        t.wait_for_ack()?;
        info!("archive write forced");
        Ok(())
    }

    // ── Station clock ─────────────────────────────────────────────────────

    fn clock_cells(&self) -> LinkResult<(MemCell, MemCell, bool)> {
        let family = self
            .family
            .ok_or_else(|| LinkError::Protocol("station family not detected".into()))?;
        Ok(if family.is_gro_family() {
            (memory_map::groweather::TIME, memory_map::groweather::DATE, true)
        } else {
            (memory_map::basic::TIME, memory_map::basic::DATE, false)
        })
    }

    fn read_station_time(&mut self) -> LinkResult<StationTime> {
        let (time_cell, date_cell, is_gro) = self.clock_cells()?;

        let time_data = self.read_station_memory(time_cell)?;
        if time_data.len() < 3 {
            warn!("station time read failed (no data)");
            return Err(LinkError::Timeout);
        }
        let date_data = self.read_station_memory(date_cell)?;
        if date_data.len() < 2 {
            warn!("station date read failed (no data)");
            return Err(LinkError::Timeout);
        }

        let hour = bcd_decode(time_data[0]);
        let minute = bcd_decode(time_data[1]);
        let second = bcd_decode(time_data[2]);
        let day = bcd_decode(date_data[0]);
        let month = date_data[1] & 0x0F;

        let year = if is_gro && date_data.len() >= 3 {
            // Binary year offset split across the upper nibble of byte 1
            // and the low nibble of byte 2.
            let offset = (((date_data[2] & 0x0F) as u16) << 4) | (date_data[1] >> 4) as u16;
            Some(1900 + offset as i32)
        } else {
            None
        };

        info!(
            "station clock: {hour:02}:{minute:02}:{second:02} {month}/{day}{}",
            year.map(|y| format!("/{y}")).unwrap_or_default()
        );

        Ok(StationTime {
            hour,
            minute,
            second,
            day,
            month,
            year,
        })
    }

    /// Write time and date, bracketed by STOP/START so the link is not
    /// polling the station mid-write.
    fn write_station_time(&mut self, dt: NaiveDateTime) -> LinkResult<()> {
        let (time_cell, date_cell, is_gro) = self.clock_cells()?;

        let time_bytes = [
            bcd_encode(dt.hour() as u8),
            bcd_encode(dt.minute() as u8),
            bcd_encode(dt.second() as u8),
        ];
        let date_bytes: Vec<u8> = if is_gro {
            let yr = ((dt.year() - 1900) & 0xFF) as u8;
            vec![
                bcd_encode(dt.day() as u8),
                ((yr & 0x0F) << 4) | (dt.month() as u8 & 0x0F),
                (yr >> 4) & 0x0F,
            ]
        } else {
            vec![bcd_encode(dt.day() as u8), dt.month() as u8 & 0x0F]
        };

        let _ = self.stop_polling();
        let result = self.write_clock_cells(time_cell, &time_bytes, date_cell, &date_bytes);
        let _ = self.start_polling();

        match &result {
            Ok(()) => info!("station clock synced to {}", dt.format("%H:%M:%S %m/%d/%Y")),
            Err(e) => warn!("station clock sync failed: {e}"),
        }
        result
    }

    fn write_clock_cells(
        &mut self,
        time_cell: MemCell,
        time_bytes: &[u8],
        date_cell: MemCell,
        date_bytes: &[u8],
    ) -> LinkResult<()> {
        self.write_station_memory(time_cell, time_bytes)?;
        self.write_station_memory(date_cell, date_bytes)?;
        Ok(())
    }

    fn stop_polling(&mut self) -> LinkResult<()> {
        let t = self.transport()?;
        t.send(&commands::stop_command())?;
        t.wait_for_ack()
    }

    fn start_polling(&mut self) -> LinkResult<()> {
        let t = self.transport()?;
        t.send(&commands::start_command())?;
        t.wait_for_ack()
    }

    // ── Rain accumulators ─────────────────────────────────────────────────

    fn rain_yearly_cell(&self) -> LinkResult<MemCell> {
        let family = self
            .family
            .ok_or_else(|| LinkError::Protocol("station family not detected".into()))?;
        Ok(if family.is_gro_family() {
            memory_map::groweather::RAIN_YEARLY
        } else {
            memory_map::basic::RAIN_YEARLY
        })
    }

    fn read_rain_yearly(&mut self) -> LinkResult<u16> {
        let cell = self.rain_yearly_cell()?;
        let data = self.read_station_memory(cell)?;
        if data.len() < 2 {
            return Err(LinkError::Timeout);
        }
        Ok(u16::from_le_bytes([data[0], data[1]]))
    }

    fn clear_rain_daily(&mut self) -> LinkResult<()> {
        let _ = self.stop_polling();
        let result = self.write_station_memory(memory_map::basic::RAIN_DAILY, &[0x00, 0x00]);
        let _ = self.start_polling();
        if result.is_ok() {
            info!("daily rain cleared");
        }
        result
    }

    fn clear_rain_yearly(&mut self) -> LinkResult<()> {
        let cell = self.rain_yearly_cell()?;
        let _ = self.stop_polling();
        let result = self.write_station_memory(cell, &[0x00, 0x00]);
        let _ = self.start_polling();
        if result.is_ok() {
            info!("yearly rain cleared");
        }
        result
    }

    // ── Archive records ───────────────────────────────────────────────────

    fn read_archive_record(&mut self, address: u16) -> LinkResult<ArchiveRecord> {
        let family = self
            .family
            .ok_or_else(|| LinkError::Protocol("station family not detected".into()))?;
        let size = family.archive_record_size();
        let raw = self.read_archive(address, size)?;
        let now = chrono::Local::now().naive_local();
        parse_archive_record(&raw, address, family, now).map_err(|e| match e {
            ProtocolError::CrcMismatch => LinkError::CrcMismatch,
            other => LinkError::Protocol(other.to_string()),
        })
    }
}

/// Async handle to the link. Clones share the same port, I/O lock, and
/// cancellation flag.
#[derive(Clone)]
pub struct LinkDriver {
    inner: Arc<Mutex<LinkInner>>,
    cancel: Arc<AtomicBool>,
    crc_errors: Arc<AtomicU64>,
    meta: Arc<RwLock<LinkMeta>>,
}

impl LinkDriver {
    pub fn new(port: &str, baud: u32, timeout: Duration) -> Self {
        Self::build(None, port, baud, timeout)
    }

    /// Wrap an already-open device (tests, probes over prepared links).
    pub fn with_device(device: Box<dyn SerialDevice>, label: &str) -> Self {
        Self::build(
            Some(SerialTransport::new(device)),
            label,
            commands::DEFAULT_BAUD,
            Duration::from_secs(2),
        )
    }

    fn build(transport: Option<SerialTransport>, port: &str, baud: u32, timeout: Duration) -> Self {
        let cancel = Arc::new(AtomicBool::new(false));
        let crc_errors = Arc::new(AtomicU64::new(0));
        let meta = Arc::new(RwLock::new(LinkMeta {
            connected: transport.is_some(),
            family: None,
            revision: LinkRevision::D,
            calibration: CalibrationOffsets::default(),
            port: port.to_string(),
            baud,
        }));
        let inner = LinkInner {
            transport,
            family: None,
            calibration: CalibrationOffsets::default(),
            port: port.to_string(),
            baud,
            timeout,
            cancel: cancel.clone(),
            crc_errors: crc_errors.clone(),
            meta: meta.clone(),
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
            cancel,
            crc_errors,
            meta,
        }
    }

    async fn run<T, F>(&self, f: F) -> LinkResult<T>
    where
        F: FnOnce(&mut LinkInner) -> LinkResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || {
            let mut guard = inner.lock().unwrap_or_else(|poison| poison.into_inner());
            f(&mut guard)
        })
        .await
        .map_err(|e| LinkError::Protocol(format!("serial worker failed: {e}")))?
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────

    pub async fn open(&self) -> LinkResult<()> {
        self.run(|inner| inner.open()).await
    }

    pub async fn close(&self) {
        let _ = self.run(|inner| {
            inner.close();
            Ok(())
        })
        .await;
    }

    /// Request cooperative cancellation: honoured between retries and
    /// poll attempts, never mid-exchange.
    pub fn request_stop(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    // ── Snapshot accessors (never touch the I/O lock) ─────────────────────

    pub fn meta(&self) -> LinkMeta {
        self.meta
            .read()
            .map(|m| m.clone())
            .unwrap_or_else(|poison| poison.into_inner().clone())
    }

    pub fn connected(&self) -> bool {
        self.meta().connected
    }

    pub fn family(&self) -> Option<StationFamily> {
        self.meta().family
    }

    pub fn calibration(&self) -> CalibrationOffsets {
        self.meta().calibration
    }

    pub fn crc_error_count(&self) -> u64 {
        self.crc_errors.load(Ordering::Relaxed)
    }

    // ── Device operations ─────────────────────────────────────────────────

    pub async fn detect_family(&self) -> LinkResult<StationFamily> {
        self.run(|inner| inner.detect_family()).await
    }

    pub async fn read_calibration(&self) -> LinkResult<CalibrationOffsets> {
        self.run(|inner| inner.read_calibration()).await
    }

    pub async fn write_calibration(&self, offsets: CalibrationOffsets) -> LinkResult<()> {
        self.run(move |inner| inner.write_calibration(offsets)).await
    }

    pub async fn poll_loop(&self) -> LinkResult<SensorReading> {
        self.run(|inner| inner.poll_loop()).await
    }

    pub async fn read_archive_pointers(&self) -> LinkResult<(u16, u16)> {
        self.run(|inner| inner.read_archive_pointers()).await
    }

    pub async fn read_archive_period(&self) -> LinkResult<u8> {
        self.run(|inner| inner.read_archive_period()).await
    }

    pub async fn read_sample_period(&self) -> LinkResult<u16> {
        self.run(|inner| inner.read_sample_period()).await
    }

    pub async fn set_archive_period(&self, minutes: u8) -> LinkResult<()> {
        self.run(move |inner| inner.set_archive_period(minutes)).await
    }

    pub async fn set_sample_period(&self, seconds: u16) -> LinkResult<()> {
        self.run(move |inner| inner.set_sample_period(seconds)).await
    }

    pub async fn read_station_time(&self) -> LinkResult<StationTime> {
        self.run(|inner| inner.read_station_time()).await
    }

    pub async fn write_station_time(&self, dt: NaiveDateTime) -> LinkResult<()> {
        self.run(move |inner| inner.write_station_time(dt)).await
    }

    pub async fn read_rain_yearly(&self) -> LinkResult<u16> {
        self.run(|inner| inner.read_rain_yearly()).await
    }

    pub async fn clear_rain_daily(&self) -> LinkResult<()> {
        self.run(|inner| inner.clear_rain_daily()).await
    }

    pub async fn clear_rain_yearly(&self) -> LinkResult<()> {
        self.run(|inner| inner.clear_rain_yearly()).await
    }

    pub async fn force_archive(&self) -> LinkResult<()> {
        self.run(|inner| inner.force_archive()).await
    }

    pub async fn read_archive_record(&self, address: u16) -> LinkResult<ArchiveRecord> {
        self.run(move |inner| inner.read_archive_record(address)).await
    }
}
