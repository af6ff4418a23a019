//! Command builders for the WeatherLink serial protocol.
//!
//! All commands are uppercase ASCII terminated with CR (0x0D). Binary
//! parameters follow the ASCII token, little-endian where multi-byte.

use crate::crc::calculate;

// ── Response codes ────────────────────────────────────────────────────────────

/// Command accepted.
pub const ACK: u8 = 0x06;
/// Command not understood (wire alias used by some firmware).
pub const NAK: u8 = 0x15;
/// Command not understood (documented value).
pub const NOT_UNDERSTOOD: u8 = 0x21;
/// CRC checksum failed (Rev E only).
pub const CAN: u8 = 0x18;
/// Escape.
pub const ESC: u8 = 0x1B;
/// Start of LOOP block header.
pub const SOH: u8 = 0x01;
/// Command terminator.
pub const CR: u8 = 0x0D;

// ── Serial defaults ───────────────────────────────────────────────────────────

/// Factory default baud rate.
pub const DEFAULT_BAUD: u32 = 2400;
/// Legacy units shipped at 1200 baud.
pub const LEGACY_BAUD: u32 = 1200;

/// Wire exchanges retry up to this many times after the first attempt.
pub const MAX_RETRIES: u32 = 2;

fn cmd(text: &str, binary_args: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + binary_args.len() + 1);
    out.extend_from_slice(text.as_bytes());
    out.extend_from_slice(binary_args);
    out.push(CR);
    out
}

/// LOOP command requesting `n_packets` sensor image packets.
///
/// The count is sent as 65536 - n, little-endian; one packet is
/// `LOOP 0xFF 0xFF CR`.
pub fn loop_command(n_packets: u16) -> Vec<u8> {
    let count = 0u16.wrapping_sub(n_packets);
    cmd("LOOP", &count.to_le_bytes())
}

/// WRD command reading station processor memory.
///
/// Nibble count goes in the upper nibble of the command byte; the bank
/// code in the lower: bank 0 -> 0x02, bank 1 -> 0x04.
pub fn wrd_command(n_nibbles: u8, bank: u8, address: u8) -> Vec<u8> {
    let bank_code = if bank == 0 { 0x02 } else { 0x04 };
    cmd("WRD", &[((n_nibbles & 0x0F) << 4) | bank_code, address])
}

/// WWR command writing station processor memory.
///
/// Bank encoding differs from WRD: bank 0 -> 0x01, bank 1 -> 0x03.
pub fn wwr_command(n_nibbles: u8, bank: u8, address: u8, data: &[u8]) -> Vec<u8> {
    let bank_code = if bank == 0 { 0x01 } else { 0x03 };
    let mut args = vec![((n_nibbles & 0x0F) << 4) | bank_code, address];
    args.extend_from_slice(data);
    cmd("WWR", &args)
}

/// RRD command reading link processor memory: `RRD bank addr (n-1) CR`.
pub fn rrd_command(bank: u8, address: u8, n_nibbles: u8) -> Vec<u8> {
    cmd("RRD", &[bank, address, n_nibbles.wrapping_sub(1)])
}

/// SRD command reading archive SRAM: `SRD addr_le (len-1)_le CR`.
pub fn srd_command(address: u16, n_bytes: u16) -> Vec<u8> {
    let mut args = Vec::with_capacity(4);
    args.extend_from_slice(&address.to_le_bytes());
    args.extend_from_slice(&n_bytes.wrapping_sub(1).to_le_bytes());
    cmd("SRD", &args)
}

/// DMP command for an XMODEM archive dump.
pub fn dmp_command() -> Vec<u8> {
    cmd("DMP", &[])
}

/// SAP command setting the archive period in minutes (1-120).
pub fn sap_command(minutes: u8) -> Vec<u8> {
    cmd("SAP", &[minutes])
}

/// SSP command setting the sample period. The wire value is `256 - seconds`.
pub fn ssp_command(seconds: u8) -> Vec<u8> {
    cmd("SSP", &[(0u8).wrapping_sub(seconds)])
}

/// STOP command pausing link polling of the station.
pub fn stop_command() -> Vec<u8> {
    cmd("STOP", &[])
}

/// START command resuming link polling.
pub fn start_command() -> Vec<u8> {
    cmd("START", &[])
}

/// ARC command forcing an immediate archive write.
pub fn arc_command() -> Vec<u8> {
    cmd("ARC", &[])
}

/// IMG command forcing a sensor image sample.
pub fn img_command() -> Vec<u8> {
    cmd("IMG", &[])
}

/// DBT command disabling the archive timer.
pub fn dbt_command() -> Vec<u8> {
    cmd("DBT", &[])
}

/// EBT command enabling the archive timer.
pub fn ebt_command() -> Vec<u8> {
    cmd("EBT", &[])
}

/// CRC0 command disabling CRC checking (Rev E only).
///
/// Must be preceded by the fixed CRC bytes 0x2C 0xF7.
pub fn crc0_command() -> Vec<u8> {
    let mut out = vec![0x2C, 0xF7];
    out.extend_from_slice(&cmd("CRC0", &[]));
    out
}

/// CRC1 command enabling CRC checking (Rev E only).
pub fn crc1_command() -> Vec<u8> {
    cmd("CRC1", &[])
}

/// Prepend the Rev E CRC to a command (the CRC covers the CR terminator).
pub fn with_rev_e_crc(command: &[u8]) -> Vec<u8> {
    let crc = calculate(command);
    let mut out = Vec::with_capacity(command.len() + 2);
    out.extend_from_slice(&crc.to_be_bytes());
    out.extend_from_slice(command);
    out
}
