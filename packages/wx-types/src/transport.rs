//! Hardware abstraction for the byte stream to the datalogger.
//!
//! The logger's transport and the simulator both implement this trait,
//! so every driver path can run against either a real 8-N-1 serial port
//! or an in-memory station.

use std::io;

/// Byte-level access to a WeatherLink, real or simulated.
///
/// Implementations are blocking; the logger dispatches calls to a worker
/// thread so the event loop never waits on the wire.
pub trait SerialDevice: Send {
    /// Read available bytes into `buf`, blocking up to the device's
    /// configured timeout. Returns the number of bytes read; a timeout
    /// with nothing received surfaces as `ErrorKind::TimedOut`.
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write the whole buffer and flush it onto the wire.
    fn write_all_bytes(&mut self, data: &[u8]) -> io::Result<()>;

    /// Discard anything pending in both directions.
    fn clear_buffers(&mut self) -> io::Result<()>;
}
