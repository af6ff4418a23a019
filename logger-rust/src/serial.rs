//! Serial transport: framed sends, bounded receives, ACK waits.
//!
//! Wraps any [`SerialDevice`] — a real 8-N-1 serial port, a `tcp:`
//! bridge to the simulator, or an in-process simulated station. All
//! calls block; the link driver dispatches them to a worker thread.

use std::io;
use std::net::TcpStream;
use std::time::Duration;

use serialport::ClearBuffer;
use tracing::{debug, warn};

use wx_types::commands::{ACK, CAN, NAK, NOT_UNDERSTOOD};
use wx_types::SerialDevice;

use crate::error::{LinkError, LinkResult};

/// List serial port names available on this system.
pub fn list_serial_ports() -> Vec<String> {
    serialport::available_ports()
        .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
        .unwrap_or_default()
}

/// Open a device by name: `tcp:host:port` connects a TCP bridge
/// (the wx-sim binary), anything else opens a serial port at 8-N-1.
pub fn open_device(port: &str, baud: u32, timeout: Duration) -> LinkResult<Box<dyn SerialDevice>> {
    if let Some(addr) = port.strip_prefix("tcp:") {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        debug!("opened tcp bridge {addr}");
        return Ok(Box::new(TcpDevice { stream }));
    }

    let port = serialport::new(port, baud)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .timeout(timeout)
        .open()
        .map_err(|e| LinkError::Io(io::Error::new(io::ErrorKind::Other, e)))?;
    Ok(Box::new(TtyDevice { port }))
}

struct TtyDevice {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialDevice for TtyDevice {
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut self.port, buf)
    }

    fn write_all_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        io::Write::write_all(&mut self.port, data)?;
        io::Write::flush(&mut self.port)
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        self.port
            .clear(ClearBuffer::All)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

struct TcpDevice {
    stream: TcpStream,
}

impl SerialDevice for TcpDevice {
    fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match io::Read::read(&mut self.stream, buf) {
            // A read timeout surfaces as WouldBlock on some platforms.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                Err(io::Error::new(io::ErrorKind::TimedOut, e))
            }
            other => other,
        }
    }

    fn write_all_bytes(&mut self, data: &[u8]) -> io::Result<()> {
        io::Write::write_all(&mut self.stream, data)
    }

    fn clear_buffers(&mut self) -> io::Result<()> {
        // Drain whatever the peer already sent; there is no kernel-level
        // discard for TCP.
        let mut scratch = [0u8; 256];
        let original = self.stream.read_timeout()?;
        self.stream
            .set_read_timeout(Some(Duration::from_millis(5)))?;
        loop {
            match io::Read::read(&mut self.stream, &mut scratch) {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
        self.stream.set_read_timeout(original)?;
        Ok(())
    }
}

/// Framed byte transport over one owned device.
pub struct SerialTransport {
    device: Box<dyn SerialDevice>,
}

impl SerialTransport {
    pub fn new(device: Box<dyn SerialDevice>) -> Self {
        Self { device }
    }

    /// Write all bytes and flush.
    pub fn send(&mut self, data: &[u8]) -> LinkResult<()> {
        debug!("TX: {}", hex(data));
        self.device.write_all_bytes(data)?;
        Ok(())
    }

    /// Read up to `n` bytes; returns fewer when the timeout expires.
    pub fn receive(&mut self, n: usize) -> LinkResult<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        let mut buf = [0u8; 64];
        while out.len() < n {
            let want = (n - out.len()).min(buf.len());
            match self.device.read_bytes(&mut buf[..want]) {
                Ok(0) => break,
                Ok(k) => out.extend_from_slice(&buf[..k]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) => return Err(LinkError::Io(e)),
            }
        }
        debug!("RX: {} ({} bytes)", hex(&out), out.len());
        Ok(out)
    }

    /// Discard both directions.
    pub fn flush(&mut self) -> LinkResult<()> {
        self.device.clear_buffers()?;
        Ok(())
    }

    /// Wait for the single ACK byte that opens every response.
    pub fn wait_for_ack(&mut self) -> LinkResult<()> {
        let byte = self.receive(1)?;
        match byte.first() {
            None => {
                warn!("timeout waiting for ACK");
                Err(LinkError::Timeout)
            }
            Some(&ACK) => Ok(()),
            Some(&b) if b == NAK || b == NOT_UNDERSTOOD => {
                Err(LinkError::Protocol("command not understood (NAK)".into()))
            }
            Some(&CAN) => Err(LinkError::Protocol("station reported CRC failure (CAN)".into())),
            Some(&b) => Err(LinkError::Protocol(format!(
                "expected ACK (0x06), got 0x{b:02X}"
            ))),
        }
    }
}

fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}
