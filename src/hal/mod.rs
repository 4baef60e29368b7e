//! Hardware abstraction: serial port access and a monotonic clock.
//!
//! The protocol engine consumes exactly three things from the platform:
//! bytes in and out of a named serial port, a monotonic millisecond clock,
//! and threads (taken from `std`). Everything else is the host's business.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use serialport::{DataBits, Parity, StopBits};

use crate::error::{Error, Result};

/// Byte-level access to a serial device.
///
/// A transport's reader thread is the single reader of a link; writers use
/// a [`try_clone`](SerialLink::try_clone)d handle of the same device.
pub trait SerialLink: Send {
    /// Read up to `buf.len()` bytes, waiting at most `timeout`.
    /// Returns `Ok(0)` when the timeout expires with nothing received.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Write the whole buffer.
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Flush buffered output to the device.
    fn flush(&mut self) -> Result<()>;

    /// Clone the handle so a second thread can access the same device.
    fn try_clone(&self) -> Result<Box<dyn SerialLink>>;
}

/// Open a system serial port in 8N1 mode.
pub fn open(port: &str, baudrate: u32) -> Result<Box<dyn SerialLink>> {
    let port = serialport::new(port, baudrate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .timeout(Duration::from_millis(50))
        .open()
        .map_err(|_| Error::NoDevice)?;
    Ok(Box::new(SystemSerial { port }))
}

struct SystemSerial {
    port: Box<dyn serialport::SerialPort>,
}

impl SerialLink for SystemSerial {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.port.set_timeout(timeout).map_err(|_| Error::NoDevice)?;
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e)
                if e.kind() == std::io::ErrorKind::TimedOut
                    || e.kind() == std::io::ErrorKind::WouldBlock =>
            {
                Ok(0)
            }
            Err(_) => Err(Error::NoDevice),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.port.write_all(data).map_err(|_| Error::SendFailed)
    }

    fn flush(&mut self) -> Result<()> {
        self.port.flush().map_err(|_| Error::SendFailed)
    }

    fn try_clone(&self) -> Result<Box<dyn SerialLink>> {
        let port = self.port.try_clone().map_err(|_| Error::NoDevice)?;
        Ok(Box::new(SystemSerial { port }))
    }
}

/// Monotonic millisecond clock.
pub trait Clock: Send + Sync {
    /// Milliseconds since an arbitrary fixed origin.
    fn now_ms(&self) -> u64;
}

/// Clock backed by [`Instant`], anchored at construction.
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_does_not_go_backwards() {
        let clock = MonotonicClock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }
}
