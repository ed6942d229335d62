//! Byte transport under the USBA framing
//!
//! [`Transport`] is what [`super::link::Link`] speaks through. The real one is
//! [`SerialTransport`] over the cartridge's USB CDC port; tests substitute a
//! simulated cartridge.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::SerialPort;

use crate::deadline::Deadline;
use crate::error::{DeviceError, Result};

/// Deadline-bounded byte stream
pub trait Transport: Send {
    /// Write all of `buf` before `deadline`
    fn write_all(&mut self, buf: &[u8], deadline: Deadline) -> Result<()>;

    /// Fill all of `buf` before `deadline`
    fn read_exact(&mut self, buf: &mut [u8], deadline: Deadline) -> Result<()>;

    /// Release the underlying port; later calls fail with [`DeviceError::Closed`]
    fn close(&mut self) -> Result<()>;
}

/// Serial port transport
pub struct SerialTransport {
    path: String,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    pub fn open(path: &str, baud_rate: u32) -> Result<Self> {
        let mut port = serialport::new(path, baud_rate)
            .timeout(Duration::from_millis(100))
            .open()?;
        port.write_data_terminal_ready(true)?;
        tracing::debug!(path, baud_rate, "serial port opened");

        Ok(Self {
            path: path.to_string(),
            port: Some(port),
        })
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(DeviceError::Closed)
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, mut buf: &[u8], deadline: Deadline) -> Result<()> {
        let port = self.port()?;
        while !buf.is_empty() {
            port.set_timeout(deadline.check("serial write")?)?;
            match port.write(buf) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => buf = &buf[n..],
                Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) => {}
                Err(e) => return Err(e.into()),
            }
        }
        port.flush()?;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8], deadline: Deadline) -> Result<()> {
        let port = self.port()?;
        let mut filled = 0;
        while filled < buf.len() {
            port.set_timeout(deadline.check("serial read")?)?;
            match port.read(&mut buf[filled..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
                Ok(n) => filled += n,
                Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::Interrupted) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            tracing::debug!(path = %self.path, "serial port closed");
        }
        Ok(())
    }
}
