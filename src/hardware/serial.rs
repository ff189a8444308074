//! Real serial ports, backed by the `serialport` crate

use std::{
    io::{ErrorKind, Read, Write},
    time::{Duration, Instant},
};

use serialport::{ClearBuffer, SerialPort};

use crate::channel::{ChannelError, ChannelResult, LineBuffer, LineChannel};

use super::PortOpener;

/// Longest single blocking read. Reads loop in slices of this size until their deadline.
const READ_SLICE: Duration = Duration::from_millis(50);

impl From<serialport::Error> for ChannelError {
    fn from(err: serialport::Error) -> Self {
        ChannelError::from(std::io::Error::from(err))
    }
}

/// A serial port opened as a [LineChannel]
pub struct SerialChannel {
    name: String,
    port: Option<Box<dyn SerialPort>>,
    rx: LineBuffer,
}

impl std::fmt::Debug for SerialChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialChannel")
            .field("name", &self.name)
            .field("open", &self.port.is_some())
            .finish()
    }
}

impl SerialChannel {
    /// Opens `path` at `baud`, 8N1, no flow control
    pub fn open(path: &str, baud: u32) -> ChannelResult<Self> {
        let port = serialport::new(path, baud)
            .timeout(READ_SLICE)
            .open()
            .map_err(|e| ChannelError::OpenFailed {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
        log::debug!("Opened {path} at {baud} baud");
        Ok(Self {
            name: path.to_string(),
            port: Some(port),
            rx: LineBuffer::default(),
        })
    }

    fn port(&mut self) -> ChannelResult<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(ChannelError::InterfaceNotOpen)
    }
}

impl LineChannel for SerialChannel {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn read_until(&mut self, delim: u8, timeout: Duration) -> ChannelResult<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 256];
        loop {
            if let Some(frame) = self.rx.take_until(delim) {
                return Ok(frame);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ChannelError::ReadTimeout);
            }
            let port = self.port()?;
            port.set_timeout((deadline - now).min(READ_SLICE))?;
            match port.read(&mut chunk) {
                Ok(0) => {}
                Ok(n) => self.rx.extend(&chunk[..n])?,
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn write_bytes(&mut self, buffer: &[u8], timeout: Duration) -> ChannelResult<()> {
        let port = self.port()?;
        port.set_timeout(timeout)?;
        match port.write_all(buffer).and_then(|_| port.flush()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::TimedOut => Err(ChannelError::WriteTimeout),
            Err(e) => Err(e.into()),
        }
    }

    fn clear_rx_buffer(&mut self) -> ChannelResult<()> {
        self.rx.clear();
        self.port()?.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn close(&mut self) -> ChannelResult<()> {
        if self.port.take().is_some() {
            log::debug!("Closed {}", self.name);
        }
        self.rx.clear();
        Ok(())
    }
}

/// Opens real serial ports
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialPortOpener;

impl PortOpener for SerialPortOpener {
    fn open(&self, path: &str, baud: u32) -> ChannelResult<Box<dyn LineChannel>> {
        Ok(Box::new(SerialChannel::open(path, baud)?))
    }
}
