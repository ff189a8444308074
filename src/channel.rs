//! Module for logical communication channels with a serial device
//!
//! Both device roles speak line or prompt oriented ASCII, so a channel here is a byte pipe
//! that is read up to a delimiter:
//! * GPS receivers end every sentence with `\n`
//! * ELM327 adapters end every response with the `>` prompt
//!
//! Every read and write takes an explicit timeout. A channel never blocks longer than it was
//! asked to.

use std::{sync::Arc, time::Duration};

/// Communication channel result
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Upper bound on buffered bytes while waiting for a delimiter.
/// Misconfigured baud rates produce delimiter-free garbage, this stops it piling up.
pub const MAX_PENDING_BYTES: usize = 4096;

#[derive(Debug, Clone, thiserror::Error)]
/// Error produced by a communication channel
pub enum ChannelError {
    /// Underlying IO Error with channel
    #[error("IO error: {0}")]
    IOError(
        #[from]
        #[source]
        Arc<std::io::Error>,
    ),
    /// The port could not be opened
    #[error("Failed to open {path}: {reason}")]
    OpenFailed {
        /// Port path
        path: String,
        /// Reason reported by the OS
        reason: String,
    },
    /// Timeout when writing data to the channel
    #[error("Timeout writing to channel")]
    WriteTimeout,
    /// Timeout when reading from the channel
    #[error("Timeout reading from channel")]
    ReadTimeout,
    /// Too much data arrived without a delimiter
    #[error("Channel receive buffer is full")]
    BufferFull,
    /// The interface is not open
    #[error("Channel interface is not open")]
    InterfaceNotOpen,
    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ChannelError {
    /// Returns true if the channel can no longer be used.
    ///
    /// Timeouts and overflowing garbage are recoverable, the next request may well
    /// succeed. A closed or vanished port is not.
    pub fn is_fatal(&self) -> bool {
        match self {
            ChannelError::IOError(e) => !matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
            ),
            ChannelError::OpenFailed { .. } | ChannelError::InterfaceNotOpen => true,
            ChannelError::WriteTimeout | ChannelError::ReadTimeout | ChannelError::BufferFull => false,
            ChannelError::Other(_) => false,
        }
    }
}

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> Self {
        Self::IOError(Arc::new(err))
    }
}

/// Base trait for talking to a serial device.
///
/// A channel is owned by exactly one user at a time, so implementations carry no locking.
pub trait LineChannel: Send {
    /// Name of the port behind this channel
    fn port_name(&self) -> &str;

    /// Reads bytes until `delim` is seen, returning everything up to and including it.
    ///
    /// ## Parameters
    /// * delim - Delimiter byte to stop at
    /// * timeout - Longest time to wait for the delimiter. If it does not arrive in time
    ///   [ChannelError::ReadTimeout] is returned and the partial data stays buffered
    fn read_until(&mut self, delim: u8, timeout: Duration) -> ChannelResult<Vec<u8>>;

    /// Writes the whole buffer to the channel
    ///
    /// ## Parameters
    /// * buffer - Bytes to write
    /// * timeout - Longest time to wait for the write to complete
    fn write_bytes(&mut self, buffer: &[u8], timeout: Duration) -> ChannelResult<()>;

    /// Drops any received but unread data
    fn clear_rx_buffer(&mut self) -> ChannelResult<()>;

    /// Closes the channel. Any read or write after this returns [ChannelError::InterfaceNotOpen]
    fn close(&mut self) -> ChannelResult<()>;

    /// Reads one `\n` terminated line, with surrounding whitespace and `\r` removed.
    /// Non UTF-8 bytes are replaced rather than rejected.
    fn read_line(&mut self, timeout: Duration) -> ChannelResult<String> {
        let raw = self.read_until(b'\n', timeout)?;
        Ok(String::from_utf8_lossy(&raw).trim().to_string())
    }

    /// Writes a request, then reads the reply up to `delim`
    fn write_read_until(
        &mut self,
        buffer: &[u8],
        delim: u8,
        write_timeout: Duration,
        read_timeout: Duration,
    ) -> ChannelResult<Vec<u8>> {
        self.write_bytes(buffer, write_timeout)?;
        self.read_until(delim, read_timeout)
    }
}

/// Accumulates received bytes and hands them out one delimited chunk at a time
#[derive(Debug, Default, Clone)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Removes and returns everything up to and including the first `delim`
    pub fn take_until(&mut self, delim: u8) -> Option<Vec<u8>> {
        let pos = self.pending.iter().position(|b| *b == delim)?;
        let rest = self.pending.split_off(pos + 1);
        Some(std::mem::replace(&mut self.pending, rest))
    }

    pub fn extend(&mut self, data: &[u8]) -> ChannelResult<()> {
        if self.pending.len() + data.len() > MAX_PENDING_BYTES {
            self.pending.clear();
            return Err(ChannelError::BufferFull);
        }
        self.pending.extend_from_slice(data);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_splits_on_delimiter() {
        let mut buf = LineBuffer::default();
        buf.extend(b"$GPRMC,1*00\r\n$GPVTG").unwrap();
        assert_eq!(buf.take_until(b'\n').unwrap(), b"$GPRMC,1*00\r\n".to_vec());
        assert!(buf.take_until(b'\n').is_none());
        buf.extend(b",2*00\n").unwrap();
        assert_eq!(buf.take_until(b'\n').unwrap(), b"$GPVTG,2*00\n".to_vec());
    }

    #[test]
    fn line_buffer_rejects_runaway_garbage() {
        let mut buf = LineBuffer::default();
        let garbage = vec![0xF8; MAX_PENDING_BYTES];
        buf.extend(&garbage).unwrap();
        assert!(matches!(buf.extend(&[0x00]), Err(ChannelError::BufferFull)));
        // Buffer is reset so the next read starts clean
        buf.extend(b"OK\r>").unwrap();
        assert_eq!(buf.take_until(b'>').unwrap(), b"OK\r>".to_vec());
    }

    #[test]
    fn timeouts_are_not_fatal() {
        assert!(!ChannelError::ReadTimeout.is_fatal());
        assert!(ChannelError::InterfaceNotOpen.is_fatal());
        let gone = ChannelError::from(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert!(gone.is_fatal());
        let slow = ChannelError::from(std::io::Error::from(std::io::ErrorKind::TimedOut));
        assert!(!slow.is_fatal());
    }
}
