//! Module for OBD-II (SAE J1979) over ELM327 adapters
//!
//! Commands are plain [ObdCommand] descriptors: mode, PID bytes and a decoder function.
//! The standard catalog lives in this module; vendor commands (see [enhanced]) are built
//! the same way and added to a [CommandRegistry] at runtime.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

pub mod capability;
pub mod codec;
mod commands;
pub mod elm327;
pub mod enhanced;
mod enumerations;
pub mod protocol;
mod units;

// Exports
pub use commands::*;
pub use enumerations::*;
pub use units::*;

/// Decoder result
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Function to decode a PID support bitmap, MSB of the first byte first
pub fn decode_pid_response(x: &[u8]) -> Vec<bool> {
    let mut resp: Vec<bool> = Vec::with_capacity(x.len() * 8);
    for b in x {
        let mut mask: u8 = 0b10000000;
        for _ in 0..8 {
            resp.push(b & mask != 0x00);
            mask >>= 1;
        }
    }
    resp
}

/// Framing and decoding failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Response shorter than the decoder needs
    #[error("Response too short. Need {need} bytes, got {got}")]
    TooShort {
        /// Bytes needed, mode and PID echo included
        need: usize,
        /// Bytes received
        got: usize,
    },
    /// Mode or PID echo does not match the request
    #[error("Response header {got:02X?} does not match request {expected:02X?}")]
    UnexpectedHeader {
        /// Expected echo
        expected: Vec<u8>,
        /// Received echo
        got: Vec<u8>,
    },
    /// Text that is not valid hex
    #[error("Invalid hex in '{0}'")]
    InvalidHex(String),
    /// Frame could not be split into header and data
    #[error("Malformed frame '{0}'")]
    MalformedFrame(String),
    /// Legacy frame checksum is wrong
    #[error("Frame checksum mismatch. Frame says {expected:02X}, computed {computed:02X}")]
    ChecksumMismatch {
        /// Checksum byte carried by the frame
        expected: u8,
        /// Checksum of the received bytes
        computed: u8,
    },
    /// Response had no data bytes
    #[error("Empty response")]
    Empty,
}

/// Registry key of a command
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandKey {
    /// Service mode
    pub mode: u8,
    /// PID, big endian
    pub pid: u16,
}

/// An OBD command descriptor
#[derive(Debug, Copy, Clone)]
pub struct ObdCommand {
    /// Short name, such as `RPM`
    pub name: &'static str,
    /// Human readable description
    pub desc: &'static str,
    /// Service mode of the request
    pub mode: u8,
    /// PID bytes of the request
    pub pid: &'static [u8],
    /// Bytes in a full response, mode and PID echo included
    pub expected_response_len: usize,
    /// Skip the mode/PID echo check and let the decoder find the data itself.
    /// Vendor PIDs set this, some ECUs answer them with shifted headers.
    pub lenient_header: bool,
    /// Decodes a full response message (mode echo first)
    pub decoder: fn(&[u8]) -> DecodeResult<ObdValue>,
}

impl ObdCommand {
    /// Registry key
    pub fn key(&self) -> CommandKey {
        CommandKey {
            mode: self.mode,
            pid: self.pid.iter().fold(0u16, |acc, b| (acc << 8) | *b as u16),
        }
    }

    /// ASCII hex request, without terminator. `RPM` gives `010C`
    pub fn request(&self) -> String {
        let mut s = format!("{:02X}", self.mode);
        for b in self.pid {
            s.push_str(&format!("{b:02X}"));
        }
        s
    }

    /// Mode byte of a positive response
    pub fn response_mode(&self) -> u8 {
        self.mode.wrapping_add(0x40)
    }

    /// Mode and PID echo a positive response starts with
    pub fn response_header(&self) -> Vec<u8> {
        let mut h = Vec::with_capacity(1 + self.pid.len());
        h.push(self.response_mode());
        h.extend_from_slice(self.pid);
        h
    }

    /// True if `message` is a positive response to this command
    pub fn matches_response(&self, message: &[u8]) -> bool {
        message.starts_with(&self.response_header())
    }

    /// Decodes a full response message
    pub fn decode(&self, message: &[u8]) -> DecodeResult<ObdValue> {
        if !self.lenient_header && !self.matches_response(message) {
            let expected = self.response_header();
            return Err(DecodeError::UnexpectedHeader {
                got: message.iter().take(expected.len()).copied().collect(),
                expected,
            });
        }
        (self.decoder)(message)
    }
}

impl PartialEq for ObdCommand {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.key() == other.key()
    }
}

impl Display for ObdCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.request())
    }
}

/// Open set of commands keyed by mode and PID
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    commands: BTreeMap<CommandKey, ObdCommand>,
}

impl CommandRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built in catalog
    pub fn standard() -> Self {
        let mut r = Self::new();
        for cmd in STANDARD_COMMANDS {
            r.register(cmd);
        }
        r
    }

    /// Adds a command, returning the one it replaced
    pub fn register(&mut self, cmd: ObdCommand) -> Option<ObdCommand> {
        self.commands.insert(cmd.key(), cmd)
    }

    /// Looks up a command by mode and PID
    pub fn get(&self, mode: u8, pid: u16) -> Option<&ObdCommand> {
        self.commands.get(&CommandKey { mode, pid })
    }

    /// Looks up a command by name
    pub fn by_name(&self, name: &str) -> Option<&ObdCommand> {
        self.commands.values().find(|c| c.name == name)
    }

    /// Iterates over commands ordered by mode then PID
    pub fn iter(&self) -> impl Iterator<Item = &ObdCommand> {
        self.commands.values()
    }

    /// Number of registered commands
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// True if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Why a response carries no value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NullReason {
    /// Adapter said `NO DATA`
    NoData,
    /// Adapter could not reach the bus
    Unable,
    /// Adapter aborted the request
    Stopped,
    /// Adapter did not understand the request (`?`)
    Rejected,
    /// Bus level error reported by the adapter
    BusError(String),
    /// No prompt within the timeout
    Timeout,
    /// Serial port failure
    Transport(String),
    /// ECU answered with a negative response code
    NegativeResponse(u8),
    /// Data received, but not in response to this command
    WrongResponse,
    /// Response could not be framed or decoded
    Decode(DecodeError),
}

impl Display for NullReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NullReason::NoData => write!(f, "no data"),
            NullReason::Unable => write!(f, "unable to connect"),
            NullReason::Stopped => write!(f, "stopped"),
            NullReason::Rejected => write!(f, "request rejected by adapter"),
            NullReason::BusError(e) => write!(f, "bus error: {e}"),
            NullReason::Timeout => write!(f, "timed out"),
            NullReason::Transport(e) => write!(f, "transport error: {e}"),
            NullReason::NegativeResponse(nrc) => write!(f, "negative response 0x{nrc:02X}"),
            NullReason::WrongResponse => write!(f, "unrelated response"),
            NullReason::Decode(e) => write!(f, "{e}"),
        }
    }
}

/// Result of one query
#[derive(Debug, Clone, PartialEq)]
pub struct ObdResponse {
    /// Name of the command this answers
    pub command: &'static str,
    /// Reassembled message, mode echo first. Empty when nothing usable came back
    pub raw_bytes: Vec<u8>,
    /// CAN id or legacy source address of the answering ECU, if headers were on
    pub ecu_source: Option<u32>,
    /// Decoded value
    pub value: Option<ObdValue>,
    /// Set whenever `value` is absent
    pub null_reason: Option<NullReason>,
}

impl ObdResponse {
    /// A response with no value
    pub fn null(command: &'static str, reason: NullReason) -> Self {
        Self {
            command,
            raw_bytes: Vec::new(),
            ecu_source: None,
            value: None,
            null_reason: Some(reason),
        }
    }

    /// True if no value was decoded
    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// Numeric value, if any
    pub fn value_f64(&self) -> Option<f64> {
        self.value.as_ref().and_then(|v| v.as_f64())
    }
}

/// Something OBD commands can be sent to
pub trait ObdQuery {
    /// Sends `cmd` and decodes the reply. Never fails, problems come back as a null response
    fn query(&mut self, cmd: &ObdCommand) -> ObdResponse;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitfield_is_msb_first() {
        let bits = decode_pid_response(&[0b1010_0000]);
        assert_eq!(bits, vec![true, false, true, false, false, false, false, false]);
        assert_eq!(decode_pid_response(&[0xBE, 0x1F, 0xA8, 0x13]).len(), 32);
    }

    #[test]
    fn command_request_and_key() {
        assert_eq!(RPM.request(), "010C");
        assert_eq!(RPM.key(), CommandKey { mode: 0x01, pid: 0x0C });
        assert_eq!(MIDS_A.request(), "0600");
        assert_eq!(enhanced::GM_OIL_PRESSURE.request(), "22115C");
        assert_eq!(enhanced::GM_OIL_PRESSURE.key().pid, 0x115C);
    }

    #[test]
    fn registry_is_open() {
        let mut reg = CommandRegistry::standard();
        let before = reg.len();
        assert!(reg.get(0x01, 0x0C).is_some());
        assert!(reg.get(0x22, 0x115C).is_none());
        assert!(reg.register(enhanced::GM_OIL_PRESSURE).is_none());
        assert_eq!(reg.len(), before + 1);
        assert_eq!(reg.by_name("GM_OIL_PRESSURE"), Some(&enhanced::GM_OIL_PRESSURE));
        assert_eq!(reg.get(0x22, 0x115C).map(|c| c.name), Some("GM_OIL_PRESSURE"));
    }

    #[test]
    fn decode_checks_header() {
        assert!(RPM.decode(&[0x41, 0x0C, 0x1A, 0xF8]).is_ok());
        assert!(matches!(
            RPM.decode(&[0x41, 0x0D, 0x1A, 0xF8]),
            Err(DecodeError::UnexpectedHeader { .. })
        ));
    }
}
