#![warn(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications,
    clippy::uninlined_format_args
)]

//! A crate which finds, connects to and polls the two serial devices a dashboard
//! computer usually has plugged into it: a GPS receiver and an OBD-II adapter.
//!
//! Nothing about the device layout is configured up front. Candidate serial ports are
//! enumerated on every start, probed at the baud rates each device class uses, and
//! assigned a role only once they answer in the protocol expected of that role.
//!
//! ## GPS (NMEA-0183)
//!
//! GPS receivers stream line-oriented NMEA sentences. Only ground speed is extracted, from
//! `RMC` and `VTG` sentences of the `GP`, `GN`, `GL` and `GA` talkers, after validating the
//! `*HH` XOR checksum. See [nmea].
//!
//! ## OBD-II (SAE J1979 over ELM327)
//!
//! ELM327-class adapters are driven with the AT command set, then queried with ASCII hex
//! Mode 01 / Mode 06 requests and vendor-specific Mode 22 requests. Responses are framed
//! according to the negotiated bus protocol, checksummed where the bus carries a checksum,
//! and decoded into physical units. See [obd2].
//!
//! ## Telemetry
//!
//! Once both roles are resolved, a [poller::TelemetryPoller] is ticked by the application's
//! own loop and publishes immutable [poller::TelemetrySnapshot]s for the display layer.

use channel::ChannelError;

pub mod channel;
pub mod config;
pub mod hardware;
pub mod nmea;
pub mod obd2;
pub mod poller;
pub mod probe;

/// Crate level result
pub type LinkResult<T> = Result<T, LinkError>;

/// Logical role a serial device plays for the dashboard.
///
/// Roles are resolved by probing, never inferred from a port name, and a port
/// resolved for one role is never handed to the other.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, strum_macros::Display, strum_macros::EnumString,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceRole {
    /// NMEA-0183 GPS receiver
    #[strum(serialize = "GPS")]
    Gps,
    /// ELM327-class OBD-II adapter
    #[strum(serialize = "OBD")]
    Obd,
}

#[derive(Clone, Debug, thiserror::Error)]
/// Top level error
pub enum LinkError {
    /// Error with the underlying serial channel
    #[error("Serial channel error")]
    ChannelError(
        #[from]
        #[source]
        ChannelError,
    ),
    /// A port opened but no ELM327 prompt came back at any of the tried baud rates
    #[error("No OBD adapter answered on {path} (tried {bauds:?})")]
    AdapterNotResponding {
        /// Port path
        path: String,
        /// Baud rates tried
        bauds: Vec<u32>,
    },
    /// The adapter refused one of the setup commands
    #[error("Adapter on {path} rejected '{command}': {response}")]
    InitFailed {
        /// Port path
        path: String,
        /// AT command that failed
        command: String,
        /// What the adapter sent back
        response: String,
    },
    /// Every candidate for a role was tried without success
    #[error("No {role} device found (tried: {})", describe_attempts(.tried))]
    DeviceNotFound {
        /// Role that could not be resolved
        role: DeviceRole,
        /// Each `path@baud: outcome` that was tried
        tried: Vec<String>,
    },
}

fn describe_attempts(tried: &[String]) -> String {
    if tried.is_empty() {
        "no candidate ports".into()
    } else {
        tried.join(", ")
    }
}
