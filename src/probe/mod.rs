//! Role resolution
//!
//! Every candidate port is tried in the protocol each role expects. The GPS role is resolved
//! first, and whatever port it claimed is excluded when looking for the OBD adapter, so one
//! physical device never ends up with two roles even when two candidate paths alias it.

use std::fmt::{Display, Formatter};

use crate::{
    channel::ChannelError,
    config::LinkConfig,
    hardware::{scanner::SerialScanner, PortOpener},
    nmea::GpsSpeedReader,
    obd2::elm327::{Elm327, LinkStatus},
    DeviceRole, LinkError, LinkResult,
};

pub mod gps;
pub mod obd;

pub use gps::{GpsPortProbe, GpsProbeSettings};
pub use obd::{ObdPortProbe, ObdProbeSettings};

/// How a single probe attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The device answered as expected and was claimed
    Accepted,
    /// The port could not be opened
    OpenFailed(String),
    /// The port failed while being probed
    Transport(String),
    /// No NMEA speed sentence within the probe window
    NoNmea,
    /// No ELM327 prompt at any baud rate
    AdapterSilent,
    /// The adapter rejected a setup command
    InitFailed(String),
    /// The adapter answered but no vehicle did
    NoVehicle(LinkStatus),
    /// The vehicle bus is up but RPM could not be read
    NoRpm(String),
    /// The port already belongs to another role
    Excluded,
}

impl Display for AttemptOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptOutcome::Accepted => write!(f, "accepted"),
            AttemptOutcome::OpenFailed(e) => write!(f, "open failed ({e})"),
            AttemptOutcome::Transport(e) => write!(f, "port failed ({e})"),
            AttemptOutcome::NoNmea => write!(f, "no NMEA speed sentence"),
            AttemptOutcome::AdapterSilent => write!(f, "no ELM327 prompt"),
            AttemptOutcome::InitFailed(e) => write!(f, "init failed ({e})"),
            AttemptOutcome::NoVehicle(status) => write!(f, "no vehicle ({status})"),
            AttemptOutcome::NoRpm(e) => write!(f, "no RPM ({e})"),
            AttemptOutcome::Excluded => write!(f, "claimed by another role"),
        }
    }
}

impl AttemptOutcome {
    pub(crate) fn from_link_error(err: &LinkError) -> Self {
        match err {
            LinkError::AdapterNotResponding { .. } => AttemptOutcome::AdapterSilent,
            LinkError::InitFailed { command, response, .. } => {
                AttemptOutcome::InitFailed(format!("{command} -> '{response}'"))
            }
            LinkError::ChannelError(ChannelError::OpenFailed { reason, .. }) => {
                AttemptOutcome::OpenFailed(reason.clone())
            }
            LinkError::ChannelError(e) => AttemptOutcome::Transport(e.to_string()),
            other => AttemptOutcome::Transport(other.to_string()),
        }
    }
}

/// One port (and baud rate, where one was settled on) that was tried for a role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeAttempt {
    /// Role the port was tried for
    pub role: DeviceRole,
    /// Port path
    pub path: String,
    /// Baud rate, if the attempt got that far
    pub baud: Option<u32>,
    /// Whether this came from the OBD autoscan fallback
    pub autoscan: bool,
    /// Result
    pub outcome: AttemptOutcome,
}

impl Display for ProbeAttempt {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path)?;
        if let Some(baud) = self.baud {
            write!(f, "@{baud}")?;
        }
        if self.autoscan {
            write!(f, " (autoscan)")?;
        }
        write!(f, ": {}", self.outcome)
    }
}

pub(crate) fn not_found(role: DeviceRole, attempts: &[ProbeAttempt]) -> LinkError {
    LinkError::DeviceNotFound {
        role,
        tried: attempts.iter().map(ToString::to_string).collect(),
    }
}

/// Result of a full discovery pass. Each role succeeds or fails on its own
#[derive(Debug)]
pub struct Discovery {
    /// GPS receiver, ready to poll
    pub gps: LinkResult<GpsSpeedReader>,
    /// OBD adapter, initialised
    pub obd: LinkResult<Elm327>,
}

/// Lists the candidates, resolves the GPS role, then the OBD role on the remaining ports
pub fn discover(scanner: &SerialScanner, opener: &dyn PortOpener, config: &LinkConfig) -> Discovery {
    let candidates = scanner.list();
    log::info!("Discovering devices on {} candidate port(s)", candidates.len());

    let mut gps_probe = GpsPortProbe::new(opener, config.gps_probe.clone());
    let gps = gps_probe.locate(&candidates).and_then(|(path, baud)| {
        GpsSpeedReader::open(opener, &path, baud, config.gps_reader.clone()).map_err(LinkError::from)
    });
    match &gps {
        Ok(reader) => log::info!("GPS receiver on {} at {} baud", reader.path(), reader.baud()),
        Err(e) => log::error!("{e}"),
    }

    let claimed: Vec<String> = gps.iter().map(|r| r.path().to_string()).collect();
    let mut obd_probe = ObdPortProbe::new(opener, config.obd_probe.clone()).excluding(claimed);
    let obd = obd_probe.locate(&candidates);
    match &obd {
        Ok(elm) => log::info!("OBD adapter on {} at {} baud ({})", elm.path(), elm.baud(), elm.protocol()),
        Err(e) => log::error!("{e}"),
    }

    Discovery { gps, obd }
}
