//! ELM327 adapter session
//!
//! The adapter is set up once with
//! `ATZ` (reset), `ATE0` (echo off), `ATL0` (linefeeds off), `ATH1` (headers on),
//! `ATSPn` (protocol, 0 = search) and `ATATn` (adaptive timing).
//! A `0100` request then makes it search for or initialise the bus, and `ATDPN` reports
//! which protocol it settled on. That protocol decides how response frames are laid out.

use std::time::Duration;

use crate::{
    channel::{ChannelError, ChannelResult, LineChannel},
    hardware::PortOpener,
    LinkError, LinkResult,
};

use super::{
    codec::{self, PROMPT},
    protocol::{FrameFormat, ObdProtocol},
    NullReason, ObdCommand, ObdQuery, ObdResponse, PIDS_A,
};

/// Sent to find out whether an adapter is listening at the current baud rate.
/// An ELM327 discards the DEL characters and answers the empty line with a prompt.
const PROMPT_PROBE: &[u8] = b"\x7F\x7F\r";

/// Settings for [Elm327]
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct ElmSettings {
    /// Baud rates to try, in order
    pub bauds: Vec<u32>,
    /// Time to wait for the prompt after an ordinary command
    pub command_timeout: Duration,
    /// Time to wait after `ATZ` and during the bus search
    pub reset_timeout: Duration,
    /// Time allowed for a write to complete
    pub write_timeout: Duration,
    /// Protocol to select. [ObdProtocol::Auto] lets the adapter search
    pub protocol: ObdProtocol,
    /// Adaptive timing mode (`ATAT0`-`ATAT2`)
    pub adaptive_timing: u8,
    /// Ask for headers, so responses carry the sending ECU's address
    pub headers: bool,
}

impl Default for ElmSettings {
    fn default() -> Self {
        Self {
            bauds: vec![38400, 115200, 9600],
            command_timeout: Duration::from_millis(1500),
            reset_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_millis(500),
            protocol: ObdProtocol::Auto,
            adaptive_timing: 2,
            headers: true,
        }
    }
}

/// How far the adapter got towards talking to the vehicle
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, strum_macros::Display)]
pub enum LinkStatus {
    /// Adapter not answering
    #[strum(serialize = "Not Connected")]
    NotConnected,
    /// Adapter answers, no vehicle bus found
    #[strum(serialize = "ELM Connected")]
    ElmConnected,
    /// Bus protocol found, but no ECU answered (ignition off)
    #[strum(serialize = "OBD Connected")]
    ObdConnected,
    /// ECUs are answering
    #[strum(serialize = "Car Connected")]
    CarConnected,
}

/// An initialised ELM327 adapter
pub struct Elm327 {
    channel: Box<dyn LineChannel>,
    baud: u32,
    settings: ElmSettings,
    protocol: ObdProtocol,
    format: FrameFormat,
    status: LinkStatus,
    version: Option<String>,
    lost: bool,
}

impl std::fmt::Debug for Elm327 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Elm327")
            .field("port", &self.channel.port_name())
            .field("baud", &self.baud)
            .field("protocol", &self.protocol)
            .field("status", &self.status)
            .field("version", &self.version)
            .field("lost", &self.lost)
            .finish()
    }
}

fn exchange(channel: &mut dyn LineChannel, text: &str, write_timeout: Duration, read_timeout: Duration) -> ChannelResult<Vec<u8>> {
    channel.clear_rx_buffer()?;
    channel.write_read_until(&codec::encode_at(text), PROMPT, write_timeout, read_timeout)
}

/// Returns true if an adapter answers with a prompt at the channel's current baud rate
pub fn detect_prompt(channel: &mut dyn LineChannel, settings: &ElmSettings) -> bool {
    let res = channel
        .clear_rx_buffer()
        .and_then(|_| channel.write_bytes(PROMPT_PROBE, settings.write_timeout))
        .and_then(|_| channel.read_until(PROMPT, settings.command_timeout));
    match res {
        Ok(_) => true,
        Err(e) => {
            log::debug!("No prompt from {}: {e}", channel.port_name());
            false
        }
    }
}

impl Elm327 {
    /// Opens `path`, finds the baud rate the adapter answers at and initialises it.
    ///
    /// Succeeds once the adapter itself responds, whether or not a vehicle was found. Check
    /// [Elm327::status] for that.
    pub fn connect(opener: &dyn PortOpener, path: &str, settings: ElmSettings) -> LinkResult<Self> {
        for &baud in &settings.bauds {
            let mut channel = opener.open(path, baud)?;
            if detect_prompt(channel.as_mut(), &settings) {
                log::debug!("Adapter on {path} answers at {baud} baud");
                return Self::from_channel(channel, baud, settings);
            }
            let _ = channel.close();
        }
        Err(LinkError::AdapterNotResponding {
            path: path.to_string(),
            bauds: settings.bauds.clone(),
        })
    }

    /// Initialises an adapter on an already open channel
    pub fn from_channel(channel: Box<dyn LineChannel>, baud: u32, settings: ElmSettings) -> LinkResult<Self> {
        let protocol = settings.protocol;
        let mut elm = Self {
            channel,
            baud,
            settings,
            protocol,
            format: FrameFormat::Headerless,
            status: LinkStatus::NotConnected,
            version: None,
            lost: false,
        };
        let banner = elm.at("ATZ", elm.settings.reset_timeout)?;
        elm.version = banner.into_iter().find(|l| l.contains("ELM"));
        elm.at_ok("ATE0")?;
        elm.at_ok("ATL0")?;
        elm.at_ok(if elm.settings.headers { "ATH1" } else { "ATH0" })?;
        elm.at_ok(&elm.settings.protocol.to_elm_command())?;
        elm.at_ok(&format!("ATAT{}", elm.settings.adaptive_timing))?;
        elm.status = LinkStatus::ElmConnected;
        elm.negotiate();
        log::info!(
            "Adapter {} on {} at {} baud: {}, protocol {}",
            elm.version.as_deref().unwrap_or("(unknown version)"),
            elm.path(),
            elm.baud,
            elm.status,
            elm.protocol
        );
        Ok(elm)
    }

    fn at(&mut self, cmd: &str, timeout: Duration) -> LinkResult<Vec<String>> {
        let raw = self.send_raw(cmd, timeout)?;
        Ok(codec::clean_lines(&raw, Some(cmd)))
    }

    fn at_ok(&mut self, cmd: &str) -> LinkResult<()> {
        let lines = self.at(cmd, self.settings.command_timeout)?;
        if lines.iter().any(|l| l.eq_ignore_ascii_case("OK")) {
            Ok(())
        } else {
            Err(LinkError::InitFailed {
                path: self.path().to_string(),
                command: cmd.to_string(),
                response: lines.join(" "),
            })
        }
    }

    /// Makes the adapter find the bus, then reads back the protocol it found
    fn negotiate(&mut self) {
        let request = PIDS_A.request();
        let raw = match self.send_raw(&request, self.settings.reset_timeout) {
            Ok(r) => r,
            Err(e) => {
                log::warn!("Bus search on {} failed: {e}", self.path());
                return;
            }
        };
        let lines = codec::clean_lines(&raw, Some(request.as_str()));
        let reason = codec::non_data_reason(&lines);
        if matches!(reason, Some(NullReason::Unable) | Some(NullReason::BusError(_))) {
            log::warn!("No vehicle bus on {}: {}", self.path(), lines.join(" "));
            return;
        }
        let dpn = match self.at("ATDPN", self.settings.command_timeout) {
            Ok(lines) => lines.into_iter().next().unwrap_or_default(),
            Err(e) => {
                log::warn!("Could not read protocol from {}: {e}", self.path());
                return;
            }
        };
        match ObdProtocol::from_dpn(&dpn) {
            Some(p) if p != ObdProtocol::Auto => {
                self.protocol = p;
                self.format = if self.settings.headers {
                    p.frame_format()
                } else {
                    FrameFormat::Headerless
                };
            }
            _ => {
                log::warn!("Adapter on {} reported no usable protocol ('{dpn}')", self.path());
                return;
            }
        }
        self.status = if reason.is_none() && !lines.is_empty() {
            LinkStatus::CarConnected
        } else {
            LinkStatus::ObdConnected
        };
    }

    /// Sends a command and returns the raw text up to the prompt.
    ///
    /// A fatal channel error marks the session lost, after which every call fails with
    /// [ChannelError::InterfaceNotOpen].
    pub fn send_raw(&mut self, text: &str, timeout: Duration) -> ChannelResult<String> {
        if self.lost {
            return Err(ChannelError::InterfaceNotOpen);
        }
        match exchange(self.channel.as_mut(), text, self.settings.write_timeout, timeout) {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err(e) => {
                if e.is_fatal() {
                    log::warn!("Lost adapter on {}: {e}", self.path());
                    self.lost = true;
                }
                Err(e)
            }
        }
    }

    /// Port path
    pub fn path(&self) -> &str {
        self.channel.port_name()
    }

    /// Baud rate the adapter answered at
    pub fn baud(&self) -> u32 {
        self.baud
    }

    /// Current status
    pub fn status(&self) -> LinkStatus {
        self.status
    }

    /// True if ECUs answered during setup
    pub fn is_car_connected(&self) -> bool {
        self.status == LinkStatus::CarConnected && !self.lost
    }

    /// Bus protocol in use
    pub fn protocol(&self) -> ObdProtocol {
        self.protocol
    }

    /// Layout of response frames
    pub fn frame_format(&self) -> FrameFormat {
        self.format
    }

    /// Adapter identification from `ATZ`
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Settings in use
    pub fn settings(&self) -> &ElmSettings {
        &self.settings
    }

    /// True once the port has failed for good
    pub fn is_lost(&self) -> bool {
        self.lost
    }

    /// Closes the port
    pub fn close(&mut self) -> ChannelResult<()> {
        self.status = LinkStatus::NotConnected;
        self.channel.close()
    }
}

impl ObdQuery for Elm327 {
    fn query(&mut self, cmd: &ObdCommand) -> ObdResponse {
        let response = match self.send_raw(&cmd.request(), self.settings.command_timeout) {
            Ok(raw) => codec::decode_response(&raw, cmd, self.format),
            Err(ChannelError::ReadTimeout) => ObdResponse::null(cmd.name, NullReason::Timeout),
            Err(e) => ObdResponse::null(cmd.name, NullReason::Transport(e.to_string())),
        };
        if let Some(reason) = &response.null_reason {
            log::debug!("{cmd} on {}: {reason}", self.path());
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::simulation::{SimulatedDevice, SimulationOpener};
    use crate::obd2::RPM;

    const PIDS: &str = "7E8 06 41 00 BE 1F A8 13";

    #[test]
    fn finds_baud_and_initialises() {
        let dev = SimulatedDevice::elm327(9600, "A6", PIDS);
        let opener = SimulationOpener::new().with_device("/dev/rfcomm0", dev.clone());
        let elm = Elm327::connect(&opener, "/dev/rfcomm0", ElmSettings::default()).unwrap();

        assert_eq!(elm.baud(), 9600);
        assert_eq!(elm.status(), LinkStatus::CarConnected);
        assert_eq!(elm.protocol(), ObdProtocol::Iso15765_4Can11bit500);
        assert_eq!(elm.frame_format(), FrameFormat::Can11);
        assert_eq!(elm.version(), Some("ELM327 v1.5"));
        // 38400 and 115200 were tried and closed first
        assert_eq!(dev.open_count(), 3);
        assert_eq!(dev.open_handles(), 1);

        let sent: Vec<String> = dev
            .written()
            .iter()
            .map(|w| String::from_utf8_lossy(w).trim_end().to_string())
            .filter(|w| w.starts_with("AT") || w.starts_with("01"))
            .collect();
        assert_eq!(sent, vec!["ATZ", "ATE0", "ATL0", "ATH1", "ATSP0", "ATAT2", "0100", "ATDPN"]);
    }

    #[test]
    fn ignition_off_is_obd_connected() {
        let dev = SimulatedDevice::elm327(38400, "A6", "NO DATA");
        let opener = SimulationOpener::new().with_device("/dev/ttyUSB0", dev);
        let elm = Elm327::connect(&opener, "/dev/ttyUSB0", ElmSettings::default()).unwrap();
        assert_eq!(elm.status(), LinkStatus::ObdConnected);
        assert!(!elm.is_car_connected());
    }

    #[test]
    fn no_bus_is_elm_connected() {
        let dev = SimulatedDevice::elm327(38400, "A0", "SEARCHING...\rUNABLE TO CONNECT");
        let opener = SimulationOpener::new().with_device("/dev/ttyUSB0", dev);
        let elm = Elm327::connect(&opener, "/dev/ttyUSB0", ElmSettings::default()).unwrap();
        assert_eq!(elm.status(), LinkStatus::ElmConnected);
        assert_eq!(elm.protocol(), ObdProtocol::Auto);
    }

    #[test]
    fn silent_port_is_not_an_adapter() {
        let opener = SimulationOpener::new().with_device("/dev/ttyACM0", SimulatedDevice::new());
        let err = Elm327::connect(&opener, "/dev/ttyACM0", ElmSettings::default()).unwrap_err();
        assert!(matches!(err, LinkError::AdapterNotResponding { .. }));
    }

    #[test]
    fn rejected_setup_command_fails_init() {
        let dev = SimulatedDevice::elm327(38400, "A6", PIDS);
        dev.set_response("ATAT2", "?");
        let opener = SimulationOpener::new().with_device("/dev/ttyUSB0", dev);
        let err = Elm327::connect(&opener, "/dev/ttyUSB0", ElmSettings::default()).unwrap_err();
        assert!(matches!(err, LinkError::InitFailed { ref command, .. } if command == "ATAT2"));
    }

    #[test]
    fn query_decodes_and_survives_unplug() {
        let dev = SimulatedDevice::elm327(38400, "A6", PIDS);
        dev.set_response("010C", "7E8 04 41 0C 1A F8");
        let opener = SimulationOpener::new().with_device("/dev/ttyUSB0", dev.clone());
        let mut elm = Elm327::connect(&opener, "/dev/ttyUSB0", ElmSettings::default()).unwrap();

        let rpm = elm.query(&RPM);
        assert_eq!(rpm.value_f64(), Some(1726.0));
        assert_eq!(rpm.ecu_source, Some(0x7E8));

        dev.unplug();
        let gone = elm.query(&RPM);
        assert!(gone.is_null());
        assert!(matches!(gone.null_reason, Some(NullReason::Transport(_))));
        assert!(elm.is_lost());
        assert!(!elm.is_car_connected());
    }
}
