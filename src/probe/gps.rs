//! GPS receiver probing

use std::{
    collections::HashSet,
    time::{Duration, Instant},
};

use crate::{
    channel::ChannelError,
    hardware::{scanner::SerialCandidate, PortOpener},
    nmea::{classify, decode},
    DeviceRole, LinkResult,
};

use super::{not_found, AttemptOutcome, ProbeAttempt};

/// Settings for [GpsPortProbe]
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct GpsProbeSettings {
    /// Baud rates to listen at. Always tried lowest first
    pub bauds: Vec<u32>,
    /// How long to listen on each port and baud rate
    pub probe_duration: Duration,
    /// Most lines read per attempt, caps the time spent on a port spewing garbage
    pub max_lines: usize,
}

impl Default for GpsProbeSettings {
    fn default() -> Self {
        Self {
            bauds: vec![9600, 115200],
            probe_duration: Duration::from_secs(2),
            max_lines: 64,
        }
    }
}

/// Finds the port a GPS receiver is streaming NMEA on
pub struct GpsPortProbe<'a> {
    opener: &'a dyn PortOpener,
    settings: GpsProbeSettings,
    attempts: Vec<ProbeAttempt>,
}

impl std::fmt::Debug for GpsPortProbe<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpsPortProbe")
            .field("settings", &self.settings)
            .field("attempts", &self.attempts)
            .finish()
    }
}

impl<'a> GpsPortProbe<'a> {
    /// Creates a probe opening ports through `opener`
    pub fn new(opener: &'a dyn PortOpener, settings: GpsProbeSettings) -> Self {
        Self {
            opener,
            settings,
            attempts: Vec::new(),
        }
    }

    /// Attempts made by the last search
    pub fn attempts(&self) -> &[ProbeAttempt] {
        &self.attempts
    }

    /// Listens on each candidate at each baud rate (lowest first) and returns the first
    /// `(path, baud)` where a valid RMC or VTG sentence arrives within `probe_duration`.
    ///
    /// Each port is closed again before the next one is opened.
    pub fn find(&mut self, candidates: &[SerialCandidate], bauds: &[u32], probe_duration: Duration) -> Option<(String, u32)> {
        self.attempts.clear();
        let mut bauds = bauds.to_vec();
        bauds.sort_unstable();
        bauds.dedup();

        let mut probed = HashSet::new();
        for candidate in candidates {
            if !probed.insert(candidate.resolved_path()) {
                log::debug!("Skipping {}, already probed under another name", candidate.path);
                continue;
            }
            for &baud in &bauds {
                let outcome = self.listen(&candidate.path, baud, probe_duration);
                log::debug!("GPS probe {}@{baud}: {outcome}", candidate.path);
                let accepted = outcome == AttemptOutcome::Accepted;
                self.attempts.push(ProbeAttempt {
                    role: DeviceRole::Gps,
                    path: candidate.path.clone(),
                    baud: Some(baud),
                    autoscan: false,
                    outcome,
                });
                if accepted {
                    return Some((candidate.path.clone(), baud));
                }
            }
        }
        None
    }

    /// Like [GpsPortProbe::find] with the configured baud rates and duration, failing with
    /// [crate::LinkError::DeviceNotFound] when nothing answers
    pub fn locate(&mut self, candidates: &[SerialCandidate]) -> LinkResult<(String, u32)> {
        let bauds = self.settings.bauds.clone();
        let duration = self.settings.probe_duration;
        self.find(candidates, &bauds, duration)
            .ok_or_else(|| not_found(DeviceRole::Gps, &self.attempts))
    }

    fn listen(&self, path: &str, baud: u32, duration: Duration) -> AttemptOutcome {
        let mut channel = match self.opener.open(path, baud) {
            Ok(c) => c,
            Err(ChannelError::OpenFailed { reason, .. }) => return AttemptOutcome::OpenFailed(reason),
            Err(e) => return AttemptOutcome::OpenFailed(e.to_string()),
        };
        let deadline = Instant::now() + duration;
        let mut outcome = AttemptOutcome::NoNmea;
        for _ in 0..self.settings.max_lines {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match channel.read_line(remaining) {
                Ok(line) if classify(&line) && decode(&line).valid => {
                    outcome = AttemptOutcome::Accepted;
                    break;
                }
                Ok(_) | Err(ChannelError::BufferFull) => {}
                Err(ChannelError::ReadTimeout) => break,
                Err(e) => {
                    outcome = AttemptOutcome::Transport(e.to_string());
                    break;
                }
            }
        }
        if let Err(e) = channel.close() {
            log::debug!("Closing {path} failed: {e}");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{
        scanner::CandidateOrigin,
        simulation::{SimulatedDevice, SimulationOpener},
    };

    const RMC: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";

    fn kernel(path: &str) -> SerialCandidate {
        SerialCandidate::new(path, CandidateOrigin::KernelName)
    }

    #[test]
    fn lowest_baud_first_and_ports_released() {
        let dev = SimulatedDevice::gps(115200, &[RMC]);
        let opener = SimulationOpener::new().with_device("/dev/ttyACM0", dev.clone());
        let mut probe = GpsPortProbe::new(&opener, GpsProbeSettings::default());

        let found = probe.find(&[kernel("/dev/ttyACM0")], &[115200, 9600], Duration::from_millis(200));
        assert_eq!(found, Some(("/dev/ttyACM0".to_string(), 115200)));
        let bauds: Vec<Option<u32>> = probe.attempts().iter().map(|a| a.baud).collect();
        assert_eq!(bauds, vec![Some(9600), Some(115200)]);
        assert_eq!(probe.attempts()[0].outcome, AttemptOutcome::NoNmea);
        assert_eq!(dev.open_handles(), 0);
        assert_eq!(dev.open_count(), 2);
    }

    #[test]
    fn corrupt_sentences_are_not_enough() {
        let bad = RMC.replace("*6A", "*6B");
        let dev = SimulatedDevice::gps(9600, &[&bad, "$GPGGA,123519,4807.038,N*47"]);
        let opener = SimulationOpener::new().with_device("/dev/ttyUSB0", dev);
        let mut probe = GpsPortProbe::new(&opener, GpsProbeSettings::default());
        let err = probe.locate(&[kernel("/dev/ttyUSB0")]).unwrap_err();
        assert!(matches!(err, crate::LinkError::DeviceNotFound { role: DeviceRole::Gps, .. }));
        assert_eq!(probe.attempts().len(), 2);
    }
}
