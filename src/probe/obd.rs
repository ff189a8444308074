//! OBD adapter probing
//!
//! A candidate is accepted when the adapter reaches the vehicle bus and an RPM request comes
//! back with data. When no candidate passes, the autoscan fallback tries the usual adapter
//! paths plus every port the OS reports and takes the first adapter that reaches the bus,
//! RPM or not.

use std::{collections::HashSet, path::PathBuf, time::Duration};

use crate::{
    hardware::{
        scanner::{resolve_path, SerialCandidate},
        PortOpener,
    },
    obd2::{
        elm327::{Elm327, ElmSettings},
        ObdQuery, RPM,
    },
    DeviceRole, LinkResult,
};

use super::{not_found, AttemptOutcome, ProbeAttempt};

/// Settings for [ObdPortProbe]
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct ObdProbeSettings {
    /// Adapter settings used for every attempt
    pub elm: ElmSettings,
    /// Fall back to autoscan when no candidate is accepted
    pub autoscan: bool,
    /// Paths autoscan always tries
    pub autoscan_paths: Vec<String>,
    /// Also try every port the OS serial API reports during autoscan
    pub autoscan_enumerate: bool,
}

impl Default for ObdProbeSettings {
    fn default() -> Self {
        Self {
            elm: ElmSettings::default(),
            autoscan: true,
            autoscan_paths: vec![
                "/dev/rfcomm0".into(),
                "/dev/ttyUSB0".into(),
                "/dev/ttyUSB1".into(),
                "/dev/ttyACM0".into(),
            ],
            autoscan_enumerate: true,
        }
    }
}

/// Finds the port an ELM327 adapter is on
pub struct ObdPortProbe<'a> {
    opener: &'a dyn PortOpener,
    settings: ObdProbeSettings,
    excluded: Vec<PathBuf>,
    attempts: Vec<ProbeAttempt>,
}

impl std::fmt::Debug for ObdPortProbe<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObdPortProbe")
            .field("settings", &self.settings)
            .field("excluded", &self.excluded)
            .field("attempts", &self.attempts)
            .finish()
    }
}

impl<'a> ObdPortProbe<'a> {
    /// Creates a probe opening ports through `opener`
    pub fn new(opener: &'a dyn PortOpener, settings: ObdProbeSettings) -> Self {
        Self {
            opener,
            settings,
            excluded: Vec::new(),
            attempts: Vec::new(),
        }
    }

    /// Never touch these paths, or anything they resolve to
    pub fn excluding<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        self.excluded
            .extend(paths.into_iter().map(|p| resolve_path(p.as_ref())));
        self
    }

    /// Attempts made by the last search
    pub fn attempts(&self) -> &[ProbeAttempt] {
        &self.attempts
    }

    /// Tries each candidate, then autoscan if enabled. `timeout` bounds each adapter command.
    pub fn find(&mut self, candidates: &[SerialCandidate], timeout: Duration) -> Option<Elm327> {
        self.attempts.clear();
        let mut elm_settings = self.settings.elm.clone();
        elm_settings.command_timeout = timeout;

        let mut probed = HashSet::new();
        for candidate in candidates {
            let resolved = candidate.resolved_path();
            if self.excluded.contains(&resolved) {
                self.record(&candidate.path, None, false, AttemptOutcome::Excluded);
                continue;
            }
            if !probed.insert(resolved) {
                log::debug!("Skipping {}, already probed under another name", candidate.path);
                continue;
            }
            if let Some(elm) = self.try_port(&candidate.path, &elm_settings, false) {
                return Some(elm);
            }
        }

        if self.settings.autoscan {
            log::info!("No candidate answered with live data, falling back to autoscan");
            return self.autoscan(&elm_settings);
        }
        None
    }

    /// Like [ObdPortProbe::find] with the configured command timeout, failing with
    /// [crate::LinkError::DeviceNotFound] when no adapter is accepted
    pub fn locate(&mut self, candidates: &[SerialCandidate]) -> LinkResult<Elm327> {
        let timeout = self.settings.elm.command_timeout;
        self.find(candidates, timeout)
            .ok_or_else(|| not_found(DeviceRole::Obd, &self.attempts))
    }

    fn autoscan(&mut self, elm_settings: &ElmSettings) -> Option<Elm327> {
        let mut paths = self.settings.autoscan_paths.clone();
        if self.settings.autoscan_enumerate {
            paths.extend(system_ports());
        }
        let mut probed = HashSet::new();
        for path in paths {
            let resolved = resolve_path(&path);
            if self.excluded.contains(&resolved) || !probed.insert(resolved) {
                continue;
            }
            if let Some(elm) = self.try_port(&path, elm_settings, true) {
                return Some(elm);
            }
        }
        None
    }

    fn try_port(&mut self, path: &str, elm_settings: &ElmSettings, autoscan: bool) -> Option<Elm327> {
        let mut elm = match Elm327::connect(self.opener, path, elm_settings.clone()) {
            Ok(elm) => elm,
            Err(e) => {
                self.record(path, None, autoscan, AttemptOutcome::from_link_error(&e));
                return None;
            }
        };
        let baud = Some(elm.baud());
        if !elm.is_car_connected() {
            self.record(path, baud, autoscan, AttemptOutcome::NoVehicle(elm.status()));
            release(elm);
            return None;
        }
        if !autoscan {
            let rpm = elm.query(&RPM);
            if rpm.is_null() {
                let reason = rpm.null_reason.map(|r| r.to_string()).unwrap_or_default();
                self.record(path, baud, autoscan, AttemptOutcome::NoRpm(reason));
                release(elm);
                return None;
            }
        }
        self.record(path, baud, autoscan, AttemptOutcome::Accepted);
        Some(elm)
    }

    fn record(&mut self, path: &str, baud: Option<u32>, autoscan: bool, outcome: AttemptOutcome) {
        let attempt = ProbeAttempt {
            role: DeviceRole::Obd,
            path: path.to_string(),
            baud,
            autoscan,
            outcome,
        };
        log::debug!("OBD probe {attempt}");
        self.attempts.push(attempt);
    }
}

fn release(mut elm: Elm327) {
    if let Err(e) = elm.close() {
        log::debug!("Closing {} failed: {e}", elm.path());
    }
}

#[cfg(feature = "serial")]
fn system_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            log::debug!("Serial port enumeration failed: {e}");
            Vec::new()
        }
    }
}

#[cfg(not(feature = "serial"))]
fn system_ports() -> Vec<String> {
    Vec::new()
}
