//! Every tunable in one place
//!
//! Each module owns its settings struct and its defaults. [LinkConfig] only gathers them, so an
//! application can load the whole set from one file with the `serde` feature enabled.

use crate::{
    hardware::scanner::ScannerSettings,
    nmea::GpsReaderSettings,
    obd2::enhanced::Mode22ScanSettings,
    poller::PollerSettings,
    probe::{GpsProbeSettings, ObdProbeSettings},
};

/// Settings for discovery, polling and scanning
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct LinkConfig {
    /// Candidate port enumeration
    pub scanner: ScannerSettings,
    /// GPS role probing
    pub gps_probe: GpsProbeSettings,
    /// GPS connection once found
    pub gps_reader: GpsReaderSettings,
    /// OBD role probing, including the adapter setup
    pub obd_probe: ObdProbeSettings,
    /// Telemetry polling
    pub poller: PollerSettings,
    /// Mode 22 scanning
    pub mode22_scan: Mode22ScanSettings,
}
