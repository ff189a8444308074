//! Supported PID / MID discovery
//!
//! `0100`, `0120` and `0140` (and `0600`..`06A0` for on-board monitors) answer with a 32 bit
//! map. Bit `i`, counted from the MSB of the first data byte, says whether PID `base + i + 1`
//! is supported. Names are looked up in a 32 entry catalog per query.

use super::{
    ObdCommand, ObdQuery, MIDS_A, MIDS_B, MIDS_C, MIDS_D, MIDS_E, MIDS_F, PIDS_A, PIDS_B, PIDS_C,
};

/// Mode 01 PIDs 01-20
pub const PIDS_A_NAMES: [&str; 32] = [
    "STATUS",
    "FREEZE_DTC",
    "FUEL_STATUS",
    "ENGINE_LOAD",
    "COOLANT_TEMP",
    "SHORT_FUEL_TRIM_1",
    "LONG_FUEL_TRIM_1",
    "SHORT_FUEL_TRIM_2",
    "LONG_FUEL_TRIM_2",
    "FUEL_PRESSURE",
    "INTAKE_PRESSURE",
    "RPM",
    "SPEED",
    "TIMING_ADVANCE",
    "INTAKE_TEMP",
    "MAF",
    "THROTTLE_POS",
    "AIR_STATUS",
    "O2_SENSORS",
    "O2_B1S1",
    "O2_B1S2",
    "O2_B1S3",
    "O2_B1S4",
    "O2_B2S1",
    "O2_B2S2",
    "O2_B2S3",
    "O2_B2S4",
    "OBD_COMPLIANCE",
    "O2_SENSORS_ALT",
    "AUX_INPUT_STATUS",
    "RUN_TIME",
    "PIDS_B",
];

/// Mode 01 PIDs 21-40
pub const PIDS_B_NAMES: [&str; 32] = [
    "DISTANCE_W_MIL",
    "FUEL_RAIL_PRESSURE_VAC",
    "FUEL_RAIL_PRESSURE_DIRECT",
    "O2_S1_WR_VOLTAGE",
    "O2_S2_WR_VOLTAGE",
    "O2_S3_WR_VOLTAGE",
    "O2_S4_WR_VOLTAGE",
    "O2_S5_WR_VOLTAGE",
    "O2_S6_WR_VOLTAGE",
    "O2_S7_WR_VOLTAGE",
    "O2_S8_WR_VOLTAGE",
    "COMMANDED_EGR",
    "EGR_ERROR",
    "EVAPORATIVE_PURGE",
    "FUEL_LEVEL",
    "WARMUPS_SINCE_DTC_CLEAR",
    "DISTANCE_SINCE_DTC_CLEAR",
    "EVAP_VAPOR_PRESSURE",
    "BAROMETRIC_PRESSURE",
    "O2_S1_WR_CURRENT",
    "O2_S2_WR_CURRENT",
    "O2_S3_WR_CURRENT",
    "O2_S4_WR_CURRENT",
    "O2_S5_WR_CURRENT",
    "O2_S6_WR_CURRENT",
    "O2_S7_WR_CURRENT",
    "O2_S8_WR_CURRENT",
    "CATALYST_TEMP_B1S1",
    "CATALYST_TEMP_B2S1",
    "CATALYST_TEMP_B1S2",
    "CATALYST_TEMP_B2S2",
    "PIDS_C",
];

/// Mode 01 PIDs 41-60
pub const PIDS_C_NAMES: [&str; 32] = [
    "STATUS_DRIVE_CYCLE",
    "CONTROL_MODULE_VOLTAGE",
    "ABSOLUTE_LOAD",
    "COMMANDED_EQUIV_RATIO",
    "RELATIVE_THROTTLE_POS",
    "AMBIENT_AIR_TEMP",
    "THROTTLE_POS_B",
    "THROTTLE_POS_C",
    "ACCELERATOR_POS_D",
    "ACCELERATOR_POS_E",
    "ACCELERATOR_POS_F",
    "THROTTLE_ACTUATOR",
    "RUN_TIME_MIL",
    "TIME_SINCE_DTC_CLEARED",
    "MAX_VALUES",
    "MAX_MAF",
    "FUEL_TYPE",
    "ETHANOL_PERCENT",
    "EVAP_VAPOR_PRESSURE_ABS",
    "EVAP_VAPOR_PRESSURE_ALT",
    "SHORT_O2_TRIM_B1",
    "LONG_O2_TRIM_B1",
    "SHORT_O2_TRIM_B2",
    "LONG_O2_TRIM_B2",
    "FUEL_RAIL_PRESSURE_ABS",
    "RELATIVE_ACCEL_POS",
    "HYBRID_BATTERY_REMAINING",
    "OIL_TEMP",
    "FUEL_INJECT_TIMING",
    "FUEL_RATE",
    "EMISSION_REQ",
    "PIDS_D",
];

const R: &str = "RESERVED";

/// Mode 06 MIDs 01-20
pub const MIDS_A_NAMES: [&str; 32] = [
    "MONITOR_O2_B1S1",
    "MONITOR_O2_B1S2",
    "MONITOR_O2_B1S3",
    "MONITOR_O2_B1S4",
    "MONITOR_O2_B2S1",
    "MONITOR_O2_B2S2",
    "MONITOR_O2_B2S3",
    "MONITOR_O2_B2S4",
    "MONITOR_O2_B3S1",
    "MONITOR_O2_B3S2",
    "MONITOR_O2_B3S3",
    "MONITOR_O2_B3S4",
    "MONITOR_O2_B4S1",
    "MONITOR_O2_B4S2",
    "MONITOR_O2_B4S3",
    "MONITOR_O2_B4S4",
    R, R, R, R, R, R, R, R, R, R, R, R, R, R, R,
    "MIDS_B",
];

/// Mode 06 MIDs 21-40
pub const MIDS_B_NAMES: [&str; 32] = [
    "MONITOR_CATALYST_B1",
    "MONITOR_CATALYST_B2",
    "MONITOR_CATALYST_B3",
    "MONITOR_CATALYST_B4",
    R, R, R, R, R, R, R, R, R, R, R, R,
    "MONITOR_EGR_B1",
    "MONITOR_EGR_B2",
    "MONITOR_EGR_B3",
    "MONITOR_EGR_B4",
    "MONITOR_VVT_B1",
    "MONITOR_VVT_B2",
    "MONITOR_VVT_B3",
    "MONITOR_VVT_B4",
    "MONITOR_EVAP_150",
    "MONITOR_EVAP_090",
    "MONITOR_EVAP_040",
    "MONITOR_EVAP_020",
    "MONITOR_PURGE_FLOW",
    R, R,
    "MIDS_C",
];

/// Mode 06 MIDs 41-60
pub const MIDS_C_NAMES: [&str; 32] = [
    "MONITOR_O2_HEATER_B1S1",
    "MONITOR_O2_HEATER_B1S2",
    "MONITOR_O2_HEATER_B1S3",
    "MONITOR_O2_HEATER_B1S4",
    "MONITOR_O2_HEATER_B2S1",
    "MONITOR_O2_HEATER_B2S2",
    "MONITOR_O2_HEATER_B2S3",
    "MONITOR_O2_HEATER_B2S4",
    "MONITOR_O2_HEATER_B3S1",
    "MONITOR_O2_HEATER_B3S2",
    "MONITOR_O2_HEATER_B3S3",
    "MONITOR_O2_HEATER_B3S4",
    "MONITOR_O2_HEATER_B4S1",
    "MONITOR_O2_HEATER_B4S2",
    "MONITOR_O2_HEATER_B4S3",
    "MONITOR_O2_HEATER_B4S4",
    R, R, R, R, R, R, R, R, R, R, R, R, R, R, R,
    "MIDS_D",
];

/// Mode 06 MIDs 61-80
pub const MIDS_D_NAMES: [&str; 32] = [
    "MONITOR_HEATED_CATALYST_B1",
    "MONITOR_HEATED_CATALYST_B2",
    "MONITOR_HEATED_CATALYST_B3",
    "MONITOR_HEATED_CATALYST_B4",
    R, R, R, R, R, R, R, R, R, R, R, R,
    "MONITOR_SECONDARY_AIR_1",
    "MONITOR_SECONDARY_AIR_2",
    "MONITOR_SECONDARY_AIR_3",
    "MONITOR_SECONDARY_AIR_4",
    R, R, R, R, R, R, R, R, R, R, R,
    "MIDS_E",
];

/// Mode 06 MIDs 81-A0
pub const MIDS_E_NAMES: [&str; 32] = [
    "MONITOR_FUEL_SYSTEM_B1",
    "MONITOR_FUEL_SYSTEM_B2",
    "MONITOR_FUEL_SYSTEM_B3",
    "MONITOR_FUEL_SYSTEM_B4",
    "MONITOR_BOOST_PRESSURE_B1",
    "MONITOR_BOOST_PRESSURE_B2",
    R, R, R, R, R, R, R, R, R,
    "MONITOR_NOX_ABSORBER_B1",
    "MONITOR_NOX_ABSORBER_B2",
    R, R, R, R, R, R,
    "MONITOR_NOX_CATALYST_B1",
    "MONITOR_NOX_CATALYST_B2",
    R, R, R, R, R, R,
    "MIDS_F",
];

/// Mode 06 MIDs A1-C0
pub const MIDS_F_NAMES: [&str; 32] = [
    "MONITOR_MISFIRE_GENERAL",
    "MONITOR_MISFIRE_CYLINDER_1",
    "MONITOR_MISFIRE_CYLINDER_2",
    "MONITOR_MISFIRE_CYLINDER_3",
    "MONITOR_MISFIRE_CYLINDER_4",
    "MONITOR_MISFIRE_CYLINDER_5",
    "MONITOR_MISFIRE_CYLINDER_6",
    "MONITOR_MISFIRE_CYLINDER_7",
    "MONITOR_MISFIRE_CYLINDER_8",
    "MONITOR_MISFIRE_CYLINDER_9",
    "MONITOR_MISFIRE_CYLINDER_10",
    "MONITOR_MISFIRE_CYLINDER_11",
    "MONITOR_MISFIRE_CYLINDER_12",
    R, R,
    "MONITOR_PM_FILTER_B1",
    "MONITOR_PM_FILTER_B2",
    R, R, R, R, R, R, R, R, R, R, R, R, R, R,
    "MIDS_G",
];

/// A bitmap command and the names of the PIDs it covers
#[derive(Debug, Clone, Copy)]
pub struct CapabilityQuery {
    /// Bitmap command
    pub command: ObdCommand,
    /// Names of PID `base + 1` onwards
    pub catalog: &'static [&'static str],
}

impl CapabilityQuery {
    /// Creates a query
    pub const fn new(command: ObdCommand, catalog: &'static [&'static str]) -> Self {
        Self { command, catalog }
    }
}

/// Mode 01 and Mode 06 bitmap queries, in request order
pub const DEFAULT_QUERIES: [CapabilityQuery; 9] = [
    CapabilityQuery::new(PIDS_A, &PIDS_A_NAMES),
    CapabilityQuery::new(PIDS_B, &PIDS_B_NAMES),
    CapabilityQuery::new(PIDS_C, &PIDS_C_NAMES),
    CapabilityQuery::new(MIDS_A, &MIDS_A_NAMES),
    CapabilityQuery::new(MIDS_B, &MIDS_B_NAMES),
    CapabilityQuery::new(MIDS_C, &MIDS_C_NAMES),
    CapabilityQuery::new(MIDS_D, &MIDS_D_NAMES),
    CapabilityQuery::new(MIDS_E, &MIDS_E_NAMES),
    CapabilityQuery::new(MIDS_F, &MIDS_F_NAMES),
];

/// What one bitmap query reported
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityBitmap {
    /// Bitmap command that was sent
    pub command: ObdCommand,
    /// Raw bits, MSB first. Empty if the query failed
    pub bits: Vec<bool>,
    /// Catalog names of the set bits
    pub supported: Vec<&'static str>,
    /// Set bits with no catalog entry (0 based)
    pub beyond_catalog: Vec<usize>,
}

impl CapabilityBitmap {
    /// Builds a bitmap from decoded bits
    pub fn from_bits(command: ObdCommand, bits: Vec<bool>, catalog: &[&'static str]) -> Self {
        let (supported, beyond_catalog) = match_supported(&bits, catalog);
        Self {
            command,
            bits,
            supported,
            beyond_catalog,
        }
    }

    /// True if the query was answered
    pub fn responded(&self) -> bool {
        !self.bits.is_empty()
    }

    /// True if `name` is among the supported entries
    pub fn supports(&self, name: &str) -> bool {
        self.supported.contains(&name)
    }

    /// `0`/`1` string of the bits
    pub fn bit_string(&self) -> String {
        self.bits.iter().map(|b| if *b { '1' } else { '0' }).collect()
    }
}

/// Maps set bits to catalog names. Bit `i` names `catalog[i]`; set bits past the end of the
/// catalog are returned separately.
pub fn match_supported(bits: &[bool], catalog: &[&'static str]) -> (Vec<&'static str>, Vec<usize>) {
    let mut supported = Vec::new();
    let mut beyond = Vec::new();
    for (i, _) in bits.iter().enumerate().filter(|(_, set)| **set) {
        match catalog.get(i) {
            Some(name) => supported.push(*name),
            None => beyond.push(i),
        }
    }
    (supported, beyond)
}

/// One shot scan of the supported PID bitmaps
#[derive(Debug, Clone)]
pub struct PidCapabilityScanner {
    queries: Vec<CapabilityQuery>,
}

impl Default for PidCapabilityScanner {
    fn default() -> Self {
        Self::new(DEFAULT_QUERIES.to_vec())
    }
}

impl PidCapabilityScanner {
    /// Scanner over a custom set of queries
    pub fn new(queries: Vec<CapabilityQuery>) -> Self {
        Self { queries }
    }

    /// Queries in request order
    pub fn queries(&self) -> &[CapabilityQuery] {
        &self.queries
    }

    /// Sends every bitmap query and logs the supported entries.
    ///
    /// A query that fails yields a bitmap with no bits, the scan carries on.
    pub fn scan<Q: ObdQuery + ?Sized>(&self, link: &mut Q) -> Vec<CapabilityBitmap> {
        let mut out = Vec::with_capacity(self.queries.len());
        for q in &self.queries {
            let resp = link.query(&q.command);
            let bits = match resp.value.as_ref().and_then(|v| v.as_bits()) {
                Some(bits) => bits.to_vec(),
                None => {
                    match &resp.null_reason {
                        Some(reason) => log::warn!("Supported PID query {} returned nothing: {reason}", q.command),
                        None => log::warn!("Supported PID query {} returned no bitmap", q.command),
                    }
                    Vec::new()
                }
            };
            let bitmap = CapabilityBitmap::from_bits(q.command, bits, q.catalog);
            if bitmap.responded() {
                log::info!("{}: {}", q.command.name, bitmap.bit_string());
                for name in &bitmap.supported {
                    log::info!("  {} supports {name}", q.command.name);
                }
                for i in &bitmap.beyond_catalog {
                    log::debug!("  {} bit {:02X} has no catalog entry", q.command.name, i + 1);
                }
            }
            out.push(bitmap);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obd2::{decode_pid_response, NullReason, ObdResponse, ObdValue};

    struct Scripted(Vec<ObdResponse>);

    impl ObdQuery for Scripted {
        fn query(&mut self, cmd: &ObdCommand) -> ObdResponse {
            if self.0.is_empty() {
                return ObdResponse::null(cmd.name, NullReason::NoData);
            }
            self.0.remove(0)
        }
    }

    fn bitmap_response(name: &'static str, bitmap: &[u8]) -> ObdResponse {
        ObdResponse {
            command: name,
            raw_bytes: [&[0x41, 0x00], bitmap].concat(),
            ecu_source: Some(0x7E8),
            value: Some(ObdValue::Bitfield(decode_pid_response(bitmap))),
            null_reason: None,
        }
    }

    #[test]
    fn catalogs_are_full_width() {
        for q in DEFAULT_QUERIES {
            assert_eq!(q.catalog.len(), 32, "{}", q.command);
        }
        // Last entry of every catalog is the next bitmap
        assert_eq!(PIDS_A_NAMES[31], "PIDS_B");
        assert_eq!(PIDS_B_NAMES[31], "PIDS_C");
        assert_eq!(MIDS_B_NAMES[16], "MONITOR_EGR_B1"); // MID 0x31
        assert_eq!(MIDS_B_NAMES[24], "MONITOR_EVAP_150"); // MID 0x39
        assert_eq!(MIDS_F_NAMES[31], "MIDS_G");
    }

    #[test]
    fn first_and_third_bit() {
        let bits = decode_pid_response(&[0b1010_0000]);
        let catalog = ["A", "B", "C", "D"];
        let (names, beyond) = match_supported(&bits, &catalog);
        assert_eq!(names, vec!["A", "C"]);
        assert!(beyond.is_empty());
    }

    #[test]
    fn bits_beyond_catalog_are_kept_aside() {
        let bits = decode_pid_response(&[0b0000_0001]);
        let (names, beyond) = match_supported(&bits, &["A", "B"]);
        assert!(names.is_empty());
        assert_eq!(beyond, vec![7]);
    }

    #[test]
    fn scan_tolerates_missing_bitmaps() {
        let mut link = Scripted(vec![bitmap_response("PIDS_A", &[0xBE, 0x1F, 0xA8, 0x13])]);
        let scanner = PidCapabilityScanner::default();
        let maps = scanner.scan(&mut link);
        assert_eq!(maps.len(), 9);

        let pids_a = &maps[0];
        assert_eq!(pids_a.bit_string(), "10111110000111111010100000010011");
        assert!(pids_a.supports("RPM"));
        assert!(pids_a.supports("SPEED"));
        assert!(!pids_a.supports("FREEZE_DTC"));
        assert!(pids_a.supports("PIDS_B"));

        assert!(maps[0].responded());
        assert!(maps[1..].iter().all(|m| !m.responded() && m.supported.is_empty()));
    }
}
