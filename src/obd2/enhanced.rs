//! Vendor specific Mode 22 PIDs
//!
//! Mode 22 requests are `22` followed by a 16 bit PID, a positive reply is `62`, the PID echo,
//! then data. Which PIDs exist differs per manufacturer, so there is also a [Mode22Scanner]
//! that walks a list or range of PIDs and reports the ones that answer.

use std::{ops::RangeInclusive, thread, time::Duration};

use super::{
    clamp_floor, codec, elm327::Elm327, DecodeError, DecodeResult, ObdCommand, ObdValue, Unit,
};

/// Service id of a Mode 22 request
pub const MODE22: u8 = 0x22;
/// Service id of a positive Mode 22 response
pub const MODE22_POSITIVE: u8 = 0x62;

/// PIDs worth probing first on GM vehicles
pub const GM_CANDIDATE_PIDS: [u16; 18] = [
    0x115C, 0x11A6, 0x11A7, 0x11A8, 0x1A00, 0x1A01, 0x1A02, 0x1940, 0x1941, 0x1942, 0x2000, 0x2001, 0x10A6,
    0x10A7, 0x1460, 0x1461, 0x2F00, 0x2F01,
];

/// GM enhanced PID ranges
pub const GM_ENHANCED_RANGES: [RangeInclusive<u16>; 3] = [0x1100..=0x11FF, 0x1900..=0x19FF, 0x1A00..=0x1AFF];

/// `22XXXX` request text for a PID
pub fn mode22_request(pid: u16) -> String {
    format!("{MODE22:02X}{pid:04X}")
}

/// Data byte of a well formed reply: `62`, the PID echo, then the byte
pub fn header_data_byte(message: &[u8], pid: u16) -> Option<u8> {
    match message {
        [MODE22_POSITIVE, hi, lo, data, ..] if u16::from_be_bytes([*hi, *lo]) == pid => Some(*data),
        _ => None,
    }
}

/// Data byte of a single byte Mode 22 reply. Uses the byte after the header when the header
/// matches, otherwise the last byte of the payload.
pub fn mode22_data_byte(message: &[u8], pid: u16) -> Option<u8> {
    header_data_byte(message, pid).or_else(|| message.last().copied())
}

/// GM engine oil pressure, `A × 0.65 − 17.5` psi, never below zero
pub fn gm_oil_pressure_psi(a: u8) -> f64 {
    clamp_floor(a as f64 * 0.65 - 17.5, 0.0)
}

fn decode_gm_oil_pressure(message: &[u8]) -> DecodeResult<ObdValue> {
    let a = mode22_data_byte(message, 0x115C).ok_or(DecodeError::Empty)?;
    Ok(ObdValue::quantity(gm_oil_pressure_psi(a), Unit::Psi))
}

/// GM engine oil pressure (psi)
pub const GM_OIL_PRESSURE: ObdCommand = ObdCommand {
    name: "GM_OIL_PRESSURE",
    desc: "GM Enhanced Oil Pressure (psi) via Mode 22 PID 115C",
    mode: MODE22,
    pid: &[0x11, 0x5C],
    expected_response_len: 4,
    lenient_header: true,
    decoder: decode_gm_oil_pressure,
};

/// Settings for [Mode22Scanner]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct Mode22ScanSettings {
    /// Pause between probes, so slow ECUs are not flooded
    pub inter_probe_delay: Duration,
    /// Time to wait for each reply
    pub response_timeout: Duration,
}

impl Default for Mode22ScanSettings {
    fn default() -> Self {
        Self {
            inter_probe_delay: Duration::from_millis(10),
            response_timeout: Duration::from_millis(1200),
        }
    }
}

/// A PID that answered positively
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mode22Hit {
    /// PID probed
    pub pid: u16,
    /// Raw adapter reply, prompt and blank lines removed
    pub response: String,
}

/// Probes Mode 22 PIDs one after another
#[derive(Debug)]
pub struct Mode22Scanner<'a> {
    link: &'a mut Elm327,
    settings: Mode22ScanSettings,
}

impl<'a> Mode22Scanner<'a> {
    /// Creates a scanner on an initialised adapter
    pub fn new(link: &'a mut Elm327, settings: Mode22ScanSettings) -> Self {
        Self { link, settings }
    }

    /// Probes a single PID. Returns `None` on anything but a positive reply.
    pub fn probe(&mut self, pid: u16) -> Option<Mode22Hit> {
        let request = mode22_request(pid);
        let raw = match self.link.send_raw(&request, self.settings.response_timeout) {
            Ok(r) => r,
            Err(e) => {
                log::debug!("{request}: {e}");
                return None;
            }
        };
        if codec::is_positive_mode22(&raw, &request, self.link.frame_format()) {
            let response = codec::clean_lines(&raw, Some(&request)).join(" | ");
            log::info!("Hit {request}: {response}");
            Some(Mode22Hit { pid, response })
        } else {
            log::debug!("{request}: {}", raw.trim_end_matches(['\r', '\n', '>']).trim());
            None
        }
    }

    /// Probes each PID in order and returns every hit
    pub fn scan_candidates(&mut self, pids: &[u16]) -> Vec<Mode22Hit> {
        self.scan(pids.iter().copied())
    }

    /// Probes every PID in a range and returns every hit
    pub fn scan_range(&mut self, range: RangeInclusive<u16>) -> Vec<Mode22Hit> {
        self.scan(range)
    }

    fn scan(&mut self, pids: impl Iterator<Item = u16>) -> Vec<Mode22Hit> {
        let mut hits = Vec::new();
        for pid in pids {
            if self.link.is_lost() {
                log::warn!("Adapter lost, stopping scan before {}", mode22_request(pid));
                break;
            }
            if let Some(hit) = self.probe(pid) {
                hits.push(hit);
            }
            if !self.settings.inter_probe_delay.is_zero() {
                thread::sleep(self.settings.inter_probe_delay);
            }
        }
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::simulation::{SimulatedDevice, SimulationOpener};
    use crate::obd2::elm327::ElmSettings;

    #[test]
    fn oil_pressure_formula() {
        let v = GM_OIL_PRESSURE.decode(&[0x62, 0x11, 0x5C, 0x50]).unwrap();
        assert!((v.as_f64().unwrap() - 34.5).abs() < 1e-9);
        // Below 27 the formula goes negative
        assert_eq!(gm_oil_pressure_psi(0x00), 0.0);
        assert_eq!(gm_oil_pressure_psi(0x1A), 0.0);
        assert!((gm_oil_pressure_psi(0xFF) - 148.25).abs() < 1e-9);
    }

    #[test]
    fn header_and_last_byte_rules_agree() {
        let message = [0x62, 0x11, 0x5C, 0x50];
        assert_eq!(header_data_byte(&message, 0x115C), Some(0x50));
        assert_eq!(message.last().copied(), Some(0x50));
        assert_eq!(mode22_data_byte(&message, 0x115C), Some(0x50));

        // Mismatched echo falls back to the last byte
        assert_eq!(header_data_byte(&[0x62, 0x11, 0x5D, 0x00, 0x44], 0x115C), None);
        assert_eq!(mode22_data_byte(&[0x62, 0x11, 0x5D, 0x00, 0x44], 0x115C), Some(0x44));
        assert_eq!(mode22_data_byte(&[], 0x115C), None);
    }

    #[test]
    fn request_text() {
        assert_eq!(mode22_request(0x115C), "22115C");
        assert_eq!(mode22_request(0x0A), "22000A");
    }

    #[test]
    fn scanner_reports_positive_replies_only() {
        let dev = SimulatedDevice::elm327(38400, "A6", "7E8 06 41 00 BE 1F A8 13");
        dev.set_response("22115C", "7E8 04 62 11 5C 50");
        dev.set_response("2211A6", "7E8 03 7F 22 31");
        dev.set_response("221A01", "7E8 05 62 1A 01 00 2C");
        let opener = SimulationOpener::new().with_device("/dev/ttyUSB0", dev.clone());
        let mut elm = Elm327::connect(&opener, "/dev/ttyUSB0", ElmSettings::default()).unwrap();

        let settings = Mode22ScanSettings {
            inter_probe_delay: Duration::ZERO,
            ..Default::default()
        };
        let mut scanner = Mode22Scanner::new(&mut elm, settings);
        let hits = scanner.scan_candidates(&GM_CANDIDATE_PIDS);
        let pids: Vec<u16> = hits.iter().map(|h| h.pid).collect();
        assert_eq!(pids, vec![0x115C, 0x1A01]);
        assert_eq!(hits[0].response, "7E8 04 62 11 5C 50");

        let hits = scanner.scan_range(0x1A00..=0x1A03);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].pid, 0x1A01);
    }
}
