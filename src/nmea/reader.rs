//! GPS role connection

use std::time::{Duration, Instant};

use crate::{
    channel::{ChannelError, ChannelResult, LineChannel},
    hardware::PortOpener,
};

use super::{classify, decode, update_rate_command, NmeaFix};

/// Settings for [GpsSpeedReader]
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct GpsReaderSettings {
    /// Longest time a single [GpsSpeedReader::poll] spends reading
    pub poll_window: Duration,
    /// Most lines consumed by a single poll
    pub max_lines_per_poll: usize,
    /// Fix interval to request from the receiver once connected, in milliseconds
    pub update_rate_ms: Option<u32>,
    /// Write timeout for configuration commands
    pub write_timeout: Duration,
}

impl Default for GpsReaderSettings {
    fn default() -> Self {
        Self {
            poll_window: Duration::from_millis(150),
            max_lines_per_poll: 16,
            update_rate_ms: Some(100),
            write_timeout: Duration::from_millis(500),
        }
    }
}

/// Reads ground speed from a GPS receiver that has already been probed
pub struct GpsSpeedReader {
    channel: Box<dyn LineChannel>,
    baud: u32,
    settings: GpsReaderSettings,
    lost: bool,
}

impl std::fmt::Debug for GpsSpeedReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpsSpeedReader")
            .field("port", &self.channel.port_name())
            .field("baud", &self.baud)
            .field("lost", &self.lost)
            .finish()
    }
}

impl GpsSpeedReader {
    /// Wraps an already open channel
    pub fn new(channel: Box<dyn LineChannel>, baud: u32, settings: GpsReaderSettings) -> Self {
        Self {
            channel,
            baud,
            settings,
            lost: false,
        }
    }

    /// Opens `path` at `baud` and sends the configured update rate, if any
    pub fn open(opener: &dyn PortOpener, path: &str, baud: u32, settings: GpsReaderSettings) -> ChannelResult<Self> {
        let channel = opener.open(path, baud)?;
        let mut reader = Self::new(channel, baud, settings);
        if let Some(rate) = reader.settings.update_rate_ms {
            reader.configure_update_rate(rate);
        }
        Ok(reader)
    }

    /// Port path
    pub fn path(&self) -> &str {
        self.channel.port_name()
    }

    /// Baud rate the receiver was found at
    pub fn baud(&self) -> u32 {
        self.baud
    }

    /// True once the port has failed for good
    pub fn is_lost(&self) -> bool {
        self.lost
    }

    /// Asks an MTK receiver to output fixes every `rate_ms` milliseconds.
    ///
    /// Receivers that do not understand PMTK simply ignore it, so there is no
    /// acknowledgement to wait for. A failed write is logged and otherwise ignored.
    /// Returns true if the command was written.
    pub fn configure_update_rate(&mut self, rate_ms: u32) -> bool {
        let cmd = update_rate_command(rate_ms);
        match self.channel.write_bytes(cmd.as_bytes(), self.settings.write_timeout) {
            Ok(()) => {
                log::info!("Requested {rate_ms}ms GPS update rate on {}", self.path());
                true
            }
            Err(e) => {
                log::warn!("Could not set GPS update rate on {}: {e}", self.path());
                self.note_error(&e);
                false
            }
        }
    }

    /// Reads what the receiver has sent since the last poll and returns the newest valid fix.
    ///
    /// Returns `None` if no valid speed sentence arrived within the poll window, or the port
    /// is lost.
    pub fn poll(&mut self) -> Option<NmeaFix> {
        if self.lost {
            return None;
        }
        let deadline = Instant::now() + self.settings.poll_window;
        let mut newest = None;
        for _ in 0..self.settings.max_lines_per_poll {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match self.channel.read_line(remaining) {
                Ok(line) if classify(&line) => {
                    let fix = decode(&line);
                    if fix.valid {
                        newest = Some(fix);
                    }
                }
                Ok(_) => {}
                Err(ChannelError::ReadTimeout) => break,
                Err(e) => {
                    log::warn!("GPS read on {} failed: {e}", self.path());
                    self.note_error(&e);
                    break;
                }
            }
        }
        newest
    }

    /// Closes the port
    pub fn close(&mut self) -> ChannelResult<()> {
        self.channel.close()
    }

    fn note_error(&mut self, e: &ChannelError) {
        if e.is_fatal() {
            self.lost = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::simulation::{SimulatedDevice, SimulationOpener};

    #[test]
    fn sends_update_rate_on_open() {
        let dev = SimulatedDevice::gps(9600, &[]);
        let opener = SimulationOpener::new().with_device("/dev/ttyACM0", dev.clone());
        let reader = GpsSpeedReader::open(&opener, "/dev/ttyACM0", 9600, GpsReaderSettings::default()).unwrap();
        assert_eq!(dev.written(), vec![b"$PMTK220,100*2F\r\n".to_vec()]);
        assert_eq!(reader.path(), "/dev/ttyACM0");
    }

    #[test]
    fn poll_returns_newest_valid_fix() {
        let dev = SimulatedDevice::new().speaking_at(9600);
        dev.push_lines(&[
            "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A",
            "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47",
            "$GNVTG,054.7,T,034.4,M,005.5,N,010.2,K,A*3B",
            "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*00",
        ]);
        let opener = SimulationOpener::new().with_device("/dev/ttyACM0", dev);
        let settings = GpsReaderSettings {
            update_rate_ms: None,
            ..Default::default()
        };
        let mut reader = GpsSpeedReader::open(&opener, "/dev/ttyACM0", 9600, settings).unwrap();
        let fix = reader.poll().unwrap();
        assert!((fix.speed_knots - 5.5).abs() < 1e-9);
        assert!(reader.poll().is_none());
    }

    #[test]
    fn unplugged_receiver_is_lost() {
        let dev = SimulatedDevice::gps(9600, &["$GNVTG,054.7,T,034.4,M,005.5,N,010.2,K,A*3B"]);
        let opener = SimulationOpener::new().with_device("/dev/ttyACM0", dev.clone());
        let mut reader = GpsSpeedReader::open(&opener, "/dev/ttyACM0", 9600, GpsReaderSettings::default()).unwrap();
        assert!(reader.poll().is_some());
        dev.unplug();
        assert!(reader.poll().is_none());
        assert!(reader.is_lost());
    }
}
