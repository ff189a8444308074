//! Simulation hardware for testing discovery and polling without real devices
//!
//! A [SimulatedDevice] stands in for whatever is plugged into one serial path. It either
//! answers scripted requests (an ELM327 adapter) or streams lines on its own (a GPS
//! receiver). It only makes sense at the baud rate it was configured for. At any other rate
//! it answers nothing and streams garbage, like a real UART would.
//!
//! Reads never sleep: once scripted data runs out a read returns [ChannelError::ReadTimeout]
//! straight away, so tests run at full speed.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::channel::{ChannelError, ChannelResult, LineBuffer, LineChannel};

use super::PortOpener;

/// What a UART produces when the baud rate is wrong
const GARBAGE_LINE: &[u8] = &[0xE0, 0x1C, 0xFC, 0x80, 0x00, 0xF8, 0x9E, b'\n'];

#[derive(Debug, Default)]
struct DeviceState {
    baud: Option<u32>,
    responses: HashMap<Vec<u8>, Vec<u8>>,
    default_response: Option<Vec<u8>>,
    stream: VecDeque<Vec<u8>>,
    repeat_stream: bool,
    written: Vec<Vec<u8>>,
    open_handles: usize,
    open_count: usize,
    unplugged: bool,
}

/// A scripted serial device. Clones share state, so a test can keep one copy to tweak
/// responses or inspect traffic while the crate drives another.
#[derive(Debug, Clone, Default)]
pub struct SimulatedDevice {
    state: Arc<RwLock<DeviceState>>,
}

impl SimulatedDevice {
    /// Creates a device that talks at any baud rate and says nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an ELM327 adapter at `baud` that accepts the setup commands, reports
    /// protocol `dpn` (as `ATDPN` would, e.g. `"A6"`) and answers `0100` with `pids_a`.
    /// Any other request gets `NO DATA`.
    pub fn elm327(baud: u32, dpn: &str, pids_a: &str) -> Self {
        let dev = Self::new().speaking_at(baud);
        dev.set_response("\x7F\x7F", "?");
        dev.set_response("ATZ", "ELM327 v1.5");
        for at in ["ATE0", "ATL0", "ATH1", "ATH0", "ATSP0", "ATAT2"] {
            dev.set_response(at, "OK");
        }
        dev.set_response("ATDPN", dpn);
        dev.set_response("0100", pids_a);
        dev.set_default_response("NO DATA");
        dev
    }

    /// Creates a GPS receiver at `baud` that streams `lines` forever
    pub fn gps(baud: u32, lines: &[&str]) -> Self {
        let dev = Self::new().speaking_at(baud);
        {
            let mut state = dev.write();
            state.repeat_stream = true;
            state.stream = lines.iter().map(|l| format!("{l}\r\n").into_bytes()).collect();
        }
        dev
    }

    /// Limits the device to a single baud rate
    pub fn speaking_at(self, baud: u32) -> Self {
        self.write().baud = Some(baud);
        self
    }

    /// Sets the reply to an ELM style request. `request` is given without the trailing `\r`,
    /// `reply` without the trailing prompt; both are added here.
    pub fn set_response(&self, request: &str, reply: &str) {
        let mut req = request.as_bytes().to_vec();
        req.push(b'\r');
        self.write().responses.insert(req, elm_reply(reply));
    }

    /// Removes a scripted reply, so the request falls back to the default response
    pub fn remove_response(&self, request: &str) {
        let mut req = request.as_bytes().to_vec();
        req.push(b'\r');
        self.write().responses.remove(&req);
    }

    /// Reply for any request with no scripted response. With none set, such requests
    /// are ignored and the read times out
    pub fn set_default_response(&self, reply: &str) {
        self.write().default_response = Some(elm_reply(reply));
    }

    /// Queues lines the device sends unprompted, once each
    pub fn push_lines(&self, lines: &[&str]) {
        let mut state = self.write();
        for l in lines {
            state.stream.push_back(format!("{l}\r\n").into_bytes());
        }
    }

    /// Everything written to the device so far, one entry per write
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.read().written.clone()
    }

    /// Number of channels to this device that are currently open
    pub fn open_handles(&self) -> usize {
        self.read().open_handles
    }

    /// Number of times the device has been opened
    pub fn open_count(&self) -> usize {
        self.read().open_count
    }

    /// Simulates the device being pulled out. Open channels fail with an IO error and
    /// new opens are refused
    pub fn unplug(&self) {
        self.write().unplugged = true;
    }

    fn read(&self) -> RwLockReadGuard<'_, DeviceState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, DeviceState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn elm_reply(reply: &str) -> Vec<u8> {
    let mut out = reply.replace('\n', "\r").into_bytes();
    out.extend_from_slice(b"\r\r>");
    out
}

/// A channel opened on a [SimulatedDevice]
#[derive(Debug)]
pub struct SimulationChannel {
    name: String,
    device: SimulatedDevice,
    baud_matches: bool,
    rx: LineBuffer,
    closed: bool,
}

impl SimulationChannel {
    fn check_usable(&self) -> ChannelResult<()> {
        if self.closed {
            return Err(ChannelError::InterfaceNotOpen);
        }
        if self.device.read().unplugged {
            return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe).into());
        }
        Ok(())
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            let mut state = self.device.write();
            state.open_handles = state.open_handles.saturating_sub(1);
        }
    }
}

impl LineChannel for SimulationChannel {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn read_until(&mut self, delim: u8, _timeout: Duration) -> ChannelResult<Vec<u8>> {
        self.check_usable()?;
        loop {
            if let Some(frame) = self.rx.take_until(delim) {
                return Ok(frame);
            }
            let next = {
                let mut state = self.device.write();
                let line = state.stream.pop_front();
                if let Some(l) = &line {
                    if state.repeat_stream {
                        state.stream.push_back(l.clone());
                    }
                }
                line
            };
            match next {
                Some(_) if !self.baud_matches => self.rx.extend(GARBAGE_LINE)?,
                Some(line) => self.rx.extend(&line)?,
                None => return Err(ChannelError::ReadTimeout),
            }
        }
    }

    fn write_bytes(&mut self, buffer: &[u8], _timeout: Duration) -> ChannelResult<()> {
        self.check_usable()?;
        let reply = {
            let mut state = self.device.write();
            state.written.push(buffer.to_vec());
            if !self.baud_matches {
                None
            } else {
                state
                    .responses
                    .get(buffer)
                    .or(state.default_response.as_ref())
                    .cloned()
            }
        };
        if let Some(r) = reply {
            self.rx.extend(&r)?;
        }
        Ok(())
    }

    fn clear_rx_buffer(&mut self) -> ChannelResult<()> {
        self.check_usable()?;
        self.rx.clear();
        Ok(())
    }

    fn close(&mut self) -> ChannelResult<()> {
        self.release();
        Ok(())
    }
}

impl Drop for SimulationChannel {
    fn drop(&mut self) {
        self.release();
    }
}

/// Opens [SimulatedDevice]s by path
#[derive(Debug, Clone, Default)]
pub struct SimulationOpener {
    devices: HashMap<String, SimulatedDevice>,
}

impl SimulationOpener {
    /// Creates an opener with no devices attached
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a device at `path`
    pub fn with_device(mut self, path: &str, device: SimulatedDevice) -> Self {
        self.devices.insert(path.to_string(), device);
        self
    }

    /// Gets the device attached at `path`
    pub fn device(&self, path: &str) -> Option<&SimulatedDevice> {
        self.devices.get(path)
    }
}

impl PortOpener for SimulationOpener {
    fn open(&self, path: &str, baud: u32) -> ChannelResult<Box<dyn LineChannel>> {
        let device = self.devices.get(path).ok_or_else(|| ChannelError::OpenFailed {
            path: path.to_string(),
            reason: "No such file or directory".into(),
        })?;
        let baud_matches = {
            let mut state = device.write();
            if state.unplugged {
                return Err(ChannelError::OpenFailed {
                    path: path.to_string(),
                    reason: "Device not configured".into(),
                });
            }
            state.open_handles += 1;
            state.open_count += 1;
            state.baud.is_none_or(|b| b == baud)
        };
        Ok(Box::new(SimulationChannel {
            name: path.to_string(),
            device: device.clone(),
            baud_matches,
            rx: LineBuffer::default(),
            closed: false,
        }))
    }
}
