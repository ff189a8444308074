//! The hardware module contains the serial port plumbing used to reach
//! GPS receivers and OBD-II adapters, either real ports or simulated ones for bench setups

pub mod scanner;
#[cfg(feature = "serial")]
pub mod serial;
pub mod simulation;

use crate::channel::{ChannelResult, LineChannel};

/// Opens a serial path at a given baud rate as a [LineChannel].
///
/// Probes open many short lived channels through this trait, so the same discovery
/// logic runs against real hardware and against [simulation::SimulationOpener].
pub trait PortOpener {
    /// Opens `path` at `baud`. The returned channel is closed when dropped.
    fn open(&self, path: &str, baud: u32) -> ChannelResult<Box<dyn LineChannel>>;
}

impl<T: PortOpener + ?Sized> PortOpener for &T {
    fn open(&self, path: &str, baud: u32) -> ChannelResult<Box<dyn LineChannel>> {
        (**self).open(path, baud)
    }
}
