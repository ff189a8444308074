//! Serial candidate enumeration
//!
//! Candidates are gathered from three places, in this order:
//! 1. Stable identity links (`/dev/serial/by-id/*`), which survive re-plugging
//! 2. Kernel device names (`ttyUSB*`, `ttyACM*`, `rfcomm*`)
//! 3. Whatever the OS serial API reports
//!
//! The list is rebuilt on every call. Nothing is cached between passes since adapters
//! come and go while the machine is running.

use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use bitflags::bitflags;

bitflags! {
    /// Sources [SerialScanner] reads candidates from
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct CandidateSources: u8 {
        /// Stable identity symlinks
        const STABLE_ID = 0b0000_0001;
        /// Kernel device names matching a known prefix
        const KERNEL_NAME = 0b0000_0010;
        /// Ports reported by the system serial API
        const ENUMERATED = 0b0000_0100;
    }
}

/// Where a [SerialCandidate] was found
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, strum_macros::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CandidateOrigin {
    /// Stable identity path
    #[strum(serialize = "by-id")]
    StableId,
    /// Kernel device name
    #[strum(serialize = "kernel")]
    KernelName,
    /// System serial API
    #[strum(serialize = "enumerated")]
    Enumerated,
}

/// A serial path that may have a GPS receiver or OBD adapter behind it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SerialCandidate {
    /// Device path
    pub path: String,
    /// Source the path came from
    pub origin: CandidateOrigin,
}

impl SerialCandidate {
    /// Creates a new candidate
    pub fn new(path: impl Into<String>, origin: CandidateOrigin) -> Self {
        Self {
            path: path.into(),
            origin,
        }
    }

    /// Path with symlinks resolved, used to tell whether two candidates alias the same device.
    /// Falls back to the literal path when it cannot be resolved.
    pub fn resolved_path(&self) -> PathBuf {
        resolve_path(&self.path)
    }
}

/// Resolves a device path through symlinks, or returns it unchanged if that fails
pub fn resolve_path(path: &str) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| PathBuf::from(path))
}

/// Settings for [SerialScanner]
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct ScannerSettings {
    /// Directory holding stable identity links
    pub stable_id_dir: PathBuf,
    /// Directory holding kernel device nodes
    pub device_dir: PathBuf,
    /// Kernel name prefixes to accept from [ScannerSettings::device_dir]
    pub kernel_prefixes: Vec<String>,
    /// Which sources to read
    pub sources: CandidateSources,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            stable_id_dir: PathBuf::from("/dev/serial/by-id"),
            device_dir: PathBuf::from("/dev"),
            kernel_prefixes: vec!["ttyUSB".into(), "ttyACM".into(), "rfcomm".into()],
            sources: CandidateSources::all(),
        }
    }
}

/// Lists serial candidates
#[derive(Debug, Clone, Default)]
pub struct SerialScanner {
    settings: ScannerSettings,
}

impl SerialScanner {
    /// Creates a scanner using the given settings
    pub fn new(settings: ScannerSettings) -> Self {
        Self { settings }
    }

    /// Returns the candidates currently present, de-duplicated by path in first seen order.
    ///
    /// This never fails. A source that cannot be read contributes nothing.
    pub fn list(&self) -> Vec<SerialCandidate> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        let sources = self.settings.sources;

        let mut push_all = |paths: Vec<String>, origin: CandidateOrigin| {
            for path in paths {
                if seen.insert(path.clone()) {
                    candidates.push(SerialCandidate::new(path, origin));
                }
            }
        };

        if sources.contains(CandidateSources::STABLE_ID) {
            push_all(self.stable_ids(), CandidateOrigin::StableId);
        }
        if sources.contains(CandidateSources::KERNEL_NAME) {
            push_all(self.kernel_names(), CandidateOrigin::KernelName);
        }
        if sources.contains(CandidateSources::ENUMERATED) {
            push_all(enumerated_ports(), CandidateOrigin::Enumerated);
        }
        log::debug!("Serial scan found {} candidate(s)", candidates.len());
        candidates
    }

    fn stable_ids(&self) -> Vec<String> {
        let mut paths: Vec<String> = read_dir_names(&self.settings.stable_id_dir)
            .into_iter()
            .map(|name| self.settings.stable_id_dir.join(name).to_string_lossy().into_owned())
            .collect();
        paths.sort();
        paths
    }

    fn kernel_names(&self) -> Vec<String> {
        let prefixes = &self.settings.kernel_prefixes;
        let mut matched: Vec<(usize, u32, String)> = read_dir_names(&self.settings.device_dir)
            .into_iter()
            .filter_map(|name| {
                let (idx, prefix) = prefixes
                    .iter()
                    .enumerate()
                    .find(|(_, p)| name.starts_with(p.as_str()))?;
                // ttyUSB10 sorts after ttyUSB2
                let number = name[prefix.len()..].parse::<u32>().ok()?;
                Some((idx, number, name))
            })
            .collect();
        matched.sort();
        matched
            .into_iter()
            .map(|(_, _, name)| self.settings.device_dir.join(name).to_string_lossy().into_owned())
            .collect()
    }
}

fn read_dir_names(dir: &Path) -> Vec<String> {
    match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(e) => {
            log::debug!("Cannot list {}: {e}", dir.display());
            Vec::new()
        }
    }
}

#[cfg(feature = "serial")]
fn enumerated_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            log::debug!("Serial port enumeration failed: {e}");
            Vec::new()
        }
    }
}

#[cfg(not(feature = "serial"))]
fn enumerated_ports() -> Vec<String> {
    Vec::new()
}
