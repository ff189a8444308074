use std::{fs, path::PathBuf, process, time::Duration};

use dash_link::{
    config::LinkConfig,
    hardware::{
        scanner::{CandidateOrigin, CandidateSources, ScannerSettings, SerialCandidate, SerialScanner},
        simulation::{SimulatedDevice, SimulationOpener},
    },
    probe::{discover, AttemptOutcome, GpsPortProbe, GpsProbeSettings},
    DeviceRole, LinkError,
};

const RMC: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
const GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";
const PIDS: &str = "7E8 06 41 00 BE 1F A8 13";
const RPM_REPLY: &str = "7E8 04 41 0C 1A F8";

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn kernel(paths: &[&str]) -> Vec<SerialCandidate> {
    paths
        .iter()
        .map(|p| SerialCandidate::new(*p, CandidateOrigin::KernelName))
        .collect()
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("dash_link_discovery_{name}_{}", process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(dir.join("dev")).unwrap();
    fs::create_dir_all(dir.join("by-id")).unwrap();
    dir
}

fn scanner_for(dir: &PathBuf) -> SerialScanner {
    SerialScanner::new(ScannerSettings {
        stable_id_dir: dir.join("by-id"),
        device_dir: dir.join("dev"),
        kernel_prefixes: vec!["ttyUSB".into(), "ttyACM".into()],
        sources: CandidateSources::STABLE_ID | CandidateSources::KERNEL_NAME,
    })
}

fn quick_config() -> LinkConfig {
    let mut config = LinkConfig::default();
    config.gps_probe.probe_duration = Duration::from_millis(200);
    config.gps_reader.update_rate_ms = None;
    config.obd_probe.autoscan_paths = Vec::new();
    config.obd_probe.autoscan_enumerate = false;
    config
}

#[test]
pub fn gps_found_among_other_devices() {
    init_logging();
    let elm = SimulatedDevice::elm327(38400, "A6", PIDS);
    let gps = SimulatedDevice::gps(115200, &[GGA, RMC]);
    let opener = SimulationOpener::new()
        .with_device("/dev/ttyUSB0", elm.clone())
        .with_device("/dev/ttyUSB1", gps.clone())
        .with_device("/dev/ttyACM0", SimulatedDevice::new());

    let mut probe = GpsPortProbe::new(&opener, GpsProbeSettings::default());
    for order in [
        ["/dev/ttyUSB0", "/dev/ttyUSB1", "/dev/ttyACM0"],
        ["/dev/ttyACM0", "/dev/ttyUSB0", "/dev/ttyUSB1"],
    ] {
        let found = probe.find(&kernel(&order), &[9600, 115200], Duration::from_millis(200));
        assert_eq!(found, Some(("/dev/ttyUSB1".to_string(), 115200)));
    }

    // Listening never writes, so the adapter was not disturbed
    assert!(elm.written().is_empty());
    assert_eq!(elm.open_handles(), 0);
    assert_eq!(gps.open_handles(), 0);
}

#[test]
pub fn no_gps_when_nothing_classifies() {
    init_logging();
    let opener = SimulationOpener::new()
        .with_device("/dev/ttyUSB0", SimulatedDevice::elm327(38400, "A6", PIDS))
        .with_device("/dev/ttyUSB1", SimulatedDevice::gps(9600, &[GGA]))
        .with_device("/dev/ttyACM0", SimulatedDevice::gps(57600, &[RMC]));
    let candidates = kernel(&["/dev/ttyUSB0", "/dev/ttyUSB1", "/dev/ttyACM0", "/dev/ttyACM9"]);

    let mut probe = GpsPortProbe::new(&opener, GpsProbeSettings::default());
    assert_eq!(probe.find(&candidates, &[9600, 115200], Duration::from_millis(200)), None);
    assert_eq!(probe.attempts().len(), 8);
    assert!(probe
        .attempts()
        .iter()
        .filter(|a| a.path == "/dev/ttyACM9")
        .all(|a| matches!(a.outcome, AttemptOutcome::OpenFailed(_))));

    let settings = GpsProbeSettings {
        probe_duration: Duration::from_millis(200),
        ..Default::default()
    };
    let mut probe = GpsPortProbe::new(&opener, settings);
    match probe.locate(&candidates).unwrap_err() {
        LinkError::DeviceNotFound { role, tried } => {
            assert_eq!(role, DeviceRole::Gps);
            assert!(tried.contains(&"/dev/ttyUSB1@9600: no NMEA speed sentence".to_string()));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[cfg(unix)]
#[test]
pub fn discovery_never_gives_one_device_two_roles() {
    init_logging();
    let dir = scratch_dir("roles");
    let usb0 = dir.join("dev/ttyUSB0");
    let usb1 = dir.join("dev/ttyUSB1");
    let link = dir.join("by-id/usb-u-blox_GNSS-if00");
    fs::write(&usb0, b"").unwrap();
    fs::write(&usb1, b"").unwrap();
    std::os::unix::fs::symlink(&usb0, &link).unwrap();

    let usb0 = usb0.to_string_lossy().to_string();
    let usb1 = usb1.to_string_lossy().to_string();
    let link = link.to_string_lossy().to_string();

    // The GPS answers under both names. It would also answer ELM commands with junk
    let gps = SimulatedDevice::gps(9600, &[RMC]);
    gps.set_default_response("?");
    let elm = SimulatedDevice::elm327(38400, "A6", PIDS);
    elm.set_response("010C", RPM_REPLY);
    let opener = SimulationOpener::new()
        .with_device(&link, gps.clone())
        .with_device(&usb0, gps.clone())
        .with_device(&usb1, elm.clone());

    let discovery = discover(&scanner_for(&dir), &opener, &quick_config());
    let reader = discovery.gps.unwrap();
    assert_eq!(reader.path(), link);
    assert_eq!(reader.baud(), 9600);

    let adapter = discovery.obd.unwrap();
    assert_eq!(adapter.path(), usb1);
    assert!(adapter.is_car_connected());

    // Only the probe and the reader ever opened the GPS, and nothing was written to it
    assert_eq!(gps.open_handles(), 1);
    assert!(gps.written().is_empty());

    drop(reader);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
pub fn missing_adapter_lists_every_attempt() {
    init_logging();
    let dir = scratch_dir("no_obd");
    let usb0 = dir.join("dev/ttyUSB0");
    let acm0 = dir.join("dev/ttyACM0");
    fs::write(&usb0, b"").unwrap();
    fs::write(&acm0, b"").unwrap();
    let usb0 = usb0.to_string_lossy().to_string();
    let acm0 = acm0.to_string_lossy().to_string();

    let gps = SimulatedDevice::gps(115200, &[RMC]);
    let opener = SimulationOpener::new()
        .with_device(&usb0, gps.clone())
        .with_device(&acm0, SimulatedDevice::new());

    let discovery = discover(&scanner_for(&dir), &opener, &quick_config());
    assert_eq!(discovery.gps.as_ref().map(|r| r.baud()).ok(), Some(115200));

    match discovery.obd.unwrap_err() {
        LinkError::DeviceNotFound { role, tried } => {
            assert_eq!(role, DeviceRole::Obd);
            assert_eq!(
                tried,
                vec![
                    format!("{usb0}: claimed by another role"),
                    format!("{acm0}: no ELM327 prompt"),
                ]
            );
        }
        other => panic!("unexpected {other:?}"),
    }
    let _ = fs::remove_dir_all(&dir);
}
