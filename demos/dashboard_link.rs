use std::{thread, time::Instant};

use dash_link::{
    config::LinkConfig,
    hardware::{scanner::SerialScanner, serial::SerialPortOpener},
    obd2::capability::PidCapabilityScanner,
    poller::{Metric, TelemetryPoller},
    probe,
};

fn main() {
    env_logger::builder()
        .format_timestamp(Some(env_logger::TimestampPrecision::Millis))
        .init();

    let config = LinkConfig::default();
    let scanner = SerialScanner::new(config.scanner.clone());
    let mut discovery = probe::discover(&scanner, &SerialPortOpener, &config);

    if let Ok(elm) = discovery.obd.as_mut() {
        println!("Adapter {} on {} ({})", elm.version().unwrap_or("?"), elm.path(), elm.protocol());
        for map in PidCapabilityScanner::default().scan(elm) {
            if map.responded() {
                println!("{:<8} {} {:?}", map.command.name, map.bit_string(), map.supported);
            }
        }
    }

    let mut poller = TelemetryPoller::from_discovery(discovery, config.poller.clone());
    loop {
        let started = Instant::now();
        let snap = poller.tick();
        println!(
            "#{} {} | {} mph | {} rpm | {} F | {} V | oil {} psi | MIL {} ({} DTC) | {}",
            snap.sequence(),
            snap.state(),
            snap.number(Metric::Speed),
            snap.number(Metric::Rpm),
            snap.number(Metric::CoolantTemp),
            snap.number(Metric::ControlModuleVoltage),
            snap.number(Metric::OilPressure),
            snap.flag(Metric::Mil),
            snap.number(Metric::DtcCount),
            snap.text(Metric::Runtime),
        );
        thread::sleep(poller.interval().saturating_sub(started.elapsed()));
    }
}
