use std::time::{Duration, Instant};

use dash_link::{
    hardware::{scanner::SerialScanner, serial::SerialPortOpener},
    nmea::{GpsReaderSettings, GpsSpeedReader},
    probe::{GpsPortProbe, GpsProbeSettings},
};

fn main() {
    env_logger::builder()
        .format_timestamp(Some(env_logger::TimestampPrecision::Millis))
        .init();

    let rate_ms = std::env::args()
        .nth(1)
        .and_then(|a| a.parse().ok())
        .unwrap_or(100);

    let candidates = SerialScanner::default().list();
    let mut probe = GpsPortProbe::new(&SerialPortOpener, GpsProbeSettings::default());
    let (path, baud) = match probe.locate(&candidates) {
        Ok(found) => found,
        Err(e) => {
            eprintln!("{e}");
            return;
        }
    };

    let settings = GpsReaderSettings {
        update_rate_ms: None,
        ..Default::default()
    };
    let mut gps = GpsSpeedReader::open(&SerialPortOpener, &path, baud, settings).unwrap();
    gps.configure_update_rate(rate_ms);

    // Count fixes for a few seconds to see whether the receiver took the new rate
    let started = Instant::now();
    let mut fixes = 0u32;
    while started.elapsed() < Duration::from_secs(5) {
        if let Some(fix) = gps.poll() {
            fixes += 1;
            println!("{:?} {} mph", fix.sentence_type, fix.display_mph());
        }
    }
    println!(
        "{fixes} fixes in {:.1}s on {path}@{baud}",
        started.elapsed().as_secs_f64()
    );
}
