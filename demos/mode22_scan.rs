use dash_link::{
    hardware::serial::SerialPortOpener,
    obd2::{
        elm327::{Elm327, ElmSettings},
        enhanced::{Mode22ScanSettings, Mode22Scanner, GM_CANDIDATE_PIDS, GM_ENHANCED_RANGES},
    },
};

fn main() {
    env_logger::builder()
        .format_timestamp(Some(env_logger::TimestampPrecision::Millis))
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "/dev/ttyUSB0".into());
    let mut elm = Elm327::connect(&SerialPortOpener, &path, ElmSettings::default()).unwrap();
    println!("Connected to {} at {} baud, {}", elm.path(), elm.baud(), elm.status());

    let mut scanner = Mode22Scanner::new(&mut elm, Mode22ScanSettings::default());
    let mut hits = scanner.scan_candidates(&GM_CANDIDATE_PIDS);
    if hits.is_empty() {
        println!("No known PID answered, sweeping GM enhanced ranges");
        for range in GM_ENHANCED_RANGES {
            hits.extend(scanner.scan_range(range));
        }
    }

    for hit in &hits {
        println!("22{:04X} -> {}", hit.pid, hit.response);
    }
    println!("{} PID(s) answered", hits.len());
    elm.close().unwrap();
}
