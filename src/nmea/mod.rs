//! NMEA-0183 ground speed decoding
//!
//! Only the two sentence types that carry speed over ground are understood:
//!
//! | Sentence | Speed field (0 = address) | Unit  |
//! |----------|---------------------------|-------|
//! | `RMC`    | 7                         | knots |
//! | `VTG`    | 5                         | knots |
//!
//! Every sentence must carry a valid `*HH` checksum, the XOR of all bytes between `$`
//! and `*`. Anything else decodes to an invalid [NmeaFix].

pub mod reader;

use crate::obd2::knots_to_mph;

pub use reader::{GpsReaderSettings, GpsSpeedReader};

/// Sentence prefixes accepted as GPS output
pub const TALKER_PREFIXES: [&str; 4] = ["$GP", "$GN", "$GL", "$GA"];

/// NMEA talker identifier
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, strum_macros::Display, strum_macros::EnumString)]
pub enum Talker {
    /// GPS
    #[strum(serialize = "GP")]
    Gp,
    /// Multi-constellation GNSS
    #[strum(serialize = "GN")]
    Gn,
    /// GLONASS
    #[strum(serialize = "GL")]
    Gl,
    /// Galileo
    #[strum(serialize = "GA")]
    Ga,
}

/// Sentence types that carry ground speed
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, strum_macros::Display, strum_macros::EnumString)]
pub enum SentenceType {
    /// Recommended minimum specific GNSS data
    #[strum(serialize = "RMC")]
    Rmc,
    /// Course over ground and ground speed
    #[strum(serialize = "VTG")]
    Vtg,
}

impl SentenceType {
    /// Index of the speed-in-knots field, counting the address field as 0
    pub fn speed_field(&self) -> usize {
        match self {
            SentenceType::Rmc => 7,
            SentenceType::Vtg => 5,
        }
    }
}

/// Speed decoded from one NMEA sentence.
///
/// An invalid fix never carries a value from an earlier sentence, its speed is always 0.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct NmeaFix {
    /// Talker that sent the sentence, absent on an invalid fix
    pub talker: Option<Talker>,
    /// Sentence type, absent on an invalid fix
    pub sentence_type: Option<SentenceType>,
    /// Speed over ground in knots
    pub speed_knots: f64,
    /// True if the sentence was well formed and checksummed
    pub valid: bool,
}

impl NmeaFix {
    /// An invalid fix
    pub fn invalid() -> Self {
        Self::default()
    }

    /// Speed in miles per hour
    pub fn speed_mph(&self) -> f64 {
        knots_to_mph(self.speed_knots)
    }

    /// Speed in miles per hour, rounded to the nearest whole mile as shown on a gauge
    pub fn display_mph(&self) -> f64 {
        self.speed_mph().round()
    }
}

/// Reasons a sentence is rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NmeaError {
    /// Sentence does not start with `$`
    #[error("Sentence does not start with '$'")]
    MissingStart,
    /// No `*` checksum delimiter
    #[error("Sentence has no '*' checksum delimiter")]
    MissingChecksum,
    /// Checksum field is not two hex digits
    #[error("Checksum field '{0}' is not two hex digits")]
    BadChecksumField(String),
    /// Checksum does not match the sentence body
    #[error("Checksum mismatch. Sentence says {expected:02X}, body is {computed:02X}")]
    ChecksumMismatch {
        /// Checksum carried by the sentence
        expected: u8,
        /// Checksum of the received body
        computed: u8,
    },
    /// Talker is not one of [TALKER_PREFIXES]
    #[error("Unknown talker in '{0}'")]
    UnknownTalker(String),
    /// Sentence type carries no speed
    #[error("Unsupported sentence '{0}'")]
    UnsupportedSentence(String),
    /// Sentence ends before the speed field
    #[error("Sentence truncated after {0} fields")]
    Truncated(usize),
    /// Speed field is not a non-negative number
    #[error("Speed field '{0}' is not a valid number")]
    BadSpeed(String),
}

/// Returns true if `line` looks like GPS output: a known talker prefix and a checksum
/// delimiter. This is a cheap pre-filter, [decode] does the real validation.
pub fn classify(line: &str) -> bool {
    let line = line.trim_start();
    TALKER_PREFIXES.iter().any(|p| line.starts_with(p)) && line.contains('*')
}

/// XOR checksum of a sentence body (the bytes between `$` and `*`)
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

/// Wraps a body into a full sentence, `$<body>*HH\r\n`
pub fn pmtk_command(body: &str) -> String {
    format!("${body}*{:02X}\r\n", checksum(body))
}

/// MTK command setting the fix output interval in milliseconds
pub fn update_rate_command(rate_ms: u32) -> String {
    pmtk_command(&format!("PMTK220,{rate_ms}"))
}

/// Parses a sentence, returning why it was rejected if it was
pub fn parse(line: &str) -> Result<NmeaFix, NmeaError> {
    let line = line.trim();
    let rest = line.strip_prefix('$').ok_or(NmeaError::MissingStart)?;
    let (body, cs_field) = rest.rsplit_once('*').ok_or(NmeaError::MissingChecksum)?;
    if cs_field.len() != 2 || !cs_field.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(NmeaError::BadChecksumField(cs_field.to_string()));
    }
    let expected =
        u8::from_str_radix(cs_field, 16).map_err(|_| NmeaError::BadChecksumField(cs_field.to_string()))?;
    let computed = checksum(body);
    if expected != computed {
        return Err(NmeaError::ChecksumMismatch { expected, computed });
    }

    let fields: Vec<&str> = body.split(',').collect();
    let address = fields[0];
    let talker: Talker = address
        .get(0..2)
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| NmeaError::UnknownTalker(address.to_string()))?;
    let sentence_type: SentenceType = address
        .get(2..)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| NmeaError::UnsupportedSentence(address.to_string()))?;

    let raw = fields
        .get(sentence_type.speed_field())
        .ok_or(NmeaError::Truncated(fields.len()))?
        .trim();
    let speed_knots = if raw.is_empty() {
        0.0
    } else {
        match raw.parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 0.0 => v,
            _ => return Err(NmeaError::BadSpeed(raw.to_string())),
        }
    };
    Ok(NmeaFix {
        talker: Some(talker),
        sentence_type: Some(sentence_type),
        speed_knots,
        valid: true,
    })
}

/// Decodes a sentence. Any failure gives an invalid fix, logged at debug level.
pub fn decode(line: &str) -> NmeaFix {
    match parse(line) {
        Ok(fix) => fix,
        Err(e) => {
            log::debug!("Rejected NMEA sentence '{}': {e}", line.trim());
            NmeaFix::invalid()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RMC: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
    const VTG: &str = "$GNVTG,054.7,T,034.4,M,005.5,N,010.2,K,A*3B";

    #[test]
    fn decodes_rmc_speed() {
        let fix = decode(RMC);
        assert!(fix.valid);
        assert_eq!(fix.talker, Some(Talker::Gp));
        assert_eq!(fix.sentence_type, Some(SentenceType::Rmc));
        assert!((fix.speed_knots - 22.4).abs() < 1e-9);
        assert!((fix.speed_mph() - 25.777472).abs() < 1e-6);
        assert_eq!(fix.display_mph(), 26.0);
    }

    #[test]
    fn decodes_vtg_speed() {
        let fix = decode(VTG);
        assert!(fix.valid);
        assert_eq!(fix.talker, Some(Talker::Gn));
        assert_eq!(fix.sentence_type, Some(SentenceType::Vtg));
        assert!((fix.speed_knots - 5.5).abs() < 1e-9);
    }

    #[test]
    fn zero_and_empty_speed_are_valid() {
        let zero = decode("$GPRMC,123519,A,4807.038,N,01131.000,E,0.0,084.4,230394,003.1,W*6E");
        assert!(zero.valid);
        assert_eq!(zero.speed_knots, 0.0);
        assert_eq!(zero.speed_mph(), 0.0);

        let empty = decode("$GPRMC,123519,A,4807.038,N,01131.000,E,,084.4,230394,003.1,W*40");
        assert!(empty.valid);
        assert_eq!(empty.speed_knots, 0.0);
    }

    #[test]
    fn lower_case_checksums_are_accepted() {
        let upper = decode("$GNRMC,,V,,,,,,,,,,N*4D");
        let lower = decode("$GNRMC,,V,,,,,,,,,,N*4d");
        assert!(upper.valid);
        assert!(lower.valid);
        assert_eq!(lower, upper);
        assert!(!decode("$GNRMC,,V,,,,,,,,,,N*4e").valid);
    }

    #[test]
    fn any_single_bit_flip_invalidates_the_sentence() {
        let bytes = RMC.as_bytes();
        for i in 0..bytes.len() {
            for bit in 0..8 {
                let mut corrupted = bytes.to_vec();
                corrupted[i] ^= 1 << bit;
                let line = String::from_utf8_lossy(&corrupted);
                // Flips that turn trailing characters into whitespace can survive trimming
                // with the sentence intact; those are not corruption of the sentence content.
                if line.trim() == RMC {
                    continue;
                }
                assert!(!decode(&line).valid, "byte {i} bit {bit} still decodes: {line}");
            }
        }
    }

    #[test]
    fn rejects_wrong_sentence_types_and_truncation() {
        assert_eq!(
            parse("$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47"),
            Err(NmeaError::UnsupportedSentence("GPGGA".into()))
        );
        assert_eq!(parse("$GPRMC,123519,A*07"), Err(NmeaError::Truncated(3)));
        assert_eq!(parse("GPRMC,123519,A*07"), Err(NmeaError::MissingStart));
        assert_eq!(parse("$GPRMC,123519,A"), Err(NmeaError::MissingChecksum));
        assert!(!decode("").valid);
    }

    #[test]
    fn classify_prefilters_talkers() {
        assert!(classify(RMC));
        assert!(classify(VTG));
        assert!(classify("$GAGSV,1,1,00*00"));
        assert!(!classify("$PMTK001,220,3*30"));
        assert!(!classify("$GPRMC,no checksum"));
        assert!(!classify("41 0C 1A F8"));
    }

    #[test]
    fn builds_pmtk_update_rate_commands() {
        assert_eq!(update_rate_command(100), "$PMTK220,100*2F\r\n");
        assert_eq!(update_rate_command(200), "$PMTK220,200*2C\r\n");
    }
}
