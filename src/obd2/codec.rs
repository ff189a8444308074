//! ELM327 request encoding and response decoding
//!
//! A response is the text an adapter sends between a request and its `>` prompt. Decoding it
//! goes through these stages:
//! 1. [clean_lines] drops the echo, the prompt and progress chatter like `SEARCHING...`
//! 2. [non_data_reason] spots adapter status replies (`NO DATA`, `CAN ERROR`, ...)
//! 3. [parse_frame] splits each line into the sender address and data, validating legacy
//!    checksums
//! 4. [assemble] joins ISO-TP multi-frame CAN responses per sender
//! 5. the command's decoder turns the message into a value
//!
//! Failure at any stage makes the response null. It never affects other commands.

use super::{
    protocol::{FrameFormat, LegacyChecksum},
    DecodeError, DecodeResult, NullReason, ObdCommand, ObdResponse,
};

/// Prompt the ELM327 prints when it is ready for the next command
pub const PROMPT: u8 = b'>';

/// Negative response service id
pub const NEGATIVE_RESPONSE: u8 = 0x7F;

/// Encodes an OBD request, `010C\r`
pub fn encode_request(cmd: &ObdCommand) -> Vec<u8> {
    encode_at(&cmd.request())
}

/// Encodes an arbitrary adapter command
pub fn encode_at(cmd: &str) -> Vec<u8> {
    let mut out = cmd.as_bytes().to_vec();
    out.push(b'\r');
    out
}

fn compact(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Splits a raw response into meaningful lines.
///
/// The prompt, blank lines, `SEARCHING...`, successful `BUS INIT` notices and an echo of
/// `request` (compared ignoring case and spaces) are dropped.
pub fn clean_lines(raw: &str, request: Option<&str>) -> Vec<String> {
    let echo = request.map(|r| compact(r).to_ascii_uppercase());
    raw.split(['\r', '\n'])
        .map(|l| l.trim().trim_start_matches('>').trim_end_matches('>').trim())
        .filter(|l| !l.is_empty())
        .filter(|l| {
            let upper = l.to_ascii_uppercase();
            if upper.starts_with("SEARCHING") {
                return false;
            }
            if upper.starts_with("BUS INIT") && !upper.contains("ERROR") {
                return false;
            }
            echo.as_deref() != Some(compact(&upper).as_str())
        })
        .map(str::to_string)
        .collect()
}

/// Returns why a response carries no data, if any line is an adapter status reply
pub fn non_data_reason(lines: &[String]) -> Option<NullReason> {
    for line in lines {
        let upper = line.to_ascii_uppercase();
        let reason = if upper.contains("NO DATA") {
            NullReason::NoData
        } else if upper.starts_with("UNABLE") {
            NullReason::Unable
        } else if upper.starts_with("STOPPED") {
            NullReason::Stopped
        } else if upper == "?" {
            NullReason::Rejected
        } else if upper.contains("CAN ERROR")
            || upper.contains("BUS ERROR")
            || upper.contains("BUS BUSY")
            || upper.contains("BUFFER FULL")
            || upper.contains("DATA ERROR")
            || upper.contains("FB ERROR")
            || upper.contains("LV RESET")
            || upper.starts_with("<RX ERROR")
            || (upper.starts_with("BUS INIT") && upper.contains("ERROR"))
        {
            NullReason::BusError(line.clone())
        } else {
            continue;
        };
        return Some(reason);
    }
    None
}

/// Parses hex digits (spaces allowed) into bytes
pub fn hex_bytes(s: &str) -> DecodeResult<Vec<u8>> {
    let digits = compact(s);
    if digits.len() % 2 != 0 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(DecodeError::InvalidHex(s.to_string()));
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| DecodeError::InvalidHex(s.to_string())))
        .collect()
}

/// SAE J1850 CRC-8, polynomial 0x1D, initial value and final XOR 0xFF
pub fn j1850_crc(bytes: &[u8]) -> u8 {
    let mut crc: u8 = 0xFF;
    for b in bytes {
        crc ^= b;
        for _ in 0..8 {
            crc = if crc & 0x80 != 0 { (crc << 1) ^ 0x1D } else { crc << 1 };
        }
    }
    !crc
}

/// ISO 9141 / ISO 14230 checksum, sum of all bytes modulo 256
pub fn iso_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// One response line split into sender and payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// CAN identifier or legacy source address
    pub source: Option<u32>,
    /// Payload. On CAN this starts with the ISO-TP PCI byte
    pub data: Vec<u8>,
}

/// Full response from one ECU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Sending ECU, if headers were on
    pub source: Option<u32>,
    /// Message bytes, service id first
    pub bytes: Vec<u8>,
}

/// Parses a single header-on response line
pub fn parse_frame(line: &str, format: FrameFormat) -> DecodeResult<Frame> {
    let digits = compact(line);
    match format {
        FrameFormat::Can11 => {
            if digits.len() < 5 || !digits.is_char_boundary(3) {
                return Err(DecodeError::MalformedFrame(line.to_string()));
            }
            let (id, rest) = digits.split_at(3);
            let source = u32::from_str_radix(id, 16).map_err(|_| DecodeError::InvalidHex(line.to_string()))?;
            Ok(Frame {
                source: Some(source),
                data: hex_bytes(rest)?,
            })
        }
        FrameFormat::Can29 => {
            let bytes = hex_bytes(&digits)?;
            if bytes.len() < 5 {
                return Err(DecodeError::MalformedFrame(line.to_string()));
            }
            let source = bytes[..4].iter().fold(0u32, |acc, b| (acc << 8) | *b as u32);
            Ok(Frame {
                source: Some(source),
                data: bytes[4..].to_vec(),
            })
        }
        FrameFormat::Legacy(kind) => {
            let bytes = hex_bytes(&digits)?;
            if bytes.len() < 5 {
                return Err(DecodeError::MalformedFrame(line.to_string()));
            }
            let (body, cs) = bytes.split_at(bytes.len() - 1);
            let computed = match kind {
                LegacyChecksum::J1850Crc => j1850_crc(body),
                LegacyChecksum::ByteSum => iso_checksum(body),
            };
            if computed != cs[0] {
                return Err(DecodeError::ChecksumMismatch {
                    expected: cs[0],
                    computed,
                });
            }
            Ok(Frame {
                source: Some(body[2] as u32),
                data: body[3..].to_vec(),
            })
        }
        FrameFormat::Headerless => Ok(Frame {
            source: None,
            data: hex_bytes(&digits)?,
        }),
    }
}

fn malformed(data: &[u8]) -> DecodeError {
    DecodeError::MalformedFrame(format!("{data:02X?}"))
}

/// Reassembles the ISO-TP frames sent by one ECU
fn isotp_messages(source: Option<u32>, frames: &[Frame]) -> DecodeResult<Vec<Message>> {
    let mut out = Vec::new();
    // (total length, collected bytes, next sequence number)
    let mut pending: Option<(usize, Vec<u8>, u8)> = None;
    for f in frames {
        let Some(&pci) = f.data.first() else {
            return Err(DecodeError::Empty);
        };
        match pci >> 4 {
            0x0 => {
                let len = (pci & 0x0F) as usize;
                if len == 0 || 1 + len > f.data.len() {
                    return Err(malformed(&f.data));
                }
                out.push(Message {
                    source,
                    bytes: f.data[1..1 + len].to_vec(),
                });
            }
            0x1 => {
                if f.data.len() < 3 {
                    return Err(malformed(&f.data));
                }
                let len = (((pci & 0x0F) as usize) << 8) | f.data[1] as usize;
                pending = Some((len, f.data[2..].to_vec(), 1));
            }
            0x2 => {
                let Some((len, buf, seq)) = pending.as_mut() else {
                    return Err(malformed(&f.data));
                };
                if pci & 0x0F != *seq {
                    return Err(malformed(&f.data));
                }
                buf.extend_from_slice(&f.data[1..]);
                *seq = (*seq + 1) & 0x0F;
                if buf.len() >= *len {
                    let total = *len;
                    if let Some((_, mut bytes, _)) = pending.take() {
                        bytes.truncate(total);
                        out.push(Message { source, bytes });
                    }
                }
            }
            // Flow control, sent by the tester side
            0x3 => {}
            _ => return Err(malformed(&f.data)),
        }
    }
    if let Some((len, buf, _)) = pending {
        log::debug!("Incomplete multi-frame response, {} of {len} bytes", buf.len());
        return Err(DecodeError::MalformedFrame(format!("incomplete, {} of {len} bytes", buf.len())));
    }
    Ok(out)
}

/// Groups frames by sender and reassembles them into messages, in first seen sender order
pub fn assemble(frames: Vec<Frame>, format: FrameFormat) -> DecodeResult<Vec<Message>> {
    match format {
        FrameFormat::Can11 | FrameFormat::Can29 => {
            let mut groups: Vec<(Option<u32>, Vec<Frame>)> = Vec::new();
            for f in frames {
                match groups.iter_mut().find(|(src, _)| *src == f.source) {
                    Some((_, group)) => group.push(f),
                    None => groups.push((f.source, vec![f])),
                }
            }
            let mut out = Vec::new();
            for (source, group) in groups {
                out.extend(isotp_messages(source, &group)?);
            }
            Ok(out)
        }
        FrameFormat::Legacy(_) | FrameFormat::Headerless => Ok(frames
            .into_iter()
            .map(|f| Message {
                source: f.source,
                bytes: f.data,
            })
            .collect()),
    }
}

/// Headers off: the adapter strips PCI bytes itself, and prints multi-frame CAN responses
/// as a byte count line followed by `N:` prefixed lines
fn headerless_messages(lines: &[String]) -> DecodeResult<Vec<Message>> {
    let mut messages = Vec::new();
    let mut multi: Option<(usize, Vec<u8>)> = None;
    let flush = |multi: &mut Option<(usize, Vec<u8>)>, messages: &mut Vec<Message>| {
        if let Some((len, mut bytes)) = multi.take() {
            bytes.truncate(len);
            messages.push(Message { source: None, bytes });
        }
    };
    for line in lines {
        let digits = compact(line);
        if let Some((_, rest)) = digits.split_once(':') {
            let bytes = hex_bytes(rest)?;
            match multi.as_mut() {
                Some((_, buf)) => buf.extend_from_slice(&bytes),
                None => multi = Some((usize::MAX, bytes)),
            }
        } else if digits.len() == 3 {
            flush(&mut multi, &mut messages);
            let len = usize::from_str_radix(&digits, 16).map_err(|_| DecodeError::InvalidHex(line.clone()))?;
            multi = Some((len, Vec::new()));
        } else {
            flush(&mut multi, &mut messages);
            messages.push(Message {
                source: None,
                bytes: hex_bytes(&digits)?,
            });
        }
    }
    flush(&mut multi, &mut messages);
    Ok(messages)
}

/// Turns a raw response into messages, or the reason it holds none
pub fn split_messages(raw: &str, request: &str, format: FrameFormat) -> Result<Vec<Message>, NullReason> {
    let lines = clean_lines(raw, Some(request));
    if let Some(reason) = non_data_reason(&lines) {
        return Err(reason);
    }
    if lines.is_empty() {
        return Err(NullReason::NoData);
    }
    let messages = if format == FrameFormat::Headerless {
        headerless_messages(&lines)
    } else {
        lines
            .iter()
            .map(|l| parse_frame(l, format))
            .collect::<DecodeResult<Vec<_>>>()
            .and_then(|frames| assemble(frames, format))
    };
    messages.map_err(NullReason::Decode)
}

fn select_message(mut messages: Vec<Message>, cmd: &ObdCommand) -> Result<Message, NullReason> {
    if let Some(pos) = messages.iter().position(|m| cmd.matches_response(&m.bytes)) {
        return Ok(messages.swap_remove(pos));
    }
    if let Some(neg) = messages
        .iter()
        .find(|m| m.bytes.first() == Some(&NEGATIVE_RESPONSE) && m.bytes.get(1) == Some(&cmd.mode))
    {
        return Err(NullReason::NegativeResponse(neg.bytes.get(2).copied().unwrap_or(0)));
    }
    if cmd.lenient_header {
        let positive = cmd.mode.wrapping_add(0x40);
        let pos = messages
            .iter()
            .position(|m| m.bytes.first() == Some(&positive))
            .or_else(|| {
                messages
                    .iter()
                    .position(|m| m.bytes.first().is_some_and(|b| *b != NEGATIVE_RESPONSE))
            });
        if let Some(pos) = pos {
            return Ok(messages.swap_remove(pos));
        }
    }
    Err(NullReason::WrongResponse)
}

/// Decodes the raw text an adapter returned for `cmd`
pub fn decode_response(raw: &str, cmd: &ObdCommand, format: FrameFormat) -> ObdResponse {
    let message = match split_messages(raw, &cmd.request(), format).and_then(|m| select_message(m, cmd)) {
        Ok(m) => m,
        Err(reason) => return ObdResponse::null(cmd.name, reason),
    };
    match cmd.decode(&message.bytes) {
        Ok(value) => ObdResponse {
            command: cmd.name,
            raw_bytes: message.bytes,
            ecu_source: message.source,
            value: Some(value),
            null_reason: None,
        },
        Err(e) => ObdResponse {
            command: cmd.name,
            raw_bytes: message.bytes,
            ecu_source: message.source,
            value: None,
            null_reason: Some(NullReason::Decode(e)),
        },
    }
}

/// True if a Mode 22 reply is positive: some message starts with `0x62` and none is a
/// negative response
pub fn is_positive_mode22(raw: &str, request: &str, format: FrameFormat) -> bool {
    match split_messages(raw, request, format) {
        Ok(messages) => {
            messages.iter().any(|m| m.bytes.first() == Some(&0x62))
                && !messages.iter().any(|m| m.bytes.first() == Some(&NEGATIVE_RESPONSE))
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obd2::{enhanced::GM_OIL_PRESSURE, MonitorStatus, ObdValue, PIDS_A, RPM, STATUS};

    #[test]
    fn cleans_echo_prompt_and_search_chatter() {
        let lines = clean_lines("010C\rSEARCHING...\r7E8 04 41 0C 1A F8\r\r>", Some("010C"));
        assert_eq!(lines, vec!["7E8 04 41 0C 1A F8".to_string()]);
        assert!(clean_lines("BUS INIT: ...OK\r>", None).is_empty());
    }

    #[test]
    fn status_replies_are_null() {
        for (raw, reason) in [
            ("NO DATA\r\r>", NullReason::NoData),
            ("UNABLE TO CONNECT\r\r>", NullReason::Unable),
            ("STOPPED\r\r>", NullReason::Stopped),
            ("?\r\r>", NullReason::Rejected),
            ("CAN ERROR\r\r>", NullReason::BusError("CAN ERROR".into())),
            ("BUS INIT: ...ERROR\r\r>", NullReason::BusError("BUS INIT: ...ERROR".into())),
        ] {
            let r = decode_response(raw, &RPM, FrameFormat::Can11);
            assert!(r.is_null());
            assert_eq!(r.null_reason, Some(reason), "{raw}");
        }
        assert_eq!(
            decode_response("\r\r>", &RPM, FrameFormat::Can11).null_reason,
            Some(NullReason::NoData)
        );
    }

    #[test]
    fn can11_single_frame() {
        let r = decode_response("7E8 04 41 0C 1A F8\r\r>", &RPM, FrameFormat::Can11);
        assert_eq!(r.value, Some(ObdValue::quantity(1726.0, crate::obd2::Unit::Rpm)));
        assert_eq!(r.ecu_source, Some(0x7E8));
        assert_eq!(r.raw_bytes, vec![0x41, 0x0C, 0x1A, 0xF8]);

        // Spaces off (ATS0)
        let r = decode_response("7E804410C1AF8\r\r>", &RPM, FrameFormat::Can11);
        assert_eq!(r.value_f64(), Some(1726.0));
    }

    #[test]
    fn can29_picks_the_matching_ecu() {
        let raw = "18 DA F1 18 03 7F 01 12\r18 DA F1 10 06 41 00 BE 1F A8 13\r\r>";
        let r = decode_response(raw, &PIDS_A, FrameFormat::Can29);
        assert_eq!(r.ecu_source, Some(0x18DAF110));
        assert_eq!(r.value.as_ref().and_then(|v| v.as_bits()).map(|b| b.len()), Some(32));
    }

    #[test]
    fn can_multi_frame_is_reassembled() {
        let raw = "7E8 10 0B 41 01 83 07\r7E8 21 E5 00 AA BB CC\r7E8 22 DD EE 00 00 00\r\r>";
        let messages = split_messages(raw, "0101", FrameFormat::Can11).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].bytes,
            vec![0x41, 0x01, 0x83, 0x07, 0xE5, 0x00, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE]
        );
        let r = decode_response(raw, &STATUS, FrameFormat::Can11);
        assert_eq!(r.value.as_ref().and_then(|v| v.as_status()), Some(&MonitorStatus::from_bytes(0x83, 0x07)));
    }

    #[test]
    fn out_of_sequence_frames_are_malformed() {
        let raw = "7E8 10 0B 41 01 83 07\r7E8 22 E5 00 AA BB CC\r\r>";
        let r = decode_response(raw, &STATUS, FrameFormat::Can11);
        assert!(matches!(r.null_reason, Some(NullReason::Decode(DecodeError::MalformedFrame(_)))));
    }

    #[test]
    fn legacy_checksums() {
        assert_eq!(j1850_crc(&[0x00, 0x00, 0x00, 0x00]), 0x59);
        assert_eq!(j1850_crc(&[0xF2, 0x01, 0x83]), 0x37);
        assert_eq!(iso_checksum(&[0x48, 0x6B, 0x10, 0x41, 0x0C, 0x1A, 0xF8]), 0x22);

        let vpw = decode_response("48 6B 10 41 0C 1A F8 B2\r\r>", &RPM, FrameFormat::Legacy(LegacyChecksum::J1850Crc));
        assert_eq!(vpw.value_f64(), Some(1726.0));
        assert_eq!(vpw.ecu_source, Some(0x10));

        let kwp = decode_response("48 6B 10 41 0C 1A F8 22\r\r>", &RPM, FrameFormat::Legacy(LegacyChecksum::ByteSum));
        assert_eq!(kwp.value_f64(), Some(1726.0));

        let corrupt = decode_response("48 6B 10 41 0C 1A F9 B2\r\r>", &RPM, FrameFormat::Legacy(LegacyChecksum::J1850Crc));
        assert!(matches!(
            corrupt.null_reason,
            Some(NullReason::Decode(DecodeError::ChecksumMismatch { .. }))
        ));
    }

    #[test]
    fn negative_and_unrelated_responses() {
        let neg = decode_response("7E8 03 7F 01 12\r\r>", &RPM, FrameFormat::Can11);
        assert_eq!(neg.null_reason, Some(NullReason::NegativeResponse(0x12)));

        let other = decode_response("7E8 03 41 0D 3C\r\r>", &RPM, FrameFormat::Can11);
        assert_eq!(other.null_reason, Some(NullReason::WrongResponse));

        let garbage = decode_response("7E8 04 41 0C ZZ\r\r>", &RPM, FrameFormat::Can11);
        assert!(matches!(garbage.null_reason, Some(NullReason::Decode(DecodeError::InvalidHex(_)))));
    }

    #[test]
    fn headerless_responses() {
        let r = decode_response("41 0C 1A F8\r\r>", &RPM, FrameFormat::Headerless);
        assert_eq!(r.value_f64(), Some(1726.0));
        assert_eq!(r.ecu_source, None);

        let vin = "014\r0: 49 02 01 31 47 31\r1: 4A 43 35 34 34 34 52\r2: 37 32 35 32 33 36 37\r\r>";
        let messages = split_messages(vin, "0902", FrameFormat::Headerless).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].bytes.len(), 0x14);
        assert_eq!(&messages[0].bytes[..3], &[0x49, 0x02, 0x01]);
    }

    #[test]
    fn mode22_positive_classification() {
        assert!(is_positive_mode22("7E8 04 62 11 5C 50\r\r>", "22115C", FrameFormat::Can11));
        assert!(!is_positive_mode22("7E8 03 7F 22 31\r\r>", "22115C", FrameFormat::Can11));
        assert!(!is_positive_mode22("NO DATA\r\r>", "22115C", FrameFormat::Can11));
        assert!(!is_positive_mode22("?\r\r>", "22115C", FrameFormat::Can11));
        assert!(is_positive_mode22("62 11 5C 50\r\r>", "22115C", FrameFormat::Headerless));
    }

    #[test]
    fn lenient_commands_accept_shifted_headers() {
        let r = decode_response("7E8 04 62 11 5D 50\r\r>", &GM_OIL_PRESSURE, FrameFormat::Can11);
        assert!((r.value_f64().unwrap() - 34.5).abs() < 1e-9);
    }

    #[test]
    fn lenient_commands_prefer_their_own_mode() {
        let raw = "7E8 04 41 0C 1A F8\r7E9 04 62 11 5D 50\r\r>";
        let r = decode_response(raw, &GM_OIL_PRESSURE, FrameFormat::Can11);
        assert_eq!(r.ecu_source, Some(0x7E9));
        assert!((r.value_f64().unwrap() - 34.5).abs() < 1e-9);

        let raw = "7E9 04 62 11 5D 50\r7E8 04 41 0C 1A F8\r\r>";
        let r = decode_response(raw, &GM_OIL_PRESSURE, FrameFormat::Can11);
        assert_eq!(r.raw_bytes, vec![0x62, 0x11, 0x5D, 0x50]);
    }

    #[test]
    fn encodes_requests() {
        assert_eq!(encode_request(&RPM), b"010C\r".to_vec());
        assert_eq!(encode_at("ATZ"), b"ATZ\r".to_vec());
    }
}
