//! Built in Mode 01 and Mode 06 commands and their SAE J1979 decoders

use super::{decode_pid_response, DecodeError, DecodeResult, FuelTypeCoding, MonitorStatus, ObdCommand, ObdValue, Unit};

/// Data bytes after the mode and PID echo of a Mode 01/06 response
fn data(message: &[u8], need: usize) -> DecodeResult<&[u8]> {
    let d = message.get(2..).unwrap_or_default();
    if d.len() < need {
        return Err(DecodeError::TooShort {
            need: need + 2,
            got: message.len(),
        });
    }
    Ok(&d[..need])
}

fn word(d: &[u8]) -> f64 {
    (d[0] as f64) * 256.0 + d[1] as f64
}

fn pid_bitmap(m: &[u8]) -> DecodeResult<ObdValue> {
    Ok(ObdValue::Bitfield(decode_pid_response(data(m, 4)?)))
}

fn monitor_status(m: &[u8]) -> DecodeResult<ObdValue> {
    let d = data(m, 4)?;
    Ok(ObdValue::Status(MonitorStatus::from_bytes(d[0], d[1])))
}

fn percent(m: &[u8]) -> DecodeResult<ObdValue> {
    let d = data(m, 1)?;
    Ok(ObdValue::quantity(d[0] as f64 * 100.0 / 255.0, Unit::Percent))
}

fn percent_word(m: &[u8]) -> DecodeResult<ObdValue> {
    let d = data(m, 2)?;
    Ok(ObdValue::quantity(word(d) * 100.0 / 255.0, Unit::Percent))
}

fn temperature(m: &[u8]) -> DecodeResult<ObdValue> {
    let d = data(m, 1)?;
    Ok(ObdValue::quantity(d[0] as f64 - 40.0, Unit::Celsius))
}

fn pressure(m: &[u8]) -> DecodeResult<ObdValue> {
    let d = data(m, 1)?;
    Ok(ObdValue::quantity(d[0] as f64, Unit::KiloPascal))
}

fn rpm(m: &[u8]) -> DecodeResult<ObdValue> {
    let d = data(m, 2)?;
    Ok(ObdValue::quantity(word(d) / 4.0, Unit::Rpm))
}

fn speed(m: &[u8]) -> DecodeResult<ObdValue> {
    let d = data(m, 1)?;
    Ok(ObdValue::quantity(d[0] as f64, Unit::KilometersPerHour))
}

fn seconds(m: &[u8]) -> DecodeResult<ObdValue> {
    let d = data(m, 2)?;
    Ok(ObdValue::quantity(word(d), Unit::Seconds))
}

fn voltage(m: &[u8]) -> DecodeResult<ObdValue> {
    let d = data(m, 2)?;
    Ok(ObdValue::quantity(word(d) / 1000.0, Unit::Volts))
}

fn fuel_type(m: &[u8]) -> DecodeResult<ObdValue> {
    let d = data(m, 1)?;
    Ok(ObdValue::Text(FuelTypeCoding::from(d[0]).to_string()))
}

macro_rules! obd_command {
    ($ident:ident, $name:literal, $desc:literal, $mode:literal, $pid:literal, $len:literal, $decoder:ident) => {
        #[doc = $desc]
        pub const $ident: ObdCommand = ObdCommand {
            name: $name,
            desc: $desc,
            mode: $mode,
            pid: &[$pid],
            expected_response_len: $len,
            lenient_header: false,
            decoder: $decoder,
        };
    };
}

obd_command!(PIDS_A, "PIDS_A", "Supported PIDs [01-20]", 0x01, 0x00, 6, pid_bitmap);
obd_command!(STATUS, "STATUS", "Status since DTCs cleared", 0x01, 0x01, 6, monitor_status);
obd_command!(ENGINE_LOAD, "ENGINE_LOAD", "Calculated Engine Load", 0x01, 0x04, 3, percent);
obd_command!(COOLANT_TEMP, "COOLANT_TEMP", "Engine Coolant Temperature", 0x01, 0x05, 3, temperature);
obd_command!(INTAKE_PRESSURE, "INTAKE_PRESSURE", "Intake Manifold Pressure", 0x01, 0x0B, 3, pressure);
obd_command!(RPM, "RPM", "Engine RPM", 0x01, 0x0C, 4, rpm);
obd_command!(SPEED, "SPEED", "Vehicle Speed", 0x01, 0x0D, 3, speed);
obd_command!(INTAKE_TEMP, "INTAKE_TEMP", "Intake Air Temp", 0x01, 0x0F, 3, temperature);
obd_command!(THROTTLE_POS, "THROTTLE_POS", "Throttle Position", 0x01, 0x11, 3, percent);
obd_command!(RUN_TIME, "RUN_TIME", "Engine Run Time", 0x01, 0x1F, 4, seconds);
obd_command!(PIDS_B, "PIDS_B", "Supported PIDs [21-40]", 0x01, 0x20, 6, pid_bitmap);
obd_command!(FUEL_LEVEL, "FUEL_LEVEL", "Fuel Level Input", 0x01, 0x2F, 3, percent);
obd_command!(BAROMETRIC_PRESSURE, "BAROMETRIC_PRESSURE", "Barometric Pressure", 0x01, 0x33, 3, pressure);
obd_command!(PIDS_C, "PIDS_C", "Supported PIDs [41-60]", 0x01, 0x40, 6, pid_bitmap);
obd_command!(CONTROL_MODULE_VOLTAGE, "CONTROL_MODULE_VOLTAGE", "Control module voltage", 0x01, 0x42, 4, voltage);
obd_command!(ABSOLUTE_LOAD, "ABSOLUTE_LOAD", "Absolute load value", 0x01, 0x43, 4, percent_word);
obd_command!(ACCELERATOR_POS_D, "ACCELERATOR_POS_D", "Accelerator pedal position D", 0x01, 0x49, 3, percent);
obd_command!(FUEL_TYPE, "FUEL_TYPE", "Fuel Type", 0x01, 0x51, 3, fuel_type);
obd_command!(OIL_TEMP, "OIL_TEMP", "Engine oil temperature", 0x01, 0x5C, 3, temperature);

obd_command!(MIDS_A, "MIDS_A", "Supported MIDs [01-20]", 0x06, 0x00, 6, pid_bitmap);
obd_command!(MIDS_B, "MIDS_B", "Supported MIDs [21-40]", 0x06, 0x20, 6, pid_bitmap);
obd_command!(MIDS_C, "MIDS_C", "Supported MIDs [41-60]", 0x06, 0x40, 6, pid_bitmap);
obd_command!(MIDS_D, "MIDS_D", "Supported MIDs [61-80]", 0x06, 0x60, 6, pid_bitmap);
obd_command!(MIDS_E, "MIDS_E", "Supported MIDs [81-A0]", 0x06, 0x80, 6, pid_bitmap);
obd_command!(MIDS_F, "MIDS_F", "Supported MIDs [A1-C0]", 0x06, 0xA0, 6, pid_bitmap);

/// Every built in command
pub const STANDARD_COMMANDS: [ObdCommand; 25] = [
    PIDS_A,
    STATUS,
    ENGINE_LOAD,
    COOLANT_TEMP,
    INTAKE_PRESSURE,
    RPM,
    SPEED,
    INTAKE_TEMP,
    THROTTLE_POS,
    RUN_TIME,
    PIDS_B,
    FUEL_LEVEL,
    BAROMETRIC_PRESSURE,
    PIDS_C,
    CONTROL_MODULE_VOLTAGE,
    ABSOLUTE_LOAD,
    ACCELERATOR_POS_D,
    FUEL_TYPE,
    OIL_TEMP,
    MIDS_A,
    MIDS_B,
    MIDS_C,
    MIDS_D,
    MIDS_E,
    MIDS_F,
];

#[cfg(test)]
mod tests {
    use super::*;

    fn value(cmd: &ObdCommand, message: &[u8]) -> f64 {
        cmd.decode(message).unwrap().as_f64().unwrap()
    }

    #[test]
    fn sae_formulas() {
        assert_eq!(value(&RPM, &[0x41, 0x0C, 0x1A, 0xF8]), 1726.0);
        assert_eq!(value(&SPEED, &[0x41, 0x0D, 0x3C]), 60.0);
        assert_eq!(value(&COOLANT_TEMP, &[0x41, 0x05, 0x7B]), 83.0);
        assert_eq!(value(&COOLANT_TEMP, &[0x41, 0x05, 0x00]), -40.0);
        assert_eq!(value(&INTAKE_PRESSURE, &[0x41, 0x0B, 0x21]), 33.0);
        assert_eq!(value(&ENGINE_LOAD, &[0x41, 0x04, 0xFF]), 100.0);
        assert!((value(&THROTTLE_POS, &[0x41, 0x11, 0x33]) - 20.0).abs() < 0.01);
        assert_eq!(value(&RUN_TIME, &[0x41, 0x1F, 0x0E, 0x8D]), 3725.0);
        assert!((value(&CONTROL_MODULE_VOLTAGE, &[0x41, 0x42, 0x36, 0xB0]) - 14.0).abs() < 0.01);
        assert!((value(&ABSOLUTE_LOAD, &[0x41, 0x43, 0x00, 0x80]) - 50.196).abs() < 0.01);
    }

    #[test]
    fn fuel_type_and_status() {
        let fuel = FUEL_TYPE.decode(&[0x41, 0x51, 0x01]).unwrap();
        assert_eq!(fuel.as_text(), Some("Gasoline"));

        let status = STATUS.decode(&[0x41, 0x01, 0x82, 0x07, 0xE5, 0x00]).unwrap();
        let status = status.as_status().unwrap();
        assert!(status.mil);
        assert_eq!(status.dtc_count, 2);
    }

    #[test]
    fn short_responses_are_decode_errors() {
        assert_eq!(
            RPM.decode(&[0x41, 0x0C, 0x1A]),
            Err(DecodeError::TooShort { need: 4, got: 3 })
        );
        assert!(PIDS_A.decode(&[0x41, 0x00, 0xBE]).is_err());
    }

    #[test]
    fn expected_lengths_match_decoders() {
        for cmd in STANDARD_COMMANDS {
            let mut message = cmd.response_header();
            message.resize(cmd.expected_response_len, 0);
            assert!(cmd.decode(&message).is_ok(), "{cmd} failed on a full length response");
        }
    }
}
