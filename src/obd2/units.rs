//! Module for unit conversions and decoded value types
//!
//! The free functions here are the canonical conversions used everywhere in the crate, the
//! GPS path included. The wrapper types keep a value in one base unit and convert on the way out.

use std::fmt::{Display, Formatter};

use super::MonitorStatus;

/// Miles per hour in one knot
pub const KNOTS_TO_MPH: f64 = 1.15078;
/// Miles per hour in one km/h
pub const KPH_TO_MPH: f64 = 0.621371;
/// PSI in one kPa
pub const KPA_TO_PSI: f64 = 0.145038;

/// Knots to miles per hour
pub fn knots_to_mph(knots: f64) -> f64 {
    knots * KNOTS_TO_MPH
}

/// Degrees celsius to degrees fahrenheit
pub fn celsius_to_fahrenheit(c: f64) -> f64 {
    c * 9.0 / 5.0 + 32.0
}

/// Kilometers per hour to miles per hour
pub fn kph_to_mph(kph: f64) -> f64 {
    kph * KPH_TO_MPH
}

/// Kilopascal to PSI
pub fn kpa_to_psi(kpa: f64) -> f64 {
    kpa * KPA_TO_PSI
}

/// Clamps `value` so it is never below `floor`. NaN also becomes `floor`.
pub fn clamp_floor(value: f64, floor: f64) -> f64 {
    if value.is_nan() || value < floor {
        floor
    } else {
        value
    }
}

/// Rounds to a number of decimal places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Wrapper for OBD2 speed values
#[derive(Debug, Copy, Clone, PartialOrd, PartialEq)]
pub struct Speed(f64); // self.0 is in km/h

impl Speed {
    /// From kilometers per hour
    pub fn from_kmh(kmh: f64) -> Self {
        Self(kmh)
    }

    /// From knots
    pub fn from_knots(knots: f64) -> Self {
        Self(knots * 1.852)
    }

    /// Returns the speed in kilometers per hour
    pub fn to_kmh(&self) -> f64 {
        self.0
    }

    /// Returns the speed in miles per hour
    pub fn to_mph(&self) -> f64 {
        kph_to_mph(self.0)
    }
}

/// Wrapper for OBD2 temperature values
#[derive(Debug, Copy, Clone, PartialOrd, PartialEq)]
pub struct Temperature(f64); // self.0 is in *C

impl Temperature {
    /// From celsius
    pub fn from_celsius(c: f64) -> Self {
        Self(c)
    }

    /// Returns the temperature in celsius
    pub fn to_celsius(&self) -> f64 {
        self.0
    }

    /// Returns the temperature in fahrenheit
    pub fn to_fahrenheit(&self) -> f64 {
        celsius_to_fahrenheit(self.0)
    }
}

/// Wrapper for OBD2 pressure values
#[derive(Debug, Copy, Clone, PartialOrd, PartialEq)]
pub struct Pressure(f64); // self.0 is in kPa (Kilopascal)

impl Pressure {
    /// From kPa
    pub fn from_kilo_pascal(kpa: f64) -> Self {
        Self(kpa)
    }

    /// From PSI
    pub fn from_psi(psi: f64) -> Self {
        Self(psi / KPA_TO_PSI)
    }

    /// To kPa
    pub fn to_kilo_pascal(&self) -> f64 {
        self.0
    }

    /// To PSI
    pub fn to_psi(&self) -> f64 {
        kpa_to_psi(self.0)
    }
}

/// Wrapper for OBD2 time values
#[derive(Debug, Copy, Clone, PartialOrd, PartialEq)]
pub struct Time(f64); // self.0 is in seconds

impl Time {
    /// From seconds
    pub fn from_seconds(seconds: f64) -> Self {
        Self(seconds)
    }

    /// To seconds
    pub fn to_seconds(&self) -> f64 {
        self.0
    }

    /// To elapsed time. Format is zero padded HH:MM:SS, hours may exceed 24
    pub fn to_elapsed_string(&self) -> String {
        let total = clamp_floor(self.0, 0.0) as u64;
        format!("{:02}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
    }
}

/// Unit a decoded quantity is expressed in
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, strum_macros::Display)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Unit {
    /// Dimensionless
    #[strum(serialize = "")]
    None,
    /// Percent
    #[strum(serialize = "%")]
    Percent,
    /// Degrees celsius
    #[strum(serialize = "°C")]
    Celsius,
    /// Kilopascal
    #[strum(serialize = "kPa")]
    KiloPascal,
    /// Pounds per square inch
    #[strum(serialize = "psi")]
    Psi,
    /// Revolutions per minute
    #[strum(serialize = "rpm")]
    Rpm,
    /// Kilometers per hour
    #[strum(serialize = "km/h")]
    KilometersPerHour,
    /// Seconds
    #[strum(serialize = "s")]
    Seconds,
    /// Volts
    #[strum(serialize = "V")]
    Volts,
}

/// A decoded response value
#[derive(Debug, Clone, PartialEq)]
pub enum ObdValue {
    /// Number with a unit
    Quantity {
        /// Value
        value: f64,
        /// Unit of `value`
        unit: Unit,
    },
    /// Support bitmap, MSB of the first byte first
    Bitfield(Vec<bool>),
    /// Text, such as the fuel type
    Text(String),
    /// Monitor status (PID 01)
    Status(MonitorStatus),
}

impl ObdValue {
    /// Creates a quantity
    pub fn quantity(value: f64, unit: Unit) -> Self {
        Self::Quantity { value, unit }
    }

    /// Numeric value, if this is a quantity
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ObdValue::Quantity { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Bits, if this is a bitfield
    pub fn as_bits(&self) -> Option<&[bool]> {
        match self {
            ObdValue::Bitfield(b) => Some(b),
            _ => None,
        }
    }

    /// Text, if this is text
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ObdValue::Text(t) => Some(t),
            _ => None,
        }
    }

    /// Monitor status, if this is one
    pub fn as_status(&self) -> Option<&MonitorStatus> {
        match self {
            ObdValue::Status(s) => Some(s),
            _ => None,
        }
    }
}

impl Display for ObdValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ObdValue::Quantity { value, unit: Unit::None } => write!(f, "{value}"),
            ObdValue::Quantity { value, unit } => write!(f, "{value} {unit}"),
            ObdValue::Bitfield(bits) => {
                for b in bits {
                    write!(f, "{}", u8::from(*b))?;
                }
                Ok(())
            }
            ObdValue::Text(t) => write!(f, "{t}"),
            ObdValue::Status(s) => write!(f, "{s}"),
        }
    }
}
