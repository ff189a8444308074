//! OBD bus protocols as numbered by the ELM327 (`ATSPn` / `ATDPN`)

/// Checksum carried by legacy (non CAN) frames
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LegacyChecksum {
    /// SAE J1850 CRC-8
    J1850Crc,
    /// ISO 9141 / KWP2000 byte sum
    ByteSum,
}

/// How a response line is laid out when headers are on
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FrameFormat {
    /// 3 byte header, data, checksum byte
    Legacy(LegacyChecksum),
    /// 3 hex digit identifier, then ISO-TP PCI and data
    Can11,
    /// 4 byte identifier, then ISO-TP PCI and data
    Can29,
    /// Bare data bytes (headers off, or protocol unknown)
    Headerless,
}

/// OBD-II bus protocols an ELM327 can speak
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Hash, Default, strum_macros::Display, strum_macros::EnumIter,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ObdProtocol {
    /// Automatic protocol detection
    #[default]
    #[strum(serialize = "Automatic")]
    Auto,
    /// SAE J1850 PWM (41.6 kbaud)
    #[strum(serialize = "SAE J1850 PWM")]
    J1850Pwm,
    /// SAE J1850 VPW (10.4 kbaud)
    #[strum(serialize = "SAE J1850 VPW")]
    J1850Vpw,
    /// ISO 9141-2 (5 baud init)
    #[strum(serialize = "ISO 9141-2")]
    Iso9141_2,
    /// ISO 14230-4 KWP (5 baud init)
    #[strum(serialize = "ISO 14230-4 (KWP 5BAUD)")]
    Iso14230_4Kwp,
    /// ISO 14230-4 KWP (fast init)
    #[strum(serialize = "ISO 14230-4 (KWP FAST)")]
    Iso14230_4KwpFast,
    /// ISO 15765-4 CAN (11 bit ID, 500 kbaud)
    #[strum(serialize = "ISO 15765-4 (CAN 11/500)")]
    Iso15765_4Can11bit500,
    /// ISO 15765-4 CAN (29 bit ID, 500 kbaud)
    #[strum(serialize = "ISO 15765-4 (CAN 29/500)")]
    Iso15765_4Can29bit500,
    /// ISO 15765-4 CAN (11 bit ID, 250 kbaud)
    #[strum(serialize = "ISO 15765-4 (CAN 11/250)")]
    Iso15765_4Can11bit250,
    /// ISO 15765-4 CAN (29 bit ID, 250 kbaud)
    #[strum(serialize = "ISO 15765-4 (CAN 29/250)")]
    Iso15765_4Can29bit250,
}

impl ObdProtocol {
    /// ELM327 protocol number
    pub fn number(&self) -> u8 {
        match self {
            ObdProtocol::Auto => 0,
            ObdProtocol::J1850Pwm => 1,
            ObdProtocol::J1850Vpw => 2,
            ObdProtocol::Iso9141_2 => 3,
            ObdProtocol::Iso14230_4Kwp => 4,
            ObdProtocol::Iso14230_4KwpFast => 5,
            ObdProtocol::Iso15765_4Can11bit500 => 6,
            ObdProtocol::Iso15765_4Can29bit500 => 7,
            ObdProtocol::Iso15765_4Can11bit250 => 8,
            ObdProtocol::Iso15765_4Can29bit250 => 9,
        }
    }

    /// Protocol for an ELM327 protocol number
    pub fn from_number(n: u8) -> Option<Self> {
        use strum::IntoEnumIterator;
        Self::iter().find(|p| p.number() == n)
    }

    /// Parses an `ATDPN` reply such as `A6` or `3`. The `A` prefix marks a protocol
    /// found by automatic search.
    pub fn from_dpn(reply: &str) -> Option<Self> {
        let reply = reply.trim();
        let digit = reply.strip_prefix('A').unwrap_or(reply);
        if digit.len() != 1 {
            return None;
        }
        u8::from_str_radix(digit, 16).ok().and_then(Self::from_number)
    }

    /// Get the ELM327 AT command selecting this protocol
    pub fn to_elm_command(&self) -> String {
        format!("ATSP{}", self.number())
    }

    /// Check if this is a CAN protocol
    pub fn is_can(&self) -> bool {
        matches!(self.frame_format(), FrameFormat::Can11 | FrameFormat::Can29)
    }

    /// Frame layout of responses on this protocol with headers on
    pub fn frame_format(&self) -> FrameFormat {
        match self {
            ObdProtocol::Auto => FrameFormat::Headerless,
            ObdProtocol::J1850Pwm | ObdProtocol::J1850Vpw => FrameFormat::Legacy(LegacyChecksum::J1850Crc),
            ObdProtocol::Iso9141_2 | ObdProtocol::Iso14230_4Kwp | ObdProtocol::Iso14230_4KwpFast => {
                FrameFormat::Legacy(LegacyChecksum::ByteSum)
            }
            ObdProtocol::Iso15765_4Can11bit500 | ObdProtocol::Iso15765_4Can11bit250 => FrameFormat::Can11,
            ObdProtocol::Iso15765_4Can29bit500 | ObdProtocol::Iso15765_4Can29bit250 => FrameFormat::Can29,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dpn_replies() {
        assert_eq!(ObdProtocol::from_dpn("A6"), Some(ObdProtocol::Iso15765_4Can11bit500));
        assert_eq!(ObdProtocol::from_dpn("3"), Some(ObdProtocol::Iso9141_2));
        assert_eq!(ObdProtocol::from_dpn("A0"), Some(ObdProtocol::Auto));
        assert_eq!(ObdProtocol::from_dpn("AB"), None);
        assert_eq!(ObdProtocol::from_dpn("?"), None);
    }

    #[test]
    fn frame_formats() {
        assert_eq!(ObdProtocol::J1850Vpw.frame_format(), FrameFormat::Legacy(LegacyChecksum::J1850Crc));
        assert_eq!(ObdProtocol::Iso14230_4KwpFast.frame_format(), FrameFormat::Legacy(LegacyChecksum::ByteSum));
        assert_eq!(ObdProtocol::Iso15765_4Can29bit250.frame_format(), FrameFormat::Can29);
        assert!(ObdProtocol::Iso15765_4Can11bit500.is_can());
        assert_eq!(ObdProtocol::Auto.to_elm_command(), "ATSP0");
    }
}
