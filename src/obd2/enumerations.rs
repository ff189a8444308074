//! Enumeration data for Mode 01 status and fuel type PIDs

use std::fmt::{Display, Formatter};

use bitflags::bitflags;

/// Vehicle fuel type coding for PID 51
#[derive(Debug, Clone, Copy, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub enum FuelTypeCoding {
    /// Fuel type unavailable
    NotAvailable,
    /// Gasoline engine
    Gasoline,
    /// Methanol engine
    Methanol,
    /// Ethanol engine
    Ethanol,
    /// Diesel engine
    Diesel,
    /// LPG engine
    Lpg,
    /// CNG engine
    Cng,
    /// Propane engine
    Propane,
    /// Electric
    Electric,
    /// Bifuel engine running gasoline
    BifuelGasoline,
    /// Bifuel engine running methanol
    BifuelMethanol,
    /// Bifuel engine running ethanol
    BifuelEthanol,
    /// Bifuel engine running LPG
    BifuelLpg,
    /// Bifuel engine running CNG
    BifuelCng,
    /// Bifuel engine running propane
    BifuelPropane,
    /// Bifuel running electricity
    BifuelElectricity,
    /// Bifuel running electric and combustion engine
    BifuelElectricAndCombustion,
    /// Hybrid gasoline
    HybridGasoline,
    /// Hybrid ethanol
    HybridEthanol,
    /// Hybrid diesel
    HybridDiesel,
    /// Hybrid electric
    HybridElectric,
    /// Hybrid running electric and combustion engine
    HybridElectricAndCombustion,
    /// Hybrid regenerative
    HybridRegen,
    /// Bifuel running diesel
    BifuelDiesel,
    /// Coding reserved by ISO/SAE
    Reserved(u8),
}

const FUEL_TYPES: [FuelTypeCoding; 24] = [
    FuelTypeCoding::NotAvailable,
    FuelTypeCoding::Gasoline,
    FuelTypeCoding::Methanol,
    FuelTypeCoding::Ethanol,
    FuelTypeCoding::Diesel,
    FuelTypeCoding::Lpg,
    FuelTypeCoding::Cng,
    FuelTypeCoding::Propane,
    FuelTypeCoding::Electric,
    FuelTypeCoding::BifuelGasoline,
    FuelTypeCoding::BifuelMethanol,
    FuelTypeCoding::BifuelEthanol,
    FuelTypeCoding::BifuelLpg,
    FuelTypeCoding::BifuelCng,
    FuelTypeCoding::BifuelPropane,
    FuelTypeCoding::BifuelElectricity,
    FuelTypeCoding::BifuelElectricAndCombustion,
    FuelTypeCoding::HybridGasoline,
    FuelTypeCoding::HybridEthanol,
    FuelTypeCoding::HybridDiesel,
    FuelTypeCoding::HybridElectric,
    FuelTypeCoding::HybridElectricAndCombustion,
    FuelTypeCoding::HybridRegen,
    FuelTypeCoding::BifuelDiesel,
];

impl FuelTypeCoding {
    /// Name shown on the dashboard
    pub fn name(&self) -> &'static str {
        match self {
            FuelTypeCoding::NotAvailable => "Not available",
            FuelTypeCoding::Gasoline => "Gasoline",
            FuelTypeCoding::Methanol => "Methanol",
            FuelTypeCoding::Ethanol => "Ethanol",
            FuelTypeCoding::Diesel => "Diesel",
            FuelTypeCoding::Lpg => "LPG",
            FuelTypeCoding::Cng => "CNG",
            FuelTypeCoding::Propane => "Propane",
            FuelTypeCoding::Electric => "Electric",
            FuelTypeCoding::BifuelGasoline => "Bifuel running Gasoline",
            FuelTypeCoding::BifuelMethanol => "Bifuel running Methanol",
            FuelTypeCoding::BifuelEthanol => "Bifuel running Ethanol",
            FuelTypeCoding::BifuelLpg => "Bifuel running LPG",
            FuelTypeCoding::BifuelCng => "Bifuel running CNG",
            FuelTypeCoding::BifuelPropane => "Bifuel running Propane",
            FuelTypeCoding::BifuelElectricity => "Bifuel running Electricity",
            FuelTypeCoding::BifuelElectricAndCombustion => "Bifuel running electric and combustion engine",
            FuelTypeCoding::HybridGasoline => "Hybrid gasoline",
            FuelTypeCoding::HybridEthanol => "Hybrid Ethanol",
            FuelTypeCoding::HybridDiesel => "Hybrid Diesel",
            FuelTypeCoding::HybridElectric => "Hybrid Electric",
            FuelTypeCoding::HybridElectricAndCombustion => "Hybrid running electric and combustion engine",
            FuelTypeCoding::HybridRegen => "Hybrid Regenerative",
            FuelTypeCoding::BifuelDiesel => "Bifuel running diesel",
            FuelTypeCoding::Reserved(_) => "Reserved",
        }
    }
}

impl From<u8> for FuelTypeCoding {
    fn from(x: u8) -> Self {
        FUEL_TYPES.get(x as usize).copied().unwrap_or(Self::Reserved(x))
    }
}

impl Display for FuelTypeCoding {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FuelTypeCoding::Reserved(x) => write!(f, "Reserved (0x{x:02X})"),
            other => f.write_str(other.name()),
        }
    }
}

bitflags! {
    /// Byte B of PID 01: which continuous monitors exist and which have not completed
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct MonitorFlags: u8 {
        /// Misfire monitor available
        const MISFIRE_AVAILABLE = 0b0000_0001;
        /// Fuel system monitor available
        const FUEL_SYSTEM_AVAILABLE = 0b0000_0010;
        /// Comprehensive component monitor available
        const COMPONENTS_AVAILABLE = 0b0000_0100;
        /// Compression ignition (diesel) engine
        const COMPRESSION_IGNITION = 0b0000_1000;
        /// Misfire monitor incomplete
        const MISFIRE_INCOMPLETE = 0b0001_0000;
        /// Fuel system monitor incomplete
        const FUEL_SYSTEM_INCOMPLETE = 0b0010_0000;
        /// Comprehensive component monitor incomplete
        const COMPONENTS_INCOMPLETE = 0b0100_0000;
    }
}

/// Monitor status since DTCs cleared (PID 01)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MonitorStatus {
    /// Malfunction indicator lamp (check engine light) is on
    pub mil: bool,
    /// Number of emission related DTCs stored
    pub dtc_count: u8,
    /// Continuous monitor flags
    pub monitors: MonitorFlags,
}

impl MonitorStatus {
    /// Decodes bytes A and B of a PID 01 response
    pub fn from_bytes(a: u8, b: u8) -> Self {
        Self {
            mil: a & 0x80 != 0,
            dtc_count: a & 0x7F,
            monitors: MonitorFlags::from_bits_truncate(b),
        }
    }
}

impl Display for MonitorStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MIL {}, {} DTC(s)",
            if self.mil { "on" } else { "off" },
            self.dtc_count
        )
    }
}
