//! Power data objects: the capability entries advertised by sources and
//! sinks.
use heapless::Vec;
use proc_bitfield::bitfield;
use uom::si::electric_current::centiampere;

use crate::_50millivolts_mod::_50millivolts;
use crate::_250milliwatts_mod::_250milliwatts;
use crate::units::{ElectricCurrent, ElectricPotential, Power};

/// Kinds of power data objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Kind {
    /// Fixed voltage supply.
    FixedSupply,
    /// Battery supply.
    Battery,
    /// Variable voltage supply.
    VariableSupply,
}

/// A power data object holds information about one source or sink
/// capability.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PowerDataObject {
    /// Fixed voltage supply.
    FixedSupply(FixedSupply),
    /// Battery supply.
    Battery(Battery),
    /// Variable voltage supply.
    VariableSupply(VariableSupply),
    /// Unknown kind of power data object.
    Unknown(RawPowerDataObject),
}

impl PowerDataObject {
    /// The kind this object encodes, if known.
    pub fn kind(&self) -> Option<Kind> {
        match self {
            PowerDataObject::FixedSupply(_) => Some(Kind::FixedSupply),
            PowerDataObject::Battery(_) => Some(Kind::Battery),
            PowerDataObject::VariableSupply(_) => Some(Kind::VariableSupply),
            PowerDataObject::Unknown(_) => None,
        }
    }

    /// The raw 32-bit encoding.
    pub fn to_raw(self) -> u32 {
        match self {
            PowerDataObject::FixedSupply(pdo) => pdo.0,
            PowerDataObject::Battery(pdo) => pdo.0,
            PowerDataObject::VariableSupply(pdo) => pdo.0,
            PowerDataObject::Unknown(pdo) => pdo.0,
        }
    }
}

/// Parse a raw power data object, tagged by its top two bits.
pub fn parse_raw_pdo(raw: u32) -> PowerDataObject {
    match RawPowerDataObject(raw).kind() {
        0b00 => PowerDataObject::FixedSupply(FixedSupply(raw)),
        0b01 => PowerDataObject::Battery(Battery(raw)),
        0b10 => PowerDataObject::VariableSupply(VariableSupply(raw)),
        _ => PowerDataObject::Unknown(RawPowerDataObject(raw)),
    }
}

bitfield! {
    /// A raw power data object.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct RawPowerDataObject(pub u32): Debug, FromStorage, IntoStorage {
        /// The kind of power data object.
        pub kind: u8 @ 30..=31,
    }
}

bitfield! {
    /// A fixed voltage supply PDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct FixedSupply(pub u32): Debug, FromStorage, IntoStorage {
        /// Fixed supply
        pub kind: u8 @ 30..=31,
        /// Dual-role power
        pub dual_role_power: bool @ 29,
        /// USB suspend supported
        pub usb_suspend_supported: bool @ 28,
        /// Unconstrained power
        pub unconstrained_power: bool @ 27,
        /// USB communications capable
        pub usb_communications_capable: bool @ 26,
        /// Dual-role data
        pub dual_role_data: bool @ 25,
        /// Peak current
        pub peak_current: u8 @ 20..=21,
        /// Voltage in 50 mV units
        pub raw_voltage: u16 @ 10..=19,
        /// Maximum current in 10 mA units
        pub raw_max_current: u16 @ 0..=9,
    }
}

#[allow(clippy::derivable_impls)]
impl Default for FixedSupply {
    fn default() -> Self {
        Self(0)
    }
}

impl FixedSupply {
    /// Create a fixed supply PDO from millivolts and milliamperes.
    ///
    /// Values are truncated to the 50 mV and 10 mA encoding steps.
    pub fn new(voltage_mv: u32, max_current_ma: u32) -> Self {
        Self(0)
            .with_raw_voltage((voltage_mv / 50) as u16)
            .with_raw_max_current((max_current_ma / 10) as u16)
    }

    /// Supply voltage.
    pub fn voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_voltage().into())
    }

    /// Maximum supply current.
    pub fn max_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_max_current().into())
    }
}

bitfield! {
    /// A battery supply PDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct Battery(pub u32): Debug, FromStorage, IntoStorage {
        /// Battery
        pub kind: u8 @ 30..=31,
        /// Maximum voltage in 50 mV units
        pub raw_max_voltage: u16 @ 20..=29,
        /// Minimum voltage in 50 mV units
        pub raw_min_voltage: u16 @ 10..=19,
        /// Maximum allowable power in 250 mW units
        pub raw_max_power: u16 @ 0..=9,
    }
}

impl Battery {
    /// Create a battery PDO from millivolts and milliwatts, truncated to the
    /// encoding steps.
    pub fn new(min_voltage_mv: u32, max_voltage_mv: u32, max_power_mw: u32) -> Self {
        Self(0)
            .with_kind(0b01)
            .with_raw_min_voltage((min_voltage_mv / 50) as u16)
            .with_raw_max_voltage((max_voltage_mv / 50) as u16)
            .with_raw_max_power((max_power_mw / 250) as u16)
    }

    /// Maximum supply voltage.
    pub fn max_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_max_voltage().into())
    }

    /// Minimum supply voltage.
    pub fn min_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_min_voltage().into())
    }

    /// Maximum allowable power.
    pub fn max_power(&self) -> Power {
        Power::new::<_250milliwatts>(self.raw_max_power().into())
    }
}

bitfield! {
    /// A variable (non-battery) supply PDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct VariableSupply(pub u32): Debug, FromStorage, IntoStorage {
        /// Variable supply (non-battery)
        pub kind: u8 @ 30..=31,
        /// Maximum voltage in 50 mV units
        pub raw_max_voltage: u16 @ 20..=29,
        /// Minimum voltage in 50 mV units
        pub raw_min_voltage: u16 @ 10..=19,
        /// Maximum current in 10 mA units
        pub raw_max_current: u16 @ 0..=9,
    }
}

impl VariableSupply {
    /// Create a variable supply PDO from millivolts and milliamperes,
    /// truncated to the encoding steps.
    pub fn new(min_voltage_mv: u32, max_voltage_mv: u32, max_current_ma: u32) -> Self {
        Self(0)
            .with_kind(0b10)
            .with_raw_min_voltage((min_voltage_mv / 50) as u16)
            .with_raw_max_voltage((max_voltage_mv / 50) as u16)
            .with_raw_max_current((max_current_ma / 10) as u16)
    }

    /// Maximum supply voltage.
    pub fn max_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_max_voltage().into())
    }

    /// Minimum supply voltage.
    pub fn min_voltage(&self) -> ElectricPotential {
        ElectricPotential::new::<_50millivolts>(self.raw_min_voltage().into())
    }

    /// Maximum supply current.
    pub fn max_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_max_current().into())
    }
}

/// Capabilities advertised by a source.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceCapabilities(pub Vec<PowerDataObject, 7>);

impl SourceCapabilities {
    /// The advertised power data objects, in object-position order.
    pub fn pdos(&self) -> &[PowerDataObject] {
        &self.0
    }
}

/// Capabilities advertised by a sink.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SinkCapabilities(pub Vec<PowerDataObject, 7>);

impl SinkCapabilities {
    /// The advertised power data objects, in object-position order.
    pub fn pdos(&self) -> &[PowerDataObject] {
        &self.0
    }
}
