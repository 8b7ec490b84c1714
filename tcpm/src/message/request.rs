//! Request data objects: a sink's selection among the advertised source
//! capabilities.
use proc_bitfield::bitfield;
use uom::si::electric_current::centiampere;

use crate::_250milliwatts_mod::_250milliwatts;
use crate::units::{ElectricCurrent, Power};

bitfield! {
    /// A request data object of unknown layout; only the object position is
    /// decoded. The remaining fields depend on the kind of PDO the position
    /// refers to.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct RawRequest(pub u32): Debug, FromStorage, IntoStorage {
        /// Selected object position, valid range 1..=7
        pub object_position: u8 @ 28..=30,
        /// Capability mismatch
        pub capability_mismatch: bool @ 26,
    }
}

bitfield! {
    /// A request against a fixed or variable supply PDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct FixedVariableRequest(pub u32): Debug, FromStorage, IntoStorage {
        /// Selected object position, valid range 1..=7
        pub object_position: u8 @ 28..=30,
        /// GiveBack supported
        pub giveback_flag: bool @ 27,
        /// Capability mismatch
        pub capability_mismatch: bool @ 26,
        /// USB communications capable
        pub usb_communications_capable: bool @ 25,
        /// No USB suspend
        pub no_usb_suspend: bool @ 24,
        /// Operating current in 10 mA units
        pub raw_operating_current: u16 @ 10..=19,
        /// Maximum operating current in 10 mA units
        pub raw_max_operating_current: u16 @ 0..=9,
    }
}

impl FixedVariableRequest {
    /// Create a request from an object position and milliampere figures,
    /// truncated to the 10 mA encoding step.
    pub fn new(object_position: u8, operating_ma: u32, max_operating_ma: u32) -> Self {
        Self(0)
            .with_object_position(object_position)
            .with_raw_operating_current((operating_ma / 10) as u16)
            .with_raw_max_operating_current((max_operating_ma / 10) as u16)
    }

    /// Operating current.
    pub fn operating_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_operating_current().into())
    }

    /// Maximum operating current.
    pub fn max_operating_current(&self) -> ElectricCurrent {
        ElectricCurrent::new::<centiampere>(self.raw_max_operating_current().into())
    }
}

bitfield! {
    /// A request against a battery PDO.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct BatteryRequest(pub u32): Debug, FromStorage, IntoStorage {
        /// Selected object position, valid range 1..=7
        pub object_position: u8 @ 28..=30,
        /// GiveBack supported
        pub giveback_flag: bool @ 27,
        /// Capability mismatch
        pub capability_mismatch: bool @ 26,
        /// USB communications capable
        pub usb_communications_capable: bool @ 25,
        /// No USB suspend
        pub no_usb_suspend: bool @ 24,
        /// Operating power in 250 mW units
        pub raw_operating_power: u16 @ 10..=19,
        /// Maximum operating power in 250 mW units
        pub raw_max_operating_power: u16 @ 0..=9,
    }
}

impl BatteryRequest {
    /// Create a request from an object position and milliwatt figures,
    /// truncated to the 250 mW encoding step.
    pub fn new(object_position: u8, operating_mw: u32, max_operating_mw: u32) -> Self {
        Self(0)
            .with_object_position(object_position)
            .with_raw_operating_power((operating_mw / 250) as u16)
            .with_raw_max_operating_power((max_operating_mw / 250) as u16)
    }

    /// Operating power.
    pub fn operating_power(&self) -> Power {
        Power::new::<_250milliwatts>(self.raw_operating_power().into())
    }

    /// Maximum operating power.
    pub fn max_operating_power(&self) -> Power {
        Power::new::<_250milliwatts>(self.raw_max_operating_power().into())
    }
}

#[cfg(test)]
mod tests {
    use uom::si::electric_current::milliampere;
    use uom::si::power::milliwatt;

    use super::*;

    #[test]
    fn fixed_request_round_trip() {
        let request = FixedVariableRequest::new(3, 2000, 2000).with_capability_mismatch(true);
        let decoded = FixedVariableRequest(request.0);

        assert_eq!(decoded.object_position(), 3);
        assert_eq!(decoded.operating_current().get::<milliampere>(), 2000);
        assert_eq!(decoded.max_operating_current().get::<milliampere>(), 2000);
        assert!(decoded.capability_mismatch());
    }

    #[test]
    fn request_current_truncates_to_10ma() {
        let request = FixedVariableRequest::new(1, 1234, 1509);

        assert_eq!(request.operating_current().get::<milliampere>(), 1230);
        assert_eq!(request.max_operating_current().get::<milliampere>(), 1500);
    }

    #[test]
    fn battery_request_round_trip() {
        let request = BatteryRequest::new(2, 18000, 24000);
        let decoded = BatteryRequest(request.0);

        assert_eq!(decoded.object_position(), 2);
        assert_eq!(decoded.operating_power().get::<milliwatt>(), 18000);
        assert_eq!(decoded.max_operating_power().get::<milliwatt>(), 24000);
    }

    #[test]
    fn operating_and_maximum_fields_are_distinct() {
        let request = FixedVariableRequest::new(1, 1500, 500);

        assert_eq!(request.raw_operating_current(), 150);
        assert_eq!(request.raw_max_operating_current(), 50);
        assert_ne!(
            request.operating_current().get::<milliampere>(),
            request.max_operating_current().get::<milliampere>()
        );
    }
}
