//! USB Type-C port manager.
//!
//! Sits between a Type-C port controller (TPC) - the register-level device
//! behind [`tcpm_traits::Tpc`] - and higher-level consumers. Given low-level
//! events (CC changes, VBUS presence, received USB-PD messages, transmit
//! completions), it runs attach/detach detection, orientation selection,
//! the USB-PD 2.0 negotiation engine, and power-, data- and VCONN-role
//! swaps.
//!
//! One [`port::Port`] task owns all mutable state of a physical receptacle.
//! Drivers feed it through the typed notification functions on
//! [`port::PortHandle`]; applications observe and command it through
//! [`typec::TypecPort`].
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

#[macro_use]
mod fmt;

pub mod config;
pub mod counters;
pub mod message;
pub mod policy;
pub mod port;
pub mod timers;
pub mod typec;

#[cfg(test)]
pub(crate) mod dummy;

#[macro_use]
extern crate uom;

pub use tcpm_traits::{DataRole, PowerRole};

/// The unit system used throughout the crate.
///
/// A `u32` ISQ system with milliampere as the base electrical unit, so that
/// millivolt, milliampere and milliwatt values up to the PD 2.0 ranges are
/// exactly representable.
pub mod units {
    ISQ!(
        uom::si,
        u32,
        (millimeter, kilogram, second, milliampere, kelvin, mole, candela)
    );
}

pub(crate) mod _50millivolts_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::electric_potential;

        @_50millivolts: 0.05; "_50mV", "_50millivolts", "_50millivolts";
    }
}

pub(crate) mod _250milliwatts_mod {
    unit! {
        system: uom::si;
        quantity: uom::si::power;

        @_250milliwatts: 0.25; "_250mW", "_250milliwatts", "_250milliwatts";
    }
}

#[cfg(test)]
mod tests {
    use uom::si::electric_current::milliampere;
    use uom::si::electric_potential::millivolt;
    use uom::si::power::milliwatt;

    use super::_50millivolts_mod::_50millivolts;
    use super::units;

    #[test]
    fn test_units() {
        let current = units::ElectricCurrent::new::<milliampere>(3000);
        let potential = units::ElectricPotential::new::<millivolt>(12000);
        let power = units::Power::new::<milliwatt>(36000);

        assert_eq!(current.get::<milliampere>(), 3000);
        assert_eq!(potential.get::<millivolt>(), 12000);
        assert_eq!(potential.get::<_50millivolts>(), 240);
        assert_eq!(power.get::<milliwatt>(), 36000);
    }
}
