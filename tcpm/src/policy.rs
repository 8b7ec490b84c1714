//! Capability selection and request validation.
//!
//! Sink side: pick the advertised source PDO that maximizes usable power
//! within the board limits, and build the matching request data object.
//! Source side: validate a received request against the advertised
//! capabilities.
use uom::si::electric_current::milliampere;
use uom::si::electric_potential::millivolt;
use uom::si::power::milliwatt;

use crate::config::PortConfig;
use crate::message::pdo::{PowerDataObject, SourceCapabilities};
use crate::message::request::{BatteryRequest, FixedVariableRequest, RawRequest};

/// Errors from capability selection and request validation.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PolicyError {
    /// No advertised PDO satisfies the board's voltage limit.
    #[error("no capability fits the board limits")]
    NoneFits,
    /// The request names an object position outside the advertised table.
    #[error("invalid object position `{0}`")]
    InvalidIndex(u8),
    /// The request exceeds the selected capability without signaling a
    /// mismatch.
    #[error("request exceeds the selected capability")]
    ExceedsCapability,
}

/// The declared voltage of a PDO: the fixed voltage for fixed supplies, the
/// minimum voltage otherwise.
fn pdo_voltage_mv(pdo: &PowerDataObject) -> Option<u32> {
    match pdo {
        PowerDataObject::FixedSupply(fixed) => Some(fixed.voltage().get::<millivolt>()),
        PowerDataObject::Battery(battery) => Some(battery.min_voltage().get::<millivolt>()),
        PowerDataObject::VariableSupply(variable) => Some(variable.min_voltage().get::<millivolt>()),
        PowerDataObject::Unknown(_) => None,
    }
}

/// Select the source PDO providing the most power while staying within the
/// board's voltage limit. Earlier object positions win ties.
///
/// Returns the zero-based index into the capabilities.
pub fn select_sink_pdo(capabilities: &SourceCapabilities, config: &PortConfig) -> Result<usize, PolicyError> {
    let max_snk_mv = config.max_snk_voltage.get::<millivolt>();
    let max_snk_ma = config.max_snk_current.get::<milliampere>();

    let mut selected = Err(PolicyError::NoneFits);
    let mut max_mw = 0;

    for (index, pdo) in capabilities.pdos().iter().enumerate() {
        let Some(mv) = pdo_voltage_mv(pdo) else {
            continue;
        };

        let mw = match pdo {
            PowerDataObject::Battery(battery) => battery.max_power().get::<milliwatt>(),
            PowerDataObject::FixedSupply(fixed) => {
                let ma = fixed.max_current().get::<milliampere>().min(max_snk_ma);
                ma * mv / 1000
            }
            PowerDataObject::VariableSupply(variable) => {
                let ma = variable.max_current().get::<milliampere>().min(max_snk_ma);
                ma * mv / 1000
            }
            PowerDataObject::Unknown(_) => continue,
        };

        if mw > max_mw && mv <= max_snk_mv {
            selected = Ok(index);
            max_mw = mw;
        }
    }

    selected
}

/// Build the request data object for the capability at `index`, capping the
/// requested current and power by the board limits.
///
/// The capability-mismatch flag is set when the resulting power falls short
/// of the board's operating requirement.
pub fn build_request(capabilities: &SourceCapabilities, index: usize, config: &PortConfig) -> Result<RawRequest, PolicyError> {
    let pdo = capabilities
        .pdos()
        .get(index)
        .ok_or(PolicyError::InvalidIndex(index as u8 + 1))?;
    let mv = match pdo_voltage_mv(pdo) {
        Some(mv) if mv > 0 => mv,
        _ => return Err(PolicyError::NoneFits),
    };

    let max_snk_ma = config.max_snk_current.get::<milliampere>();
    let max_snk_mw = config.max_snk_power.get::<milliwatt>();
    let operating_snk_mw = config.operating_snk_power.get::<milliwatt>();

    // Maximum available current within the board's power limit.
    let ma = match pdo {
        PowerDataObject::Battery(battery) => {
            let mw = battery.max_power().get::<milliwatt>().min(max_snk_mw);
            1000 * mw / mv
        }
        PowerDataObject::FixedSupply(fixed) => fixed.max_current().get::<milliampere>().min(1000 * max_snk_mw / mv),
        PowerDataObject::VariableSupply(variable) => {
            variable.max_current().get::<milliampere>().min(1000 * max_snk_mw / mv)
        }
        PowerDataObject::Unknown(_) => return Err(PolicyError::NoneFits),
    };
    let ma = ma.min(max_snk_ma);
    let mw = ma * mv / 1000;

    let mismatch = mw < operating_snk_mw;
    let object_position = index as u8 + 1;

    let raw = if matches!(pdo, PowerDataObject::Battery(_)) {
        trace!("Requesting PDO {}, {} mV, {} mW", object_position, mv, mw);
        RawRequest(BatteryRequest::new(object_position, mw, mw).with_capability_mismatch(mismatch).0)
    } else {
        trace!("Requesting PDO {}, {} mV, {} mA", object_position, mv, ma);
        RawRequest(
            FixedVariableRequest::new(object_position, ma, ma)
                .with_capability_mismatch(mismatch)
                .0,
        )
    };

    Ok(raw)
}

/// Validate a received request against our advertised source capabilities.
///
/// The object position must name an advertised PDO. Operating and maximum
/// figures above the capability's limit are rejected unless the request
/// signals a capability mismatch.
pub fn check_request(request: RawRequest, src_pdo: &[PowerDataObject]) -> Result<(), PolicyError> {
    let position = request.object_position();
    if position == 0 || position as usize > src_pdo.len() {
        return Err(PolicyError::InvalidIndex(position));
    }

    let pdo = &src_pdo[position as usize - 1];
    match pdo {
        PowerDataObject::FixedSupply(_) | PowerDataObject::VariableSupply(_) => {
            let decoded = FixedVariableRequest(request.0);
            let op = decoded.operating_current().get::<milliampere>();
            let max = decoded.max_operating_current().get::<milliampere>();
            let limit = match pdo {
                PowerDataObject::FixedSupply(fixed) => fixed.max_current().get::<milliampere>(),
                PowerDataObject::VariableSupply(variable) => variable.max_current().get::<milliampere>(),
                _ => unreachable!(),
            };

            if (op > limit || max > limit) && !decoded.capability_mismatch() {
                return Err(PolicyError::ExceedsCapability);
            }

            trace!("Requested {} mA of {} mA for {} / {} mA", op, limit, op, max);
        }
        PowerDataObject::Battery(battery) => {
            let decoded = BatteryRequest(request.0);
            let op = decoded.operating_power().get::<milliwatt>();
            let max = decoded.max_operating_power().get::<milliwatt>();
            let limit = battery.max_power().get::<milliwatt>();

            if (op > limit || max > limit) && !decoded.capability_mismatch() {
                return Err(PolicyError::ExceedsCapability);
            }

            trace!("Requested {} mW of {} mW for {} / {} mW", op, limit, op, max);
        }
        PowerDataObject::Unknown(_) => return Err(PolicyError::InvalidIndex(position)),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use heapless::Vec;
    use uom::si::electric_current::milliampere;
    use uom::si::electric_potential::millivolt;
    use uom::si::power::milliwatt;

    use super::*;
    use crate::PowerRole;
    use crate::config::PortType;
    use crate::message::pdo::{Battery, FixedSupply};
    use crate::units::{ElectricCurrent, ElectricPotential, Power};

    fn sink_config(max_mv: u32, max_ma: u32, max_mw: u32, operating_mw: u32) -> PortConfig {
        PortConfig {
            src_pdo: Vec::new(),
            snk_pdo: [PowerDataObject::FixedSupply(FixedSupply::new(5000, 3000))]
                .into_iter()
                .collect(),
            max_snk_voltage: ElectricPotential::new::<millivolt>(max_mv),
            max_snk_current: ElectricCurrent::new::<milliampere>(max_ma),
            max_snk_power: Power::new::<milliwatt>(max_mw),
            operating_snk_power: Power::new::<milliwatt>(operating_mw),
            port_type: PortType::Sink,
            default_role: PowerRole::Sink,
        }
    }

    fn three_fixed_levels() -> SourceCapabilities {
        SourceCapabilities(
            [
                PowerDataObject::FixedSupply(
                    FixedSupply::new(5000, 3000)
                        .with_dual_role_power(true)
                        .with_usb_communications_capable(true)
                        .with_dual_role_data(true),
                ),
                PowerDataObject::FixedSupply(FixedSupply::new(9000, 3000)),
                PowerDataObject::FixedSupply(FixedSupply::new(12000, 3000)),
            ]
            .into_iter()
            .collect(),
        )
    }

    #[test]
    fn selects_highest_power_under_voltage_cap() {
        let config = sink_config(12000, 3000, 24000, 12000);
        let capabilities = three_fixed_levels();

        // 12 V x 3 A is the largest offer at or below 12 V.
        assert_eq!(select_sink_pdo(&capabilities, &config), Ok(2));
    }

    #[test]
    fn voltage_cap_excludes_higher_levels() {
        let config = sink_config(9000, 3000, 27000, 12000);
        let capabilities = three_fixed_levels();

        assert_eq!(select_sink_pdo(&capabilities, &config), Ok(1));
    }

    #[test]
    fn earlier_index_wins_power_ties() {
        let config = sink_config(20000, 3000, 60000, 12000);
        let capabilities = SourceCapabilities(
            [
                PowerDataObject::FixedSupply(FixedSupply::new(15000, 2000)),
                PowerDataObject::FixedSupply(FixedSupply::new(10000, 3000)),
            ]
            .into_iter()
            .collect(),
        );

        // Both offer 30 W.
        assert_eq!(select_sink_pdo(&capabilities, &config), Ok(0));
    }

    #[test]
    fn no_fit_is_an_error() {
        let config = sink_config(4000, 3000, 24000, 12000);
        assert_eq!(
            select_sink_pdo(&three_fixed_levels(), &config),
            Err(PolicyError::NoneFits)
        );
    }

    #[test]
    fn request_caps_current_by_board_power() {
        // 12 V selected, 24 W board limit: 2 A requested, no mismatch.
        let config = sink_config(12000, 3000, 24000, 12000);
        let capabilities = three_fixed_levels();

        let index = select_sink_pdo(&capabilities, &config).unwrap();
        assert_eq!(index, 2);

        let request = FixedVariableRequest(build_request(&capabilities, index, &config).unwrap().0);
        assert_eq!(request.object_position(), 3);
        assert_eq!(request.operating_current().get::<milliampere>(), 2000);
        assert_eq!(request.max_operating_current().get::<milliampere>(), 2000);
        assert!(!request.capability_mismatch());
    }

    #[test]
    fn short_offer_sets_mismatch() {
        // 5 V x 3 A = 15 W offered, 27 W needed for operation.
        let config = sink_config(5000, 3000, 45000, 27000);
        let capabilities = three_fixed_levels();

        let request = FixedVariableRequest(build_request(&capabilities, 0, &config).unwrap().0);
        assert!(request.capability_mismatch());
    }

    #[test]
    fn battery_request_carries_power() {
        let config = sink_config(21000, 3000, 24000, 12000);
        let capabilities = SourceCapabilities(
            [PowerDataObject::Battery(Battery::new(4750, 21000, 45000))]
                .into_iter()
                .collect(),
        );

        let index = select_sink_pdo(&capabilities, &config).unwrap();
        let request = BatteryRequest(build_request(&capabilities, index, &config).unwrap().0);

        assert_eq!(request.object_position(), 1);
        // Power capped by the board limit, then by the current limit at the
        // minimum voltage.
        assert!(request.operating_power().get::<milliwatt>() <= 24000);
    }

    #[test]
    fn check_rejects_overcurrent_without_mismatch() {
        let src_pdo = [PowerDataObject::FixedSupply(FixedSupply::new(5000, 1500))];
        let request = RawRequest(FixedVariableRequest::new(1, 2000, 2000).0);

        assert_eq!(check_request(request, &src_pdo), Err(PolicyError::ExceedsCapability));
    }

    #[test]
    fn check_accepts_overcurrent_with_mismatch() {
        let src_pdo = [PowerDataObject::FixedSupply(FixedSupply::new(5000, 1500))];
        let request = RawRequest(FixedVariableRequest::new(1, 2000, 2000).with_capability_mismatch(true).0);

        assert_eq!(check_request(request, &src_pdo), Ok(()));
    }

    #[test]
    fn check_rejects_out_of_range_positions() {
        let src_pdo = [PowerDataObject::FixedSupply(FixedSupply::new(5000, 1500))];

        assert_eq!(
            check_request(RawRequest(FixedVariableRequest::new(0, 500, 500).0), &src_pdo),
            Err(PolicyError::InvalidIndex(0))
        );
        assert_eq!(
            check_request(RawRequest(FixedVariableRequest::new(2, 500, 500).0), &src_pdo),
            Err(PolicyError::InvalidIndex(2))
        );
    }

    #[test]
    fn check_accepts_in_range_request() {
        let src_pdo = [PowerDataObject::FixedSupply(FixedSupply::new(5000, 1500))];
        let request = RawRequest(FixedVariableRequest::new(1, 1500, 1500).0);

        assert_eq!(check_request(request, &src_pdo), Ok(()));
    }
}
