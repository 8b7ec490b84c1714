//! Board-level port configuration, read at registration.
use heapless::Vec;

use crate::PowerRole;
use crate::message::pdo::PowerDataObject;
use crate::units::{ElectricCurrent, ElectricPotential, Power};

/// The roles a physical port can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PortType {
    /// Provides power only.
    Source,
    /// Consumes power only.
    Sink,
    /// Dual-role power port.
    Drp,
}

/// Static configuration of one port.
///
/// PDO tables are advertised verbatim; the sink limits bound what
/// [`crate::policy`] requests from an attached source.
#[derive(Debug, Clone)]
pub struct PortConfig {
    /// Capabilities advertised when sourcing. Empty for sink-only ports.
    pub src_pdo: Vec<PowerDataObject, 7>,
    /// Capabilities advertised when sinking. Empty for source-only ports.
    pub snk_pdo: Vec<PowerDataObject, 7>,

    /// Highest voltage the sink accepts.
    pub max_snk_voltage: ElectricPotential,
    /// Highest current the sink draws.
    pub max_snk_current: ElectricCurrent,
    /// Highest power the sink draws.
    pub max_snk_power: Power,
    /// Power the sink needs for full operation; offers below it are
    /// requested with the capability-mismatch flag.
    pub operating_snk_power: Power,

    /// The roles this port supports.
    pub port_type: PortType,
    /// The power role taken while unattached.
    pub default_role: PowerRole,
}
