//! Type-C port controller traits.
//!
//! Provides the contract through which a port manager drives a Type-C port
//! controller (TPC): a register-level device that terminates the CC pins,
//! switches VCONN, and performs PHY-level USB-PD framing, CRC and GoodCRC
//! handling.
#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]
use core::future::Future;

/// Termination presented on (or observed at) a CC pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CcStatus {
    /// No termination.
    Open,
    /// Powered-cable/accessory termination.
    Ra,
    /// Sink termination.
    Rd,
    /// Source termination, default USB current.
    RpDefault,
    /// Source termination, 1.5 A.
    Rp1_5,
    /// Source termination, 3.0 A.
    Rp3_0,
}

impl CcStatus {
    /// Whether the pin shows any termination at all.
    pub fn is_connected(&self) -> bool {
        !matches!(self, CcStatus::Open)
    }
}

/// Plug orientation, named for the CC pin that carries the signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Polarity {
    /// CC1 carries the configuration channel.
    Cc1,
    /// CC2 carries the configuration channel.
    Cc2,
}

/// Power role of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerRole {
    /// Supplies VBUS.
    Source,
    /// Consumes VBUS.
    Sink,
}

impl From<bool> for PowerRole {
    fn from(value: bool) -> Self {
        match value {
            false => Self::Sink,
            true => Self::Source,
        }
    }
}

impl From<PowerRole> for bool {
    fn from(role: PowerRole) -> bool {
        match role {
            PowerRole::Sink => false,
            PowerRole::Source => true,
        }
    }
}

/// Data role of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataRole {
    /// Upstream facing port (device).
    Device,
    /// Downstream facing port (host).
    Host,
}

impl From<bool> for DataRole {
    fn from(value: bool) -> Self {
        match value {
            false => Self::Device,
            true => Self::Host,
        }
    }
}

impl From<DataRole> for bool {
    fn from(role: DataRole) -> bool {
        match role {
            DataRole::Device => false,
            DataRole::Host => true,
        }
    }
}

/// Kinds of transmissions a controller can be asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxType {
    /// An SOP message towards the port partner.
    Sop,
    /// Hard Reset signaling.
    HardReset,
    /// Cable Reset signaling.
    CableReset,
    /// BIST carrier mode 2.
    BistMode2,
}

/// Outcome of a transmission, reported through the port's notification
/// handle once the controller has resolved it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxStatus {
    /// Acknowledged by the port partner.
    Success,
    /// Dropped by the controller, e.g. due to an incoming message.
    Discarded,
    /// No acknowledgement after all controller-level retries.
    Failed,
}

/// Errors reported by controller operations.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TpcError {
    /// Register access failed.
    Bus,
    /// The controller does not implement the requested operation.
    Unsupported,
}

/// Controller trait, through which the port manager commands the TPC.
///
/// Implementations own all register access, bounded retry during `init`, and
/// PHY-level concerns (CRC, GoodCRC generation, message retry). Events -
/// CC changes, VBUS transitions, received messages, transmit completions and
/// hard resets - are delivered to the port manager through its notification
/// handle, never through return values of this trait.
pub trait Tpc {
    /// Bring up the controller.
    ///
    /// Idempotent. Must leave alerts unmasked for CC changes, VBUS
    /// transitions, message reception, transmit completion (success, failure
    /// and discard) and received Hard Reset signaling.
    fn init(&mut self) -> impl Future<Output = Result<(), TpcError>>;

    /// Instantaneous VBUS presence.
    fn get_vbus(&mut self) -> impl Future<Output = bool>;

    /// Present a termination on the CC pins.
    fn set_cc(&mut self, cc: CcStatus) -> impl Future<Output = Result<(), TpcError>>;

    /// Commit the plug orientation.
    fn set_polarity(&mut self, polarity: Polarity) -> impl Future<Output = Result<(), TpcError>>;

    /// Switch the VCONN supply.
    fn set_vconn(&mut self, on: bool) -> impl Future<Output = Result<(), TpcError>>;

    /// Enable or disable reception of SOP messages and Hard Reset signaling.
    fn set_pd_rx(&mut self, on: bool) -> impl Future<Output = Result<(), TpcError>>;

    /// Set the roles the controller stamps into hardware-generated headers
    /// (GoodCRC).
    fn set_pd_header(
        &mut self,
        power_role: PowerRole,
        data_role: DataRole,
    ) -> impl Future<Output = Result<(), TpcError>>;

    /// Start a transmission.
    ///
    /// `message` carries the serialized message for [`TxType::Sop`] and is
    /// `None` for reset signaling and BIST. Completion is reported
    /// asynchronously with a [`TxStatus`]; an `Ok` return only means the
    /// transmission was accepted by the controller.
    fn pd_transmit(
        &mut self,
        tx_type: TxType,
        message: Option<&[u8]>,
    ) -> impl Future<Output = Result<(), TpcError>>;
}
