//! Events delivered to a port, and the notification handle drivers use to
//! deliver them.
use tcpm_traits::{CcStatus, TxStatus};

use crate::message::Message;
use crate::typec::TypecPort;

/// A role swap requested through the facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SwapKind {
    /// Swap host/device roles.
    DataRole,
    /// Swap source/sink roles.
    PowerRole,
    /// Swap the VCONN source.
    Vconn,
}

/// Events serialized onto a port's state machine.
///
/// Events are handled in arrival order, under exclusive access to the port
/// state. Transmit completions are not events; they resolve the in-progress
/// transmission directly.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// The terminations observed on the CC pins changed.
    CcChange {
        /// Status of the CC1 pin.
        cc1: CcStatus,
        /// Status of the CC2 pin.
        cc2: CcStatus,
    },
    /// VBUS became present.
    VbusOn,
    /// VBUS went away.
    VbusOff,
    /// A message was received.
    PdMessage(Message),
    /// Hard Reset signaling was received.
    HardResetReceived,
    /// The controller was reset and must be reinitialized.
    TpcReset,
    /// The facade requested a role swap.
    SwapRequest(SwapKind),
}

/// The opaque handle a TPC driver uses to notify a port.
///
/// Cheap to copy; all methods serialize their event into the port's queue.
/// The driver never holds the port itself, keeping ownership one-way.
#[derive(Clone, Copy)]
pub struct PortHandle<'a> {
    port: &'a TypecPort,
}

impl<'a> PortHandle<'a> {
    pub(crate) fn new(port: &'a TypecPort) -> Self {
        Self { port }
    }

    /// Report a change of the CC pin terminations.
    pub async fn cc_change(&self, cc1: CcStatus, cc2: CcStatus) {
        self.port.events.send(Event::CcChange { cc1, cc2 }).await;
    }

    /// Report that VBUS became present.
    pub async fn vbus_on(&self) {
        self.port.events.send(Event::VbusOn).await;
    }

    /// Report that VBUS went away.
    pub async fn vbus_off(&self) {
        self.port.events.send(Event::VbusOff).await;
    }

    /// Deliver a received message in wire format.
    ///
    /// Frames that do not parse are counted against the link by dropping
    /// them; the protocol timers recover.
    pub async fn pd_receive(&self, data: &[u8]) {
        match Message::from_bytes(data) {
            Ok(message) => self.port.events.send(Event::PdMessage(message)).await,
            Err(error) => warn!("Dropping malformed frame: {:?}", error),
        }
    }

    /// Resolve the in-progress transmission.
    pub fn pd_transmit_complete(&self, status: TxStatus) {
        self.port.tx_complete.signal(status);
    }

    /// Report received Hard Reset signaling.
    pub async fn hard_reset_received(&self) {
        self.port.events.send(Event::HardResetReceived).await;
    }

    /// Report that the controller reset itself and lost its configuration.
    pub async fn tpc_reset(&self) {
        self.port.events.send(Event::TpcReset).await;
    }
}
