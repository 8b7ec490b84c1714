//! The externally visible port object.
//!
//! A [`TypecPort`] is the shared endpoint between three parties: the
//! [`crate::port::Port`] task that owns all mutable state, the TPC driver
//! that delivers events through a [`crate::port::PortHandle`], and
//! application code that observes the port and requests role swaps.
//!
//! Registration of a port is the pair of constructions:
//!
//! ```ignore
//! static TYPEC: TypecPort = TypecPort::new();
//!
//! let mut port = Port::<_, ItsTimer>::new(tpc, &CONFIG, &TYPEC);
//! let handle = TYPEC.handle(); // hand this to the TPC driver
//! port.run().await?;
//! ```
//!
//! Dropping the port task unregisters the port.
use core::cell::Cell;

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use tcpm_traits::{DataRole, Polarity, PowerRole, TxStatus};

use crate::port::{Event, PortHandle, SwapKind};

/// Power operation mode of an attached port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerOperationMode {
    /// Type-C default or current-advertisement power.
    Usb,
    /// An explicit USB-PD contract is in force.
    Pd,
}

/// Snapshot of the externally visible port attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PortStatus {
    /// Present power role.
    pub power_role: PowerRole,
    /// Present data role.
    pub data_role: DataRole,
    /// Committed plug orientation.
    pub polarity: Polarity,
    /// Present power operation mode.
    pub power_operation_mode: PowerOperationMode,
    /// Whether a partner or accessory is attached.
    pub attached: bool,
}

impl PortStatus {
    const fn unattached() -> Self {
        Self {
            power_role: PowerRole::Sink,
            data_role: DataRole::Device,
            polarity: Polarity::Cc1,
            power_operation_mode: PowerOperationMode::Usb,
            attached: false,
        }
    }
}

/// Why a requested role swap did not complete.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SwapError {
    /// The port partner did not answer within the response deadline.
    #[error("no response from port partner")]
    Timeout,
    /// The port partner rejected the swap.
    #[error("swap rejected")]
    Rejected,
    /// The swap was abandoned: the partner asked to wait, or the port was
    /// not in a ready state.
    #[error("swap cancelled")]
    Cancelled,
    /// The port type does not allow this swap.
    #[error("swap not supported by this port")]
    Invalid,
}

/// The externally visible port object.
///
/// Const-constructible so it can live in a `static`. One port task and any
/// number of observers may share it; swap operations must be serialized by
/// the caller (there is a single completion slot, and a second concurrent
/// request would steal the first one's result).
pub struct TypecPort {
    pub(crate) events: Channel<CriticalSectionRawMutex, Event, 8>,
    pub(crate) tx_complete: Signal<CriticalSectionRawMutex, TxStatus>,
    pub(crate) swap_complete: Signal<CriticalSectionRawMutex, Result<(), SwapError>>,
    status: Mutex<CriticalSectionRawMutex, Cell<PortStatus>>,
}

impl TypecPort {
    /// Create an unattached port object.
    pub const fn new() -> Self {
        Self {
            events: Channel::new(),
            tx_complete: Signal::new(),
            swap_complete: Signal::new(),
            status: Mutex::new(Cell::new(PortStatus::unattached())),
        }
    }

    /// The notification handle through which a TPC driver feeds this port.
    pub fn handle(&self) -> PortHandle<'_> {
        PortHandle::new(self)
    }

    /// Snapshot of the externally visible attributes.
    pub fn status(&self) -> PortStatus {
        self.status.lock(|status| status.get())
    }

    /// Request a data-role swap and wait for its outcome.
    ///
    /// Valid on dual-role ports in a ready state.
    pub async fn dr_swap(&self) -> Result<(), SwapError> {
        self.swap(SwapKind::DataRole).await
    }

    /// Request a power-role swap and wait for its outcome.
    ///
    /// Valid on dual-role ports in a ready state. On success the port
    /// restarts negotiation in the new role.
    pub async fn pr_swap(&self) -> Result<(), SwapError> {
        self.swap(SwapKind::PowerRole).await
    }

    /// Request a VCONN-source swap and wait for its outcome.
    pub async fn vconn_swap(&self) -> Result<(), SwapError> {
        self.swap(SwapKind::Vconn).await
    }

    async fn swap(&self, kind: SwapKind) -> Result<(), SwapError> {
        self.swap_complete.reset();
        self.events.send(Event::SwapRequest(kind)).await;
        self.swap_complete.wait().await
    }

    pub(crate) fn publish_status(&self, status: PortStatus) {
        self.status.lock(|cell| cell.set(status));
    }
}

impl Default for TypecPort {
    fn default() -> Self {
        Self::new()
    }
}
