//! Implements a dummy controller and timers for testing.
use std::future::pending;
use std::vec::Vec;

use tcpm_traits::{CcStatus, DataRole, Polarity, PowerRole, Tpc, TpcError, TxStatus, TxType};

use crate::port::PortHandle;
use crate::timers::Timer;

/// A controller operation observed by the dummy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpcOp {
    Init,
    SetCc(CcStatus),
    SetPolarity(Polarity),
    SetVconn(bool),
    SetPdRx(bool),
    SetPdHeader(PowerRole, DataRole),
}

/// A dummy controller that records every contract call and transmitted
/// frame, and completes transmissions synchronously through the port's
/// notification handle, like a controller with interrupt-driven completion
/// reporting would.
pub struct DummyTpc<'a> {
    handle: PortHandle<'a>,

    /// The completion status reported for each transmission.
    pub tx_status: TxStatus,
    /// Whether transmission completions are reported at all.
    pub report_tx_complete: bool,
    /// VBUS level returned by `get_vbus`.
    pub vbus: bool,

    ops: Vec<TpcOp>,
    transmitted: Vec<(TxType, Vec<u8>)>,
}

impl<'a> DummyTpc<'a> {
    /// Create a dummy controller reporting successful transmissions through
    /// `handle`.
    pub fn new(handle: PortHandle<'a>) -> Self {
        Self {
            handle,
            tx_status: TxStatus::Success,
            report_tx_complete: true,
            vbus: false,
            ops: Vec::new(),
            transmitted: Vec::new(),
        }
    }

    /// Probe the oldest transmitted frame.
    pub fn probe_transmitted(&mut self) -> (TxType, Vec<u8>) {
        self.transmitted.remove(0)
    }

    /// Whether any transmitted frames are left to probe.
    pub fn has_transmitted(&self) -> bool {
        !self.transmitted.is_empty()
    }

    /// Drop all recorded frames.
    pub fn drain_transmitted(&mut self) {
        self.transmitted.clear();
    }

    /// All recorded contract calls so far.
    pub fn ops(&self) -> &[TpcOp] {
        &self.ops
    }
}

impl Tpc for DummyTpc<'_> {
    async fn init(&mut self) -> Result<(), TpcError> {
        self.ops.push(TpcOp::Init);
        Ok(())
    }

    async fn get_vbus(&mut self) -> bool {
        self.vbus
    }

    async fn set_cc(&mut self, cc: CcStatus) -> Result<(), TpcError> {
        self.ops.push(TpcOp::SetCc(cc));
        Ok(())
    }

    async fn set_polarity(&mut self, polarity: Polarity) -> Result<(), TpcError> {
        self.ops.push(TpcOp::SetPolarity(polarity));
        Ok(())
    }

    async fn set_vconn(&mut self, on: bool) -> Result<(), TpcError> {
        self.ops.push(TpcOp::SetVconn(on));
        Ok(())
    }

    async fn set_pd_rx(&mut self, on: bool) -> Result<(), TpcError> {
        self.ops.push(TpcOp::SetPdRx(on));
        Ok(())
    }

    async fn set_pd_header(&mut self, power_role: PowerRole, data_role: DataRole) -> Result<(), TpcError> {
        self.ops.push(TpcOp::SetPdHeader(power_role, data_role));
        Ok(())
    }

    async fn pd_transmit(&mut self, tx_type: TxType, message: Option<&[u8]>) -> Result<(), TpcError> {
        self.transmitted
            .push((tx_type, message.map(|data| data.to_vec()).unwrap_or_default()));

        if self.report_tx_complete {
            self.handle.pd_transmit_complete(self.tx_status);
        }

        Ok(())
    }
}

/// A timer that expires immediately, driving every delayed transition and
/// timeout as soon as no event is pending.
pub struct InstantTimer {}

impl Timer for InstantTimer {
    async fn after_millis(_milliseconds: u64) {}
}

/// A timer that never expires.
pub struct NeverTimer {}

impl Timer for NeverTimer {
    async fn after_millis(_milliseconds: u64) {
        pending().await
    }
}
