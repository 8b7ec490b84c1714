//! Timers that drive debounce, response deadlines and recovery.

use core::future::Future;

/// The timer trait to implement by the user application.
pub trait Timer {
    /// Expire after the specified number of milliseconds.
    fn after_millis(milliseconds: u64) -> impl Future<Output = ()>;
}

/// Types of timers that are used for delayed transitions and timeouts.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerType {
    CcDebounce,
    PdDebounce,
    SendSourceCap,
    SenderResponse,
    SourceActivity,
    SinkWaitCap,
    PsTransition,
    SrcTransition,
    PsSourceOff,
    PsSourceOn,
    PsHardReset,
    SrcRecover,
    SrcRecoverMax,
    SrcTurnOn,
    Safe0V,
    VconnSourceOn,
    TpcTxTimeout,
}

impl TimerType {
    /// Duration in milliseconds, as given by the USB PD specification.
    pub const fn millis(self) -> u64 {
        match self {
            TimerType::CcDebounce => 100,
            TimerType::PdDebounce => 15,
            TimerType::SendSourceCap => 100,
            TimerType::SenderResponse => 30,
            TimerType::SourceActivity => 45,
            TimerType::SinkWaitCap => 240,
            TimerType::PsTransition => 500,
            TimerType::SrcTransition => 35,
            TimerType::PsSourceOff => 920,
            TimerType::PsSourceOn => 480,
            TimerType::PsHardReset => 15,
            TimerType::SrcRecover => 760,
            TimerType::SrcRecoverMax => 1000,
            TimerType::SrcTurnOn => 275,
            TimerType::Safe0V => 650,
            TimerType::VconnSourceOn => 100,
            TimerType::TpcTxTimeout => 100,
        }
    }

    /// Create a timer future for a given type.
    pub fn get_timer<TIMER: Timer>(timer_type: TimerType) -> impl Future<Output = ()> {
        TIMER::after_millis(timer_type.millis())
    }
}
