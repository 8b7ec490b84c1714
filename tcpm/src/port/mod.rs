//! The per-port state machine.
//!
//! One [`Port`] task owns a controller and every piece of mutable state of
//! one receptacle. It reacts to events serialized through the port's
//! channel, and to its own delayed transitions. A transition either takes
//! effect immediately ([`Port::set_state`]) and the state loop keeps running
//! handlers until the state settles, or it is scheduled
//! ([`Port::set_state_delayed`]) and enacted when the timer fires; the
//! newest schedule supersedes older ones and at most one is outstanding.

mod event;
mod state;

use core::pin::pin;

use embassy_futures::select::{Either, select};
pub use event::{Event, PortHandle, SwapKind};
pub use state::PortState;
use tcpm_traits::{CcStatus, Polarity, Tpc, TpcError, TxStatus, TxType};

use crate::config::{PortConfig, PortType};
use crate::counters::{Counter, CounterType};
use crate::message::header::{ControlMessageType, DataMessageType, Header, MessageType};
use crate::message::pdo::{SinkCapabilities, SourceCapabilities};
use crate::message::request::RawRequest;
use crate::message::{Data, MAX_MESSAGE_SIZE, Message};
use crate::policy;
use crate::timers::{Timer, TimerType};
use crate::typec::{PortStatus, PowerOperationMode, SwapError, TypecPort};
use crate::{DataRole, PowerRole};

/// Errors that end a port task.
#[derive(thiserror::Error, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PortError {
    /// The controller could not be initialized.
    #[error("controller initialization failed")]
    Init(TpcError),
}

/// Errors of a single transmission.
#[derive(thiserror::Error, Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransmitError {
    /// The controller rejected the transmission.
    #[error("controller error")]
    Tpc(TpcError),
    /// The controller discarded the transmission, e.g. for an incoming
    /// message.
    #[error("transmission discarded")]
    Discarded,
    /// The port partner never acknowledged the transmission.
    #[error("transmission failed")]
    Failed,
    /// The controller did not report a transmission result in time.
    #[error("no transmission result")]
    Timeout,
}

impl From<TpcError> for TransmitError {
    fn from(error: TpcError) -> Self {
        Self::Tpc(error)
    }
}

/// State machine of one physical port.
pub struct Port<'a, TPC: Tpc, TIMER: Timer> {
    tpc: TPC,
    config: &'a PortConfig,
    typec: &'a TypecPort,

    cc1: CcStatus,
    cc2: CcStatus,
    polarity: Polarity,
    vbus_present: bool,

    power_role: PowerRole,
    data_role: DataRole,
    power_operation_mode: PowerOperationMode,
    vconn_source: bool,
    attached: bool,

    state: PortState,
    prev_state: PortState,
    delayed_state: Option<(PortState, u64)>,
    work_queued: bool,

    message_id: Counter,
    caps_count: Counter,
    hard_reset_count: Counter,
    pd_capable: bool,
    explicit_contract: bool,

    source_caps: SourceCapabilities,
    partner_snk_caps: SinkCapabilities,
    sink_request: RawRequest,

    swap_pending: bool,
    swap_failure: SwapError,

    _timer: core::marker::PhantomData<TIMER>,
}

impl<'a, TPC: Tpc, TIMER: Timer> Port<'a, TPC, TIMER> {
    /// Create a port over its controller.
    ///
    /// Together with [`TypecPort::new`] this registers the port; hand the
    /// [`TypecPort::handle`] to the controller driver, then drive the port
    /// with [`Port::run`].
    pub fn new(tpc: TPC, config: &'a PortConfig, typec: &'a TypecPort) -> Self {
        let unattached = match config.default_role {
            PowerRole::Source => PortState::SrcUnattached,
            PowerRole::Sink => PortState::SnkUnattached,
        };

        Self {
            tpc,
            config,
            typec,
            cc1: CcStatus::Open,
            cc2: CcStatus::Open,
            polarity: Polarity::Cc1,
            vbus_present: false,
            power_role: config.default_role,
            data_role: match config.default_role {
                PowerRole::Source => DataRole::Host,
                PowerRole::Sink => DataRole::Device,
            },
            power_operation_mode: PowerOperationMode::Usb,
            vconn_source: false,
            attached: false,
            state: unattached,
            prev_state: unattached,
            delayed_state: None,
            work_queued: false,
            message_id: Counter::new(CounterType::MessageId),
            caps_count: Counter::new(CounterType::Caps),
            hard_reset_count: Counter::new(CounterType::HardReset),
            pd_capable: false,
            explicit_contract: false,
            source_caps: SourceCapabilities::default(),
            partner_snk_caps: SinkCapabilities::default(),
            sink_request: RawRequest(0),
            swap_pending: false,
            swap_failure: SwapError::Cancelled,
            _timer: core::marker::PhantomData,
        }
    }

    /// Run the port until its task is dropped.
    pub async fn run(&mut self) -> Result<(), PortError> {
        self.init().await?;
        self.run_machine().await;

        loop {
            self.step().await;
        }
    }

    /// Allows tests to access the controller directly.
    #[cfg(test)]
    pub(crate) fn tpc(&mut self) -> &mut TPC {
        &mut self.tpc
    }

    /// Capabilities last received from a partner acting as source.
    pub fn partner_source_caps(&self) -> &SourceCapabilities {
        &self.source_caps
    }

    /// Capabilities last received from a partner acting as sink.
    pub fn partner_sink_caps(&self) -> &SinkCapabilities {
        &self.partner_snk_caps
    }

    /// Bring up the controller and enter the default-role unattached state.
    async fn init(&mut self) -> Result<(), PortError> {
        self.tpc.init().await.map_err(PortError::Init)?;
        let _ = self.tpc.set_pd_rx(false).await;
        self.vbus_present = self.tpc.get_vbus().await;

        match self.config.default_role {
            PowerRole::Source => self.set_state(PortState::SrcUnattached),
            PowerRole::Sink => self.set_state(PortState::SnkUnattached),
        }

        Ok(())
    }

    /// Process one wakeup: the next event, or the pending delayed
    /// transition, whichever comes first. Then run the state machine until
    /// it settles.
    async fn step(&mut self) {
        let typec = self.typec;

        if let Some((_, delay_ms)) = self.delayed_state {
            let mut timer = pin!(TIMER::after_millis(delay_ms));

            loop {
                match select(typec.events.receive(), timer.as_mut()).await {
                    Either::First(event) => {
                        let schedule = self.delayed_state;
                        self.handle_event(event).await;
                        if self.work_queued || self.delayed_state != schedule {
                            break;
                        }
                        // Schedule untouched, keep holding the timer.
                    }
                    Either::Second(()) => {
                        if let Some((state, _)) = self.delayed_state.take() {
                            self.enter(state);
                        }
                        break;
                    }
                }
            }
        } else {
            let event = typec.events.receive().await;
            self.handle_event(event).await;
        }

        self.run_machine().await;
    }

    /// Run state handlers as long as immediate transitions are requested.
    async fn run_machine(&mut self) {
        if !core::mem::take(&mut self.work_queued) {
            return;
        }

        loop {
            let entered = self.state;
            self.run_state().await;
            self.work_queued = false;
            if self.state == entered || self.delayed_state.is_some() {
                break;
            }
        }
    }

    /// Transition immediately, superseding any scheduled transition.
    fn set_state(&mut self, state: PortState) {
        debug!("State change {:?} -> {:?}", self.state, state);
        self.delayed_state = None;
        self.enter(state);
    }

    /// Schedule a transition. The newest schedule supersedes older ones.
    fn set_state_delayed(&mut self, state: PortState, delay_ms: u64) {
        debug!("Delayed state change {:?} -> {:?} @ {} ms", self.state, state, delay_ms);
        self.delayed_state = Some((state, delay_ms));
    }

    fn enter(&mut self, state: PortState) {
        self.prev_state = self.state;
        self.state = state;
        self.work_queued = true;
    }

    /// The ready state for the present power role.
    fn ready_state(&self) -> PortState {
        match self.power_role {
            PowerRole::Source => PortState::SrcReady,
            PowerRole::Sink => PortState::SnkReady,
        }
    }

    /// The recovery state for another hard reset: send one while the
    /// episode's budget lasts, detach otherwise.
    fn hard_reset_state(&self) -> PortState {
        if self.hard_reset_count.value() < self.hard_reset_count.max_value() {
            PortState::HardResetSend
        } else {
            match self.power_role {
                PowerRole::Source => PortState::SrcUnattached,
                PowerRole::Sink => PortState::SnkUnattached,
            }
        }
    }

    fn publish_status(&self) {
        self.typec.publish_status(PortStatus {
            power_role: self.power_role,
            data_role: self.data_role,
            polarity: self.polarity,
            power_operation_mode: self.power_operation_mode,
            attached: self.attached,
        });
    }

    /// Resolve a pending facade swap request. Partner-initiated swaps have
    /// no waiter and resolve nothing.
    fn complete_swap(&mut self, result: Result<(), SwapError>) {
        if core::mem::take(&mut self.swap_pending) {
            self.typec.swap_complete.signal(result);
        }
    }

    fn set_operation_mode(&mut self, mode: PowerOperationMode) {
        self.power_operation_mode = mode;
        self.publish_status();
    }

    /// Supply-side power switch. The regulator is outside the controller
    /// contract; boards wire it up to the published status.
    fn set_vbus(&mut self, on: bool) {
        info!("VBUS supply {}", if on { "on" } else { "off" });
    }

    /// Sink-side power switch.
    fn set_sinking(&mut self, on: bool) {
        info!("Power sink {}", if on { "on" } else { "off" });
    }

    async fn set_roles(&mut self, power_role: PowerRole, data_role: DataRole) -> Result<(), TpcError> {
        self.tpc.set_pd_header(power_role, data_role).await?;
        self.power_role = power_role;
        self.data_role = data_role;
        self.publish_status();
        Ok(())
    }

    // Attach and detach
    // -----------------

    async fn src_attach(&mut self) -> Result<(), TpcError> {
        if self.attached {
            return Ok(());
        }

        // The partner's Rd marks the configuration channel.
        self.polarity = if self.cc1 == CcStatus::Rd { Polarity::Cc1 } else { Polarity::Cc2 };
        self.tpc.set_polarity(self.polarity).await?;
        self.set_roles(PowerRole::Source, DataRole::Host).await?;

        self.set_vbus(true);
        self.tpc.set_pd_rx(true).await?;

        if let Err(error) = self.tpc.set_vconn(true).await {
            let _ = self.tpc.set_pd_rx(false).await;
            return Err(error);
        }
        self.vconn_source = true;

        self.pd_capable = false;
        self.hard_reset_count.reset();
        self.attached = true;

        info!("Attached as source, polarity {:?}", self.polarity);
        self.publish_status();
        Ok(())
    }

    async fn snk_attach(&mut self) -> Result<(), TpcError> {
        if self.attached {
            return Ok(());
        }

        // The pin presenting Rp carries the configuration channel.
        self.polarity = if self.cc1.is_connected() { Polarity::Cc1 } else { Polarity::Cc2 };
        self.tpc.set_polarity(self.polarity).await?;
        self.set_roles(PowerRole::Sink, DataRole::Device).await?;

        self.tpc.set_pd_rx(true).await?;
        self.set_sinking(true);

        self.vconn_source = false;
        self.pd_capable = false;
        self.hard_reset_count.reset();
        self.attached = true;

        info!("Attached as sink, polarity {:?}", self.polarity);
        self.publish_status();
        Ok(())
    }

    async fn acc_attach(&mut self) -> Result<(), TpcError> {
        if self.attached {
            return Ok(());
        }

        self.set_roles(PowerRole::Source, DataRole::Host).await?;
        self.attached = true;

        info!("Accessory attached");
        self.publish_status();
        Ok(())
    }

    async fn detach(&mut self) {
        if !self.attached {
            return;
        }
        self.attached = false;

        if self.vconn_source {
            let _ = self.tpc.set_vconn(false).await;
            self.vconn_source = false;
        }

        let _ = self.tpc.set_pd_rx(false).await;

        info!("Detached");
        self.publish_status();
    }

    async fn src_detach(&mut self) {
        if !self.attached {
            return;
        }
        self.set_vbus(false);
        self.detach().await;
    }

    async fn snk_detach(&mut self) {
        if !self.attached {
            return;
        }
        self.set_sinking(false);
        self.detach().await;
    }

    // Transmission
    // ------------

    /// Start a transmission and wait for the controller's completion
    /// report. Bumps the message ID on success.
    async fn transmit(&mut self, tx_type: TxType, message: Option<&Message>) -> Result<(), TransmitError> {
        let typec = self.typec;
        typec.tx_complete.reset();

        let mut buffer = [0u8; MAX_MESSAGE_SIZE];
        match message {
            Some(message) => {
                trace!("PD TX {:?}", message);
                let size = message.to_bytes(&mut buffer);
                self.tpc.pd_transmit(tx_type, Some(&buffer[..size])).await?;
            }
            None => {
                trace!("PD TX, type {:?}", tx_type);
                self.tpc.pd_transmit(tx_type, None).await?;
            }
        }

        let timeout = TimerType::get_timer::<TIMER>(TimerType::TpcTxTimeout);
        match select(typec.tx_complete.wait(), timeout).await {
            Either::First(TxStatus::Success) => {
                _ = self.message_id.increment();
                Ok(())
            }
            Either::First(TxStatus::Discarded) => Err(TransmitError::Discarded),
            Either::First(TxStatus::Failed) => Err(TransmitError::Failed),
            Either::Second(()) => Err(TransmitError::Timeout),
        }
    }

    fn header_template(&self) -> Header {
        Header::new_template(self.data_role, self.power_role)
    }

    async fn send_control(&mut self, message_type: ControlMessageType) -> Result<(), TransmitError> {
        let message = Message::new(Header::new_control(self.header_template(), self.message_id, message_type));
        self.transmit(TxType::Sop, Some(&message)).await
    }

    /// Advertise source capabilities, or Reject on a port that has none.
    async fn send_source_caps(&mut self) -> Result<(), TransmitError> {
        if self.config.src_pdo.is_empty() {
            return self.send_control(ControlMessageType::Reject).await;
        }

        let capabilities = SourceCapabilities(self.config.src_pdo.clone());
        let message = Message::new_with_data(
            Header::new_data(
                self.header_template(),
                self.message_id,
                DataMessageType::SourceCapabilities,
                capabilities.pdos().len() as u8,
            ),
            Data::SourceCapabilities(capabilities),
        );
        self.transmit(TxType::Sop, Some(&message)).await
    }

    /// Advertise sink capabilities, or Reject on a port that has none.
    async fn send_sink_caps(&mut self) -> Result<(), TransmitError> {
        if self.config.snk_pdo.is_empty() {
            return self.send_control(ControlMessageType::Reject).await;
        }

        let capabilities = SinkCapabilities(self.config.snk_pdo.clone());
        let message = Message::new_with_data(
            Header::new_data(
                self.header_template(),
                self.message_id,
                DataMessageType::SinkCapabilities,
                capabilities.pdos().len() as u8,
            ),
            Data::SinkCapabilities(capabilities),
        );
        self.transmit(TxType::Sop, Some(&message)).await
    }

    async fn send_request(&mut self, request: RawRequest) -> Result<(), TransmitError> {
        let message = Message::new_with_data(
            Header::new_data(self.header_template(), self.message_id, DataMessageType::Request, 1),
            Data::Request(request),
        );
        self.transmit(TxType::Sop, Some(&message)).await
    }

    // Event handling
    // --------------

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::CcChange { cc1, cc2 } => self.handle_cc_change(cc1, cc2),
            Event::VbusOn => self.handle_vbus_on(),
            Event::VbusOff => self.handle_vbus_off(),
            Event::PdMessage(message) => self.handle_message(message),
            Event::HardResetReceived => {
                if self.attached {
                    self.set_state(PortState::HardResetStart);
                }
            }
            Event::TpcReset => self.handle_tpc_reset().await,
            Event::SwapRequest(kind) => self.handle_swap_request(kind),
        }
    }

    fn handle_cc_change(&mut self, cc1: CcStatus, cc2: CcStatus) {
        let (old_cc1, old_cc2) = (self.cc1, self.cc2);
        self.cc1 = cc1;
        self.cc2 = cc2;
        debug!("CC1 {:?} -> {:?}, CC2 {:?} -> {:?}", old_cc1, cc1, old_cc2, cc2);

        let polarity_open = match self.polarity {
            Polarity::Cc1 => cc1 == CcStatus::Open,
            Polarity::Cc2 => cc2 == CcStatus::Open,
        };

        match self.state {
            PortState::SrcUnattached | PortState::AccUnattached => {
                if cc1 == CcStatus::Rd || cc2 == CcStatus::Rd || (cc1 == CcStatus::Ra && cc2 == CcStatus::Ra) {
                    self.set_state(PortState::SrcAttachWait);
                }
            }
            PortState::SrcAttachWait => {
                let ra_only = (cc1 == CcStatus::Open && cc2 == CcStatus::Ra)
                    || (cc1 == CcStatus::Ra && cc2 == CcStatus::Open);
                if (!cc1.is_connected() && !cc2.is_connected()) || ra_only {
                    self.set_state(PortState::SrcUnattached);
                } else if cc1 != old_cc1 || cc2 != old_cc2 {
                    // Restart the debounce for the new pattern.
                    self.set_state(PortState::SrcAttachWait);
                }
            }
            PortState::SrcAttached => {
                if polarity_open {
                    self.set_state(PortState::SrcUnattached);
                }
            }

            PortState::SnkUnattached => {
                if cc1.is_connected() != cc2.is_connected() {
                    self.set_state(PortState::SnkAttachWait);
                }
            }
            PortState::SnkAttachWait => self.set_state(PortState::SnkAttachWait),
            PortState::SnkDebounced => self.set_state(PortState::SnkDebounced),

            PortState::AudioAccAttached => {
                if cc1 == CcStatus::Open || cc2 == CcStatus::Open {
                    self.set_state(PortState::AudioAccDebounce);
                }
            }
            PortState::AudioAccDebounce => {
                if cc1 == CcStatus::Ra && cc2 == CcStatus::Ra {
                    self.set_state(PortState::AudioAccAttached);
                }
            }
            PortState::DebugAccAttached => {
                if cc1 == CcStatus::Open || cc2 == CcStatus::Open {
                    self.set_state(PortState::AccUnattached);
                }
            }

            _ => {
                if self.power_role == PowerRole::Source && self.attached && polarity_open {
                    self.set_state(PortState::SrcUnattached);
                }
            }
        }
    }

    fn handle_vbus_on(&mut self) {
        debug!("VBUS on");
        self.vbus_present = true;

        match self.state {
            PortState::SnkDebounced => self.set_state(PortState::SnkAttached),
            PortState::SnkHardResetWaitVbus => self.set_state(PortState::SnkHardResetSinkOn),
            _ => {}
        }
    }

    fn handle_vbus_off(&mut self) {
        debug!("VBUS off");
        self.vbus_present = false;

        match self.state {
            PortState::SnkHardResetSinkOff => self.set_state(PortState::SnkHardResetWaitVbus),
            _ => {
                if self.power_role == PowerRole::Sink && self.attached {
                    self.set_state(PortState::SnkUnattached);
                }
            }
        }
    }

    async fn handle_tpc_reset(&mut self) {
        info!("Controller reset");

        if self.tpc.init().await.is_err() {
            error!("Controller reinitialization failed");
            return;
        }

        // A stable contract in the default role survives: replay what the
        // controller lost instead of disturbing the link.
        if self.pd_capable
            && self.explicit_contract
            && self.power_role == self.config.default_role
            && self.state == self.ready_state()
        {
            let _ = self.tpc.set_polarity(self.polarity).await;
            let _ = self.tpc.set_pd_header(self.power_role, self.data_role).await;
            let _ = self.tpc.set_pd_rx(true).await;
            return;
        }

        let _ = self.tpc.set_pd_rx(false).await;
        self.vbus_present = self.tpc.get_vbus().await;

        match self.config.default_role {
            PowerRole::Source => self.set_state(PortState::SrcUnattached),
            PowerRole::Sink => self.set_state(PortState::SnkUnattached),
        }
    }

    fn handle_swap_request(&mut self, kind: SwapKind) {
        let needs_drp = matches!(kind, SwapKind::DataRole | SwapKind::PowerRole);
        if needs_drp && self.config.port_type != PortType::Drp {
            self.typec.swap_complete.signal(Err(SwapError::Invalid));
            return;
        }
        if !self.state.is_ready() {
            self.typec.swap_complete.signal(Err(SwapError::Cancelled));
            return;
        }

        self.swap_pending = true;
        match kind {
            SwapKind::DataRole => self.set_state(PortState::DrSwapSend),
            SwapKind::PowerRole => self.set_state(PortState::PrSwapSend),
            SwapKind::Vconn => self.set_state(PortState::VconnSwapSend),
        }
    }

    fn handle_message(&mut self, message: Message) {
        if !self.attached {
            return;
        }
        trace!("PD RX {:?}", message);

        match message.data.clone() {
            Some(data) => self.handle_data_message(&message, data),
            None => {
                if let MessageType::Control(control) = message.header.message_type() {
                    self.handle_control_message(control);
                }
            }
        }
    }

    fn handle_data_message(&mut self, message: &Message, data: Data) {
        match data {
            Data::SourceCapabilities(capabilities) => {
                if self.power_role != PowerRole::Sink {
                    return;
                }
                self.source_caps = capabilities;
                self.set_state(PortState::SnkNegotiateCapabilities);
            }
            Data::Request(request) => {
                if self.power_role != PowerRole::Source || message.header.num_objects() != 1 {
                    self.set_state(PortState::RequestReject);
                    return;
                }
                self.sink_request = request;
                self.set_state(PortState::SrcNegotiateCapabilities);
            }
            Data::SinkCapabilities(capabilities) => {
                self.partner_snk_caps = capabilities;
            }
            Data::Bist(_) => debug!("Ignoring BIST request"),
            Data::VendorDefined(_) => debug!("Ignoring vendor defined message"),
            Data::Unknown(_) => warn!("Unhandled data message"),
        }
    }

    fn handle_control_message(&mut self, control: ControlMessageType) {
        match control {
            ControlMessageType::GoodCRC | ControlMessageType::Ping | ControlMessageType::GotoMin => {}

            ControlMessageType::GetSourceCap => {
                if self.state.is_ready() {
                    self.set_state(PortState::GiveSourceCaps);
                } else {
                    self.set_state(PortState::RequestReject);
                }
            }
            ControlMessageType::GetSinkCap => {
                if self.state.is_ready() {
                    self.set_state(PortState::GiveSinkCaps);
                } else {
                    self.set_state(PortState::RequestReject);
                }
            }

            ControlMessageType::PsRdy => match self.state {
                PortState::SnkTransitionSink => self.set_state(PortState::SnkReady),
                PortState::PrSwapSrcSnkSourceOff => self.set_state(PortState::PrSwapSrcSnkSinkOn),
                PortState::PrSwapSnkSrcSinkOff => self.set_state(PortState::PrSwapSnkSrcSourceOn),
                PortState::VconnSwapWaitForVconn => self.set_state(PortState::VconnSwapTurnOffVconn),
                _ => {}
            },

            ControlMessageType::Reject | ControlMessageType::Wait => {
                let failure = if control == ControlMessageType::Reject {
                    SwapError::Rejected
                } else {
                    SwapError::Cancelled
                };

                match self.state {
                    PortState::SnkNegotiateCapabilities => {
                        if self.explicit_contract {
                            self.set_state(PortState::SnkReady);
                        } else {
                            self.set_state(PortState::SnkWaitCapabilities);
                        }
                    }
                    PortState::DrSwapSend => {
                        self.swap_failure = failure;
                        self.set_state(PortState::DrSwapCancel);
                    }
                    PortState::PrSwapSend => {
                        self.swap_failure = failure;
                        self.set_state(PortState::PrSwapCancel);
                    }
                    PortState::VconnSwapSend => {
                        self.swap_failure = failure;
                        self.set_state(PortState::VconnSwapCancel);
                    }
                    _ => {}
                }
            }

            ControlMessageType::Accept => match self.state {
                PortState::SnkNegotiateCapabilities => self.set_state(PortState::SnkTransitionSink),
                PortState::SoftResetSend => {
                    self.message_id.reset();
                    match self.power_role {
                        PowerRole::Source => self.set_state(PortState::SrcSendCapabilities),
                        PowerRole::Sink => self.set_state(PortState::SnkWaitCapabilities),
                    }
                }
                PortState::DrSwapSend => self.set_state(PortState::DrSwapChangeDr),
                PortState::PrSwapSend => self.set_state(PortState::PrSwapStart),
                PortState::VconnSwapSend => self.set_state(PortState::VconnSwapStart),
                _ => {}
            },

            ControlMessageType::SoftReset => self.set_state(PortState::SoftReset),

            ControlMessageType::DrSwap => {
                if self.config.port_type != PortType::Drp {
                    self.set_state(PortState::DrSwapReject);
                } else if self.state.is_ready() {
                    self.set_state(PortState::DrSwapAccept);
                } else {
                    self.set_state(PortState::DrSwapWait);
                }
            }
            ControlMessageType::PrSwap => {
                if self.config.port_type != PortType::Drp {
                    self.set_state(PortState::PrSwapReject);
                } else if self.state.is_ready() {
                    self.set_state(PortState::PrSwapAccept);
                } else {
                    self.set_state(PortState::PrSwapWait);
                }
            }
            ControlMessageType::VconnSwap => {
                if self.state.is_ready() {
                    self.set_state(PortState::VconnSwapAccept);
                } else {
                    self.set_state(PortState::VconnSwapWait);
                }
            }

            ControlMessageType::Reserved => warn!("Unhandled control message"),
        }
    }

    // State handlers
    // --------------

    async fn run_state(&mut self) {
        trace!("Handle state {:?}", self.state);

        match self.state {
            // Source attach ladder
            PortState::SrcUnattached => {
                self.src_detach().await;
                if let Err(error) = self.tpc.set_cc(CcStatus::RpDefault).await {
                    warn!("Presenting Rp failed: {:?}", error);
                }
            }
            PortState::SrcAttachWait => {
                if self.cc1 == CcStatus::Rd && self.cc2 == CcStatus::Rd {
                    self.set_state_delayed(PortState::DebugAccAttached, TimerType::CcDebounce.millis());
                } else if self.cc1 == CcStatus::Ra && self.cc2 == CcStatus::Ra {
                    self.set_state_delayed(PortState::AudioAccAttached, TimerType::CcDebounce.millis());
                } else if self.cc1 == CcStatus::Rd || self.cc2 == CcStatus::Rd {
                    self.set_state_delayed(PortState::SrcAttached, TimerType::CcDebounce.millis());
                }
            }
            PortState::SrcAttached => {
                if self.src_attach().await.is_err() {
                    self.set_state(PortState::SrcUnattached);
                } else {
                    self.set_state(PortState::SrcStartup);
                }
            }
            PortState::SrcStartup => {
                self.set_operation_mode(PowerOperationMode::Usb);
                self.caps_count.reset();
                self.message_id.reset();
                self.explicit_contract = false;
                self.set_state(PortState::SrcSendCapabilities);
            }
            PortState::SrcSendCapabilities => {
                if self.caps_count.increment().is_err() {
                    // The partner never requested; treat it as not PD capable.
                    warn!("Giving up capability advertisement");
                    return;
                }

                match self.send_source_caps().await {
                    Ok(()) => {
                        self.hard_reset_count.reset();
                        self.caps_count.reset();
                        self.pd_capable = true;
                        // Wait for a Request.
                        self.set_state_delayed(self.hard_reset_state(), TimerType::SendSourceCap.millis());
                    }
                    Err(error) => {
                        warn!("Advertising capabilities failed: {:?}", error);
                        self.set_state_delayed(PortState::SrcSendCapabilities, TimerType::SendSourceCap.millis());
                    }
                }
            }
            PortState::SrcNegotiateCapabilities => match policy::check_request(self.sink_request, &self.config.src_pdo) {
                Ok(()) => {
                    if self.send_control(ControlMessageType::Accept).await.is_err() {
                        self.set_state(PortState::SoftResetSend);
                    } else {
                        self.set_state_delayed(PortState::SrcTransitionSupply, TimerType::SrcTransition.millis());
                    }
                }
                Err(error) => {
                    info!("Rejecting request: {:?}", error);
                    if let Err(error) = self.send_control(ControlMessageType::Reject).await {
                        warn!("Reject failed: {:?}", error);
                    }
                    if self.explicit_contract {
                        self.set_state(PortState::SrcReady);
                    } else {
                        self.set_state(PortState::SrcWaitNewCapabilities);
                    }
                }
            },
            PortState::SrcTransitionSupply => {
                self.set_vbus(true);
                if self.send_control(ControlMessageType::PsRdy).await.is_err() {
                    self.set_state(PortState::SoftResetSend);
                } else {
                    self.explicit_contract = true;
                    self.set_operation_mode(PowerOperationMode::Pd);
                    self.set_state(PortState::SrcReady);
                }
            }
            PortState::SrcReady => {
                if let Err(error) = self.send_control(ControlMessageType::Ping).await {
                    warn!("Ping failed: {:?}", error);
                }
                self.set_state_delayed(PortState::SrcReady, TimerType::SourceActivity.millis());
            }
            PortState::SrcWaitNewCapabilities => {
                // Waiting for a new Request.
            }

            // Sink attach ladder
            PortState::SnkUnattached => {
                self.snk_detach().await;
                if let Err(error) = self.tpc.set_cc(CcStatus::Rd).await {
                    warn!("Presenting Rd failed: {:?}", error);
                }
            }
            PortState::SnkAttachWait => {
                if self.cc1.is_connected() != self.cc2.is_connected() {
                    self.set_state_delayed(PortState::SnkDebounced, TimerType::CcDebounce.millis());
                } else if !self.cc1.is_connected() && !self.cc2.is_connected() {
                    self.set_state_delayed(PortState::SnkUnattached, TimerType::PdDebounce.millis());
                }
            }
            PortState::SnkDebounced => {
                if self.vbus_present {
                    self.set_state(PortState::SnkAttached);
                } else if !self.cc1.is_connected() && !self.cc2.is_connected() {
                    self.set_state_delayed(PortState::SnkUnattached, TimerType::PdDebounce.millis());
                }
            }
            PortState::SnkAttached => {
                if self.snk_attach().await.is_err() {
                    self.set_state(PortState::SnkUnattached);
                } else {
                    self.set_state(PortState::SnkStartup);
                }
            }
            PortState::SnkStartup => {
                self.set_operation_mode(PowerOperationMode::Usb);
                self.message_id.reset();
                self.explicit_contract = false;
                self.set_state(PortState::SnkWaitCapabilities);
            }
            PortState::SnkWaitCapabilities => {
                self.set_state_delayed(self.hard_reset_state(), TimerType::SinkWaitCap.millis());
            }
            PortState::SnkNegotiateCapabilities => {
                self.pd_capable = true;

                let request = policy::select_sink_pdo(&self.source_caps, self.config)
                    .and_then(|index| policy::build_request(&self.source_caps, index, self.config));
                match request {
                    Ok(request) => match self.send_request(request).await {
                        Ok(()) => {
                            self.set_state_delayed(self.hard_reset_state(), TimerType::SenderResponse.millis());
                        }
                        Err(error) => {
                            warn!("Request failed: {:?}", error);
                            // Let the source send capabilities again.
                            self.set_state(PortState::SnkWaitCapabilities);
                        }
                    },
                    Err(error) => {
                        warn!("No usable capability: {:?}", error);
                        self.set_state(PortState::SnkWaitCapabilities);
                    }
                }
            }
            PortState::SnkTransitionSink => {
                self.set_state_delayed(self.hard_reset_state(), TimerType::PsTransition.millis());
            }
            PortState::SnkReady => {
                self.explicit_contract = true;
                self.set_operation_mode(PowerOperationMode::Pd);
            }

            // Accessories
            PortState::AccUnattached => {
                self.detach().await;
                self.set_state(PortState::SrcUnattached);
            }
            PortState::DebugAccAttached | PortState::AudioAccAttached => {
                if self.acc_attach().await.is_err() {
                    self.set_state(PortState::AccUnattached);
                }
            }
            PortState::AudioAccDebounce => {
                self.set_state_delayed(PortState::AccUnattached, TimerType::CcDebounce.millis());
            }

            // Capability service
            PortState::GiveSinkCaps => {
                if let Err(error) = self.send_sink_caps().await {
                    warn!("Sink capabilities failed: {:?}", error);
                }
                let previous = self.prev_state;
                self.set_state(previous);
            }
            PortState::GiveSourceCaps => {
                if let Err(error) = self.send_source_caps().await {
                    warn!("Source capabilities failed: {:?}", error);
                }
                let previous = self.prev_state;
                self.set_state(previous);
            }
            PortState::RequestReject => {
                if let Err(error) = self.send_control(ControlMessageType::Reject).await {
                    warn!("Reject failed: {:?}", error);
                }
                let previous = self.prev_state;
                self.set_state(previous);
            }

            // Hard reset
            PortState::HardResetSend => {
                _ = self.hard_reset_count.increment();
                let _ = self.transmit(TxType::HardReset, None).await;
                self.set_state(PortState::HardResetStart);
            }
            PortState::HardResetStart => match self.power_role {
                PowerRole::Source => {
                    self.set_state_delayed(PortState::SrcHardResetVbusOff, TimerType::PsHardReset.millis());
                }
                PowerRole::Sink => {
                    self.set_state_delayed(PortState::SnkHardResetSinkOff, TimerType::PsHardReset.millis());
                }
            },
            PortState::SrcHardResetVbusOff => {
                self.set_vbus(false);
                self.set_state_delayed(PortState::SrcHardResetVbusOn, TimerType::SrcRecover.millis());
            }
            PortState::SrcHardResetVbusOn => {
                self.set_vbus(true);
                self.set_state(PortState::SrcStartup);
            }
            PortState::SnkHardResetSinkOff => {
                self.set_sinking(false);
                // If VBUS never drops, reset again within the budget.
                self.set_state_delayed(self.hard_reset_state(), TimerType::Safe0V.millis());
            }
            PortState::SnkHardResetWaitVbus => {
                // Assume we are disconnected if VBUS does not come back.
                self.set_state_delayed(
                    PortState::SnkUnattached,
                    TimerType::SrcRecoverMax.millis() + TimerType::SrcTurnOn.millis(),
                );
            }
            PortState::SnkHardResetSinkOn => {
                self.set_sinking(true);
                self.set_state(PortState::SnkStartup);
            }

            // Soft reset
            PortState::SoftReset => {
                self.message_id.reset();
                if self.send_control(ControlMessageType::Accept).await.is_err() {
                    self.set_state(self.hard_reset_state());
                    return;
                }
                match self.power_role {
                    PowerRole::Source => self.set_state(PortState::SrcSendCapabilities),
                    PowerRole::Sink => self.set_state(PortState::SnkWaitCapabilities),
                }
            }
            PortState::SoftResetSend => {
                self.message_id.reset();
                if let Err(error) = self.send_control(ControlMessageType::SoftReset).await {
                    warn!("Soft reset failed: {:?}", error);
                }
                self.set_state_delayed(self.hard_reset_state(), TimerType::SenderResponse.millis());
            }

            // Data role swap
            PortState::DrSwapSend => {
                if self.send_control(ControlMessageType::DrSwap).await.is_err() {
                    self.swap_failure = SwapError::Cancelled;
                    self.set_state(PortState::DrSwapCancel);
                } else {
                    self.set_state_delayed(PortState::DrSwapSendTimeout, TimerType::SenderResponse.millis());
                }
            }
            PortState::DrSwapAccept => {
                if self.send_control(ControlMessageType::Accept).await.is_err() {
                    self.set_state(PortState::SoftResetSend);
                } else {
                    self.set_state(PortState::DrSwapChangeDr);
                }
            }
            PortState::DrSwapSendTimeout => {
                self.complete_swap(Err(SwapError::Timeout));
                self.set_state(self.ready_state());
            }
            PortState::DrSwapChangeDr => {
                let data_role = match self.data_role {
                    DataRole::Host => DataRole::Device,
                    DataRole::Device => DataRole::Host,
                };
                let _ = self.set_roles(self.power_role, data_role).await;
                self.complete_swap(Ok(()));
                self.set_state(self.ready_state());
            }

            // Power role swap
            PortState::PrSwapSend => {
                if self.send_control(ControlMessageType::PrSwap).await.is_err() {
                    self.swap_failure = SwapError::Cancelled;
                    self.set_state(PortState::PrSwapCancel);
                } else {
                    self.set_state_delayed(PortState::PrSwapSendTimeout, TimerType::SenderResponse.millis());
                }
            }
            PortState::PrSwapAccept => {
                if self.send_control(ControlMessageType::Accept).await.is_err() {
                    self.set_state(PortState::SoftResetSend);
                } else {
                    self.set_state(PortState::PrSwapStart);
                }
            }
            PortState::PrSwapSendTimeout => {
                self.complete_swap(Err(SwapError::Timeout));
                self.set_state(self.ready_state());
            }
            PortState::PrSwapStart => match self.power_role {
                PowerRole::Source => {
                    self.set_state_delayed(PortState::PrSwapSrcSnkSourceOff, TimerType::SrcTransition.millis());
                }
                PowerRole::Sink => self.set_state(PortState::PrSwapSnkSrcSinkOff),
            },
            PortState::PrSwapSrcSnkSourceOff => {
                self.set_vbus(false);
                let _ = self.tpc.set_cc(CcStatus::Rd).await;
                if self.send_control(ControlMessageType::PsRdy).await.is_err() {
                    self.set_state(self.hard_reset_state());
                } else {
                    // Wait for the partner to take over the supply.
                    self.set_state_delayed(PortState::SnkUnattached, TimerType::PsSourceOn.millis());
                }
            }
            PortState::PrSwapSrcSnkSinkOn => {
                self.set_sinking(true);
                let data_role = self.data_role;
                let _ = self.set_roles(PowerRole::Sink, data_role).await;
                self.message_id.reset();
                self.complete_swap(Ok(()));
                self.set_state(PortState::SnkStartup);
            }
            PortState::PrSwapSnkSrcSinkOff => {
                self.set_sinking(false);
                self.set_state_delayed(self.hard_reset_state(), TimerType::PsSourceOff.millis());
            }
            PortState::PrSwapSnkSrcSourceOn => {
                let _ = self.tpc.set_cc(CcStatus::RpDefault).await;
                self.set_vbus(true);
                let data_role = self.data_role;
                let _ = self.set_roles(PowerRole::Source, data_role).await;
                self.message_id.reset();
                if self.send_control(ControlMessageType::PsRdy).await.is_err() {
                    self.set_state(self.hard_reset_state());
                } else {
                    self.complete_swap(Ok(()));
                    self.set_state(PortState::SrcStartup);
                }
            }

            // VCONN swap
            PortState::VconnSwapSend => {
                if self.send_control(ControlMessageType::VconnSwap).await.is_err() {
                    self.swap_failure = SwapError::Cancelled;
                    self.set_state(PortState::VconnSwapCancel);
                } else {
                    self.set_state_delayed(PortState::VconnSwapSendTimeout, TimerType::SenderResponse.millis());
                }
            }
            PortState::VconnSwapAccept => {
                if self.send_control(ControlMessageType::Accept).await.is_err() {
                    self.set_state(PortState::SoftResetSend);
                } else {
                    self.set_state(PortState::VconnSwapStart);
                }
            }
            PortState::VconnSwapSendTimeout => {
                self.complete_swap(Err(SwapError::Timeout));
                self.set_state(self.ready_state());
            }
            PortState::VconnSwapStart => {
                if self.vconn_source {
                    self.set_state(PortState::VconnSwapWaitForVconn);
                } else {
                    self.set_state(PortState::VconnSwapTurnOnVconn);
                }
            }
            PortState::VconnSwapWaitForVconn => {
                self.set_state_delayed(self.hard_reset_state(), TimerType::VconnSourceOn.millis());
            }
            PortState::VconnSwapTurnOnVconn => {
                if self.tpc.set_vconn(true).await.is_ok() {
                    self.vconn_source = true;
                }
                if self.send_control(ControlMessageType::PsRdy).await.is_err() {
                    self.set_state(PortState::SoftResetSend);
                } else {
                    self.complete_swap(Ok(()));
                    self.set_state(self.ready_state());
                }
            }
            PortState::VconnSwapTurnOffVconn => {
                if self.tpc.set_vconn(false).await.is_ok() {
                    self.vconn_source = false;
                }
                self.complete_swap(Ok(()));
                self.set_state(self.ready_state());
            }

            // Shared swap outcomes
            PortState::DrSwapCancel | PortState::PrSwapCancel | PortState::VconnSwapCancel => {
                let failure = self.swap_failure;
                self.complete_swap(Err(failure));
                self.set_state(self.ready_state());
            }
            PortState::DrSwapReject | PortState::PrSwapReject | PortState::VconnSwapReject => {
                if let Err(error) = self.send_control(ControlMessageType::Reject).await {
                    warn!("Reject failed: {:?}", error);
                }
                let previous = self.prev_state;
                self.set_state(previous);
            }
            PortState::DrSwapWait | PortState::PrSwapWait | PortState::VconnSwapWait => {
                if let Err(error) = self.send_control(ControlMessageType::Wait).await {
                    warn!("Wait failed: {:?}", error);
                }
                let previous = self.prev_state;
                self.set_state(previous);
            }
        }
    }
}
