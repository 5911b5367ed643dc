//! Policy engine for the implementation of a sink.
//!
//! The engine is a state machine with at most one running timer. It is advanced by
//! [`Sink::poll`], which samples the CC lines, handles received messages and checks the timer.
use uom::si::electric_potential::millivolt;
use usbpd_sink_traits::{CcPin, Driver};

use super::device_policy_manager::DevicePolicyManager;
use super::dispatcher::{DispatchError, Dispatcher, ErrorCause, Event, EventKind, Handler};
use super::{AttachState, Contract, InterruptFlag};
use crate::config::{self, Config, ConfigError};
use crate::counters::{Counter, CounterType};
use crate::protocol_layer::message::Message;
use crate::protocol_layer::message::data::Data;
use crate::protocol_layer::message::data::request::{self, Selection};
use crate::protocol_layer::message::data::source_capabilities::SourceCapabilities;
use crate::protocol_layer::message::header::{
    ControlMessageType, DataMessageType, Header, MessageType, SpecificationRevision,
};
use crate::protocol_layer::{ProtocolEvent, ProtocolLayer, TxError};
use crate::timers::{Deadline, Instant, TimerType};
use crate::{DataRole, PowerRole};


/// Upper bound of frames that are handled within a single poll.
const MAX_FRAMES_PER_POLL: usize = 8;

/// Sink states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum State {
    /// Nothing attached.
    Detached,
    /// CC is debounced.
    AttachWaitSink,
    /// Attached, waiting for source capabilities.
    Discovery,
    /// Pick a capability and send the request.
    EvaluateCapabilities,
    /// Waiting for the reply to the request.
    SelectCapability,
    /// Accepted, waiting for the source to switch its output.
    WaitPsRdy,
    /// An explicit contract is in place.
    Ready,
    /// The source replied with Reject or Wait. Request again later.
    RequestBackoff,
    /// A soft reset was sent, waiting for Accept.
    SendSoftReset,
    /// After a hard reset, waiting for the source to recover.
    ErrorRecovery,
    /// The source does not speak PD. Stay at 5 V.
    DefaultPower,
}

/// The last attempt to make the source send its capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Solicitation {
    None,
    GetSourceCap,
    SoftReset,
}

impl State {
    /// Whether the engine talks to an attached source in this state.
    fn is_attached(&self) -> bool {
        !matches!(self, State::Detached | State::AttachWaitSink)
    }
}

/// Implementation of the sink policy engine.
///
/// USB PD R3.2, [8.3.3.3]
#[derive(Debug)]
pub struct Sink<'a, DRIVER: Driver, DPM: DevicePolicyManager> {
    device_policy_manager: DPM,
    protocol_layer: ProtocolLayer<DRIVER>,
    dispatcher: Dispatcher<'a>,
    interrupt: Option<&'a InterruptFlag>,
    config: Config,

    state: State,
    deadline: Option<Deadline>,
    attach_state: AttachState,
    orientation: Option<CcPin>,
    detach_deadline: Option<Deadline>,
    solicitation: Solicitation,
    get_source_cap_pending: bool,

    source_capabilities: Option<SourceCapabilities>,
    selection: Option<Selection>,
    contract: Option<Contract>,

    hard_reset_counter: Counter,
    busy_counter: Counter,
}

impl<'a, DRIVER: Driver, DPM: DevicePolicyManager> Sink<'a, DRIVER, DPM> {
    /// Create a fresh protocol layer with initial state.
    fn new_protocol_layer(driver: DRIVER) -> ProtocolLayer<DRIVER> {
        let header = Header::new_template(DataRole::Ufp, PowerRole::Sink, SpecificationRevision::R3_X);
        ProtocolLayer::new(driver, header)
    }

    /// Create a new sink policy engine with a given `driver`.
    ///
    /// The engine starts detached. Fails, if the configuration is invalid.
    pub fn new(driver: DRIVER, device_policy_manager: DPM, config: Config) -> Result<Self, ConfigError> {
        Ok(Self {
            device_policy_manager,
            protocol_layer: Self::new_protocol_layer(driver),
            dispatcher: Dispatcher::new(),
            interrupt: None,
            config: config.validate()?,
            state: State::Detached,
            deadline: None,
            attach_state: AttachState::Detached,
            orientation: None,
            detach_deadline: None,
            solicitation: Solicitation::None,
            get_source_cap_pending: false,
            source_capabilities: None,
            selection: None,
            contract: None,
            hard_reset_counter: Counter::new(CounterType::HardReset),
            busy_counter: Counter::new(CounterType::Busy),
        })
    }

    /// Use an interrupt flag, that is set by the transceiver's interrupt handler.
    ///
    /// Without it, the engine relies on [`Driver::interrupt_pending`] alone.
    pub fn with_interrupt(mut self, interrupt: &'a InterruptFlag) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    /// Register an event handler.
    pub fn subscribe(&mut self, kind: EventKind, handler: Handler<'a>) -> Result<(), DispatchError> {
        self.dispatcher.subscribe(kind, handler)
    }

    /// The configuration that the sink was built with, including runtime voltage changes.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The highest voltage that the sink requests, in volts.
    pub fn requested_voltage(&self) -> u8 {
        self.config.request_voltage
    }

    /// Change the highest voltage that the sink requests, in volts.
    ///
    /// With a contract in place, the sink renegotiates against the last source capabilities
    /// on the next poll. At default power, it asks the source for its capabilities again.
    pub fn request_voltage(&mut self, volts: u8) -> Result<(), ConfigError> {
        self.config.request_voltage = config::validate_voltage(volts)?;

        if self.state == State::Ready && self.source_capabilities.is_some() {
            debug!("Renegotiate for at most {} V", volts);
            self.contract = None;
            self.set_state(State::EvaluateCapabilities, None);
        } else if self.state == State::DefaultPower {
            self.get_source_cap_pending = true;
        }

        Ok(())
    }

    /// Whether a source is attached.
    pub fn is_connected(&self) -> bool {
        self.attach_state == AttachState::AttachedSink
    }

    /// The Type-C attach state.
    pub fn attach_state(&self) -> AttachState {
        self.attach_state
    }

    /// The present explicit contract, if any.
    pub fn contract(&self) -> Option<&Contract> {
        self.contract.as_ref()
    }

    /// The last capabilities that the source advertised.
    pub fn source_capabilities(&self) -> Option<&SourceCapabilities> {
        self.source_capabilities.as_ref()
    }

    /// Advance the state machine.
    ///
    /// Must be called periodically (every few milliseconds), and whenever the interrupt flag was signaled.
    pub fn poll(&mut self, now: Instant) {
        self.update_attach(now);

        if self.state.is_attached() {
            self.service_protocol(now);
        } else if let Some(interrupt) = self.interrupt {
            // Nothing to talk to.
            interrupt.take();
        }

        self.check_deadline(now);

        if self.state == State::EvaluateCapabilities {
            self.evaluate_capabilities(now);
        }

        if self.get_source_cap_pending && self.state == State::DefaultPower {
            self.get_source_cap_pending = false;
            let result = self.protocol_layer.send_control(ControlMessageType::GetSourceCap, now);
            self.handle_reply_result(result, now);
        }
    }

    fn set_state(&mut self, state: State, deadline: Option<Deadline>) {
        if state != self.state {
            debug!("Sink state {:?} -> {:?}", self.state, state);
        }

        self.state = state;
        self.deadline = deadline;
    }

    fn update_attach(&mut self, now: Instant) {
        let orientation = self.protocol_layer.driver().sample_attach().orientation();

        match self.state {
            State::Detached => {
                if let Some(pin) = orientation {
                    debug!("CC attach on {:?}", pin);
                    self.start_debounce(pin, now);
                }
            }
            State::AttachWaitSink => match orientation {
                None => {
                    debug!("CC lost during debounce");
                    self.orientation = None;
                    self.attach_state = AttachState::Detached;
                    self.set_state(State::Detached, None);
                }
                Some(pin) if Some(pin) != self.orientation => {
                    debug!("CC orientation changed to {:?}", pin);
                    self.start_debounce(pin, now);
                }
                Some(_) => (),
            },
            // The source may drop CC while it recovers.
            State::ErrorRecovery => (),
            _ => {
                if orientation == self.orientation {
                    self.detach_deadline = None;
                    return;
                }

                match self.detach_deadline {
                    None => {
                        debug!("CC changed to {:?}, debounce detach", orientation);
                        self.detach_deadline = Some(Deadline::start(TimerType::PdDebounce, now));
                    }
                    Some(deadline) if deadline.is_expired(now) => self.detach(),
                    Some(_) => (),
                }
            }
        }
    }

    fn start_debounce(&mut self, pin: CcPin, now: Instant) {
        self.orientation = Some(pin);
        self.attach_state = AttachState::AttachWaitSink;
        self.set_state(State::AttachWaitSink, Some(Deadline::start(TimerType::CcDebounce, now)));
    }

    fn enter_attached(&mut self, now: Instant) {
        let Some(pin) = self.orientation else {
            self.set_state(State::Detached, None);
            return;
        };

        info!("Source attached on {:?}", pin);
        self.protocol_layer.driver().select_cc(pin);
        self.protocol_layer.reset();
        self.detach_deadline = None;
        self.solicitation = Solicitation::None;
        self.attach_state = AttachState::AttachedSink;
        self.set_state(State::Discovery, Some(Deadline::start(TimerType::SinkWaitCap, now)));
        self.dispatcher.dispatch(&Event::Connected);
    }

    fn detach(&mut self) {
        info!("Source detached");
        self.protocol_layer.reset();
        self.clear_negotiation();
        self.hard_reset_counter.reset();
        self.orientation = None;
        self.detach_deadline = None;
        self.attach_state = AttachState::Detached;
        self.set_state(State::Detached, None);
        self.dispatcher.dispatch(&Event::Disconnected);
    }

    fn clear_negotiation(&mut self) {
        self.source_capabilities = None;
        self.selection = None;
        self.contract = None;
        self.busy_counter.reset();
        self.get_source_cap_pending = false;
    }

    /// Handle received frames while the PHY has any, and service the retry timer.
    fn service_protocol(&mut self, now: Instant) {
        let flagged = self.interrupt.is_some_and(InterruptFlag::take);
        let mut pending = flagged || self.protocol_layer.driver().interrupt_pending();

        if !pending {
            if let Some(event) = self.protocol_layer.poll_timers(now) {
                self.handle_protocol_event(event, now);
            }
            return;
        }

        for _ in 0..MAX_FRAMES_PER_POLL {
            if !pending || !self.state.is_attached() {
                break;
            }

            if let Some(event) = self.protocol_layer.poll(now) {
                self.handle_protocol_event(event, now);
            }

            pending = self.protocol_layer.driver().interrupt_pending();
        }
    }

    fn handle_protocol_event(&mut self, event: ProtocolEvent, now: Instant) {
        if self.state == State::ErrorRecovery {
            // Frames are still acknowledged by the protocol layer, but not acted upon.
            trace!("Ignore protocol event during error recovery");
            return;
        }

        match event {
            ProtocolEvent::Received(message) => self.handle_message(message, now),
            ProtocolEvent::Acknowledged(_) => {
                if matches!(self.state, State::SelectCapability | State::SendSoftReset) {
                    // The reply is expected within tSenderResponse after GoodCRC.
                    self.deadline = Some(Deadline::start(TimerType::SenderResponse, now));
                }
            }
            ProtocolEvent::TransmitFailed => match self.state {
                // Sources without PD never acknowledge Get_Source_Cap.
                State::Discovery | State::DefaultPower => {
                    trace!("Transmission not acknowledged in state {:?}", self.state)
                }
                _ => self.enter_error_recovery(ErrorCause::TransmissionExhausted, true, now),
            },
            ProtocolEvent::HardReset => self.enter_error_recovery(ErrorCause::Framing, false, now),
            ProtocolEvent::Malformed(error) => warn!("Ignore malformed message: {:?}", error),
        }
    }

    fn handle_message(&mut self, message: Message, now: Instant) {
        match (message.message_type(), message.data) {
            (
                MessageType::Data(DataMessageType::SourceCapabilities),
                Some(Data::SourceCapabilities(capabilities)),
            ) => {
                debug!("Source capabilities: {:?}", capabilities);
                self.source_capabilities = Some(capabilities);
                self.busy_counter.reset();
                self.set_state(State::EvaluateCapabilities, None);
                self.evaluate_capabilities(now);
            }
            (MessageType::Control(ControlMessageType::SoftReset), _) => self.accept_soft_reset(now),
            (MessageType::Control(ControlMessageType::GetSinkCap), _) => {
                let capabilities = self.device_policy_manager.sink_capabilities();
                let result = self.protocol_layer.send_sink_capabilities(&capabilities, now);
                self.handle_reply_result(result, now);
            }
            (MessageType::Control(ControlMessageType::Ping | ControlMessageType::GoodCRC), _) => (),
            (MessageType::Control(control_message_type), _) => {
                self.handle_control_message(control_message_type, now)
            }
            (message_type, _) => self.handle_unexpected(message_type, now),
        }
    }

    fn handle_control_message(&mut self, control_message_type: ControlMessageType, now: Instant) {
        match (self.state, control_message_type) {
            (State::SelectCapability, ControlMessageType::Accept) => {
                self.busy_counter.reset();
                self.set_state(State::WaitPsRdy, Some(Deadline::start(TimerType::PSTransition, now)));
            }
            (State::SelectCapability, ControlMessageType::Reject | ControlMessageType::Wait) => {
                if self.busy_counter.is_exhausted() {
                    warn!("Source keeps rejecting requests");
                    self.enter_error_recovery(ErrorCause::CapabilityEvaluation, true, now);
                } else {
                    _ = self.busy_counter.increment();
                    self.set_state(State::RequestBackoff, Some(Deadline::start(TimerType::SinkRequest, now)));
                }
            }
            (State::WaitPsRdy, ControlMessageType::PsRdy) => self.enter_ready(now),
            (State::SendSoftReset, ControlMessageType::Accept) => {
                self.set_state(State::Discovery, Some(Deadline::start(TimerType::SinkWaitCap, now)));
            }
            _ => self.handle_unexpected(MessageType::Control(control_message_type), now),
        }
    }

    fn handle_unexpected(&mut self, message_type: MessageType, now: Instant) {
        match self.state {
            State::SelectCapability | State::WaitPsRdy => {
                warn!("Unexpected {:?} during negotiation", message_type);
                self.enter_error_recovery(ErrorCause::Framing, true, now);
            }
            State::Ready | State::DefaultPower => {
                trace!("Reply Not_Supported to {:?}", message_type);
                let result = self.protocol_layer.send_control(ControlMessageType::NotSupported, now);
                self.handle_reply_result(result, now);
            }
            _ => trace!("Ignore {:?} in state {:?}", message_type, self.state),
        }
    }

    /// Replies to unsolicited messages are best effort, the partner asks again if needed.
    fn handle_reply_result(&mut self, result: Result<(), TxError>, now: Instant) {
        match result {
            Ok(()) => (),
            Err(TxError::HardReset) => self.enter_error_recovery(ErrorCause::Framing, false, now),
            Err(error) => warn!("Reply not sent: {:?}", error),
        }
    }

    fn accept_soft_reset(&mut self, now: Instant) {
        // The protocol layer has already reset its message IDs.
        debug!("Soft reset by source");
        self.clear_negotiation();

        match self.protocol_layer.send_control(ControlMessageType::Accept, now) {
            Ok(()) => self.set_state(State::Discovery, Some(Deadline::start(TimerType::SinkWaitCap, now))),
            Err(TxError::HardReset) => self.enter_error_recovery(ErrorCause::Framing, false, now),
            Err(_) => self.enter_error_recovery(ErrorCause::TransmissionExhausted, true, now),
        }
    }

    fn evaluate_capabilities(&mut self, now: Instant) {
        self.contract = None;

        let Some(capabilities) = self.source_capabilities.as_ref() else {
            self.enter_error_recovery(ErrorCause::CapabilityEvaluation, true, now);
            return;
        };

        if !capabilities.is_valid() {
            error!("Invalid source capabilities, first PDO is not vSafe5V");
            self.enter_error_recovery(ErrorCause::CapabilityEvaluation, true, now);
            return;
        }

        let ceiling = request::volts(self.config.request_voltage);
        let Some(selection) = self.device_policy_manager.select(capabilities, ceiling) else {
            error!("No acceptable source capability");
            self.enter_error_recovery(ErrorCause::CapabilityEvaluation, true, now);
            return;
        };

        match self.protocol_layer.request_power(selection.to_request(), now) {
            Ok(()) => {
                debug!(
                    "Request object position {} ({} mV)",
                    selection.object_position,
                    selection.supply.voltage().get::<millivolt>()
                );
                self.selection = Some(selection);
                self.set_state(
                    State::SelectCapability,
                    Some(Deadline::start(TimerType::SenderResponse, now)),
                );
            }
            Err(TxError::Busy) => trace!("Request postponed, transmission pending"),
            Err(TxError::HardReset) => self.enter_error_recovery(ErrorCause::Framing, false, now),
            Err(TxError::Discarded) => {
                self.enter_error_recovery(ErrorCause::TransmissionExhausted, true, now)
            }
        }
    }

    fn enter_ready(&mut self, now: Instant) {
        let Some(selection) = self.selection else {
            self.enter_error_recovery(ErrorCause::Framing, true, now);
            return;
        };

        let contract = Contract::from(&selection);
        info!(
            "Contract at {} mV, object position {}",
            contract.voltage().get::<millivolt>(),
            contract.object_position
        );

        self.contract = Some(contract);
        self.hard_reset_counter.reset();
        self.set_state(State::Ready, Some(Deadline::start(TimerType::PowerSettle, now)));

        self.device_policy_manager.transition_power(&contract);
        self.dispatcher.dispatch(&Event::ContractValid(contract));
    }

    /// Escalate while source capabilities do not arrive.
    ///
    /// Ask with Get_Source_Cap first, then with a soft reset, and finally with a hard reset.
    /// Once hard resets are exhausted, stay at 5 V.
    fn solicit_capabilities(&mut self, now: Instant) {
        if self.hard_reset_counter.is_exhausted() {
            self.enter_default_power();
            return;
        }

        match self.solicitation {
            Solicitation::None => {
                debug!("No source capabilities, send Get_Source_Cap");
                self.solicitation = Solicitation::GetSourceCap;
                let result = self.protocol_layer.send_control(ControlMessageType::GetSourceCap, now);
                self.set_state(State::Discovery, Some(Deadline::start(TimerType::SinkWaitCap, now)));
                self.handle_reply_result(result, now);
            }
            Solicitation::GetSourceCap => self.send_soft_reset(now),
            Solicitation::SoftReset => {
                warn!("No source capabilities received");
                self.enter_error_recovery(ErrorCause::Timeout, true, now);
            }
        }
    }

    fn send_soft_reset(&mut self, now: Instant) {
        debug!("No source capabilities, send Soft_Reset");
        self.solicitation = Solicitation::SoftReset;
        self.protocol_layer.reset();

        match self.protocol_layer.send_control(ControlMessageType::SoftReset, now) {
            Ok(()) => self.set_state(
                State::SendSoftReset,
                Some(Deadline::start(TimerType::SenderResponse, now)),
            ),
            Err(TxError::HardReset) => self.enter_error_recovery(ErrorCause::Framing, false, now),
            Err(_) => self.enter_error_recovery(ErrorCause::TransmissionExhausted, true, now),
        }
    }

    fn enter_default_power(&mut self) {
        warn!("No PD source, staying at 5 V");
        self.set_state(State::DefaultPower, None);
        self.dispatcher.dispatch(&Event::PowerReady(None));
    }

    /// Reset the port partner and all negotiation state.
    ///
    /// A hard reset is only signaled, if the partner did not already signal one.
    fn enter_error_recovery(&mut self, cause: ErrorCause, signal_hard_reset: bool, now: Instant) {
        warn!("Error recovery after {:?}", cause);

        if signal_hard_reset {
            self.protocol_layer.hard_reset();
        } else {
            self.protocol_layer.reset();
        }

        self.device_policy_manager.hard_reset();
        self.clear_negotiation();

        if !self.hard_reset_counter.is_exhausted() {
            _ = self.hard_reset_counter.increment();
        }

        self.orientation = None;
        self.detach_deadline = None;
        self.attach_state = AttachState::Detached;
        self.set_state(
            State::ErrorRecovery,
            Some(Deadline::start(TimerType::HardResetRecovery, now)),
        );
        self.dispatcher.dispatch(&Event::Error(cause));
    }

    fn check_deadline(&mut self, now: Instant) {
        let Some(deadline) = self.deadline else {
            return;
        };

        if !deadline.is_expired(now) {
            return;
        }

        // While a message awaits GoodCRC, the protocol layer owns the timeout.
        if matches!(self.state, State::SelectCapability | State::SendSoftReset) && self.protocol_layer.is_busy() {
            return;
        }

        trace!("Timer {:?} expired in state {:?}", deadline.timer_type, self.state);
        self.deadline = None;

        match self.state {
            State::AttachWaitSink => self.enter_attached(now),
            State::Discovery => self.solicit_capabilities(now),
            State::SelectCapability | State::WaitPsRdy | State::SendSoftReset => {
                self.enter_error_recovery(ErrorCause::Timeout, true, now);
            }
            State::RequestBackoff => self.set_state(State::EvaluateCapabilities, None),
            State::Ready => {
                if let Some(contract) = self.contract {
                    self.dispatcher.dispatch(&Event::PowerReady(Some(contract)));
                }
            }
            State::ErrorRecovery => {
                self.set_state(State::Detached, None);

                if self.protocol_layer.driver().sample_attach().orientation().is_none() {
                    info!("Source detached during error recovery");
                    self.hard_reset_counter.reset();
                    self.dispatcher.dispatch(&Event::Disconnected);
                }
            }
            State::Detached | State::EvaluateCapabilities | State::DefaultPower => (),
        }
    }
}
