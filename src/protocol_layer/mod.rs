//! The protocol layer is controlled by the policy engine, and commands the PHY layer.
//!
//! Handles
//! - construction of messages,
//! - message ID counters and duplicate detection,
//! - GoodCRC acknowledgement and retransmission,
//! - soft and hard reset of its own state.
//!
//! The protocol layer never blocks. A transmission is handed to the PHY right away, and the
//! wait for its GoodCRC is tracked as a deadline that is serviced in [`ProtocolLayer::poll`].
//!
//! The protocol layer does not support extended messages.
pub mod message;

use core::cmp::{max, min};

use heapless::Vec;
use message::data::Data;
use message::data::request::FixedVariableSupply;
use message::data::sink_capabilities::SinkCapabilities;
use message::header::{ControlMessageType, DataMessageType, Header, MessageType, SpecificationRevision};
use message::{MAX_MESSAGE_SIZE, Message, ParseError};
use usbpd_sink_traits::{Driver, DriverRxError, DriverTxError};

use crate::counters::{Counter, CounterType};
use crate::timers::{Deadline, Instant, TimerType};

/// Errors that can occur when starting a transmission.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxError {
    /// A previous transmission still awaits its GoodCRC.
    #[error("transmission pending")]
    Busy,
    /// The PHY discarded the message.
    #[error("transmission discarded")]
    Discarded,
    /// A hard reset was signaled during transmission.
    #[error("hard reset during transmission")]
    HardReset,
}

impl From<DriverTxError> for TxError {
    fn from(value: DriverTxError) -> Self {
        match value {
            DriverTxError::Discarded => TxError::Discarded,
            DriverTxError::HardReset => TxError::HardReset,
        }
    }
}

/// Acknowledgement of a transmitted message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ack {
    /// The ID of the acknowledged message.
    pub message_id: u8,
}

/// Events that the protocol layer reports to the policy engine.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolEvent {
    /// A new, valid message was received from the port partner.
    Received(Message),
    /// The pending transmission was acknowledged.
    Acknowledged(Ack),
    /// The pending transmission was not acknowledged, even after all retries.
    TransmitFailed,
    /// The port partner signaled a hard reset.
    HardReset,
    /// A frame passed CRC, but could not be parsed.
    Malformed(ParseError),
}

/// A transmission that awaits its GoodCRC.
#[derive(Debug)]
struct RetryState {
    frame: Vec<u8, MAX_MESSAGE_SIZE>,
    message_id: u8,
    attempts: Counter,
    deadline: Deadline,
}

#[derive(Debug)]
struct Counters {
    rx_message: Option<Counter>,
    tx_message: Counter,
}

impl Default for Counters {
    fn default() -> Self {
        Counters {
            rx_message: None,
            tx_message: Counter::new(CounterType::MessageId),
        }
    }
}

/// The USB PD protocol layer.
#[derive(Debug)]
pub struct ProtocolLayer<DRIVER: Driver> {
    driver: DRIVER,
    counters: Counters,
    default_header: Header,
    initial_header: Header,
    pending: Option<RetryState>,
}

impl<DRIVER: Driver> ProtocolLayer<DRIVER> {
    /// Create a new protocol layer from a driver and default header.
    pub fn new(driver: DRIVER, default_header: Header) -> Self {
        Self {
            driver,
            counters: Default::default(),
            default_header,
            initial_header: default_header,
            pending: None,
        }
    }

    /// Reset the protocol layer.
    ///
    /// Clears message ID counters and any pending transmission, and restores the initial
    /// specification revision.
    pub fn reset(&mut self) {
        self.counters = Default::default();
        self.pending = None;
        self.default_header = self.initial_header;
    }

    /// Access the driver.
    pub fn driver(&mut self) -> &mut DRIVER {
        &mut self.driver
    }

    /// The header template for outgoing messages.
    pub fn header(&self) -> &Header {
        &self.default_header
    }

    /// Whether a transmission awaits its GoodCRC.
    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// The ID that the next transmitted message will carry.
    pub fn tx_message_id(&self) -> u8 {
        self.counters.tx_message.value()
    }

    /// The ID of the last accepted received message, if any.
    pub fn rx_message_id(&self) -> Option<u8> {
        self.counters.rx_message.map(|counter| counter.value())
    }

    /// Transmit a message.
    ///
    /// The message is stamped with the next message ID. Completion is reported later by
    /// [`Self::poll`], either as [`ProtocolEvent::Acknowledged`] or [`ProtocolEvent::TransmitFailed`].
    pub fn send(&mut self, message: Message, now: Instant) -> Result<(), TxError> {
        if self.pending.is_some() {
            return Err(TxError::Busy);
        }

        let message_id = self.counters.tx_message.value();
        let mut message = message;
        message.header = message.header.with_message_id(message_id);

        trace!("Transmit message {:?}", message);

        let mut buffer = [0u8; MAX_MESSAGE_SIZE];
        let size = message.to_bytes(&mut buffer);

        let frame = Vec::from_slice(&buffer[..size]).map_err(|_| TxError::Discarded)?;
        self.driver.transmit(&frame)?;

        self.pending = Some(RetryState {
            frame,
            message_id,
            attempts: Counter::new(CounterType::Retry),
            deadline: Deadline::start(TimerType::SenderResponse, now),
        });

        Ok(())
    }

    /// Transmit a control message of the provided type.
    pub fn send_control(&mut self, control_message_type: ControlMessageType, now: Instant) -> Result<(), TxError> {
        let message = Message::new(Header::new_control(
            self.default_header,
            self.counters.tx_message,
            control_message_type,
        ));

        self.send(message, now)
    }

    /// Request a certain power level from the source.
    pub fn request_power(&mut self, request: FixedVariableSupply, now: Instant) -> Result<(), TxError> {
        self.send_data(Data::Request(request), DataMessageType::Request, now)
    }

    /// Report the sink's capabilities to the source.
    pub fn send_sink_capabilities(&mut self, capabilities: &SinkCapabilities, now: Instant) -> Result<(), TxError> {
        self.send_data(
            Data::SinkCapabilities(capabilities.clone()),
            DataMessageType::SinkCapabilities,
            now,
        )
    }

    fn send_data(&mut self, data: Data, message_type: DataMessageType, now: Instant) -> Result<(), TxError> {
        let header = Header::new_data(
            self.default_header,
            self.counters.tx_message,
            message_type,
            data.num_objects(),
        );

        self.send(Message::new_with_data(header, data), now)
    }

    /// Signal a hard reset to the port partner, and reset the protocol layer.
    ///
    /// USB PD R3.2, [6.7.1.1]
    pub fn hard_reset(&mut self) {
        if let Err(error) = self.driver.transmit_hard_reset() {
            warn!("Hard reset signaling failed: {:?}", error);
        }

        self.reset();
    }

    /// Service the retry timer, then handle at most one received frame.
    pub fn poll(&mut self, now: Instant) -> Option<ProtocolEvent> {
        if let Some(event) = self.service_retry(now) {
            return Some(event);
        }

        self.receive()
    }

    /// Service the retry timer only, without touching the receive path.
    pub fn poll_timers(&mut self, now: Instant) -> Option<ProtocolEvent> {
        self.service_retry(now)
    }

    fn service_retry(&mut self, now: Instant) -> Option<ProtocolEvent> {
        let pending = self.pending.as_mut()?;

        if !pending.deadline.is_expired(now) {
            return None;
        }

        if pending.attempts.is_exhausted() {
            warn!("No GoodCRC for message ID {} after all retries", pending.message_id);
            self.pending = None;
            _ = self.counters.tx_message.increment();
            return Some(ProtocolEvent::TransmitFailed);
        }

        _ = pending.attempts.increment();
        pending.deadline = Deadline::start(TimerType::SenderResponse, now);
        trace!(
            "Retransmit message ID {} (attempt {})",
            pending.message_id,
            pending.attempts.value()
        );

        match self.driver.transmit(&pending.frame) {
            Ok(()) | Err(DriverTxError::Discarded) => None,
            Err(DriverTxError::HardReset) => {
                self.reset();
                Some(ProtocolEvent::HardReset)
            }
        }
    }

    fn receive(&mut self) -> Option<ProtocolEvent> {
        let mut buffer = [0u8; MAX_MESSAGE_SIZE];

        let length = match self.driver.receive(&mut buffer) {
            Ok(Some(length)) => length,
            Ok(None) => return None,
            Err(DriverRxError::Discarded) => {
                trace!("Dropped frame with invalid CRC");
                return None;
            }
            Err(DriverRxError::HardReset) => {
                warn!("Hard reset received");
                self.reset();
                return Some(ProtocolEvent::HardReset);
            }
        };

        if length > buffer.len() {
            return Some(ProtocolEvent::Malformed(ParseError::InvalidLength {
                expected: buffer.len(),
                found: length,
            }));
        }

        let message = match Message::from_bytes(&buffer[..length]) {
            Ok(message) => message,
            Err(error) => {
                warn!("Dropped malformed frame: {:?}", error);
                return Some(ProtocolEvent::Malformed(error));
            }
        };

        self.update_spec_revision(&message);

        match message.message_type() {
            MessageType::Control(ControlMessageType::GoodCRC) => self.handle_good_crc(&message),
            MessageType::Control(ControlMessageType::SoftReset) => {
                // Soft reset restarts both message ID sequences, so it is never a duplicate.
                self.transmit_good_crc(message.header.message_id());
                self.counters = Default::default();
                self.counters.rx_message = Some(Counter::new_from_value(
                    CounterType::MessageId,
                    message.header.message_id(),
                ));
                self.pending = None;

                Some(ProtocolEvent::Received(message))
            }
            _ => {
                // Acknowledge duplicates as well, the partner may have missed the first GoodCRC.
                self.transmit_good_crc(message.header.message_id());

                if self.update_rx_message_counter(&message) {
                    return None;
                }

                if let Some(pending) = self.pending.take() {
                    trace!("Abandon message ID {}, partner moved on", pending.message_id);
                    _ = self.counters.tx_message.increment();
                }

                trace!("Received message {:?}", message);
                Some(ProtocolEvent::Received(message))
            }
        }
    }

    fn handle_good_crc(&mut self, message: &Message) -> Option<ProtocolEvent> {
        let message_id = message.header.message_id();

        let expected = self.pending.as_ref().map(|pending| pending.message_id);

        match expected {
            Some(expected) if expected == message_id => {
                trace!("Received GoodCRC for message ID {}", message_id);
                self.pending = None;
                _ = self.counters.tx_message.increment();
                Some(ProtocolEvent::Acknowledged(Ack { message_id }))
            }
            Some(expected) => {
                trace!("Ignore GoodCRC for message ID {}, expected {}", message_id, expected);
                None
            }
            None => {
                trace!("Ignore GoodCRC for message ID {}, nothing pending", message_id);
                None
            }
        }
    }

    /// Send a GoodCRC message to the port partner.
    fn transmit_good_crc(&mut self, message_id: u8) {
        if DRIVER::HAS_AUTO_GOOD_CRC {
            return;
        }

        trace!("Transmit GoodCRC for RX message ID {}", message_id);

        let mut buffer = [0u8; MAX_MESSAGE_SIZE];
        let size = Message::new(Header::new_control(
            self.default_header,
            Counter::new_from_value(CounterType::MessageId, message_id),
            ControlMessageType::GoodCRC,
        ))
        .to_bytes(&mut buffer);

        if let Err(error) = self.driver.transmit(&buffer[..size]) {
            warn!("GoodCRC transmission failed: {:?}", error);
        }
    }

    /// Updates the received message counter.
    ///
    /// If receiving the first message after protocol layer reset, copy its ID.
    /// Otherwise, compare the received ID with the stored ID. If they are equal, this is a retransmission.
    ///
    /// Returns `true`, if this was a retransmission.
    fn update_rx_message_counter(&mut self, rx_message: &Message) -> bool {
        match self.counters.rx_message.as_mut() {
            None => {
                trace!(
                    "Received first message after protocol layer reset with RX counter value {}",
                    rx_message.header.message_id()
                );
                self.counters.rx_message = Some(Counter::new_from_value(
                    CounterType::MessageId,
                    rx_message.header.message_id(),
                ));
                false
            }
            Some(counter) => {
                if rx_message.header.message_id() == counter.value() {
                    trace!("Received retransmission of RX counter value {}", counter.value());
                    true
                } else {
                    counter.set(rx_message.header.message_id());
                    false
                }
            }
        }
    }

    /// Follow the partner's specification revision, if it is lower than ours.
    fn update_spec_revision(&mut self, message: &Message) {
        let Ok(received) = message.header.spec_revision() else {
            return;
        };
        let Ok(current) = self.default_header.spec_revision() else {
            return;
        };

        let revision: SpecificationRevision = min(current, max(received, SpecificationRevision::R2_0));
        if revision != current {
            debug!("Use specification revision {:?}", revision);
            self.default_header = self.default_header.with_spec_revision(revision);
        }
    }
}
