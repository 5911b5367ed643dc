//! Implements a dummy driver and device for testing.
use std::collections::VecDeque;
use std::vec::Vec;

use usbpd_sink_traits::{AttachSignal, CcLevel, CcPin, Driver, DriverRxError, DriverTxError};

use crate::counters::{Counter, CounterType};
use crate::protocol_layer::message::data::Data;
use crate::protocol_layer::message::data::source_capabilities::{
    Augmented, FixedSupply, PowerDataObject, SourceCapabilities, SprProgrammablePowerSupply,
};
use crate::protocol_layer::message::header::{
    ControlMessageType, DataMessageType, Header, SpecificationRevision,
};
use crate::protocol_layer::message::{MAX_MESSAGE_SIZE, Message};
use crate::sink::device_policy_manager::DevicePolicyManager as SinkDevicePolicyManager;
use crate::{DataRole, PowerRole};

/// An encoded frame.
pub type Frame = heapless::Vec<u8, MAX_MESSAGE_SIZE>;

/// A dummy sink device that implements the sink device policy manager.
pub struct DummySinkDevice {}

impl SinkDevicePolicyManager for DummySinkDevice {}

/// A dummy driver for testing.
///
/// Received frames are queued by the test, and transmitted frames are recorded.
pub struct DummyDriver<const AUTO_GOOD_CRC: bool = false> {
    rx_queue: VecDeque<Result<Frame, DriverRxError>>,
    tx_vec: Vec<Frame>,
    hard_resets: usize,
    attach: AttachSignal,
    selected_cc: Option<CcPin>,
}

impl DummyDriver<false> {
    /// Create a new dummy driver, that relies on software GoodCRC.
    pub fn new() -> Self {
        Self::empty()
    }
}

impl DummyDriver<true> {
    /// Create a new dummy driver, that pretends to send GoodCRC in hardware.
    pub fn new_auto_good_crc() -> Self {
        Self::empty()
    }
}

impl<const AUTO_GOOD_CRC: bool> DummyDriver<AUTO_GOOD_CRC> {
    fn empty() -> Self {
        Self {
            rx_queue: VecDeque::new(),
            tx_vec: Vec::new(),
            hard_resets: 0,
            attach: AttachSignal::OPEN,
            selected_cc: None,
        }
    }

    /// Inject received data that can be retrieved later.
    pub fn inject_received_data(&mut self, data: &[u8]) {
        let mut vec = heapless::Vec::new();
        vec.extend_from_slice(data).unwrap();

        self.rx_queue.push_back(Ok(vec));
    }

    /// Inject a reception error.
    pub fn inject_receive_error(&mut self, error: DriverRxError) {
        self.rx_queue.push_back(Err(error));
    }

    /// Probe data that was transmitted by the stack.
    pub fn probe_transmitted_data(&mut self) -> Frame {
        self.tx_vec.remove(0)
    }

    /// The number of transmitted frames that were not probed yet.
    pub fn transmitted_count(&self) -> usize {
        self.tx_vec.len()
    }

    /// Forget all transmitted frames.
    pub fn clear_transmitted_data(&mut self) {
        self.tx_vec.clear();
    }

    /// The number of signaled hard resets.
    pub fn hard_resets(&self) -> usize {
        self.hard_resets
    }

    /// Set what the CC lines show from now on.
    pub fn set_attach(&mut self, attach: AttachSignal) {
        self.attach = attach;
    }

    /// Attach a default source on CC1.
    pub fn attach_cc1(&mut self) {
        self.set_attach(AttachSignal::attached(CcPin::Cc1, CcLevel::Current3A0));
    }

    /// The CC line that the stack routed BMC communication to.
    pub fn selected_cc(&self) -> Option<CcPin> {
        self.selected_cc
    }
}

impl<const AUTO_GOOD_CRC: bool> Driver for DummyDriver<AUTO_GOOD_CRC> {
    const HAS_AUTO_GOOD_CRC: bool = AUTO_GOOD_CRC;

    fn sample_attach(&mut self) -> AttachSignal {
        self.attach
    }

    fn select_cc(&mut self, pin: CcPin) {
        self.selected_cc = Some(pin);
    }

    fn interrupt_pending(&mut self) -> bool {
        !self.rx_queue.is_empty()
    }

    fn receive(&mut self, buffer: &mut [u8]) -> Result<Option<usize>, DriverRxError> {
        match self.rx_queue.pop_front() {
            None => Ok(None),
            Some(Err(error)) => Err(error),
            Some(Ok(frame)) => {
                let len = frame.len();
                buffer[..len].copy_from_slice(&frame);
                Ok(Some(len))
            }
        }
    }

    fn transmit(&mut self, data: &[u8]) -> Result<(), DriverTxError> {
        let mut vec = heapless::Vec::new();
        vec.extend_from_slice(data).unwrap();
        self.tx_vec.push(vec);

        Ok(())
    }

    fn transmit_hard_reset(&mut self) -> Result<(), DriverTxError> {
        self.hard_resets += 1;
        Ok(())
    }
}

/// Dummy capabilities to deserialize.
///
/// - Fixed 5 V at 3 A
/// - Fixed 9 V at 3 A
/// - Fixed 15 V at 3 A
/// - Fixed 20 V at 2.25 A
/// - PPS 3.3-11 V at 5 A
/// - PPS 3.3-16 V at 3 A
/// - PPS 3.3-21 V at 2.25 A
pub const DUMMY_CAPABILITIES: [u8; 30] = [
    0xA1, // Header
    0x71, // Header
    0x2c, // +
    0x91, // | Fixed 5V @ 3A
    0x01, // |
    0x08, // +
    0x2c, // +
    0xD1, // |
    0x02, // | Fixed 9V @ 3A
    0x00, // +
    0x2C, // +
    0xB1, // |
    0x04, // | Fixed 15V @ 3A
    0x00, // +
    0xE1, // +
    0x40, // |
    0x06, // | Fixed 20V @ 2.25A
    0x00, // +
    0x64, // +
    0x21, // |
    0xDC, // | PPS 3.3-11V @ 5A
    0xC8, // +
    0x3C, // +
    0x21, // |
    0x40, // | PPS 3.3-16V @ 3A
    0xC9, // +
    0x2D, // +
    0x21, // |
    0xA4, // | PPS 3.3-21V @ 2.25A
    0xC9, // +
];

/// Get dummy source capabilities for testing.
///
/// Corresponds to the `DUMMY_CAPABILITIES` above.
pub fn get_dummy_source_capabilities() -> SourceCapabilities {
    let mut pdos = heapless::Vec::new();

    pdos.push(PowerDataObject::FixedSupply(
        FixedSupply::default()
            .with_raw_voltage(100)
            .with_raw_max_current(300)
            .with_unconstrained_power(true),
    ))
    .unwrap();

    for (raw_voltage, raw_max_current) in [(180, 300), (300, 300), (400, 225)] {
        pdos.push(PowerDataObject::FixedSupply(
            FixedSupply::default()
                .with_raw_voltage(raw_voltage)
                .with_raw_max_current(raw_max_current),
        ))
        .unwrap();
    }

    for (raw_max_voltage, raw_max_current) in [(110, 100), (160, 60), (210, 45)] {
        pdos.push(PowerDataObject::Augmented(Augmented::Spr(
            SprProgrammablePowerSupply::default()
                .with_raw_max_current(raw_max_current)
                .with_raw_min_voltage(33)
                .with_raw_max_voltage(raw_max_voltage)
                .with_pps_power_limited(true),
        )))
        .unwrap();
    }

    SourceCapabilities(pdos)
}

/// Build capabilities from fixed supplies, given as (50 mV units, 10 mA units).
pub fn fixed_capabilities(supplies: &[(u16, u16)]) -> SourceCapabilities {
    SourceCapabilities(
        supplies
            .iter()
            .map(|&(raw_voltage, raw_max_current)| {
                PowerDataObject::FixedSupply(
                    FixedSupply::default()
                        .with_raw_voltage(raw_voltage)
                        .with_raw_max_current(raw_max_current),
                )
            })
            .collect(),
    )
}

/// Get a header template for simulating source messages (Source/Dfp roles).
pub fn source_header_template() -> Header {
    Header::new_template(DataRole::Dfp, PowerRole::Source, SpecificationRevision::R3_X)
}

fn to_frame(message: &Message) -> Frame {
    let mut buf = [0u8; MAX_MESSAGE_SIZE];
    let len = message.to_bytes(&mut buf);

    let mut frame = heapless::Vec::new();
    frame.extend_from_slice(&buf[..len]).unwrap();
    frame
}

/// Encode a control message, as sent by the source.
pub fn source_control_message(control_message_type: ControlMessageType, message_id: u8) -> Frame {
    to_frame(&Message::new(Header::new_control(
        source_header_template(),
        Counter::new_from_value(CounterType::MessageId, message_id),
        control_message_type,
    )))
}

/// Encode a Source_Capabilities message, as sent by the source.
pub fn source_capabilities_message(capabilities: &SourceCapabilities, message_id: u8) -> Frame {
    let data = Data::SourceCapabilities(capabilities.clone());
    let header = Header::new_data(
        source_header_template(),
        Counter::new_from_value(CounterType::MessageId, message_id),
        DataMessageType::SourceCapabilities,
        data.num_objects(),
    );

    to_frame(&Message::new_with_data(header, data))
}

#[cfg(test)]
mod tests {
    use usbpd_sink_traits::{Driver, DriverRxError};

    use super::*;

    #[test]
    fn test_receive() {
        let mut driver = DummyDriver::new();

        let mut injected_data = [0u8; 30];
        injected_data[0] = 123;

        driver.inject_received_data(&injected_data);

        injected_data[1] = 255;
        driver.inject_received_data(&injected_data);
        driver.inject_receive_error(DriverRxError::Discarded);

        let mut buf = [0u8; 30];
        assert_eq!(driver.receive(&mut buf), Ok(Some(30)));

        assert_eq!(buf[0], 123);
        assert_eq!(buf[1], 0);

        let mut buf = [0u8; 30];
        driver.receive(&mut buf).unwrap();

        assert_eq!(buf[0], 123);
        assert_eq!(buf[1], 255);

        assert_eq!(driver.receive(&mut buf), Err(DriverRxError::Discarded));
        assert_eq!(driver.receive(&mut buf), Ok(None));
        assert!(!driver.interrupt_pending());
    }

    #[test]
    fn dummy_capabilities_match_frame() {
        let frame = source_capabilities_message(&get_dummy_source_capabilities(), 0);
        assert_eq!(&frame[..], &DUMMY_CAPABILITIES[..]);
    }
}
