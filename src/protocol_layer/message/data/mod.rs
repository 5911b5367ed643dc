//! Definitions and implementations of data messages.
//!
//! See [6.4].
use byteorder::{ByteOrder, LittleEndian};

use crate::protocol_layer::message::header::DataMessageType;

pub mod request;
pub mod sink_capabilities;
pub mod source_capabilities;

/// Types of data messages.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Data {
    /// Source capabilities.
    SourceCapabilities(source_capabilities::SourceCapabilities),
    /// Request for a power level from the source.
    Request(request::FixedVariableSupply),
    /// Sink capabilities, sent in reply to Get_Sink_Cap.
    SinkCapabilities(sink_capabilities::SinkCapabilities),
    /// A data message that the sink does not interpret.
    Unknown(DataMessageType),
}

impl Data {
    /// Parse the payload of a data message.
    ///
    /// `payload` must hold exactly `num_objects` data objects.
    pub fn parse(message_type: DataMessageType, num_objects: usize, payload: &[u8]) -> Self {
        let objects = payload.chunks_exact(4).take(num_objects).map(LittleEndian::read_u32);

        match message_type {
            DataMessageType::SourceCapabilities => Data::SourceCapabilities(
                source_capabilities::SourceCapabilities(objects.map(source_capabilities::parse_raw_pdo).collect()),
            ),
            DataMessageType::SinkCapabilities => Data::SinkCapabilities(sink_capabilities::SinkCapabilities(
                objects.map(sink_capabilities::parse_raw_pdo).collect(),
            )),
            DataMessageType::Request => match payload {
                [_, _, _, _] => Data::Request(request::FixedVariableSupply(LittleEndian::read_u32(payload))),
                _ => Data::Unknown(message_type),
            },
            _ => {
                trace!("Unhandled data message type {:?}", message_type);
                Data::Unknown(message_type)
            }
        }
    }

    /// Serialize message data to a slice, returning the number of written bytes.
    pub fn to_bytes(&self, payload: &mut [u8]) -> usize {
        match self {
            Self::SourceCapabilities(capabilities) => capabilities.to_bytes(payload),
            Self::Request(data_object) => data_object.to_bytes(payload),
            Self::SinkCapabilities(capabilities) => capabilities.to_bytes(payload),
            Self::Unknown(_) => 0,
        }
    }

    /// The number of 32 bit data objects that this payload encodes to.
    pub fn num_objects(&self) -> u8 {
        match self {
            Self::SourceCapabilities(capabilities) => capabilities.pdos().len() as u8,
            Self::Request(_) => 1,
            Self::SinkCapabilities(capabilities) => capabilities.pdos().len() as u8,
            Self::Unknown(_) => 0,
        }
    }
}
