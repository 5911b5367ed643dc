//! Definitions of message content.
pub mod data;
pub mod header;

use data::Data;
use header::{Header, MessageType};

/// The maximum number of 32 bit data objects in a non-extended message.
pub const MAX_DATA_OBJECTS: usize = 7;

/// The maximum size of a non-extended message on the wire.
pub const MAX_MESSAGE_SIZE: usize = Header::SIZE + 4 * MAX_DATA_OBJECTS;

/// Errors that can occur during message/header parsing.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseError {
    /// The input buffer has an invalid length.
    /// * `expected` - The expected length.
    /// * `found` - The actual length found.
    #[error("invalid input buffer length (expected {expected:?}, found {found:?})")]
    InvalidLength {
        /// The expected length.
        expected: usize,
        /// The actual length found.
        found: usize,
    },
    /// The specification revision field is not supported.
    #[error("unsupported specification revision `{0}`")]
    UnsupportedSpecificationRevision(u8),
    /// The frame is an extended message.
    #[error("extended messages are not supported")]
    ExtendedUnsupported,
}

/// A USB PD message.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Message {
    /// The message header.
    pub header: Header,
    /// Optional payload for data messages.
    pub data: Option<Data>,
}

impl Message {
    /// Create a new message from a message header.
    pub fn new(header: Header) -> Self {
        Self { header, data: None }
    }

    /// Create a new message from a message header and payload data.
    pub fn new_with_data(header: Header, data: Data) -> Self {
        Self {
            header,
            data: Some(data),
        }
    }

    /// The message type, as encoded in the header.
    pub fn message_type(&self) -> MessageType {
        self.header.message_type()
    }

    /// Serialize a message to a slice, returning the number of written bytes.
    ///
    /// The buffer must hold at least [`MAX_MESSAGE_SIZE`] bytes.
    pub fn to_bytes(&self, buffer: &mut [u8]) -> usize {
        self.header.to_bytes(buffer)
            + match self.data.as_ref() {
                Some(data) => data.to_bytes(&mut buffer[Header::SIZE..]),
                None => 0,
            }
    }

    /// Parse a message from a slice of bytes.
    ///
    /// The frame length must match the number of data objects in the header exactly.
    pub fn from_bytes(frame: &[u8]) -> Result<Self, ParseError> {
        let header = Header::from_bytes(frame)?;
        let expected = Header::SIZE + 4 * header.num_objects();

        if frame.len() != expected {
            return Err(ParseError::InvalidLength {
                expected,
                found: frame.len(),
            });
        }

        let payload = &frame[Header::SIZE..];

        Ok(match header.message_type() {
            MessageType::Control(_) => Self::new(header),
            MessageType::Data(message_type) => {
                Self::new_with_data(header, Data::parse(message_type, header.num_objects(), payload))
            }
        })
    }
}
