//! The USB-PD 2.0 wire codec: message headers, power data objects and
//! request data objects.
//!
//! The codec is total over well-formed inputs and does not perform CRC
//! handling; framing, CRC and GoodCRC generation are the port controller's
//! responsibility.

pub mod header;
pub mod pdo;
pub mod request;

use byteorder::{ByteOrder, LittleEndian};
use header::{DataMessageType, Header, MessageType};
use heapless::Vec;
use pdo::{SinkCapabilities, SourceCapabilities, parse_raw_pdo};
use request::RawRequest;

/// Maximum size of a serialized message in bytes: a header and up to seven
/// data objects.
pub const MAX_MESSAGE_SIZE: usize = 2 + 7 * 4;

/// Errors that can occur during message or header parsing.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseError {
    /// The input buffer has an invalid length.
    #[error("invalid length, expected `{expected}`, found `{found}`")]
    InvalidLength {
        /// The expected length.
        expected: usize,
        /// The actual length found.
        found: usize,
    },
    /// The specification revision field was reserved.
    #[error("unsupported specification revision `{0}`")]
    UnsupportedSpecificationRevision(u8),
}

/// Data that data messages can carry.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Data {
    /// Source capability data.
    SourceCapabilities(SourceCapabilities),
    /// A request for a power level, kept raw; interpretation depends on the
    /// kind of PDO its object position refers to.
    Request(RawRequest),
    /// Sink capability data.
    SinkCapabilities(SinkCapabilities),
    /// A built-in self-test request, kept raw.
    Bist(Vec<u32, 7>),
    /// Vendor defined data, kept raw.
    VendorDefined(Vec<u32, 7>),
    /// Data of an unknown message type, kept raw.
    Unknown(Vec<u32, 7>),
}

impl Data {
    /// The number of data objects this payload serializes to.
    pub fn num_objects(&self) -> u8 {
        match self {
            Self::SourceCapabilities(capabilities) => capabilities.pdos().len() as u8,
            Self::SinkCapabilities(capabilities) => capabilities.pdos().len() as u8,
            Self::Request(_) => 1,
            Self::Bist(objects) | Self::VendorDefined(objects) | Self::Unknown(objects) => objects.len() as u8,
        }
    }

    // Serialize the data objects to a slice, returning the number of written
    // bytes.
    fn to_bytes(&self, payload: &mut [u8]) -> usize {
        let mut write = |index: usize, object: u32| LittleEndian::write_u32(&mut payload[index * 4..][..4], object);

        match self {
            Self::SourceCapabilities(capabilities) => {
                for (index, pdo) in capabilities.pdos().iter().enumerate() {
                    write(index, pdo.to_raw());
                }
            }
            Self::SinkCapabilities(capabilities) => {
                for (index, pdo) in capabilities.pdos().iter().enumerate() {
                    write(index, pdo.to_raw());
                }
            }
            Self::Request(request) => write(0, request.0),
            Self::Bist(objects) | Self::VendorDefined(objects) | Self::Unknown(objects) => {
                for (index, object) in objects.iter().enumerate() {
                    write(index, *object);
                }
            }
        }

        self.num_objects() as usize * 4
    }
}

/// A USB PD message.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Message {
    /// The message header.
    pub header: Header,
    /// Payload data, for data messages.
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

    /// Serialize a message to a slice, returning the number of written
    /// bytes.
    pub fn to_bytes(&self, buffer: &mut [u8]) -> usize {
        let mut size = self.header.to_bytes(buffer);

        if let Some(data) = self.data.as_ref() {
            size += data.to_bytes(&mut buffer[2..]);
        }

        size
    }

    /// Parse a message from a slice of bytes.
    pub fn from_bytes(buffer: &[u8]) -> Result<Self, ParseError> {
        let header = Header::from_bytes(buffer)?;
        let payload = &buffer[2..];

        let num_objects = header.num_objects();
        if payload.len() < num_objects * 4 {
            return Err(ParseError::InvalidLength {
                expected: 2 + num_objects * 4,
                found: buffer.len(),
            });
        }

        let objects = move || {
            payload
                .chunks_exact(4)
                .take(num_objects)
                .map(|chunk| LittleEndian::read_u32(chunk))
        };

        let data = match header.message_type() {
            MessageType::Control(_) => None,
            MessageType::Data(DataMessageType::SourceCapabilities) => Some(Data::SourceCapabilities(
                SourceCapabilities(objects().map(parse_raw_pdo).collect()),
            )),
            MessageType::Data(DataMessageType::SinkCapabilities) => Some(Data::SinkCapabilities(SinkCapabilities(
                objects().map(parse_raw_pdo).collect(),
            ))),
            MessageType::Data(DataMessageType::Request) => {
                Some(Data::Request(RawRequest(LittleEndian::read_u32(payload))))
            }
            MessageType::Data(DataMessageType::Bist) => Some(Data::Bist(objects().collect())),
            MessageType::Data(DataMessageType::VendorDefined) => Some(Data::VendorDefined(objects().collect())),
            MessageType::Data(DataMessageType::Reserved) => Some(Data::Unknown(objects().collect())),
        };

        Ok(Self { header, data })
    }
}

#[cfg(test)]
mod tests {
    use super::header::{ControlMessageType, DataMessageType, Header, MessageType};
    use super::pdo::{FixedSupply, PowerDataObject, SourceCapabilities};
    use super::request::FixedVariableRequest;
    use super::{Data, Message, RawRequest};
    use crate::counters::{Counter, CounterType};
    use crate::{DataRole, PowerRole};

    fn source_template() -> Header {
        Header::new_template(DataRole::Host, PowerRole::Source)
    }

    #[test]
    fn source_capabilities_round_trip() {
        let capabilities = SourceCapabilities(
            [
                PowerDataObject::FixedSupply(FixedSupply::new(5000, 3000).with_dual_role_power(true)),
                PowerDataObject::FixedSupply(FixedSupply::new(9000, 3000)),
                PowerDataObject::FixedSupply(FixedSupply::new(12000, 3000)),
            ]
            .into_iter()
            .collect(),
        );

        let message = Message::new_with_data(
            Header::new_data(
                source_template(),
                Counter::new(CounterType::MessageId),
                DataMessageType::SourceCapabilities,
                3,
            ),
            Data::SourceCapabilities(capabilities.clone()),
        );

        let mut buffer = [0u8; super::MAX_MESSAGE_SIZE];
        let size = message.to_bytes(&mut buffer);
        assert_eq!(size, 2 + 3 * 4);

        let parsed = Message::from_bytes(&buffer[..size]).unwrap();
        assert_eq!(
            parsed.header.message_type(),
            MessageType::Data(DataMessageType::SourceCapabilities)
        );
        assert_eq!(parsed.data, Some(Data::SourceCapabilities(capabilities)));
    }

    #[test]
    fn request_round_trip() {
        let request = FixedVariableRequest::new(3, 2000, 2000);
        let message = Message::new_with_data(
            Header::new_data(
                Header::new_template(DataRole::Device, PowerRole::Sink),
                Counter::new(CounterType::MessageId),
                DataMessageType::Request,
                1,
            ),
            Data::Request(RawRequest(request.0)),
        );

        let mut buffer = [0u8; super::MAX_MESSAGE_SIZE];
        let size = message.to_bytes(&mut buffer);

        let parsed = Message::from_bytes(&buffer[..size]).unwrap();
        let Some(Data::Request(raw)) = parsed.data else {
            panic!("expected a request");
        };
        assert_eq!(raw.object_position(), 3);
        assert_eq!(FixedVariableRequest(raw.0), request);
    }

    #[test]
    fn control_message_has_no_data() {
        let message = Message::new(Header::new_control(
            source_template(),
            Counter::new(CounterType::MessageId),
            ControlMessageType::Accept,
        ));

        let mut buffer = [0u8; super::MAX_MESSAGE_SIZE];
        let size = message.to_bytes(&mut buffer);
        assert_eq!(size, 2);

        let parsed = Message::from_bytes(&buffer[..size]).unwrap();
        assert_eq!(
            parsed.header.message_type(),
            MessageType::Control(ControlMessageType::Accept)
        );
        assert!(parsed.data.is_none());
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let message = Message::new_with_data(
            Header::new_data(
                source_template(),
                Counter::new(CounterType::MessageId),
                DataMessageType::SourceCapabilities,
                2,
            ),
            Data::SourceCapabilities(SourceCapabilities(
                [
                    PowerDataObject::FixedSupply(FixedSupply::new(5000, 3000)),
                    PowerDataObject::FixedSupply(FixedSupply::new(9000, 3000)),
                ]
                .into_iter()
                .collect(),
            )),
        );

        let mut buffer = [0u8; super::MAX_MESSAGE_SIZE];
        let size = message.to_bytes(&mut buffer);

        assert!(Message::from_bytes(&buffer[..size - 1]).is_err());
    }
}
