use super::Code;
use crate::attributes::{parse_attributes, Attribute};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Packet too short: {0} bytes (minimum 20)")]
    TooShort(usize),
    #[error("Invalid packet length: declared {declared}, received {received} bytes")]
    InvalidLength { declared: usize, received: usize },
    #[error("Invalid attribute: short buffer ({0} byte left)")]
    ShortBuffer(usize),
    #[error("Invalid attribute length: {length} ({remaining} bytes remaining)")]
    InvalidAttributeLength { length: usize, remaining: usize },
    #[error("Attribute value too long: {0} bytes (max 253)")]
    AttributeTooLong(usize),
    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),
}

/// RADIUS Accounting-Request packet as defined in RFC 2866 Section 3
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     Code      |  Identifier   |            Length             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                                                               |
/// |                         Authenticator                         |
/// |                                                               |
/// |                                                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Attributes ...
/// +-+-+-+-+-+-+-+-+-+-+-+-+-
/// ```
///
/// The code byte is kept raw: the codec accepts any code and leaves the
/// decision about unsupported packet types to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPacket {
    /// Packet type (1 byte)
    pub code: u8,
    /// Packet identifier chosen by the client (1 byte)
    pub identifier: u8,
    /// Declared total length, header included
    pub length: u16,
    /// Request Authenticator (16 bytes)
    pub authenticator: [u8; 16],
    /// Shared secret of the receiving server; not part of the wire format
    pub secret: Vec<u8>,
    /// Attributes in wire order
    pub attributes: Vec<Attribute>,
}

impl RequestPacket {
    /// Minimum RADIUS packet size (20 bytes: 1 code + 1 id + 2 length + 16 authenticator)
    pub const MIN_PACKET_SIZE: usize = 20;
    /// Maximum RADIUS packet size (4096 bytes as per RFC 2865)
    pub const MAX_PACKET_SIZE: usize = 4096;

    pub fn new(code: Code, identifier: u8, authenticator: [u8; 16]) -> Self {
        RequestPacket {
            code: code.as_u8(),
            identifier,
            length: Self::MIN_PACKET_SIZE as u16,
            authenticator,
            secret: Vec::new(),
            attributes: Vec::new(),
        }
    }

    pub fn add_attribute(&mut self, attribute: Attribute) {
        self.length = self.length.saturating_add(attribute.length() as u16);
        self.attributes.push(attribute);
    }

    /// Decode a datagram received with the given shared secret
    ///
    /// Bytes past the declared length are ignored. Any framing error in the
    /// attribute area rejects the whole packet.
    pub fn decode(data: &[u8], secret: &[u8]) -> Result<Self, PacketError> {
        if data.len() < Self::MIN_PACKET_SIZE {
            return Err(PacketError::TooShort(data.len()));
        }

        let length = u16::from_be_bytes([data[2], data[3]]) as usize;
        if length < Self::MIN_PACKET_SIZE || length > Self::MAX_PACKET_SIZE || data.len() < length
        {
            return Err(PacketError::InvalidLength {
                declared: length,
                received: data.len(),
            });
        }

        let attributes = parse_attributes(&data[Self::MIN_PACKET_SIZE..length])?;

        let mut authenticator = [0u8; 16];
        authenticator.copy_from_slice(&data[4..20]);

        Ok(RequestPacket {
            code: data[0],
            identifier: data[1],
            length: length as u16,
            authenticator,
            secret: secret.to_vec(),
            attributes,
        })
    }

    /// Encode packet to bytes, computing the length field from the attributes
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let total_length = self.encoded_length();
        if total_length > Self::MAX_PACKET_SIZE {
            return Err(PacketError::PacketTooLarge(total_length));
        }

        let mut buffer = Vec::with_capacity(total_length);
        buffer.push(self.code);
        buffer.push(self.identifier);
        buffer.extend_from_slice(&(total_length as u16).to_be_bytes());
        buffer.extend_from_slice(&self.authenticator);
        for attr in &self.attributes {
            attr.encode_into(&mut buffer)?;
        }

        Ok(buffer)
    }

    /// Encode as an Accounting-Request with the RFC 2866 request authenticator
    ///
    /// The authenticator field of `self` is replaced by
    /// MD5(Code + Identifier + Length + 16 zero octets + Attributes + Secret).
    pub fn encode_accounting_request(&mut self, secret: &[u8]) -> Result<Vec<u8>, PacketError> {
        self.authenticator = [0u8; 16];
        let mut encoded = self.encode()?;
        let authenticator = crate::auth::calculate_accounting_request_authenticator(&encoded, secret);
        encoded[4..20].copy_from_slice(&authenticator);
        self.authenticator = authenticator;
        Ok(encoded)
    }

    /// Length implied by the header plus the encoded attributes
    pub fn encoded_length(&self) -> usize {
        Self::MIN_PACKET_SIZE + self.attributes.iter().map(Attribute::length).sum::<usize>()
    }

    /// Packet code, if it is one this crate knows about
    pub fn code(&self) -> Option<Code> {
        Code::from_u8(self.code)
    }

    /// Find first attribute by type
    pub fn find_attribute(&self, attr_type: u8) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.attr_type == attr_type)
    }

    /// Find all attributes by type
    pub fn find_all_attributes(&self, attr_type: u8) -> Vec<&Attribute> {
        self.attributes
            .iter()
            .filter(|a| a.attr_type == attr_type)
            .collect()
    }
}
