use crate::packet::PacketError;

/// RADIUS Attribute structure as defined in RFC 2865 Section 5
///
/// ```text
///  0                   1                   2
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |     Type      |    Length     |  Value ...
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Attribute type (1 byte)
    pub attr_type: u8,
    /// Attribute value (0-253 bytes)
    pub value: Vec<u8>,
}

impl Attribute {
    /// Minimum attribute length (type + length fields = 2 bytes)
    pub const MIN_LENGTH: usize = 2;
    /// Maximum attribute length (255 bytes including type and length)
    pub const MAX_LENGTH: usize = 255;
    /// Maximum value length (253 bytes)
    pub const MAX_VALUE_LENGTH: usize = 253;

    pub fn new(attr_type: u8, value: Vec<u8>) -> Result<Self, PacketError> {
        if value.len() > Self::MAX_VALUE_LENGTH {
            return Err(PacketError::AttributeTooLong(value.len()));
        }
        Ok(Attribute { attr_type, value })
    }

    /// Create a string attribute
    pub fn string(attr_type: u8, value: impl Into<String>) -> Result<Self, PacketError> {
        Self::new(attr_type, value.into().into_bytes())
    }

    /// Create an integer attribute (32-bit big-endian)
    pub fn integer(attr_type: u8, value: u32) -> Result<Self, PacketError> {
        Self::new(attr_type, value.to_be_bytes().to_vec())
    }

    /// Create an IP address attribute
    pub fn ipv4(attr_type: u8, value: [u8; 4]) -> Result<Self, PacketError> {
        Self::new(attr_type, value.to_vec())
    }

    /// Wire length of this attribute, header included
    pub fn length(&self) -> usize {
        Self::MIN_LENGTH + self.value.len()
    }

    /// Append the encoded attribute to `buffer`
    ///
    /// Fails with `AttributeTooLong` when the value was set directly to more
    /// than 253 bytes; `buffer` is left untouched in that case.
    pub fn encode_into(&self, buffer: &mut Vec<u8>) -> Result<(), PacketError> {
        let length = u8::try_from(self.length())
            .map_err(|_| PacketError::AttributeTooLong(self.value.len()))?;
        buffer.push(self.attr_type);
        buffer.push(length);
        buffer.extend_from_slice(&self.value);
        Ok(())
    }

    /// Encode attribute to bytes
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        let mut buffer = Vec::with_capacity(self.length());
        self.encode_into(&mut buffer)?;
        Ok(buffer)
    }

    /// Try to interpret value as a string
    pub fn as_string(&self) -> Result<String, std::string::FromUtf8Error> {
        String::from_utf8(self.value.clone())
    }

    /// Try to interpret value as an integer (32-bit big-endian)
    pub fn as_integer(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.value.as_slice().try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }
}

/// Parse the attribute area of a packet
///
/// Every byte must belong to a well-formed attribute: a dangling single byte
/// or a length field pointing past the end fails the whole parse.
pub fn parse_attributes(mut data: &[u8]) -> Result<Vec<Attribute>, PacketError> {
    let mut attributes = Vec::new();

    while !data.is_empty() {
        if data.len() < Attribute::MIN_LENGTH {
            return Err(PacketError::ShortBuffer(data.len()));
        }

        let length = data[1] as usize;
        if length < Attribute::MIN_LENGTH || length > data.len() {
            return Err(PacketError::InvalidAttributeLength {
                length,
                remaining: data.len(),
            });
        }

        attributes.push(Attribute {
            attr_type: data[0],
            value: data[Attribute::MIN_LENGTH..length].to_vec(),
        });
        data = &data[length..];
    }

    Ok(attributes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_attribute() {
        let attr = Attribute::string(1, "testuser").unwrap();
        assert_eq!(attr.attr_type, 1);
        assert_eq!(attr.length(), 10);
        assert_eq!(attr.as_string().unwrap(), "testuser");
    }

    #[test]
    fn test_integer_attribute() {
        let attr = Attribute::integer(46, 1234).unwrap();
        assert_eq!(attr.as_integer(), Some(1234));
        assert_eq!(Attribute::string(46, "abc").unwrap().as_integer(), None);
    }

    #[test]
    fn test_max_value_length() {
        assert!(Attribute::new(1, vec![0u8; 253]).is_ok());
        assert_eq!(
            Attribute::new(1, vec![0u8; 254]),
            Err(PacketError::AttributeTooLong(254))
        );
    }

    #[test]
    fn test_parse_preserves_order_and_duplicates() {
        let mut data = Vec::new();
        Attribute::string(25, "first").unwrap().encode_into(&mut data).unwrap();
        Attribute::integer(40, 1).unwrap().encode_into(&mut data).unwrap();
        Attribute::string(25, "second").unwrap().encode_into(&mut data).unwrap();

        let attrs = parse_attributes(&data).unwrap();
        let types: Vec<u8> = attrs.iter().map(|a| a.attr_type).collect();
        assert_eq!(types, vec![25, 40, 25]);
        assert_eq!(attrs[2].as_string().unwrap(), "second");
    }

    #[test]
    fn test_parse_empty_value() {
        let attrs = parse_attributes(&[33, 2]).unwrap();
        assert_eq!(attrs.len(), 1);
        assert!(attrs[0].value.is_empty());
    }

    #[test]
    fn test_parse_empty_buffer() {
        assert!(parse_attributes(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_parse_short_buffer() {
        assert_eq!(parse_attributes(&[1]), Err(PacketError::ShortBuffer(1)));
        assert_eq!(
            parse_attributes(&[1, 3, b'a', 44]),
            Err(PacketError::ShortBuffer(1))
        );
    }

    #[test]
    fn test_parse_invalid_length() {
        assert_eq!(
            parse_attributes(&[1, 0]),
            Err(PacketError::InvalidAttributeLength {
                length: 0,
                remaining: 2
            })
        );
        assert_eq!(
            parse_attributes(&[1, 1, 0]),
            Err(PacketError::InvalidAttributeLength {
                length: 1,
                remaining: 3
            })
        );
        assert_eq!(
            parse_attributes(&[1, 6, b'a', b'b']),
            Err(PacketError::InvalidAttributeLength {
                length: 6,
                remaining: 4
            })
        );
    }

    #[test]
    fn test_parse_max_length_attribute() {
        let attr = Attribute::new(26, vec![7u8; 253]).unwrap();
        let encoded = attr.encode().unwrap();
        assert_eq!(encoded.len(), 255);
        assert_eq!(parse_attributes(&encoded).unwrap(), vec![attr]);
    }

    #[test]
    fn test_encode_rejects_oversized_value() {
        // Bypasses `new` through the public fields
        let attr = Attribute {
            attr_type: 26,
            value: vec![7u8; 254],
        };
        assert_eq!(attr.encode(), Err(PacketError::AttributeTooLong(254)));

        let mut buffer = vec![0xaa];
        assert_eq!(
            attr.encode_into(&mut buffer),
            Err(PacketError::AttributeTooLong(254))
        );
        assert_eq!(buffer, vec![0xaa]);
    }
}
