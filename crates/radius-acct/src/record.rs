//! Accounting record handed to handlers
//!
//! A decoded Accounting-Request converted to strings, ready to be logged,
//! serialized or stored. Serializes to JSON as:
//!
//! ```json
//! {
//!   "id": "0x1",
//!   "authenticator": "83aa46a746f4a9cc25e9037492695d7c",
//!   "code": "Accounting-Request",
//!   "key": "0x1_83aa46a746f4a9cc25e9037492695d7c",
//!   "remote_addr": "127.0.0.1:52311",
//!   "attributes": [{ "name": "Acct-Session-Id", "value": "t-800" }]
//! }
//! ```

use crate::cache::RetransmissionKey;
use radius_proto::{dictionary, Code, RequestPacket};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::net::SocketAddr;

/// One attribute rendered through the dictionary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslatedAttribute {
    /// Dictionary name, or `(UNSUPPORTED) <type>`
    pub name: String,
    /// Value rendered as text
    pub value: String,
}

/// Structured form of an Accounting-Request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountingRecord {
    /// Packet identifier as prefixed hex, e.g. `0x1`
    pub id: String,
    /// Request Authenticator as lowercase hex
    pub authenticator: String,
    /// Packet code name
    pub code: String,
    /// Retransmission fingerprint, `id + "_" + authenticator`
    pub key: String,
    /// Address the request came from
    pub remote_addr: String,
    /// Attributes in wire order
    pub attributes: Vec<TranslatedAttribute>,
}

impl AccountingRecord {
    pub fn from_request(request: &RequestPacket, remote_addr: SocketAddr) -> Self {
        let attributes = dictionary::decode_all(&request.attributes)
            .into_iter()
            .map(|(name, value)| TranslatedAttribute { name, value })
            .collect();

        AccountingRecord {
            id: format_identifier(request.identifier),
            authenticator: format_authenticator(&request.authenticator),
            code: Code::describe(request.code),
            key: RetransmissionKey::new(request.identifier, &request.authenticator).into(),
            remote_addr: remote_addr.to_string(),
            attributes,
        }
    }

    /// Value of the first attribute with the given name
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.name == name)
            .map(|attr| attr.value.as_str())
    }
}

/// Render an identifier the way it appears in records and keys (`0x1f`)
pub fn format_identifier(identifier: u8) -> String {
    format!("{:#x}", identifier)
}

/// Render an authenticator as 32 lowercase hex digits
pub fn format_authenticator(authenticator: &[u8; 16]) -> String {
    authenticator
        .iter()
        .fold(String::with_capacity(32), |mut out, byte| {
            let _ = write!(out, "{:02x}", byte);
            out
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use radius_proto::Attribute;

    #[test]
    fn test_format_identifier() {
        assert_eq!(format_identifier(0), "0x0");
        assert_eq!(format_identifier(1), "0x1");
        assert_eq!(format_identifier(0xab), "0xab");
    }

    #[test]
    fn test_format_authenticator() {
        let mut auth = [0u8; 16];
        auth[0] = 0x0f;
        auth[15] = 0xa0;
        let hex = format_authenticator(&auth);
        assert_eq!(hex.len(), 32);
        assert!(hex.starts_with("0f00"));
        assert!(hex.ends_with("00a0"));
    }

    #[test]
    fn test_from_request() {
        let mut packet = RequestPacket::new(Code::AccountingRequest, 1, [0xaau8; 16]);
        packet.add_attribute(Attribute::string(44, "t-800").unwrap());
        packet.add_attribute(Attribute::string(250, "x").unwrap());
        let addr: SocketAddr = "192.0.2.1:4000".parse().unwrap();

        let record = AccountingRecord::from_request(&packet, addr);

        assert_eq!(record.id, "0x1");
        assert_eq!(record.authenticator, "aa".repeat(16));
        assert_eq!(record.code, "Accounting-Request");
        assert_eq!(record.key, format!("0x1_{}", "aa".repeat(16)));
        assert_eq!(record.remote_addr, "192.0.2.1:4000");
        assert_eq!(record.attribute("Acct-Session-Id"), Some("t-800"));
        assert_eq!(record.attributes[1].name, "(UNSUPPORTED) 250");
    }

    #[test]
    fn test_json_field_names() {
        let packet = RequestPacket::new(Code::AccountingRequest, 2, [0u8; 16]);
        let record = AccountingRecord::from_request(&packet, "10.0.0.1:1646".parse().unwrap());
        let json = serde_json::to_value(&record).unwrap();

        for field in ["id", "authenticator", "code", "key", "remote_addr", "attributes"] {
            assert!(json.get(field).is_some(), "missing field {}", field);
        }
        assert_eq!(json["attributes"], serde_json::json!([]));
    }
}
