//! RADIUS Accounting Protocol Implementation
//!
//! This crate implements the wire format pieces of RADIUS accounting as
//! defined in RFC 2865 and RFC 2866.
//!
//! # Features
//!
//! - Strict Accounting-Request decoding (header and attribute framing)
//! - Request and Response Authenticator calculation
//! - Accounting attribute dictionary with text rendering of values
//!
//! # Example
//!
//! ```rust
//! use radius_proto::{Attribute, AttributeType, Code, RequestPacket};
//! use radius_proto::auth::{accounting_response, verify_accounting_response};
//!
//! // Build an Accounting-Request as a NAS would
//! let mut packet = RequestPacket::new(Code::AccountingRequest, 1, [0u8; 16]);
//! packet.add_attribute(
//!     Attribute::string(AttributeType::AcctSessionId as u8, "t-800").unwrap()
//! );
//! let bytes = packet.encode_accounting_request(b"secret").unwrap();
//!
//! // Decode it on the server side and answer
//! let request = RequestPacket::decode(&bytes, b"secret").unwrap();
//! let response = accounting_response(&request);
//!
//! assert!(verify_accounting_response(&response, &request.authenticator, b"secret").is_ok());
//! ```

pub mod attributes;
pub mod auth;
pub mod dictionary;
pub mod packet;

pub use attributes::{parse_attributes, Attribute, AttributeType, ValueFormat};
pub use auth::{
    accounting_response, calculate_accounting_request_authenticator, compute_digest,
    generate_request_authenticator, verify_accounting_response, AuthError,
};
pub use packet::{Code, PacketError, RequestPacket};
