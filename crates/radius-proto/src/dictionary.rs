//! Attribute dictionary
//!
//! Maps raw attribute types and values to the human-readable names and
//! textual values handed to accounting consumers. Unknown types are not an
//! error: they are named `(UNSUPPORTED) <type>` and their value is shown as
//! text.

use crate::attributes::{Attribute, AttributeType, ValueFormat};
use std::net::Ipv4Addr;

/// Decode one attribute into `(name, value)`
pub fn decode(attr_type: u8, value: &[u8]) -> (String, String) {
    match AttributeType::from_u8(attr_type) {
        Some(known) => (known.name().to_string(), format_value(known.format(), value)),
        None => (
            format!("(UNSUPPORTED) {}", attr_type),
            String::from_utf8_lossy(value).into_owned(),
        ),
    }
}

/// Decode every attribute of a packet, preserving wire order
pub fn decode_all(attributes: &[Attribute]) -> Vec<(String, String)> {
    attributes
        .iter()
        .map(|attr| decode(attr.attr_type, &attr.value))
        .collect()
}

/// Render a value according to its dictionary format
///
/// A value whose size does not match its format renders as
/// `Wrong length <n>` instead of failing the packet.
pub fn format_value(format: ValueFormat, value: &[u8]) -> String {
    match format {
        ValueFormat::Text => String::from_utf8_lossy(value).into_owned(),
        ValueFormat::Integer => match <[u8; 4]>::try_from(value) {
            Ok(bytes) => u32::from_be_bytes(bytes).to_string(),
            Err(_) => format!("Wrong length {}", value.len()),
        },
        ValueFormat::Ipv4 => match <[u8; 4]>::try_from(value) {
            Ok(octets) => Ipv4Addr::from(octets).to_string(),
            Err(_) => format!("Wrong length {}", value.len()),
        },
    }
}
