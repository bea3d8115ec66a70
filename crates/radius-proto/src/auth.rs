use crate::packet::{Code, RequestPacket};
use rand::Rng;
use thiserror::Error;

/// Length of an Accounting-Response without attributes
pub const RESPONSE_LENGTH: usize = 20;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid response length: {0} bytes (expected 20)")]
    InvalidResponseLength(usize),
    #[error("Authenticator mismatch: expected {expected:02x?}, got {got:02x?}")]
    DigestMismatch { expected: [u8; 16], got: [u8; 16] },
}

/// Generate a random Request Authenticator (16 bytes) per RFC 2865 Section 3
pub fn generate_request_authenticator() -> [u8; 16] {
    let mut rng = rand::rng();
    let mut authenticator = [0u8; 16];
    rng.fill(&mut authenticator);
    authenticator
}

/// Keyed digest shared by request and response authenticators
///
/// MD5(Code + Identifier + Length + Context + Secret), where the context is
/// the 16-byte authenticator of the request being answered.
pub fn compute_digest(
    code: u8,
    identifier: u8,
    length: u16,
    context: &[u8; 16],
    secret: &[u8],
) -> [u8; 16] {
    let mut data = Vec::with_capacity(20 + secret.len());
    data.push(code);
    data.push(identifier);
    data.extend_from_slice(&length.to_be_bytes());
    data.extend_from_slice(context);
    data.extend_from_slice(secret);

    md5::compute(&data).0
}

/// Build the Accounting-Response for a decoded request (RFC 2866 Section 3)
///
/// The response never carries attributes, so it is always 20 bytes and its
/// authenticator is MD5(5 + ID + 0x0014 + Request Authenticator + Secret).
pub fn accounting_response(request: &RequestPacket) -> [u8; RESPONSE_LENGTH] {
    let code = Code::AccountingResponse.as_u8();
    let digest = compute_digest(
        code,
        request.identifier,
        RESPONSE_LENGTH as u16,
        &request.authenticator,
        &request.secret,
    );

    let mut response = [0u8; RESPONSE_LENGTH];
    response[0] = code;
    response[1] = request.identifier;
    response[2..4].copy_from_slice(&(RESPONSE_LENGTH as u16).to_be_bytes());
    response[4..].copy_from_slice(&digest);
    response
}

/// Verify the authenticator of an attribute-less Accounting-Response
///
/// Only fixed 20-byte responses are accepted; a response carrying attributes
/// would need the attributes hashed too and is reported as
/// `InvalidResponseLength`.
pub fn verify_accounting_response(
    response: &[u8],
    request_authenticator: &[u8; 16],
    secret: &[u8],
) -> Result<(), AuthError> {
    if response.len() != RESPONSE_LENGTH {
        return Err(AuthError::InvalidResponseLength(response.len()));
    }

    let expected = compute_digest(
        response[0],
        response[1],
        RESPONSE_LENGTH as u16,
        request_authenticator,
        secret,
    );
    let mut got = [0u8; 16];
    got.copy_from_slice(&response[4..RESPONSE_LENGTH]);

    if expected != got {
        return Err(AuthError::DigestMismatch { expected, got });
    }
    Ok(())
}

/// Calculate the Accounting-Request authenticator per RFC 2866 Section 3
///
/// `encoded` is the complete request; its authenticator field is treated as
/// 16 zero octets regardless of its content.
pub fn calculate_accounting_request_authenticator(encoded: &[u8], secret: &[u8]) -> [u8; 16] {
    let mut data = Vec::with_capacity(encoded.len() + secret.len());
    data.extend_from_slice(&encoded[..encoded.len().min(4)]);
    data.extend_from_slice(&[0u8; 16]);
    if encoded.len() > RequestPacket::MIN_PACKET_SIZE {
        data.extend_from_slice(&encoded[RequestPacket::MIN_PACKET_SIZE..]);
    }
    data.extend_from_slice(secret);

    md5::compute(&data).0
}
