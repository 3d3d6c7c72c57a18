use base64::{Engine as _, engine::general_purpose::STANDARD};

/// Encode a body for the JSON control channel
pub fn encode_body(body: &[u8]) -> String {
    STANDARD.encode(body)
}

/// Decode a body received over the JSON control channel
pub fn decode_body(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(encoded)
}
