use http::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;

/// Request headers that only describe the public hop and are never relayed
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "sec-websocket-key",
    "sec-websocket-version",
    "sec-websocket-extensions",
    "sec-websocket-protocol",
];

/// Response headers describing framing of the origin hop; the relay re-frames
pub const RESPONSE_FRAMING_HEADERS: &[&str] = &[
    "transfer-encoding",
    "content-encoding",
    "content-length",
    "connection",
    "keep-alive",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

pub fn is_response_framing(name: &str) -> bool {
    RESPONSE_FRAMING_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Convert HTTP headers to the wire format
///
/// Names are lowercased and repeated values are joined with ", ".
/// Non-UTF-8 values are converted lossily.
pub fn headers_to_map(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map: HashMap<String, String> = HashMap::new();

    for (name, value) in headers.iter() {
        let val = String::from_utf8_lossy(value.as_bytes());
        map.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&val);
            })
            .or_insert_with(|| val.into_owned());
    }

    map
}

/// Remove hop-by-hop headers, leaving every other entry untouched
pub fn strip_hop_by_hop(mut map: HashMap<String, String>) -> HashMap<String, String> {
    map.retain(|name, _| !is_hop_by_hop(name));
    map
}

/// Convert the wire format back to an HTTP HeaderMap
///
/// Entries whose name or value is not a valid HTTP header are skipped.
pub fn map_to_headers(map: &HashMap<String, String>) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, value) in map.iter() {
        if let (Ok(header_name), Ok(header_value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.append(header_name, header_value);
        }
    }

    headers
}
