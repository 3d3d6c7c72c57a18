pub mod base64_body;
mod encoding;
mod headers;
mod id;

pub use encoding::{decode_body, encode_body};
pub use headers::{
    HOP_BY_HOP_HEADERS, RESPONSE_FRAMING_HEADERS, headers_to_map, is_hop_by_hop,
    is_response_framing, map_to_headers, strip_hop_by_hop,
};
pub use id::{generate_request_id, generate_subdomain};
