use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The origin's answer, shipped back through the tunnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelResponse {
    /// Must match the id of the corresponding TunnelRequest
    pub id: String,

    /// HTTP status code (200, 404, 500, etc.)
    pub status_code: u16,

    /// Response headers; repeated headers joined with ", "
    pub headers: HashMap<String, String>,

    /// Raw response body, base64 on the wire
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::utils::base64_body"
    )]
    pub body: Option<Vec<u8>>,
}

impl TunnelResponse {
    /// Create a new response without headers or body
    pub fn new(id: String, status_code: u16) -> Self {
        Self {
            id,
            status_code,
            headers: HashMap::new(),
            body: None,
        }
    }

    /// A plain-text response, used for synthetic gateway errors
    pub fn plain_text(id: String, status_code: u16, text: &str) -> Self {
        let mut response = Self::new(id, status_code);
        response
            .headers
            .insert("content-type".to_string(), "text/plain".to_string());
        response.body = Some(text.as_bytes().to_vec());
        response
    }

    /// Synthetic 504 for a request the tunnel client never answered
    pub fn gateway_timeout(id: String) -> Self {
        Self::plain_text(id, 504, "Gateway Timeout")
    }

    /// Synthetic 502 for a request whose origin or transport failed
    pub fn bad_gateway(id: String) -> Self {
        Self::plain_text(id, 502, "Bad Gateway")
    }

    /// Check if the response has a non-empty body
    pub fn has_body(&self) -> bool {
        self.body.as_ref().is_some_and(|b| !b.is_empty())
    }

    /// Check if the response is successful (2xx status code)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Check if the response is a server error (5xx status code)
    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tunnel_response_creation() {
        let res = TunnelResponse::new("req_123".to_string(), 200);

        assert_eq!(res.id, "req_123");
        assert_eq!(res.status_code, 200);
        assert!(res.headers.is_empty());
        assert!(!res.has_body());
        assert!(res.is_success());
    }

    #[test]
    fn test_synthetic_responses() {
        let timeout = TunnelResponse::gateway_timeout("a".to_string());
        assert_eq!(timeout.status_code, 504);
        assert_eq!(timeout.body.as_deref(), Some(&b"Gateway Timeout"[..]));
        assert_eq!(timeout.headers.get("content-type").unwrap(), "text/plain");
        assert!(timeout.is_server_error());

        let bad = TunnelResponse::bad_gateway("b".to_string());
        assert_eq!(bad.status_code, 502);
        assert_eq!(bad.body.as_deref(), Some(&b"Bad Gateway"[..]));
    }

    #[test]
    fn test_tunnel_response_wire_format() {
        let mut res = TunnelResponse::new("req_abc".to_string(), 201);
        res.headers
            .insert("content-type".to_string(), "application/json".to_string());
        res.body = Some(br#"{"ok":true}"#.to_vec());

        let json = serde_json::to_string(&res).unwrap();
        assert!(json.contains(r#""statusCode":201"#));
        assert!(json.contains(r#""id":"req_abc""#));
        assert!(!json.contains("status_code"));

        let parsed: TunnelResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, res);
    }

    #[test]
    fn test_tunnel_response_defaults() {
        let json = r#"{
            "id": "req_123",
            "statusCode": 204,
            "headers": {}
        }"#;

        let parsed: TunnelResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.body.is_none());
        assert!(parsed.is_success());
    }

    #[test]
    fn test_status_code_ranges() {
        let codes = vec![
            (100, false, false),
            (200, true, false),
            (299, true, false),
            (404, false, false),
            (500, false, true),
            (599, false, true),
        ];

        for (code, is_success, is_server_err) in codes {
            let res = TunnelResponse::new("req".to_string(), code);
            assert_eq!(res.is_success(), is_success, "status {}", code);
            assert_eq!(res.is_server_error(), is_server_err, "status {}", code);
        }
    }
}
