use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An HTTP request relayed from the public endpoint to the tunnel client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelRequest {
    /// Correlation identifier linking this request to its response
    pub id: String,

    /// HTTP method (GET, POST, PUT, DELETE, etc.)
    pub method: String,

    /// Request path including query string
    /// Example: "/api/v1/users?limit=10"
    pub path: String,

    /// Lowercased header names; repeated headers joined with ", "
    pub headers: HashMap<String, String>,

    /// Raw request body, base64 on the wire
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::utils::base64_body"
    )]
    pub body: Option<Vec<u8>>,
}

impl TunnelRequest {
    /// Create a new request without headers or body
    pub fn new(id: String, method: String, path: String) -> Self {
        Self {
            id,
            method,
            path,
            headers: HashMap::new(),
            body: None,
        }
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Check if the request has a non-empty body
    pub fn has_body(&self) -> bool {
        self.body.as_ref().is_some_and(|b| !b.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tunnel_request_creation() {
        let req = TunnelRequest::new(
            "a1b2c3d4".to_string(),
            "GET".to_string(),
            "/api/users".to_string(),
        );

        assert_eq!(req.id, "a1b2c3d4");
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/api/users");
        assert!(req.headers.is_empty());
        assert!(!req.has_body());
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let mut req = TunnelRequest::new("id".into(), "GET".into(), "/".into());
        req.headers
            .insert("content-type".to_string(), "application/json".to_string());

        assert_eq!(req.header("Content-Type"), Some("application/json"));
        assert_eq!(req.header("CONTENT-TYPE"), Some("application/json"));
        assert_eq!(req.header("accept"), None);
    }

    #[test]
    fn test_tunnel_request_wire_format() {
        let mut req = TunnelRequest::new(
            "req1".to_string(),
            "POST".to_string(),
            "/path?query=value".to_string(),
        );
        req.body = Some(b"hello".to_vec());

        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""id":"req1""#));
        assert!(json.contains(r#""path":"/path?query=value""#));
        assert!(json.contains(r#""body":"aGVsbG8=""#));

        let parsed: TunnelRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, req);
    }

    #[test]
    fn test_tunnel_request_body_absent() {
        let json = r#"{
            "id": "req_123",
            "method": "GET",
            "path": "/test",
            "headers": {}
        }"#;

        let parsed: TunnelRequest = serde_json::from_str(json).unwrap();
        assert!(parsed.body.is_none());
        assert!(!parsed.has_body());

        let out = serde_json::to_string(&parsed).unwrap();
        assert!(!out.contains("body"));
    }

    #[test]
    fn test_tunnel_request_binary_body() {
        let mut req = TunnelRequest::new("b".into(), "PUT".into(), "/blob".into());
        req.body = Some(vec![0x00, 0xFF, 0x10, 0x80]);

        let json = serde_json::to_string(&req).unwrap();
        let parsed: TunnelRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.body, Some(vec![0x00, 0xFF, 0x10, 0x80]));
    }
}
