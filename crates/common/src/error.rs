use http::StatusCode;
use thiserror::Error;

/// Error types for the tunnel system
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Subdomain already in use: {0}")]
    SubdomainInUse(String),

    #[error("Invalid subdomain: {0}")]
    InvalidSubdomain(String),

    #[error("Tunnel not found: {0}")]
    TunnelNotFound(String),

    #[error("Gateway timeout")]
    GatewayTimeout,

    #[error("Bad gateway: {0}")]
    BadGateway(String),

    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },

    #[error("Invalid message format: {0}")]
    MalformedMessage(String),

    #[error("Maximum reconnection attempts reached ({attempts})")]
    MaxReconnectAttemptsExceeded { attempts: u32 },

    #[error("Registration rejected: {0}")]
    RegistrationRejected(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl TunnelError {
    /// HTTP status a public caller sees when this error ends a request
    pub fn status_code(&self) -> StatusCode {
        match self {
            TunnelError::TunnelNotFound(_) => StatusCode::NOT_FOUND,
            TunnelError::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
            TunnelError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            TunnelError::SubdomainInUse(_) => StatusCode::CONFLICT,
            TunnelError::InvalidSubdomain(_) | TunnelError::MalformedMessage(_) => {
                StatusCode::BAD_REQUEST
            }
            TunnelError::BadGateway(_)
            | TunnelError::ConnectionError(_)
            | TunnelError::WebSocketError(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the client should retry the connection after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TunnelError::ConnectionError(_) | TunnelError::WebSocketError(_) | TunnelError::Io(_)
        )
    }
}

/// Type alias for Results using TunnelError
pub type Result<T> = std::result::Result<T, TunnelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TunnelError::MalformedMessage("test".to_string());
        assert_eq!(err.to_string(), "Invalid message format: test");

        let err = TunnelError::GatewayTimeout;
        assert_eq!(err.to_string(), "Gateway timeout");

        let err = TunnelError::MaxReconnectAttemptsExceeded { attempts: 5 };
        assert_eq!(err.to_string(), "Maximum reconnection attempts reached (5)");
    }

    #[test]
    fn test_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json");
        assert!(json_err.is_err());

        let tunnel_err: TunnelError = json_err.unwrap_err().into();
        assert!(matches!(tunnel_err, TunnelError::SerializationError(_)));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            TunnelError::TunnelNotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            TunnelError::GatewayTimeout.status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            TunnelError::BadGateway("closed".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            TunnelError::RateLimitExceeded {
                retry_after_secs: 3
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_retryable() {
        assert!(TunnelError::ConnectionError("refused".into()).is_retryable());
        assert!(!TunnelError::RegistrationRejected("taken".into()).is_retryable());
        assert!(!TunnelError::MaxReconnectAttemptsExceeded { attempts: 5 }.is_retryable());
    }
}
