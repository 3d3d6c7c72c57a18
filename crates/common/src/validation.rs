//! Input validation for user-supplied routing data
//!
//! Subdomains become DNS labels and paths are appended to the origin URL,
//! so both are checked before use.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// A single DNS label: alphanumeric at both ends, hyphens inside, at most 63 chars
static SUBDOMAIN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").unwrap());

/// Maximum length for HTTP paths
pub const MAX_PATH_LENGTH: usize = 8192;

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid subdomain format: {0}")]
    InvalidSubdomain(String),

    #[error("Path too long: {0} bytes (max: {1})")]
    PathTooLong(usize, usize),
}

/// Validate a requested subdomain and return its normalised (lowercase) form
///
/// # Examples
///
/// ```
/// use ntnl_common::validation::validate_subdomain;
///
/// assert_eq!(validate_subdomain("Fox-Hawk-12").unwrap(), "fox-hawk-12");
/// assert!(validate_subdomain("-leading").is_err());
/// assert!(validate_subdomain("has.dot").is_err());
/// ```
pub fn validate_subdomain(subdomain: &str) -> Result<String, ValidationError> {
    let normalized = subdomain.to_ascii_lowercase();
    if !SUBDOMAIN_REGEX.is_match(&normalized) {
        return Err(ValidationError::InvalidSubdomain(
            subdomain.chars().take(70).collect::<String>(), // Limit error message
        ));
    }
    Ok(normalized)
}

/// Validate and sanitize an HTTP path before it is appended to the origin URL
///
/// - Removes control characters
/// - Enforces length limits
/// - Ensures path starts with /
pub fn validate_path(path: &str) -> Result<String, ValidationError> {
    if path.len() > MAX_PATH_LENGTH {
        return Err(ValidationError::PathTooLong(path.len(), MAX_PATH_LENGTH));
    }

    let sanitized: String = path.chars().filter(|c| !c.is_control()).collect();

    if sanitized.is_empty() {
        Ok("/".to_string())
    } else if sanitized.starts_with('/') {
        Ok(sanitized)
    } else {
        Ok(format!("/{}", sanitized))
    }
}
