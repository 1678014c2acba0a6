//! Unified error types for superfetch.

use rmcp::model::{ErrorCode, ErrorData as McpError};

/// Sub-code attached to a `Error::Fetch` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorCode {
    /// SSRF blocklist rejected the target or a resolved address.
    Blocked,
    /// A redirect was invalid: missing `Location`, too many hops, or the
    /// target failed validation.
    BadRedirect,
    /// DNS resolution returned no usable addresses.
    NoData,
    /// The resolved address family is not supported.
    InvalidFamily,
    /// The upstream returned a non-2xx status with no more specific code.
    Status(u16),
}

impl FetchErrorCode {
    pub fn as_str(&self) -> String {
        match self {
            Self::Blocked => "EBLOCKED".to_string(),
            Self::BadRedirect => "EBADREDIRECT".to_string(),
            Self::NoData => "ENODATA".to_string(),
            Self::InvalidFamily => "EINVAL".to_string(),
            Self::Status(code) => format!("HTTP_{code}"),
        }
    }
}

impl std::fmt::Display for FetchErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unified error type for the superfetch server.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed or out-of-range input parameters.
    #[error("VALIDATION_ERROR: {0}")]
    Validation(String),

    /// URL failed §4.1 validation (syntax, scheme, SSRF blocklist).
    #[error("URL_VALIDATION_ERROR: {0}")]
    UrlValidation(String),

    /// A fetch attempt failed, possibly after retries.
    #[error("FETCH_ERROR[{code}]: {message}")]
    Fetch { url: String, http_status: Option<u16>, code: FetchErrorCode, message: String },

    /// The request exceeded its deadline.
    #[error("TIMEOUT_ERROR: {0}")]
    Timeout(String),

    /// The caller exceeded the configured rate limit.
    #[error("RATE_LIMIT_ERROR: retry after {retry_after_secs}s")]
    RateLimit { retry_after_secs: u64 },

    /// Anything else: bugs, invariant violations, unexpected I/O errors.
    #[error("INTERNAL_ERROR: {0}")]
    Internal(String),
}

impl Error {
    pub fn fetch(url: impl Into<String>, code: FetchErrorCode, message: impl Into<String>) -> Self {
        Error::Fetch { url: url.into(), http_status: None, code, message: message.into() }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Error::Validation(_) | Error::UrlValidation(_) => 400,
            Error::Fetch { http_status: Some(status), .. } => *status,
            Error::Fetch { code: FetchErrorCode::Status(status), .. } => *status,
            Error::Fetch { .. } => 502,
            Error::Timeout(_) => 504,
            Error::RateLimit { .. } => 429,
            Error::Internal(_) => 500,
        }
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let code = match &err {
            Error::Validation(_) => -32602,
            Error::UrlValidation(_) => -32003,
            Error::Fetch { code: FetchErrorCode::Blocked, .. } => -32004,
            Error::Fetch { code: FetchErrorCode::BadRedirect, .. } => -32005,
            Error::Fetch { .. } => -32006,
            Error::Timeout(_) => -32007,
            Error::RateLimit { .. } => -32008,
            Error::Internal(_) => -32000,
        };

        McpError { code: ErrorCode(code), message: err.to_string().into(), data: None }
    }
}
