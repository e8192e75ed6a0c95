//! Error types for the agent-turn core

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the crate
///
/// The transport variants (`InvalidUrl` through `DecodingFailed`) and
/// `UnexpectedStructuredResponse` are what callers of a turn observe from the
/// network and assembly layers. The remaining variants come from the
/// simulation harness, authorization refresh, cancellation and configuration.
#[derive(Error, Debug)]
pub enum Error {
    /// The base URL could not be parsed or cannot carry a path
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Connection-level failure (DNS, connect, timeout)
    #[error("Request failed: {0}")]
    RequestFailed(#[source] reqwest::Error),

    /// A response arrived but its body could not be read
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Status outside the 2xx range
    #[error("Unacceptable status code {code}: {body}")]
    UnacceptableStatus { code: u16, body: String },

    /// 2xx response whose body did not decode into the expected type
    #[error("Decoding failed: {source}")]
    DecodingFailed {
        #[source]
        source: serde_json::Error,
        body: String,
    },

    /// Structured mode drained the whole stream without a structured segment
    #[error("Stream completed without a structured response segment")]
    UnexpectedStructuredResponse,

    /// The simulation script ran out of items
    #[error("Simulation script exhausted at step {step}")]
    ScriptExhausted { step: usize },

    /// Credential refresh failed or is unavailable
    #[error("Authorization error: {0}")]
    Authorization(String),

    /// The turn was cancelled before the stream finished
    #[error("Turn cancelled")]
    Cancelled,

    /// JSON serialization error while encoding a request or payload
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Create a new invalid URL error
    pub fn invalid_url(msg: impl Into<String>) -> Self {
        Error::InvalidUrl(msg.into())
    }

    /// Create a new invalid response error
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Error::InvalidResponse(msg.into())
    }

    /// Create a new authorization error
    pub fn authorization(msg: impl Into<String>) -> Self {
        Error::Authorization(msg.into())
    }

    /// Create a new config error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a decoding error that keeps the raw body for diagnosis
    pub fn decoding(source: serde_json::Error, body: impl Into<String>) -> Self {
        Error::DecodingFailed {
            source,
            body: body.into(),
        }
    }

    /// Status code for `UnacceptableStatus`, `None` otherwise
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::UnacceptableStatus { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Raw response body carried by status and decoding errors
    pub fn raw_body(&self) -> Option<&str> {
        match self {
            Error::UnacceptableStatus { body, .. } | Error::DecodingFailed { body, .. } => {
                Some(body)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_invalid_url() {
        let err = Error::invalid_url("not a url");
        assert!(matches!(err, Error::InvalidUrl(_)));
        assert_eq!(err.to_string(), "Invalid URL: not a url");
    }

    #[test]
    fn test_error_unacceptable_status() {
        let err = Error::UnacceptableStatus {
            code: 401,
            body: "unauthorized".to_string(),
        };
        assert_eq!(err.status_code(), Some(401));
        assert_eq!(err.raw_body(), Some("unauthorized"));
        assert_eq!(err.to_string(), "Unacceptable status code 401: unauthorized");
    }

    #[test]
    fn test_error_decoding_keeps_body() {
        let json_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err = Error::decoding(json_err, "{oops");
        assert!(matches!(err, Error::DecodingFailed { .. }));
        assert_eq!(err.raw_body(), Some("{oops"));
        assert_eq!(err.status_code(), None);
    }

    #[test]
    fn test_error_structured_contract() {
        let err = Error::UnexpectedStructuredResponse;
        assert_eq!(
            err.to_string(),
            "Stream completed without a structured response segment"
        );
    }

    #[test]
    fn test_error_script_exhausted() {
        let err = Error::ScriptExhausted { step: 3 };
        assert_eq!(err.to_string(), "Simulation script exhausted at step 3");
    }

    #[test]
    fn test_error_authorization() {
        let err = Error::authorization("refresh rejected");
        assert!(matches!(err, Error::Authorization(_)));
        assert_eq!(err.to_string(), "Authorization error: refresh rejected");
    }

    #[test]
    fn test_error_config() {
        let err = Error::config("base_url is required");
        assert_eq!(err.to_string(), "Invalid configuration: base_url is required");
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_error_from_reqwest() {
        // Compile-time check that the transport variant wraps reqwest errors
        fn _test_conversion(e: reqwest::Error) -> Error {
            Error::RequestFailed(e)
        }
    }
}
