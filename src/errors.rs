//! Errors related to interacting with a registry under test

use std::time::Duration;

use http::StatusCode;

use crate::status::StatusSet;

/// The crate-wide `Result` type
pub type Result<T> = std::result::Result<T, OciCertError>;

/// Every failure the authentication context and dispatcher can report
#[derive(Debug, thiserror::Error)]
pub enum OciCertError {
    /// The `WWW-Authenticate` challenge could not be used
    #[error("Malformed authentication challenge: {0}")]
    MalformedChallenge(String),
    /// The registry asked for an authentication scheme other than `Bearer`
    #[error("Unsupported authentication scheme: {0}")]
    UnsupportedAuthScheme(String),
    /// The token endpoint refused to hand out a token
    #[error("Token request failed with status {status}: {message}")]
    TokenRequestFailed {
        /// Status code returned by the token endpoint
        status: u16,
        /// Response body or decoding failure
        message: String,
    },
    /// A scope string does not follow `<type>:<name>:<actions>`
    #[error("Invalid scope: {0:?}")]
    InvalidScope(String),
    /// The registry answered with a status outside of the expected set
    #[error("Unexpected status {actual} from {url}, expected one of [{expected}]")]
    UnexpectedStatus {
        /// Url of the request
        url: String,
        /// Status returned by the registry
        actual: StatusCode,
        /// Statuses the caller was prepared to accept
        expected: StatusSet,
    },
    /// The request never produced a response
    #[error("Request to {url} failed: {source}")]
    RequestFailed {
        /// Url of the request
        url: String,
        /// Transport level cause
        #[source]
        source: reqwest::Error,
    },
    /// The request did not complete within the configured deadline
    #[error("Request to {url} timed out after {after:?}")]
    Timeout {
        /// Url of the request
        url: String,
        /// Deadline that elapsed
        after: Duration,
    },
    /// A url could not be built or parsed
    #[error("Invalid url {url}: {reason}")]
    InvalidUrl {
        /// The offending url
        url: String,
        /// Parser diagnostic
        reason: String,
    },
    /// The HTTP transport could not be built from the client configuration
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

impl OciCertError {
    /// Returns the HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            OciCertError::TokenRequestFailed { status, .. } => Some(*status),
            OciCertError::UnexpectedStatus { actual, .. } => Some(actual.as_u16()),
            _ => None,
        }
    }
}
