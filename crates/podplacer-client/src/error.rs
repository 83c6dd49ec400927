use miette::Diagnostic;
use thiserror::Error;

/// Error type for control-plane access
#[derive(Error, Debug, Diagnostic)]
pub enum ClientError {
    /// The request never produced a response
    #[error("Request to {url} failed: {message}")]
    #[diagnostic(
        code(podplacer::client::connection_failed),
        help("Check that the API server is reachable from this host")
    )]
    ConnectionFailed {
        #[allow(unused)]
        url: String,
        #[allow(unused)]
        message: String,
    },

    /// The API server answered with a non-success status
    #[error("{method} {url} failed with status {status}: {body}")]
    #[diagnostic(
        code(podplacer::client::unexpected_status),
        help("5xx and 429 responses are retried. Other statuses mean the request was rejected")
    )]
    UnexpectedStatus {
        #[allow(unused)]
        method: String,
        #[allow(unused)]
        url: String,
        #[allow(unused)]
        status: u16,
        #[allow(unused)]
        body: String,
    },

    /// The response body could not be decoded
    #[error("Failed to decode {what}: {message}")]
    #[diagnostic(
        code(podplacer::client::decode_failed),
        help("The API server returned an unexpected payload")
    )]
    DecodeFailed {
        #[allow(unused)]
        what: String,
        #[allow(unused)]
        message: String,
    },

    /// The watch stream delivered an ERROR event
    #[error("Watch stream reported an error: {message}")]
    #[diagnostic(
        code(podplacer::client::watch_error),
        help("The watch will be re-established. A 410 Gone status means the resource version expired")
    )]
    WatchError {
        #[allow(unused)]
        message: String,
    },

    /// Credentials could not be loaded
    #[error("Invalid cluster credentials: {message}")]
    #[diagnostic(code(podplacer::client::invalid_credentials), help("{suggestion}"))]
    InvalidCredentials {
        #[allow(unused)]
        message: String,
        #[allow(unused)]
        suggestion: String,
    },
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

impl ClientError {
    pub fn connection_failed(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn unexpected_status(
        method: impl Into<String>,
        url: impl Into<String>,
        status: u16,
        body: impl Into<String>,
    ) -> Self {
        Self::UnexpectedStatus {
            method: method.into(),
            url: url.into(),
            status,
            body: body.into(),
        }
    }

    pub fn decode_failed(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DecodeFailed {
            what: what.into(),
            message: message.into(),
        }
    }

    pub fn watch_error(message: impl Into<String>) -> Self {
        Self::WatchError {
            message: message.into(),
        }
    }

    pub fn invalid_credentials(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidCredentials {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } | Self::WatchError { .. } => true,
            Self::UnexpectedStatus { status, .. } => *status >= 500 || *status == 429,
            Self::DecodeFailed { .. } | Self::InvalidCredentials { .. } => false,
        }
    }
}
