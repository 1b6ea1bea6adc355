//! Error types for restfile

use crate::dump::ResponseDump;

/// Result type alias using [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for a restfile run
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed file, duplicate label, missing copy_from target, missing url.
    /// Fatal before any network I/O.
    #[error("config error: {0}")]
    Config(String),

    /// A single request could not be turned into a wire request
    #[error("request \"{label}\": {message}")]
    Build {
        /// Label of the offending request
        label: String,
        /// What went wrong
        message: String,
    },

    /// DNS/connect/TLS/write failure while performing a request
    #[error("transport error: {0}")]
    Transport(String),

    /// Response received but it did not match the declared expectation
    #[error(transparent)]
    Expectation(Box<ExpectationFailure>),

    /// Post-hook syntax/runtime error or explicit fail()
    #[error("script error: {0}")]
    Script(String),

    /// WebSocket dial/read/write failure
    #[error("session error: {0}")]
    Session(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Create a build error for one request
    pub fn build(label: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Build {
            label: label.into(),
            message: message.into(),
        }
    }

    /// Create a session error
    pub fn session(message: impl Into<String>) -> Self {
        Error::Session(message.into())
    }

    /// True when the run may continue past this error under an
    /// ignore-failures policy (per-request errors, not structural ones)
    pub fn is_per_request(&self) -> bool {
        matches!(
            self,
            Error::Build { .. } | Error::Transport(_) | Error::Expectation(_) | Error::Script(_)
        )
    }
}

impl From<ExpectationFailure> for Error {
    fn from(failure: ExpectationFailure) -> Self {
        Error::Expectation(Box::new(failure))
    }
}

/// A declared expectation that the response did not satisfy.
///
/// Carries the full response dump so the operator can inspect what actually
/// came back. Distinct from a transport error: the call itself succeeded.
#[derive(Debug, Clone)]
pub struct ExpectationFailure {
    /// Label of the request whose expectation failed
    pub label: String,
    /// Which check failed, with both values
    pub message: String,
    /// Full response dump (status line, headers, body)
    pub dump: ResponseDump,
}

impl std::fmt::Display for ExpectationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "request \"{}\": {}\n{}", self.label, self.message, self.dump)
    }
}

impl std::error::Error for ExpectationFailure {}
