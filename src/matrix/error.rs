use std::fmt;

use thiserror::Error;

use crate::matrix::response::ServerError;

/// Step of the authentication protocol during which a network call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Request issued with a supplied, remembered or cached token.
    Candidate,
    /// Password login exchange.
    Login,
    /// The single retry issued with a freshly issued token.
    Retry,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            Phase::Candidate => "candidate attempt",
            Phase::Login => "login",
            Phase::Retry => "final retry",
        };
        f.write_str(phase)
    }
}

/// Reason an identity could not be authenticated.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthFailure {
    /// The homeserver refused the password.
    BadCredentials(ServerError),
    /// The account exists but has been deactivated.
    AccountDisabled(ServerError),
    /// Too many login attempts; the homeserver asks to wait.
    LoginRateLimited(ServerError),
    /// Any other refusal of the login exchange.
    LoginRejected(ServerError),
    /// Every candidate token was rejected and no password is available.
    TokensRejected(ServerError),
    /// A freshly issued token was rejected on the final retry.
    FreshTokenRejected(ServerError),
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthFailure::BadCredentials(e) => write!(f, "bad credentials ({e})"),
            AuthFailure::AccountDisabled(e) => write!(f, "account disabled ({e})"),
            AuthFailure::LoginRateLimited(e) => write!(f, "login rate limited ({e})"),
            AuthFailure::LoginRejected(e) => write!(f, "login rejected ({e})"),
            AuthFailure::TokensRejected(e) => {
                write!(f, "all tokens rejected and no password available ({e})")
            }
            AuthFailure::FreshTokenRejected(e) => {
                write!(f, "freshly issued token rejected on retry ({e})")
            }
        }
    }
}

/// Errors surfaced by the authenticated client.
///
/// Each variant tells the caller *why* an operation failed so automation can
/// decide whether retrying makes sense: never on `Configuration` or bad
/// credentials, possibly later on `Transport` or `Timeout`.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("authentication failed for {user_id}: {reason}")]
    Authentication { user_id: String, reason: AuthFailure },

    #[error("transport error during {phase}: {source}")]
    Transport {
        phase: Phase,
        #[source]
        source: reqwest::Error,
    },

    #[error("request timed out during {phase}")]
    Timeout { phase: Phase },

    #[error("homeserver rejected request: {0}")]
    Request(ServerError),

    #[error("invalid response during {phase}: {detail}")]
    InvalidResponse { phase: Phase, detail: String },
}

impl ClientError {
    /// Builds a transport error, keeping timeouts apart from other failures.
    pub fn transport(phase: Phase, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            ClientError::Timeout { phase }
        } else {
            ClientError::Transport { phase, source }
        }
    }

    /// Stable machine-readable tag for the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::Configuration(_) => "configuration",
            ClientError::Authentication { .. } => "authentication",
            ClientError::Transport { .. } => "transport",
            ClientError::Timeout { .. } => "timeout",
            ClientError::Request(_) => "request",
            ClientError::InvalidResponse { .. } => "invalid_response",
        }
    }

    /// Returns the server error if the homeserver rejected the request itself.
    pub fn as_request(&self) -> Option<&ServerError> {
        match self {
            ClientError::Request(e) => Some(e),
            _ => None,
        }
    }

    /// Checks whether the homeserver answered `404 Not Found`.
    pub fn is_not_found(&self) -> bool {
        self.as_request().is_some_and(|e| e.status == 404)
    }
}
