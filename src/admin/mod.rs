//! Resource operations on a Synapse homeserver.
//!
//! Each submodule is a thin layer over the Synapse Admin API (and, for rooms,
//! the Client API). None of them talks to the homeserver directly: every call
//! goes through a [`Session`](crate::matrix::Session) so token recovery stays
//! transparent.
//!
//! Idempotent `ensure` operations compare the current state with the desired
//! one and only act on a difference. With `dry_run` they report what would
//! change without sending any write.

use thiserror::Error;

use crate::matrix::ClientError;

pub mod devices;
pub mod rooms;
pub mod server;
pub mod users;

/// Errors of resource operations.
#[derive(Error, Debug)]
pub enum AdminError {
    #[error(transparent)]
    Client(#[from] ClientError),

    /// The targeted resource does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Caller input rejected before any request.
    #[error("invalid input: {0}")]
    Validation(String),
}

impl AdminError {
    /// Stable machine-readable tag for the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            AdminError::Client(e) => e.kind(),
            AdminError::NotFound(_) => "not_found",
            AdminError::Validation(_) => "validation",
        }
    }
}
