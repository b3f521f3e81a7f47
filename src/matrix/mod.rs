//! Self-healing authenticated access to a Matrix homeserver.
//!
//! Every call made against the Synapse Admin API or the Matrix Client API goes
//! through the [`Executor`], which picks the best available access token for an
//! [`Identity`], transparently recovers from expired or revoked tokens and keeps
//! a per-identity token cache on disk so later invocations start from a token
//! that is known to work.
//!
//! # Architecture
//!
//! The module is structured around the [`executor::Executor`] which coordinates:
//! - **Resolver**: ordering of candidate tokens (in-process, supplied, cached)
//! - **Cache**: filesystem-backed token store shared between processes
//! - **Authenticator**: password login used when no candidate is accepted
//!
//! ```text
//! caller ──► Executor ──► Resolver ──► TokenCache
//!               │
//!               ├──► homeserver (candidate attempt)
//!               ├──► Authenticator (login, at most once)
//!               └──► homeserver (final retry, at most once)
//! ```
//!
//! # Examples
//!
//! ```ignore
//! use crate::matrix::{
//!     AuthContext, ClientError, Credentials, Endpoint, Executor, HttpSettings, Identity, TokenCache,
//! };
//!
//! async fn example() -> Result<(), ClientError> {
//!     let identity = Identity::new("https://matrix.example.com", "@admin:example.com")?;
//!     let auth = AuthContext::new(identity, None, Some(Credentials::new("secret")));
//!     let executor = Executor::new(&HttpSettings::default(), TokenCache::default())?;
//!
//!     let reply = executor
//!         .execute(&auth, reqwest::Method::GET, &Endpoint::admin("v1").segment("server_version"), None)
//!         .await?;
//!     println!("{}", reply.body);
//!     Ok(())
//! }
//! ```

mod authenticator;
mod cache;
mod endpoint;
mod error;
mod executor;
mod resolver;
mod response;
mod token;

use std::fmt;

use reqwest::Url;

pub use crate::matrix::authenticator::{Authenticator, PasswordLogin};
#[cfg(test)]
pub use crate::matrix::authenticator::MockAuthenticator;
pub use crate::matrix::cache::TokenCache;
pub use crate::matrix::endpoint::Endpoint;
pub use crate::matrix::error::{AuthFailure, ClientError, Phase};
pub use crate::matrix::executor::{Executor, HttpSettings, Session};
pub use crate::matrix::response::ServerError;
pub use crate::matrix::token::{Provenance, Token};

/// The (homeserver, user id) pair that authentication state is scoped to.
///
/// The homeserver URL is normalized to its origin (scheme, lowercase host and
/// explicit non-default port), so `https://Example.com:443/` and
/// `https://example.com` name the same identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    /// Normalized homeserver base URL, without path, query or fragment.
    homeserver: Url,
    /// Fully qualified Matrix user id, e.g. `@bot:example.com`.
    user_id: String,
}

impl Identity {
    /// Creates a new [`Identity`].
    ///
    /// # Arguments
    ///
    /// * `homeserver` - Base URL of the homeserver (`http` or `https`)
    /// * `user_id` - Fully qualified Matrix user id (`@localpart:server`)
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] if the URL cannot be parsed, is not
    /// an HTTP(S) URL, or if the user id is not fully qualified.
    pub fn new(homeserver: &str, user_id: &str) -> Result<Self, ClientError> {
        let parsed = Url::parse(homeserver.trim()).map_err(|e| {
            ClientError::Configuration(format!("invalid homeserver url {homeserver}: {e}"))
        })?;

        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(ClientError::Configuration(format!(
                "homeserver url must be an http(s) url with a host: {homeserver}"
            )));
        }

        let origin = parsed.origin().ascii_serialization();
        let homeserver = Url::parse(&origin).map_err(|e| {
            ClientError::Configuration(format!("invalid homeserver url {homeserver}: {e}"))
        })?;

        let user_id = user_id.trim();
        let qualified = user_id
            .strip_prefix('@')
            .and_then(|rest| rest.split_once(':'))
            .is_some_and(|(localpart, server)| !localpart.is_empty() && !server.is_empty());
        if !qualified {
            return Err(ClientError::Configuration(format!(
                "user id must be fully qualified (@localpart:server): {user_id}"
            )));
        }

        Ok(Identity {
            homeserver,
            user_id: user_id.to_owned(),
        })
    }

    /// Returns the normalized homeserver base URL.
    pub fn homeserver(&self) -> &Url {
        &self.homeserver
    }

    /// Returns the homeserver origin, e.g. `https://example.com:8448`.
    pub fn origin(&self) -> String {
        self.homeserver.origin().ascii_serialization()
    }

    /// Returns the host of the homeserver, used to qualify bare room aliases.
    pub fn host(&self) -> &str {
        self.homeserver.host_str().unwrap_or_default()
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.user_id, self.origin())
    }
}

/// Login secret for an [`Identity`].
///
/// Held in memory for the duration of the process only. It is never
/// serialized and its `Debug` output is redacted.
#[derive(Clone)]
pub struct Credentials {
    password: String,
}

impl Credentials {
    pub fn new(password: &str) -> Self {
        Credentials {
            password: password.to_owned(),
        }
    }

    /// Returns the password.
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything the caller supplies to authenticate operations for one identity.
#[derive(Debug, Clone)]
pub struct AuthContext {
    identity: Identity,
    /// Token supplied explicitly by the caller, if any.
    access_token: Option<String>,
    credentials: Option<Credentials>,
}

impl AuthContext {
    /// Creates a new [`AuthContext`].
    ///
    /// Empty or whitespace-only tokens and empty passwords are treated as absent.
    pub fn new(
        identity: Identity,
        access_token: Option<String>,
        credentials: Option<Credentials>,
    ) -> Self {
        let access_token = access_token.filter(|token| !token.trim().is_empty());
        let credentials = credentials.filter(|c| !c.password.is_empty());

        AuthContext {
            identity,
            access_token,
            credentials,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }
}
