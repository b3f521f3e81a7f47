use log::debug;

use crate::matrix::{AuthContext, ClientError, Credentials, Provenance, Token, TokenCache};

/// Ordered authentication material for one operation.
#[derive(Debug)]
pub struct Plan<'a> {
    /// Tokens to try, best first, each at most once.
    pub candidates: Vec<Token>,
    /// Password to fall back on once every candidate has been rejected.
    pub credentials: Option<&'a Credentials>,
    /// Snapshot of the cache entry at resolution time.
    pub cached: Option<Token>,
}

/// Decides which tokens an operation should try and in which order.
///
/// Reads the [`TokenCache`] and nothing else: no network call, no write.
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    cache: TokenCache,
}

impl CredentialResolver {
    pub fn new(cache: TokenCache) -> Self {
        CredentialResolver { cache }
    }

    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// Builds the candidate list for `auth`.
    ///
    /// Order: the token already confirmed earlier in this process (`remembered`),
    /// the caller-supplied token, then the cached token. Duplicate values are
    /// dropped so a token is never tried twice.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] when there is neither a candidate
    /// nor a password, before any network call is made.
    pub fn resolve<'a>(
        &self,
        auth: &'a AuthContext,
        remembered: Option<Token>,
    ) -> Result<Plan<'a>, ClientError> {
        let identity = auth.identity();
        let supplied = auth
            .access_token()
            .map(|value| Token::new(identity, value, Provenance::Supplied));
        let cached = self.cache.read(identity);

        let mut candidates: Vec<Token> = Vec::with_capacity(3);
        for token in [remembered, supplied, cached.clone()].into_iter().flatten() {
            if !candidates.iter().any(|known| known.same_value(&token)) {
                candidates.push(token);
            }
        }

        let credentials = auth.credentials();
        if candidates.is_empty() && credentials.is_none() {
            return Err(ClientError::Configuration(format!(
                "no usable authentication path for {identity}: supply an access token or a password"
            )));
        }

        debug!(
            "{} candidate token(s) for {} [{}], password {}",
            candidates.len(),
            identity,
            candidates
                .iter()
                .map(|t| t.provenance().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            if credentials.is_some() { "available" } else { "absent" }
        );

        Ok(Plan {
            candidates,
            credentials,
            cached,
        })
    }
}
