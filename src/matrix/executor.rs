//! Self-healing request executor.
//!
//! Every operation follows the same bounded protocol:
//!
//! 1. try each candidate token from the [`CredentialResolver`] once, in order;
//!    a non-authentication error ends the operation immediately;
//! 2. when all candidates were rejected and a password is available, log in
//!    once;
//! 3. retry the operation once with the fresh token; whatever happens then is
//!    final.
//!
//! A successful call records its token in memory for the rest of the process
//! and writes it to the [`TokenCache`] when it was freshly issued or differs
//! from the cached one.
//!
//! Network failures are never retried here. Orchestration decides.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use log::{debug, info, warn};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::matrix::{
    AuthContext, AuthFailure, Authenticator, ClientError, Endpoint, PasswordLogin, Phase,
    ServerError, Token, TokenCache,
    resolver::{CredentialResolver, Plan},
    response::ApiResponse,
};

/// Network settings shared by every call.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub connect_timeout: Duration,
    /// Upper bound for a whole request, connection included.
    pub request_timeout: Duration,
    pub validate_certs: bool,
    /// Display name of the device created by a password login.
    pub device_display_name: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        HttpSettings {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            validate_certs: true,
            device_display_name: "synapse-mgr".to_owned(),
        }
    }
}

impl HttpSettings {
    /// Builds the HTTP client used for both API calls and login.
    pub fn client(&self) -> Result<Client, ClientError> {
        Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .danger_accept_invalid_certs(!self.validate_certs)
            .user_agent(concat!("synapse-mgr/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClientError::Configuration(format!("cannot build http client: {e}")))
    }
}

/// Successful answer of an operation.
#[derive(Debug, Clone)]
pub struct ApiReply {
    /// Response body, exactly as sent by the homeserver.
    pub body: Value,
    /// Step of the protocol that produced this answer.
    pub phase: Phase,
}

impl ApiReply {
    /// Decodes the body into a typed structure.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, ClientError> {
        let phase = self.phase;
        serde_json::from_value(self.body).map_err(|e| ClientError::InvalidResponse {
            phase,
            detail: e.to_string(),
        })
    }
}

/// Dispatches API calls with automatic token recovery.
pub struct Executor<A: Authenticator = PasswordLogin> {
    client: Client,
    resolver: CredentialResolver,
    authenticator: A,
    /// Tokens confirmed by a successful call during this process, by cache key.
    confirmed: Mutex<HashMap<String, Token>>,
    reauthenticated: AtomicBool,
}

impl Executor<PasswordLogin> {
    /// Creates an executor logging in with passwords.
    pub fn new(settings: &HttpSettings, cache: TokenCache) -> Result<Self, ClientError> {
        let client = settings.client()?;
        let authenticator = PasswordLogin::new(client.clone(), &settings.device_display_name);
        Ok(Executor::with_authenticator(client, cache, authenticator))
    }
}

impl<A: Authenticator> Executor<A> {
    /// Creates an executor with a custom [`Authenticator`].
    pub fn with_authenticator(client: Client, cache: TokenCache, authenticator: A) -> Self {
        Executor {
            client,
            resolver: CredentialResolver::new(cache),
            authenticator,
            confirmed: Mutex::new(HashMap::new()),
            reauthenticated: AtomicBool::new(false),
        }
    }

    /// Checks whether any operation of this executor had to log in.
    pub fn reauthenticated(&self) -> bool {
        self.reauthenticated.load(Ordering::Relaxed)
    }

    /// Runs one logical API operation for `auth`.
    ///
    /// # Arguments
    ///
    /// * `auth` - Identity, optional supplied token and optional password
    /// * `method` - HTTP method
    /// * `endpoint` - Admin API or Client API endpoint
    /// * `body` - Optional JSON body
    ///
    /// # Errors
    ///
    /// - [`ClientError::Configuration`] when there is nothing to authenticate
    ///   with; no request is sent
    /// - [`ClientError::Authentication`] when tokens and login were refused
    /// - [`ClientError::Transport`] / [`ClientError::Timeout`] on network
    ///   failure, tagged with the phase
    /// - [`ClientError::Request`] when the homeserver rejects the operation
    ///   itself
    pub async fn execute(
        &self,
        auth: &AuthContext,
        method: Method,
        endpoint: &Endpoint,
        body: Option<&Value>,
    ) -> Result<ApiReply, ClientError> {
        let identity = auth.identity();
        let plan = self.resolver.resolve(auth, self.remembered(auth))?;
        debug!("{} {} as {}", method, endpoint, identity);

        let mut last_rejection = None;
        for candidate in &plan.candidates {
            match self
                .dispatch(auth, candidate, &method, endpoint, body, Phase::Candidate)
                .await?
            {
                Ok(body) => {
                    return Ok(self.succeed(auth, &plan, candidate, body, Phase::Candidate));
                }
                Err(rejection) => {
                    info!(
                        "{} token rejected for {}: {}",
                        candidate.provenance(),
                        identity,
                        rejection
                    );
                    last_rejection = Some(rejection);
                }
            }
        }

        let Some(credentials) = plan.credentials else {
            let rejection = last_rejection.ok_or_else(|| {
                ClientError::Configuration(format!("no usable authentication path for {identity}"))
            })?;
            return Err(ClientError::Authentication {
                user_id: identity.user_id().to_owned(),
                reason: AuthFailure::TokensRejected(rejection),
            });
        };

        let fresh = self.authenticator.login(identity, credentials).await?;
        self.reauthenticated.store(true, Ordering::Relaxed);

        match self
            .dispatch(auth, &fresh, &method, endpoint, body, Phase::Retry)
            .await?
        {
            Ok(body) => Ok(self.succeed(auth, &plan, &fresh, body, Phase::Retry)),
            Err(rejection) => {
                warn!("fresh token rejected for {}: {}", identity, rejection);
                Err(ClientError::Authentication {
                    user_id: identity.user_id().to_owned(),
                    reason: AuthFailure::FreshTokenRejected(rejection),
                })
            }
        }
    }

    /// Issues one HTTP call.
    ///
    /// The outer `Result` carries terminal errors (transport, request error),
    /// the inner one separates success from token rejection.
    async fn dispatch(
        &self,
        auth: &AuthContext,
        token: &Token,
        method: &Method,
        endpoint: &Endpoint,
        body: Option<&Value>,
        phase: Phase,
    ) -> Result<Result<Value, ServerError>, ClientError> {
        let url = endpoint.url(auth.identity().homeserver())?;

        let mut request = self
            .client
            .request(method.clone(), url)
            .bearer_auth(token.secret());
        if let Some(body) = body {
            request = request.json(body);
        }

        match ApiResponse::read(request.send().await).await {
            ApiResponse::Success(body) => Ok(Ok(body)),
            ApiResponse::AuthFailure(error) => Ok(Err(error)),
            ApiResponse::RequestError(error) => {
                debug!("{} {} failed during {}: {}", method, endpoint, phase, error);
                Err(ClientError::Request(error))
            }
            ApiResponse::TransportError(e) => Err(ClientError::transport(phase, e)),
        }
    }

    fn succeed(
        &self,
        auth: &AuthContext,
        plan: &Plan<'_>,
        token: &Token,
        body: Value,
        phase: Phase,
    ) -> ApiReply {
        let identity = auth.identity();

        let changed = plan
            .cached
            .as_ref()
            .is_none_or(|cached| !cached.same_value(token));
        // A token issued by this operation's login is always persisted. Any
        // other token, remembered ones included, only when the entry differs.
        if phase == Phase::Retry || changed {
            if let Err(e) = self.resolver.cache().write(identity, token) {
                warn!("token cache not updated for {}: {}", identity, e);
            }
        }

        if let Ok(mut confirmed) = self.confirmed.lock() {
            confirmed.insert(TokenCache::key(identity), token.clone());
        }

        ApiReply { body, phase }
    }

    fn remembered(&self, auth: &AuthContext) -> Option<Token> {
        self.confirmed
            .lock()
            .ok()
            .and_then(|confirmed| confirmed.get(&TokenCache::key(auth.identity())).cloned())
    }
}

/// An [`Executor`] bound to one [`AuthContext`].
///
/// Resource operations take a `Session` so they never deal with tokens.
pub struct Session<A: Authenticator = PasswordLogin> {
    executor: Executor<A>,
    auth: AuthContext,
}

impl<A: Authenticator> Session<A> {
    pub fn new(executor: Executor<A>, auth: AuthContext) -> Self {
        Session { executor, auth }
    }

    pub fn auth(&self) -> &AuthContext {
        &self.auth
    }

    pub fn reauthenticated(&self) -> bool {
        self.executor.reauthenticated()
    }

    pub async fn get(&self, endpoint: &Endpoint) -> Result<ApiReply, ClientError> {
        self.executor
            .execute(&self.auth, Method::GET, endpoint, None)
            .await
    }

    pub async fn post(&self, endpoint: &Endpoint, body: &Value) -> Result<ApiReply, ClientError> {
        self.executor
            .execute(&self.auth, Method::POST, endpoint, Some(body))
            .await
    }

    pub async fn put(&self, endpoint: &Endpoint, body: &Value) -> Result<ApiReply, ClientError> {
        self.executor
            .execute(&self.auth, Method::PUT, endpoint, Some(body))
            .await
    }

    pub async fn delete(
        &self,
        endpoint: &Endpoint,
        body: Option<&Value>,
    ) -> Result<ApiReply, ClientError> {
        self.executor
            .execute(&self.auth, Method::DELETE, endpoint, body)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{Credentials, Identity, MockAuthenticator, Provenance};
    use mockito::{Matcher, ServerGuard};
    use tempfile::TempDir;

    const UNKNOWN_TOKEN: &str =
        r#"{"errcode":"M_UNKNOWN_TOKEN","error":"Invalid access token passed.","soft_logout":false}"#;

    /// Executor logging in against the mock server.
    fn executor(temp_dir: &TempDir) -> Executor {
        let settings = HttpSettings {
            request_timeout: Duration::from_secs(5),
            ..HttpSettings::default()
        };
        Executor::new(&settings, TokenCache::new(temp_dir.path().to_path_buf())).unwrap()
    }

    /// Executor whose authenticator must never be called.
    fn executor_without_login(temp_dir: &TempDir) -> Executor<MockAuthenticator> {
        let mut authenticator = MockAuthenticator::new();
        authenticator.expect_login().times(0);
        Executor::with_authenticator(
            Client::new(),
            TokenCache::new(temp_dir.path().to_path_buf()),
            authenticator,
        )
    }

    fn identity(server: &ServerGuard) -> Identity {
        Identity::new(&server.url(), "@bot:example.com").unwrap()
    }

    fn version() -> Endpoint {
        Endpoint::admin("v1").segment("server_version")
    }

    async fn version_mock(server: &mut ServerGuard, token: &str, status: usize, hits: usize) -> mockito::Mock {
        let body = if status == 200 {
            r#"{"server_version":"1.99.0"}"#
        } else {
            UNKNOWN_TOKEN
        };
        server
            .mock("GET", "/_synapse/admin/v1/server_version")
            .match_header("authorization", format!("Bearer {token}").as_str())
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .expect(hits)
            .create_async()
            .await
    }

    async fn login_mock(server: &mut ServerGuard, token: &str, hits: usize) -> mockito::Mock {
        server
            .mock("POST", "/_matrix/client/v3/login")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "identifier": { "user": "@bot:example.com" },
                "password": "secret",
            })))
            .with_status(200)
            .with_body(format!(
                r#"{{"user_id":"@bot:example.com","access_token":"{token}","device_id":"DEV"}}"#
            ))
            .expect(hits)
            .create_async()
            .await
    }

    fn seed_cache(temp_dir: &TempDir, identity: &Identity, value: &str) {
        TokenCache::new(temp_dir.path().to_path_buf())
            .write(identity, &Token::new(identity, value, Provenance::FreshlyIssued))
            .unwrap();
    }

    fn cached_value(temp_dir: &TempDir, identity: &Identity) -> Option<String> {
        TokenCache::new(temp_dir.path().to_path_buf())
            .read(identity)
            .map(|t| t.secret().to_owned())
    }

    #[tokio::test]
    async fn test_valid_cached_token_needs_no_login() {
        let mut server = mockito::Server::new_async().await;
        let temp_dir = TempDir::new().unwrap();
        let identity = identity(&server);
        seed_cache(&temp_dir, &identity, "T3");
        let entry_path = TokenCache::new(temp_dir.path().to_path_buf()).entry_path(&identity);
        let before = std::fs::read_to_string(&entry_path).unwrap();

        let mock = version_mock(&mut server, "T3", 200, 1).await;
        let executor = executor_without_login(&temp_dir);
        let auth = AuthContext::new(identity.clone(), None, None);

        let reply = executor
            .execute(&auth, Method::GET, &version(), None)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(reply.body["server_version"], "1.99.0");
        assert_eq!(reply.phase, Phase::Candidate);
        assert!(!executor.reauthenticated());
        // Unchanged token: no redundant write.
        assert_eq!(std::fs::read_to_string(&entry_path).unwrap(), before);
    }

    #[tokio::test]
    async fn test_second_candidate_used_without_login() {
        let mut server = mockito::Server::new_async().await;
        let temp_dir = TempDir::new().unwrap();
        let identity = identity(&server);
        seed_cache(&temp_dir, &identity, "T3");

        let rejected = version_mock(&mut server, "T1", 401, 1).await;
        let accepted = version_mock(&mut server, "T3", 200, 1).await;
        let executor = executor_without_login(&temp_dir);
        let auth = AuthContext::new(identity.clone(), Some("T1".to_owned()), None);

        let reply = executor
            .execute(&auth, Method::GET, &version(), None)
            .await
            .unwrap();

        rejected.assert_async().await;
        accepted.assert_async().await;
        assert_eq!(reply.phase, Phase::Candidate);
        assert_eq!(cached_value(&temp_dir, &identity).as_deref(), Some("T3"));
    }

    #[tokio::test]
    async fn test_supplied_token_rejected_then_login_and_retry() {
        let mut server = mockito::Server::new_async().await;
        let temp_dir = TempDir::new().unwrap();
        let identity = identity(&server);

        let rejected = version_mock(&mut server, "T1", 401, 1).await;
        let login = login_mock(&mut server, "T2", 1).await;
        let retried = version_mock(&mut server, "T2", 200, 1).await;
        let executor = executor(&temp_dir);
        let auth = AuthContext::new(
            identity.clone(),
            Some("T1".to_owned()),
            Some(Credentials::new("secret")),
        );

        let reply = executor
            .execute(&auth, Method::GET, &version(), None)
            .await
            .unwrap();

        rejected.assert_async().await;
        login.assert_async().await;
        retried.assert_async().await;
        assert_eq!(reply.phase, Phase::Retry);
        assert!(executor.reauthenticated());
        assert_eq!(cached_value(&temp_dir, &identity).as_deref(), Some("T2"));
    }

    #[tokio::test]
    async fn test_failed_retry_is_terminal() {
        let mut server = mockito::Server::new_async().await;
        let temp_dir = TempDir::new().unwrap();
        let identity = identity(&server);

        let rejected = version_mock(&mut server, "T1", 401, 1).await;
        let login = login_mock(&mut server, "T2", 1).await;
        let retried = version_mock(&mut server, "T2", 401, 1).await;
        let executor = executor(&temp_dir);
        let auth = AuthContext::new(
            identity.clone(),
            Some("T1".to_owned()),
            Some(Credentials::new("secret")),
        );

        let result = executor.execute(&auth, Method::GET, &version(), None).await;

        rejected.assert_async().await;
        login.assert_async().await;
        retried.assert_async().await;
        assert!(matches!(
            result,
            Err(ClientError::Authentication {
                reason: AuthFailure::FreshTokenRejected(_),
                ..
            })
        ));
        // A token that never worked is not cached.
        assert!(cached_value(&temp_dir, &identity).is_none());
    }

    #[tokio::test]
    async fn test_no_authentication_path_fails_before_network() {
        let mut server = mockito::Server::new_async().await;
        let temp_dir = TempDir::new().unwrap();
        let identity = identity(&server);

        let any_call = server
            .mock("GET", Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let any_post = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create_async()
            .await;
        let executor = executor_without_login(&temp_dir);
        let auth = AuthContext::new(identity, None, None);

        let result = executor.execute(&auth, Method::GET, &version(), None).await;

        any_call.assert_async().await;
        any_post.assert_async().await;
        assert!(matches!(result, Err(ClientError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_rejected_tokens_without_password() {
        let mut server = mockito::Server::new_async().await;
        let temp_dir = TempDir::new().unwrap();
        let identity = identity(&server);

        let rejected = version_mock(&mut server, "T1", 401, 1).await;
        let executor = executor_without_login(&temp_dir);
        let auth = AuthContext::new(identity, Some("T1".to_owned()), None);

        let result = executor.execute(&auth, Method::GET, &version(), None).await;

        rejected.assert_async().await;
        assert!(matches!(
            result,
            Err(ClientError::Authentication {
                reason: AuthFailure::TokensRejected(_),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_request_error_is_not_escalated() {
        let mut server = mockito::Server::new_async().await;
        let temp_dir = TempDir::new().unwrap();
        let identity = identity(&server);
        seed_cache(&temp_dir, &identity, "T3");

        let forbidden = server
            .mock("GET", "/_synapse/admin/v1/server_version")
            .match_header("authorization", "Bearer T1")
            .with_status(403)
            .with_body(r#"{"errcode":"M_FORBIDDEN","error":"You are not a server admin"}"#)
            .expect(1)
            .create_async()
            .await;
        let cached = version_mock(&mut server, "T3", 200, 0).await;
        let login = login_mock(&mut server, "T2", 0).await;
        let executor = executor(&temp_dir);
        let auth = AuthContext::new(
            identity,
            Some("T1".to_owned()),
            Some(Credentials::new("secret")),
        );

        let result = executor.execute(&auth, Method::GET, &version(), None).await;

        forbidden.assert_async().await;
        cached.assert_async().await;
        login.assert_async().await;
        match result {
            Err(ClientError::Request(error)) => {
                assert_eq!(error.status, 403);
                assert_eq!(error.errcode.as_deref(), Some("M_FORBIDDEN"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_login_failure_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let temp_dir = TempDir::new().unwrap();
        let identity = identity(&server);

        let login = server
            .mock("POST", "/_matrix/client/v3/login")
            .with_status(403)
            .with_body(r#"{"errcode":"M_FORBIDDEN","error":"Invalid username or password"}"#)
            .expect(1)
            .create_async()
            .await;
        let executor = executor(&temp_dir);
        let auth = AuthContext::new(identity, None, Some(Credentials::new("secret")));

        let result = executor.execute(&auth, Method::GET, &version(), None).await;

        login.assert_async().await;
        assert!(matches!(
            result,
            Err(ClientError::Authentication {
                reason: AuthFailure::BadCredentials(_),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_corrupt_cache_falls_through_to_login() {
        let mut server = mockito::Server::new_async().await;
        let temp_dir = TempDir::new().unwrap();
        let identity = identity(&server);
        let cache = TokenCache::new(temp_dir.path().to_path_buf());
        seed_cache(&temp_dir, &identity, "T3");
        // Rewriting in place keeps the owner-only mode, so only the JSON is bad.
        std::fs::write(cache.entry_path(&identity), "{ not json").unwrap();

        let untried = version_mock(&mut server, "T3", 200, 0).await;
        let login = login_mock(&mut server, "T2", 1).await;
        let retried = version_mock(&mut server, "T2", 200, 1).await;
        let executor = executor(&temp_dir);
        let auth = AuthContext::new(identity.clone(), None, Some(Credentials::new("secret")));

        let reply = executor
            .execute(&auth, Method::GET, &version(), None)
            .await
            .unwrap();

        untried.assert_async().await;
        login.assert_async().await;
        retried.assert_async().await;
        assert_eq!(reply.phase, Phase::Retry);
        assert_eq!(cached_value(&temp_dir, &identity).as_deref(), Some("T2"));
    }

    #[tokio::test]
    async fn test_remembered_token_is_not_rewritten() {
        let mut server = mockito::Server::new_async().await;
        let temp_dir = TempDir::new().unwrap();
        let identity = identity(&server);

        let login = login_mock(&mut server, "T2", 1).await;
        let accepted = version_mock(&mut server, "T2", 200, 3).await;
        let executor = executor(&temp_dir);
        let auth = AuthContext::new(identity.clone(), None, Some(Credentials::new("secret")));
        let entry_path = TokenCache::new(temp_dir.path().to_path_buf()).entry_path(&identity);

        executor
            .execute(&auth, Method::GET, &version(), None)
            .await
            .unwrap();
        let after_login = std::fs::read_to_string(&entry_path).unwrap();

        for _ in 0..2 {
            let reply = executor
                .execute(&auth, Method::GET, &version(), None)
                .await
                .unwrap();
            assert_eq!(reply.phase, Phase::Candidate);
        }

        login.assert_async().await;
        accepted.assert_async().await;
        assert_eq!(std::fs::read_to_string(&entry_path).unwrap(), after_login);
    }

    #[tokio::test]
    async fn test_fresh_token_remembered_for_next_operation() {
        let mut server = mockito::Server::new_async().await;
        let temp_dir = TempDir::new().unwrap();
        let identity = identity(&server);

        let rejected = version_mock(&mut server, "T1", 401, 1).await;
        let login = login_mock(&mut server, "T2", 1).await;
        let accepted = version_mock(&mut server, "T2", 200, 2).await;
        let executor = executor(&temp_dir);
        let auth = AuthContext::new(
            identity,
            Some("T1".to_owned()),
            Some(Credentials::new("secret")),
        );

        executor
            .execute(&auth, Method::GET, &version(), None)
            .await
            .unwrap();
        let second = executor
            .execute(&auth, Method::GET, &version(), None)
            .await
            .unwrap();

        // The dead supplied token is not tried again.
        rejected.assert_async().await;
        login.assert_async().await;
        accepted.assert_async().await;
        assert_eq!(second.phase, Phase::Candidate);
    }

    #[tokio::test]
    async fn test_working_supplied_token_is_cached() {
        let mut server = mockito::Server::new_async().await;
        let temp_dir = TempDir::new().unwrap();
        let identity = identity(&server);

        let accepted = version_mock(&mut server, "T1", 200, 1).await;
        let executor = executor_without_login(&temp_dir);
        let auth = AuthContext::new(identity.clone(), Some("T1".to_owned()), None);

        let reply = executor
            .execute(&auth, Method::GET, &version(), None)
            .await
            .unwrap();

        accepted.assert_async().await;
        assert_eq!(reply.phase, Phase::Candidate);
        assert_eq!(cached_value(&temp_dir, &identity).as_deref(), Some("T1"));
    }

    #[tokio::test]
    async fn test_mock_authenticator_login_once() {
        let mut server = mockito::Server::new_async().await;
        let temp_dir = TempDir::new().unwrap();
        let identity = identity(&server);

        let rejected = version_mock(&mut server, "T1", 401, 1).await;
        let retried = version_mock(&mut server, "T2", 200, 1).await;
        let mut authenticator = MockAuthenticator::new();
        authenticator
            .expect_login()
            .times(1)
            .returning(|identity, _| Ok(Token::new(identity, "T2", Provenance::FreshlyIssued)));
        let executor = Executor::with_authenticator(
            Client::new(),
            TokenCache::new(temp_dir.path().to_path_buf()),
            authenticator,
        );
        let auth = AuthContext::new(
            identity.clone(),
            Some("T1".to_owned()),
            Some(Credentials::new("secret")),
        );

        let reply = executor
            .execute(&auth, Method::GET, &version(), None)
            .await
            .unwrap();

        rejected.assert_async().await;
        retried.assert_async().await;
        assert_eq!(reply.phase, Phase::Retry);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let temp_dir = TempDir::new().unwrap();
        let identity =
            Identity::new(&format!("http://127.0.0.1:{port}"), "@bot:example.com").unwrap();
        let executor = executor_without_login(&temp_dir);
        let auth = AuthContext::new(identity, Some("T1".to_owned()), None);

        let result = executor.execute(&auth, Method::GET, &version(), None).await;

        assert!(matches!(
            result,
            Err(ClientError::Transport {
                phase: Phase::Candidate,
                ..
            })
        ));
    }
}
