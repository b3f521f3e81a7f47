//! Password login against the Matrix Client-Server API.

use log::{debug, info, warn};
use mockall::automock;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::matrix::{
    AuthFailure, ClientError, Credentials, Endpoint, Identity, Phase, Provenance, Token,
    response::{ApiResponse, ServerError},
};

/// Exchanges credentials for a fresh token.
///
/// Implementations perform exactly one login call: no retry, no cache access.
/// Caching is the executor's job once the token has proven itself on a real
/// operation.
#[automock]
pub trait Authenticator {
    /// Logs `identity` in with `credentials`.
    async fn login(
        &self,
        identity: &Identity,
        credentials: &Credentials,
    ) -> Result<Token, ClientError>;
}

#[derive(Serialize)]
struct LoginIdentifier<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    user: &'a str,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    identifier: LoginIdentifier<'a>,
    password: &'a str,
    initial_device_display_name: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    access_token: String,
    user_id: Option<String>,
    device_id: Option<String>,
}

/// `m.login.password` login.
#[derive(Debug, Clone)]
pub struct PasswordLogin {
    client: Client,
    /// Display name given to the device created by each login.
    device_display_name: String,
}

impl PasswordLogin {
    /// Creates a new [`PasswordLogin`] sharing `client`'s connection pool and timeouts.
    pub fn new(client: Client, device_display_name: &str) -> Self {
        PasswordLogin {
            client,
            device_display_name: device_display_name.to_owned(),
        }
    }

    fn classify(user_id: &str, error: ServerError) -> ClientError {
        let reason = match error.errcode.as_deref() {
            Some("M_FORBIDDEN") => AuthFailure::BadCredentials(error),
            Some("M_USER_DEACTIVATED") => AuthFailure::AccountDisabled(error),
            Some("M_LIMIT_EXCEEDED") => AuthFailure::LoginRateLimited(error),
            _ => AuthFailure::LoginRejected(error),
        };
        ClientError::Authentication {
            user_id: user_id.to_owned(),
            reason,
        }
    }
}

impl Authenticator for PasswordLogin {
    /// Request `POST /_matrix/client/v3/login`.
    ///
    /// The request body is:
    /// ```text
    /// {
    ///   "type": "m.login.password",
    ///   "identifier": { "type": "m.id.user", "user": "@bot:example.com" },
    ///   "password": "...",
    ///   "initial_device_display_name": "synapse-mgr"
    /// }
    /// ```
    /// and the response carries `access_token`, `user_id` and `device_id`.
    async fn login(
        &self,
        identity: &Identity,
        credentials: &Credentials,
    ) -> Result<Token, ClientError> {
        let url = Endpoint::client()
            .segment("login")
            .url(identity.homeserver())?;
        info!("logging in as {}", identity);

        let request = LoginRequest {
            kind: "m.login.password",
            identifier: LoginIdentifier {
                kind: "m.id.user",
                user: identity.user_id(),
            },
            password: credentials.password(),
            initial_device_display_name: &self.device_display_name,
        };

        let response = ApiResponse::read(self.client.post(url).json(&request).send().await).await;

        let body = match response {
            ApiResponse::Success(body) => body,
            ApiResponse::AuthFailure(error) | ApiResponse::RequestError(error) => {
                warn!("login refused for {}: {}", identity, error);
                return Err(Self::classify(identity.user_id(), error));
            }
            ApiResponse::TransportError(e) => return Err(ClientError::transport(Phase::Login, e)),
        };

        let login: LoginResponse =
            serde_json::from_value(body).map_err(|e| ClientError::InvalidResponse {
                phase: Phase::Login,
                detail: format!("malformed login response: {e}"),
            })?;

        if let Some(user_id) = &login.user_id
            && user_id != identity.user_id()
        {
            warn!(
                "homeserver logged {} in as {}",
                identity.user_id(),
                user_id
            );
        }
        debug!(
            "login succeeded for {} with device {}",
            identity,
            login.device_id.as_deref().unwrap_or("unknown")
        );

        Ok(Token::new(
            identity,
            &login.access_token,
            Provenance::FreshlyIssued,
        ))
    }
}
