//! Homeserver facts and registration tokens.

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    admin::{
        AdminError, rooms,
        users::{self, UserQuery},
    },
    matrix::{Authenticator, ClientError, Endpoint, Session},
};

/// `GET /_synapse/admin/v1/server_version`.
pub async fn version<A: Authenticator>(session: &Session<A>) -> Result<Value, ClientError> {
    let endpoint = Endpoint::admin("v1").segment("server_version");
    Ok(session.get(&endpoint).await?.body)
}

/// Lists registration tokens, optionally only the valid (or invalid) ones.
pub async fn registration_tokens<A: Authenticator>(
    session: &Session<A>,
    valid: Option<bool>,
) -> Result<Vec<Value>, ClientError> {
    let endpoint = Endpoint::admin("v1")
        .segment("registration_tokens")
        .query_opt("valid", valid);

    #[derive(Deserialize)]
    struct Listing {
        #[serde(default)]
        registration_tokens: Vec<Value>,
    }

    Ok(session
        .get(&endpoint)
        .await?
        .decode::<Listing>()?
        .registration_tokens)
}

/// Registration token to create. Unset fields are chosen by the homeserver.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NewRegistrationToken {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uses_allowed: Option<u32>,
    /// Expiry as milliseconds since the epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_time: Option<i64>,
}

pub async fn create_registration_token<A: Authenticator>(
    session: &Session<A>,
    token: &NewRegistrationToken,
) -> Result<Value, ClientError> {
    let endpoint = Endpoint::admin("v1")
        .segment("registration_tokens")
        .segment("new");
    Ok(session.post(&endpoint, &json!(token)).await?.body)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Fact {
    Version,
    Users,
    Rooms,
    RegistrationTokens,
    All,
}

/// Listing parameters of [`gather`].
#[derive(Debug, Clone)]
pub struct FactQuery {
    pub limit: u32,
    pub users_filter: Option<String>,
    pub rooms_filter: Option<String>,
}

impl Default for FactQuery {
    fn default() -> Self {
        FactQuery {
            limit: 100,
            users_filter: None,
            rooms_filter: None,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct ServerFacts {
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub users_total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rooms: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rooms_total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_tokens: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ServerFacts {
    /// Keeps `value`, or records `error` as a warning when it does not affect
    /// the other facts.
    fn collect<T>(&mut self, what: &str, result: Result<T, ClientError>) -> Result<Option<T>, AdminError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e @ (ClientError::Configuration(_) | ClientError::Authentication { .. })) => {
                Err(e.into())
            }
            Err(e) => {
                warn!("cannot gather {}: {}", what, e);
                self.warnings.push(format!("failed to get {what}: {e}"));
                Ok(None)
            }
        }
    }
}

/// Gathers the requested facts.
///
/// A fact that cannot be fetched becomes a warning. Only failures that would
/// hit every fact alike (configuration, authentication) abort the gathering.
pub async fn gather<A: Authenticator>(
    session: &Session<A>,
    facts: &[Fact],
    query: &FactQuery,
) -> Result<ServerFacts, AdminError> {
    let wants = |fact: Fact| facts.contains(&Fact::All) || facts.contains(&fact);
    let mut gathered = ServerFacts::default();

    if wants(Fact::Version) {
        gathered.version = gathered.collect("version", version(session).await)?;
    }
    if wants(Fact::Users) {
        let users_query = UserQuery {
            limit: query.limit,
            name: query.users_filter.clone(),
            ..UserQuery::default()
        };
        if let Some(page) = gathered.collect("users", users::list(session, &users_query).await)? {
            gathered.users_total = Some(page.total);
            gathered.users = Some(page.users);
        }
    }
    if wants(Fact::Rooms) {
        let listing = rooms::list(session, query.limit, query.rooms_filter.as_deref()).await;
        if let Some(page) = gathered.collect("rooms", listing)? {
            gathered.rooms_total = Some(page.total);
            gathered.rooms = Some(page.rooms);
        }
    }
    if wants(Fact::RegistrationTokens) {
        gathered.registration_tokens = gathered.collect(
            "registration tokens",
            registration_tokens(session, None).await,
        )?;
    }

    Ok(gathered)
}
