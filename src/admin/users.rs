//! User accounts through `/_synapse/admin/v2/users` and friends.

use log::{info, warn};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};

use crate::{
    admin::AdminError,
    matrix::{Authenticator, ClientError, Endpoint, Session},
};

/// Account as returned by `GET /_synapse/admin/v2/users/{user_id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub name: String,
    #[serde(default)]
    pub displayname: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    pub admin: bool,
    #[serde(default, deserialize_with = "flag")]
    pub deactivated: bool,
    #[serde(default)]
    pub user_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Older Synapse releases report booleans as `0`/`1`.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Bool(b)) => b,
        Some(Value::Number(n)) => n.as_u64().is_some_and(|n| n != 0),
        _ => false,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum UserType {
    Bot,
    Support,
    /// Regular account, reported with a `null` user type.
    Normal,
}

impl UserType {
    fn matches(self, user: &Value) -> bool {
        let user_type = user.get("user_type").and_then(Value::as_str);
        match self {
            UserType::Bot => user_type == Some("bot"),
            UserType::Support => user_type == Some("support"),
            UserType::Normal => user_type.is_none(),
        }
    }
}

/// Filters of a user listing.
#[derive(Debug, Clone)]
pub struct UserQuery {
    pub limit: u32,
    pub deactivated: bool,
    pub admins: Option<bool>,
    /// Substring of the localpart or display name.
    pub name: Option<String>,
    /// Applied locally: the Admin API cannot select `null` user types.
    pub user_type: Option<UserType>,
}

impl Default for UserQuery {
    fn default() -> Self {
        UserQuery {
            limit: 100,
            deactivated: false,
            admins: None,
            name: None,
            user_type: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserPage {
    pub users: Vec<Value>,
    pub total: u64,
}

/// Fields written by an upsert.
#[derive(Debug, Clone, Default)]
pub struct UserSpec {
    pub password: Option<String>,
    pub displayname: Option<String>,
    pub admin: bool,
    pub deactivated: bool,
}

impl UserSpec {
    fn body(&self) -> Value {
        let mut body = json!({
            "admin": self.admin,
            "deactivated": self.deactivated,
        });
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            body["password"] = json!(password);
        }
        if let Some(displayname) = self.displayname.as_deref().filter(|d| !d.is_empty()) {
            body["displayname"] = json!(displayname);
        }
        body
    }

    /// Checks whether `current` differs from this spec.
    fn differs_from(&self, current: &User) -> bool {
        let displayname_differs = self
            .displayname
            .as_deref()
            .is_some_and(|wanted| current.displayname.as_deref() != Some(wanted));
        displayname_differs
            || current.admin != self.admin
            || current.deactivated != self.deactivated
    }
}

/// Per-user message rate limit; `0`/`0` disables limiting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimit {
    pub messages_per_second: u32,
    pub burst_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum UserState {
    Present,
    Absent,
}

/// Desired state of an account.
#[derive(Debug, Clone)]
pub struct DesiredUser {
    pub state: UserState,
    pub spec: UserSpec,
    /// Erase messages on deactivation.
    pub erase: bool,
    pub ratelimit: Option<RateLimit>,
}

#[derive(Debug, Default, Serialize)]
pub struct UserOutcome {
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Fetches one account, `None` when it does not exist.
pub async fn get<A: Authenticator>(
    session: &Session<A>,
    user_id: &str,
) -> Result<Option<User>, ClientError> {
    let endpoint = Endpoint::admin("v2").segment("users").segment(user_id);
    match session.get(&endpoint).await {
        Ok(reply) => reply.decode().map(Some),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Lists accounts matching `query`.
pub async fn list<A: Authenticator>(
    session: &Session<A>,
    query: &UserQuery,
) -> Result<UserPage, ClientError> {
    let endpoint = Endpoint::admin("v2")
        .segment("users")
        .query("limit", query.limit)
        .query("deactivated", query.deactivated)
        .query_opt("admins", query.admins)
        .query_opt("name", query.name.as_deref());

    #[derive(Deserialize)]
    struct Listing {
        #[serde(default)]
        users: Vec<Value>,
        total: Option<u64>,
    }

    let listing: Listing = session.get(&endpoint).await?.decode()?;
    Ok(match query.user_type {
        Some(user_type) => {
            let users: Vec<Value> = listing
                .users
                .into_iter()
                .filter(|user| user_type.matches(user))
                .collect();
            UserPage {
                total: users.len() as u64,
                users,
            }
        }
        None => UserPage {
            total: listing.total.unwrap_or(listing.users.len() as u64),
            users: listing.users,
        },
    })
}

/// Creates or updates an account with `PUT /_synapse/admin/v2/users/{user_id}`.
pub async fn upsert<A: Authenticator>(
    session: &Session<A>,
    user_id: &str,
    spec: &UserSpec,
) -> Result<Value, ClientError> {
    let endpoint = Endpoint::admin("v2").segment("users").segment(user_id);
    info!("upsert user {}", user_id);
    Ok(session.put(&endpoint, &spec.body()).await?.body)
}

pub async fn deactivate<A: Authenticator>(
    session: &Session<A>,
    user_id: &str,
    erase: bool,
) -> Result<Value, ClientError> {
    let endpoint = Endpoint::admin("v1").segment("deactivate").segment(user_id);
    info!("deactivate user {} (erase: {})", user_id, erase);
    Ok(session.post(&endpoint, &json!({ "erase": erase })).await?.body)
}

fn ratelimit_endpoint(user_id: &str) -> Endpoint {
    Endpoint::admin("v1")
        .segment("users")
        .segment(user_id)
        .segment("override_ratelimit")
}

pub async fn set_ratelimit<A: Authenticator>(
    session: &Session<A>,
    user_id: &str,
    ratelimit: RateLimit,
) -> Result<Value, ClientError> {
    let body = serde_json::to_value(ratelimit).map_err(|e| {
        ClientError::Configuration(format!("cannot encode rate limit override: {e}"))
    })?;
    Ok(session.post(&ratelimit_endpoint(user_id), &body).await?.body)
}

/// Restores the default rate limits of `user_id`.
pub async fn delete_ratelimit<A: Authenticator>(
    session: &Session<A>,
    user_id: &str,
) -> Result<(), ClientError> {
    session.delete(&ratelimit_endpoint(user_id), None).await?;
    Ok(())
}

/// Brings `user_id` to the `desired` state.
///
/// A failed rate-limit override is reported as a warning: the account itself
/// is already in the desired state at that point.
pub async fn ensure<A: Authenticator>(
    session: &Session<A>,
    user_id: &str,
    desired: &DesiredUser,
    dry_run: bool,
) -> Result<UserOutcome, AdminError> {
    let current = get(session, user_id).await?;
    let mut outcome = UserOutcome::default();

    match desired.state {
        UserState::Absent => {
            if current.as_ref().is_some_and(|user| !user.deactivated) {
                if !dry_run {
                    deactivate(session, user_id, desired.erase).await?;
                }
                outcome.changed = true;
            }
        }
        UserState::Present => {
            let needs_update = current
                .as_ref()
                .is_none_or(|user| desired.spec.differs_from(user));
            if needs_update {
                if !dry_run {
                    outcome.user = Some(upsert(session, user_id, &desired.spec).await?);
                }
                outcome.changed = true;
            }

            if let Some(ratelimit) = desired.ratelimit
                && !dry_run
                && let Err(e) = set_ratelimit(session, user_id, ratelimit).await
            {
                warn!("rate limit override not applied to {}: {}", user_id, e);
                outcome
                    .warnings
                    .push(format!("failed to set rate limit override: {e}"));
            }
        }
    }

    if dry_run {
        outcome.user = current.map(|user| json!(user));
    } else if let Some(user) = get(session, user_id).await? {
        outcome.user = Some(json!(user));
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::test_support::session;
    use mockito::Matcher;
    use tempfile::TempDir;

    const USER_PATH: &str = "/_synapse/admin/v2/users/@alice:example.com";

    fn alice(admin: bool, deactivated: bool) -> String {
        json!({
            "name": "@alice:example.com",
            "displayname": "Alice",
            "admin": admin,
            "deactivated": deactivated,
            "user_type": null,
            "creation_ts": 1_700_000_000_000u64,
        })
        .to_string()
    }

    fn present(spec: UserSpec) -> DesiredUser {
        DesiredUser {
            state: UserState::Present,
            spec,
            erase: false,
            ratelimit: None,
        }
    }

    #[test]
    fn test_user_accepts_integer_flags() {
        let user: User = serde_json::from_str(
            r#"{"name":"@bob:example.com","admin":1,"deactivated":0,"is_guest":0}"#,
        )
        .unwrap();
        assert!(user.admin);
        assert!(!user.deactivated);
        assert_eq!(user.extra["is_guest"], 0);
    }

    #[test]
    fn test_spec_body_skips_empty_fields() {
        let spec = UserSpec {
            password: Some(String::new()),
            displayname: Some("Alice".to_owned()),
            admin: true,
            deactivated: false,
        };
        assert_eq!(
            spec.body(),
            json!({"admin": true, "deactivated": false, "displayname": "Alice"})
        );
    }

    #[tokio::test]
    async fn test_get_missing_user() {
        let mut server = mockito::Server::new_async().await;
        let temp_dir = TempDir::new().unwrap();
        server
            .mock("GET", USER_PATH)
            .with_status(404)
            .with_body(r#"{"errcode":"M_NOT_FOUND","error":"User not found"}"#)
            .create_async()
            .await;

        let user = get(&session(&server, &temp_dir), "@alice:example.com")
            .await
            .unwrap();

        assert!(user.is_none());
    }

    #[tokio::test]
    async fn test_list_filters_normal_users() {
        let mut server = mockito::Server::new_async().await;
        let temp_dir = TempDir::new().unwrap();
        let mock = server
            .mock("GET", "/_synapse/admin/v2/users")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("limit".into(), "50".into()),
                Matcher::UrlEncoded("deactivated".into(), "false".into()),
                Matcher::UrlEncoded("admins".into(), "true".into()),
            ]))
            .with_status(200)
            .with_body(
                json!({
                    "users": [
                        {"name": "@alice:example.com", "user_type": null},
                        {"name": "@bot:example.com", "user_type": "bot"},
                    ],
                    "total": 2,
                })
                .to_string(),
            )
            .expect(1)
            .create_async()
            .await;

        let query = UserQuery {
            limit: 50,
            admins: Some(true),
            user_type: Some(UserType::Normal),
            ..UserQuery::default()
        };
        let page = list(&session(&server, &temp_dir), &query).await.unwrap();

        mock.assert_async().await;
        assert_eq!(page.total, 1);
        assert_eq!(page.users[0]["name"], "@alice:example.com");
    }

    #[tokio::test]
    async fn test_ensure_present_creates_missing_user() {
        let mut server = mockito::Server::new_async().await;
        let temp_dir = TempDir::new().unwrap();
        server
            .mock("GET", USER_PATH)
            .with_status(404)
            .with_body(r#"{"errcode":"M_NOT_FOUND","error":"User not found"}"#)
            .expect(1)
            .create_async()
            .await;
        let put = server
            .mock("PUT", USER_PATH)
            .match_body(Matcher::Json(json!({
                "admin": false,
                "deactivated": false,
                "password": "pw",
                "displayname": "Alice",
            })))
            .with_status(201)
            .with_body(alice(false, false))
            .expect(1)
            .create_async()
            .await;
        // Later mocks take precedence once the first GET is consumed.
        server
            .mock("GET", USER_PATH)
            .with_status(200)
            .with_body(alice(false, false))
            .create_async()
            .await;

        let desired = present(UserSpec {
            password: Some("pw".to_owned()),
            displayname: Some("Alice".to_owned()),
            ..UserSpec::default()
        });
        let outcome = ensure(
            &session(&server, &temp_dir),
            "@alice:example.com",
            &desired,
            false,
        )
        .await
        .unwrap();

        put.assert_async().await;
        assert!(outcome.changed);
        assert_eq!(outcome.user.unwrap()["displayname"], "Alice");
    }

    #[tokio::test]
    async fn test_ensure_present_is_idempotent() {
        let mut server = mockito::Server::new_async().await;
        let temp_dir = TempDir::new().unwrap();
        server
            .mock("GET", USER_PATH)
            .with_status(200)
            .with_body(alice(false, false))
            .expect(2)
            .create_async()
            .await;
        let put = server.mock("PUT", USER_PATH).expect(0).create_async().await;

        let desired = present(UserSpec {
            displayname: Some("Alice".to_owned()),
            ..UserSpec::default()
        });
        let outcome = ensure(
            &session(&server, &temp_dir),
            "@alice:example.com",
            &desired,
            false,
        )
        .await
        .unwrap();

        put.assert_async().await;
        assert!(!outcome.changed);
    }

    #[tokio::test]
    async fn test_ensure_absent_dry_run_sends_no_write() {
        let mut server = mockito::Server::new_async().await;
        let temp_dir = TempDir::new().unwrap();
        server
            .mock("GET", USER_PATH)
            .with_status(200)
            .with_body(alice(true, false))
            .create_async()
            .await;
        let deactivate = server
            .mock("POST", "/_synapse/admin/v1/deactivate/@alice:example.com")
            .expect(0)
            .create_async()
            .await;

        let desired = DesiredUser {
            state: UserState::Absent,
            spec: UserSpec::default(),
            erase: true,
            ratelimit: None,
        };
        let outcome = ensure(
            &session(&server, &temp_dir),
            "@alice:example.com",
            &desired,
            true,
        )
        .await
        .unwrap();

        deactivate.assert_async().await;
        assert!(outcome.changed);
    }

    #[tokio::test]
    async fn test_ensure_absent_deactivates_with_erase() {
        let mut server = mockito::Server::new_async().await;
        let temp_dir = TempDir::new().unwrap();
        server
            .mock("GET", USER_PATH)
            .with_status(200)
            .with_body(alice(false, false))
            .create_async()
            .await;
        let deactivate = server
            .mock("POST", "/_synapse/admin/v1/deactivate/@alice:example.com")
            .match_body(Matcher::Json(json!({"erase": true})))
            .with_status(200)
            .with_body(r#"{"id_server_unbind_result":"success"}"#)
            .expect(1)
            .create_async()
            .await;

        let desired = DesiredUser {
            state: UserState::Absent,
            spec: UserSpec::default(),
            erase: true,
            ratelimit: None,
        };
        let outcome = ensure(
            &session(&server, &temp_dir),
            "@alice:example.com",
            &desired,
            false,
        )
        .await
        .unwrap();

        deactivate.assert_async().await;
        assert!(outcome.changed);
    }

    #[tokio::test]
    async fn test_failed_ratelimit_is_a_warning() {
        let mut server = mockito::Server::new_async().await;
        let temp_dir = TempDir::new().unwrap();
        server
            .mock("GET", USER_PATH)
            .with_status(200)
            .with_body(alice(false, false))
            .create_async()
            .await;
        server
            .mock(
                "POST",
                "/_synapse/admin/v1/users/@alice:example.com/override_ratelimit",
            )
            .with_status(400)
            .with_body(r#"{"errcode":"M_INVALID_PARAM","error":"bad value"}"#)
            .create_async()
            .await;

        let desired = DesiredUser {
            ratelimit: Some(RateLimit::default()),
            ..present(UserSpec::default())
        };
        let outcome = ensure(
            &session(&server, &temp_dir),
            "@alice:example.com",
            &desired,
            false,
        )
        .await
        .unwrap();

        assert!(!outcome.changed);
        assert_eq!(outcome.warnings.len(), 1);
    }
}
