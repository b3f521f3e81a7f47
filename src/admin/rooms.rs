//! Rooms: Admin API queries and deletion, Client API creation and joins.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    admin::AdminError,
    matrix::{Authenticator, ClientError, Endpoint, Session},
};

/// Turns a bare room name or a server-less alias into a full alias.
///
/// `ops` and `#ops` become `#ops:<host>`; full aliases are returned as is.
pub fn normalize_alias(alias: &str, host: &str) -> String {
    match alias.strip_prefix('#') {
        None => format!("#{alias}:{host}"),
        Some(_) if !alias.contains(':') => format!("{alias}:{host}"),
        Some(_) => alias.to_owned(),
    }
}

/// Looks an alias up in the room directory, `None` when it is unknown.
pub async fn resolve_alias<A: Authenticator>(
    session: &Session<A>,
    alias: &str,
) -> Result<Option<String>, ClientError> {
    let endpoint = Endpoint::client()
        .segment("directory")
        .segment("room")
        .segment(alias);

    #[derive(Deserialize)]
    struct Directory {
        room_id: String,
    }

    match session.get(&endpoint).await {
        Ok(reply) => {
            let directory: Directory = reply.decode()?;
            debug!("alias {} resolved to {}", alias, directory.room_id);
            Ok(Some(directory.room_id))
        }
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Returns a room id for `room`: ids are kept, aliases and names are
/// normalized against the session's homeserver and resolved.
pub async fn resolve<A: Authenticator>(
    session: &Session<A>,
    room: &str,
) -> Result<Option<String>, ClientError> {
    if room.starts_with('!') {
        return Ok(Some(room.to_owned()));
    }
    let alias = normalize_alias(room, session.auth().identity().host());
    resolve_alias(session, &alias).await
}

/// User id owning the session's token.
pub async fn whoami<A: Authenticator>(session: &Session<A>) -> Result<String, ClientError> {
    let endpoint = Endpoint::client().segment("account").segment("whoami");

    #[derive(Deserialize)]
    struct WhoAmI {
        user_id: String,
    }

    let whoami: WhoAmI = session.get(&endpoint).await?.decode()?;
    Ok(whoami.user_id)
}

pub async fn details<A: Authenticator>(
    session: &Session<A>,
    room_id: &str,
) -> Result<Option<Value>, ClientError> {
    let endpoint = Endpoint::admin("v1").segment("rooms").segment(room_id);
    match session.get(&endpoint).await {
        Ok(reply) => Ok(Some(reply.body)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

pub async fn members<A: Authenticator>(
    session: &Session<A>,
    room_id: &str,
) -> Result<Option<Value>, ClientError> {
    let endpoint = Endpoint::admin("v1")
        .segment("rooms")
        .segment(room_id)
        .segment("members");
    match session.get(&endpoint).await {
        Ok(reply) => Ok(Some(reply.body)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RoomPage {
    pub rooms: Vec<Value>,
    pub total: u64,
}

pub async fn list<A: Authenticator>(
    session: &Session<A>,
    limit: u32,
    search_term: Option<&str>,
) -> Result<RoomPage, ClientError> {
    let endpoint = Endpoint::admin("v1")
        .segment("rooms")
        .query("limit", limit)
        .query_opt("search_term", search_term);

    #[derive(Deserialize)]
    struct Listing {
        #[serde(default)]
        rooms: Vec<Value>,
        total_rooms: Option<u64>,
    }

    let listing: Listing = session.get(&endpoint).await?.decode()?;
    Ok(RoomPage {
        total: listing.total_rooms.unwrap_or(listing.rooms.len() as u64),
        rooms: listing.rooms,
    })
}

/// Options of an asynchronous room deletion.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteOptions {
    pub purge: bool,
    pub block: bool,
    /// Local user that creates a replacement room and receives the members.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_room_user_id: Option<String>,
    /// Message posted in the replacement room.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        DeleteOptions {
            purge: true,
            block: false,
            new_room_user_id: None,
            message: None,
        }
    }
}

/// Starts the deletion of a room and returns the `delete_id` to poll.
pub async fn delete<A: Authenticator>(
    session: &Session<A>,
    room_id: &str,
    options: &DeleteOptions,
) -> Result<Option<String>, ClientError> {
    let endpoint = Endpoint::admin("v2").segment("rooms").segment(room_id);
    let body = json!(options);
    info!("delete room {} (purge: {}, block: {})", room_id, options.purge, options.block);

    let reply = session.delete(&endpoint, Some(&body)).await?;
    Ok(reply
        .body
        .get("delete_id")
        .and_then(Value::as_str)
        .map(str::to_owned))
}

pub async fn join<A: Authenticator>(
    session: &Session<A>,
    room_id: &str,
) -> Result<Value, ClientError> {
    let endpoint = Endpoint::client()
        .segment("rooms")
        .segment(room_id)
        .segment("join");
    info!("join room {}", room_id);
    Ok(session.post(&endpoint, &json!({})).await?.body)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    #[default]
    PrivateChat,
    PublicChat,
    TrustedPrivateChat,
}

impl Preset {
    fn visibility(self) -> &'static str {
        match self {
            Preset::PublicChat => "public",
            Preset::PrivateChat | Preset::TrustedPrivateChat => "private",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum GuestAccess {
    CanJoin,
    #[default]
    Forbidden,
}

/// Room to create.
#[derive(Debug, Clone, Default)]
pub struct RoomSpec {
    pub name: Option<String>,
    /// Localpart of the alias to publish, e.g. `ops` for `#ops:example.com`.
    pub alias_name: Option<String>,
    pub topic: Option<String>,
    pub invite: Vec<String>,
    /// Invited and given power level 100.
    pub admins: Vec<String>,
    /// Invited and given power level 50.
    pub moderators: Vec<String>,
    /// Raw `power_level_content_override`, wins over `admins`/`moderators`.
    pub power_levels: Option<Value>,
    pub preset: Preset,
    pub guest_access: GuestAccess,
}

impl RoomSpec {
    /// Body of `POST /_matrix/client/v3/createRoom`.
    ///
    /// The creator is never invited: they join the room by creating it.
    pub fn create_request(&self, creator: Option<&str>) -> Value {
        let mut request = json!({
            "visibility": self.preset.visibility(),
            "preset": self.preset,
            "initial_state": [{
                "type": "m.room.guest_access",
                "state_key": "",
                "content": { "guest_access": self.guest_access },
            }],
        });
        if let Some(name) = &self.name {
            request["name"] = json!(name);
        }
        if let Some(alias_name) = &self.alias_name {
            request["room_alias_name"] = json!(alias_name);
        }
        if let Some(topic) = &self.topic {
            request["topic"] = json!(topic);
        }

        let invite: BTreeSet<&str> = self
            .invite
            .iter()
            .chain(&self.admins)
            .chain(&self.moderators)
            .map(String::as_str)
            .filter(|user| Some(*user) != creator)
            .collect();
        if !invite.is_empty() {
            request["invite"] = json!(invite);
        }

        if let Some(power_levels) = &self.power_levels {
            request["power_level_content_override"] = power_levels.clone();
        } else if !self.admins.is_empty() || !self.moderators.is_empty() {
            let mut users: BTreeMap<&str, u8> = BTreeMap::new();
            for admin in &self.admins {
                users.insert(admin, 100);
            }
            for moderator in &self.moderators {
                users.entry(moderator).or_insert(50);
            }
            request["power_level_content_override"] = json!({
                "users": users,
                "users_default": 0,
            });
        }

        request
    }
}

/// Creates a room as the session's user.
pub async fn create<A: Authenticator>(
    session: &Session<A>,
    spec: &RoomSpec,
) -> Result<Value, ClientError> {
    let creator = match whoami(session).await {
        Ok(user_id) => Some(user_id),
        Err(e @ ClientError::Request(_)) => {
            warn!("cannot determine room creator, invites kept as is: {}", e);
            None
        }
        Err(e) => return Err(e),
    };

    let request = spec.create_request(creator.as_deref());
    let endpoint = Endpoint::client().segment("createRoom");
    info!("create room {}", spec.name.as_deref().unwrap_or("(unnamed)"));
    Ok(session.post(&endpoint, &request).await?.body)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum RoomState {
    #[default]
    Info,
    Members,
    Present,
    Absent,
    Join,
}

#[derive(Debug, Default, Serialize)]
pub struct RoomOutcome {
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub members: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_levels_applied: Option<bool>,
}

/// Brings `room` (id, alias or bare name) to `state`.
///
/// When an alias resolves but the Admin API refuses to describe the room
/// (token without admin rights), the room is still considered present.
pub async fn ensure<A: Authenticator>(
    session: &Session<A>,
    room: &str,
    state: RoomState,
    spec: &RoomSpec,
    delete_options: &DeleteOptions,
    dry_run: bool,
) -> Result<RoomOutcome, AdminError> {
    let mut room_id = room.to_owned();
    let mut alias_resolved = false;
    if room.starts_with('#') {
        match resolve(session, room).await? {
            Some(resolved) => {
                room_id = resolved;
                alias_resolved = true;
            }
            None if matches!(state, RoomState::Info | RoomState::Members) => {
                return Err(AdminError::NotFound(format!("room alias {room}")));
            }
            None => {}
        }
    }

    let current = if room_id.starts_with('#') {
        None
    } else {
        match details(session, &room_id).await {
            Ok(Some(details)) => Some(details),
            Ok(None) | Err(ClientError::Request(_)) if alias_resolved => {
                Some(json!({ "room_id": room_id, "resolved_from_alias": true }))
            }
            Ok(None) => None,
            Err(e) => return Err(e.into()),
        }
    };

    let mut outcome = RoomOutcome::default();
    match state {
        RoomState::Info => {
            outcome.room =
                Some(current.ok_or_else(|| AdminError::NotFound(format!("room {room_id}")))?);
        }
        RoomState::Members => {
            outcome.members = Some(
                members(session, &room_id)
                    .await?
                    .ok_or_else(|| AdminError::NotFound(format!("room {room_id}")))?,
            );
        }
        RoomState::Absent => {
            if current.is_some() {
                if !dry_run {
                    outcome.delete_id = delete(session, &room_id, delete_options).await?;
                }
                outcome.changed = true;
            }
        }
        RoomState::Join => {
            if !dry_run {
                outcome.room = Some(join(session, &room_id).await?);
            }
            outcome.changed = true;
        }
        RoomState::Present => match current {
            Some(current) => outcome.room = Some(current),
            None => {
                if !dry_run {
                    outcome.room = Some(create(session, spec).await?);
                    outcome.power_levels_applied = Some(
                        spec.power_levels.is_some()
                            || !spec.admins.is_empty()
                            || !spec.moderators.is_empty(),
                    );
                }
                outcome.changed = true;
            }
        },
    }

    Ok(outcome)
}
