//! Posting events to rooms through the Client API.
//!
//! Events are sent with `PUT /_matrix/client/v3/rooms/{room_id}/send/{type}/{txn_id}`.
//! The transaction id makes the call idempotent: resending the same id does
//! not post a second event. Aliases are resolved before sending.

use chrono::Utc;
use log::info;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::{
    admin::{AdminError, rooms},
    matrix::{Authenticator, Endpoint, Session},
};

pub mod envelope;

/// Event type of everything this tool posts, so regular clients display it.
pub const MESSAGE_EVENT: &str = "m.room.message";

/// Builds a transaction id unique even for events sent in the same millisecond.
///
/// Format: `synapse-mgr-<unix ms>-<random>-<8 hex chars>`.
pub fn transaction_id(room_id: &str, event_type: &str) -> String {
    let timestamp = Utc::now().timestamp_millis();
    let random: u16 = rand::thread_rng().gen_range(1000..=9999);
    let digest = Sha256::digest(format!("{timestamp}-{random}-{room_id}-{event_type}"));
    let suffix = hex::encode(digest);
    format!("synapse-mgr-{timestamp}-{random}-{}", &suffix[..8])
}

/// Returns the room id behind `room`, which must be a room id (`!`) or an
/// alias (`#`).
pub async fn resolve_room<A: Authenticator>(
    session: &Session<A>,
    room: &str,
) -> Result<String, AdminError> {
    if room.starts_with('!') {
        return Ok(room.to_owned());
    }
    if !room.starts_with('#') {
        return Err(AdminError::Validation(format!(
            "room must be a room id (!...) or an alias (#...), got {room}"
        )));
    }
    rooms::resolve_alias(session, room)
        .await?
        .ok_or_else(|| AdminError::NotFound(format!("room alias {room}")))
}

#[derive(Debug, Clone, Serialize)]
pub struct SentEvent {
    pub changed: bool,
    pub event_id: String,
    pub room_id: String,
    pub transaction_id: String,
    pub event_type: String,
}

/// Sends `content` as an `event_type` event to `room`.
///
/// The content is sent untouched: building `msgtype` and `body` is up to the
/// caller.
pub async fn send_event<A: Authenticator>(
    session: &Session<A>,
    room: &str,
    event_type: &str,
    content: &Value,
    transaction_id: Option<&str>,
) -> Result<SentEvent, AdminError> {
    let room_id = resolve_room(session, room).await?;
    let transaction_id = match transaction_id {
        Some(id) => id.to_owned(),
        None => self::transaction_id(&room_id, event_type),
    };

    let endpoint = Endpoint::client()
        .segment("rooms")
        .segment(&room_id)
        .segment("send")
        .segment(event_type)
        .segment(&transaction_id);

    #[derive(Deserialize)]
    struct Sent {
        event_id: String,
    }

    let sent: Sent = session.put(&endpoint, content).await?.decode()?;
    info!("event {} posted to {}", sent.event_id, room_id);

    Ok(SentEvent {
        changed: true,
        event_id: sent.event_id,
        room_id,
        transaction_id,
        event_type: event_type.to_owned(),
    })
}

/// Content of a plain `m.room.message`, with an optional HTML rendering.
pub fn message_content(msgtype: &str, body: &str, html: Option<&str>) -> Value {
    let mut content = json!({
        "msgtype": msgtype,
        "body": body,
    });
    if let Some(html) = html {
        content["format"] = json!("org.matrix.custom.html");
        content["formatted_body"] = json!(html);
    }
    content
}
