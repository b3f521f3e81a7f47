//! synapse-mgr - Declarative administration of a Matrix Synapse homeserver.
//!
//! Every subcommand performs one resource operation through a self-healing
//! authenticated client and prints a JSON object on stdout, so the tool can be
//! driven from playbooks and scripts.
//!
//! # Overview
//!
//! Tokens are tried in order (token confirmed earlier in the process, token from
//! the configuration, token cached on disk by a previous run). When all of them
//! are rejected and a password is configured, the tool logs in once, retries the
//! operation once and caches the new token for the next invocations.
//!
//! # Configuration
//!
//! ```yaml
//! homeserver:
//!   url: https://matrix.example.com
//!   user_id: "@admin:example.com"
//!   password: "your-password"
//! ```
//!
//! Any value can be overridden with a `SYNAPSE_MGR_` environment variable,
//! e.g. `SYNAPSE_MGR_HOMESERVER__PASSWORD`. See [`config`].
//!
//! # Usage
//!
//! ```bash
//! synapse-mgr --config config.yaml info --gather all
//! synapse-mgr --config config.yaml user --user-id @bot:example.com --password pw
//! synapse-mgr --config config.yaml --check room --room '#ops:example.com' --state absent
//! synapse-mgr --config config.yaml event --room '#ops:example.com' --message 'deploy done'
//! ```
//!
//! # Output
//!
//! On success, a JSON object with at least `changed` and `reauthenticated`.
//! On failure, `{"failed": true, "kind": "...", "msg": "..."}` and exit status 1.
//! `kind` is one of `configuration`, `authentication`, `transport`, `timeout`,
//! `request`, `invalid_response`, `not_found` or `validation`.
//!
//! # Environment Variables
//!
//! - `RUST_LOG` - Controls logging level (default: `info`). Logs go to stderr.

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info};
use serde::Serialize;
use serde_json::{Value, json};

use crate::{
    admin::{
        AdminError,
        devices::{self, DeviceFilter},
        rooms::{self, DeleteOptions, GuestAccess, Preset, RoomSpec, RoomState},
        server::{self, Fact, FactQuery, NewRegistrationToken},
        users::{self, DesiredUser, RateLimit, UserQuery, UserSpec, UserState, UserType},
    },
    config::Config,
    events::envelope::Envelope,
    matrix::{ClientError, Executor, Session},
};

mod admin;
mod config;
mod events;
mod matrix;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file.
    ///
    /// Optional when everything is provided through `SYNAPSE_MGR_*`
    /// environment variables.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Report what would change without sending any write.
    #[arg(long, global = true)]
    check: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ensure a user account is present or absent.
    User(UserArgs),
    /// List user accounts, or show one.
    Users(UsersArgs),
    /// Query, create, join or delete a room.
    Room(RoomArgs),
    /// List rooms, or show one by id or alias.
    Rooms(RoomsArgs),
    /// Audit and revoke the devices of a user.
    Devices(DevicesArgs),
    /// Gather facts about the homeserver.
    Info(InfoArgs),
    /// Create a registration token.
    RegistrationToken(RegistrationTokenArgs),
    /// Post an event to a room.
    Event(EventArgs),
}

#[derive(clap::Args, Debug)]
struct UserArgs {
    #[arg(long)]
    user_id: String,
    #[arg(long, value_enum, default_value = "present")]
    state: UserState,
    /// Set on creation and on every update.
    #[arg(long)]
    password: Option<String>,
    #[arg(long)]
    displayname: Option<String>,
    #[arg(long)]
    admin: bool,
    #[arg(long)]
    deactivated: bool,
    /// Erase the user's messages on deactivation.
    #[arg(long)]
    erase: bool,
    /// Rate limit override; `0` with `--burst-count 0` disables limiting.
    #[arg(long)]
    messages_per_second: Option<u32>,
    #[arg(long)]
    burst_count: Option<u32>,
    /// Restore the default rate limits.
    #[arg(long, conflicts_with_all = ["messages_per_second", "burst_count"])]
    clear_ratelimit: bool,
}

#[derive(clap::Args, Debug)]
struct UsersArgs {
    /// Show this user only.
    #[arg(long)]
    user_id: Option<String>,
    #[arg(long, value_enum)]
    user_type: Option<UserType>,
    /// Only admins (`true`) or only non-admins (`false`).
    #[arg(long)]
    admin: Option<bool>,
    /// Include deactivated accounts.
    #[arg(long)]
    deactivated: bool,
    /// Localpart or display name substring.
    #[arg(long)]
    name: Option<String>,
    #[arg(long, default_value_t = 100)]
    limit: u32,
}

#[derive(clap::Args, Debug)]
struct RoomArgs {
    /// Room id, alias, or bare alias localpart.
    #[arg(long)]
    room: String,
    #[arg(long, value_enum, default_value = "info")]
    state: RoomState,
    #[arg(long)]
    name: Option<String>,
    /// Localpart of the alias published on creation.
    #[arg(long)]
    alias_name: Option<String>,
    #[arg(long)]
    topic: Option<String>,
    #[arg(long, value_delimiter = ',')]
    invite: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    admins: Vec<String>,
    #[arg(long, value_delimiter = ',')]
    moderators: Vec<String>,
    /// Raw `power_level_content_override` as JSON.
    #[arg(long, value_parser = parse_json)]
    power_levels: Option<Value>,
    #[arg(long, value_enum, default_value = "private-chat")]
    preset: Preset,
    #[arg(long, value_enum, default_value = "forbidden")]
    guest_access: GuestAccess,
    /// Keep the room history in the database on deletion.
    #[arg(long)]
    no_purge: bool,
    /// Prevent the room from being joined again after deletion.
    #[arg(long)]
    block: bool,
    #[arg(long)]
    new_room_user_id: Option<String>,
    #[arg(long)]
    message: Option<String>,
}

#[derive(clap::Args, Debug)]
struct RoomsArgs {
    #[arg(long, conflicts_with = "room_alias")]
    room_id: Option<String>,
    /// `name`, `#name` or `#name:server`.
    #[arg(long)]
    room_alias: Option<String>,
    #[arg(long)]
    search_term: Option<String>,
    #[arg(long, default_value_t = 100)]
    limit: u32,
}

#[derive(clap::Args, Debug)]
struct DevicesArgs {
    #[arg(long)]
    user_id: String,
    #[arg(long)]
    user_agent: Option<String>,
    #[arg(long)]
    display_name: Option<String>,
    /// `0` matches devices that were never seen.
    #[arg(long)]
    older_than_days: Option<u32>,
    #[arg(long)]
    revoke_matched: bool,
}

#[derive(clap::Args, Debug)]
struct InfoArgs {
    #[arg(long, value_enum, value_delimiter = ',', default_value = "version")]
    gather: Vec<Fact>,
    #[arg(long)]
    users_filter: Option<String>,
    #[arg(long)]
    rooms_filter: Option<String>,
    #[arg(long, default_value_t = 100)]
    limit: u32,
}

#[derive(clap::Args, Debug)]
struct RegistrationTokenArgs {
    /// Random when unset.
    #[arg(long)]
    token: Option<String>,
    #[arg(long)]
    uses_allowed: Option<u32>,
    /// Milliseconds since the epoch.
    #[arg(long)]
    expiry_time: Option<i64>,
}

#[derive(clap::Args, Debug)]
#[command(group(clap::ArgGroup::new("payload").required(true).args(["content", "text", "schema"])))]
struct EventArgs {
    /// Room id or alias.
    #[arg(long)]
    room: String,
    /// Full event content as JSON, sent untouched.
    #[arg(long, value_parser = parse_json)]
    content: Option<Value>,
    /// Plain text message.
    #[arg(long = "message")]
    text: Option<String>,
    /// HTML rendering of `--message`.
    #[arg(long, requires = "text")]
    html: Option<String>,
    #[arg(long, default_value = "m.text")]
    msgtype: String,
    /// Structured envelope schema, e.g. `deploy.start.v1`.
    #[arg(long, requires = "data")]
    schema: Option<String>,
    /// Envelope payload as JSON.
    #[arg(long, value_parser = parse_json)]
    data: Option<Value>,
    /// Envelope source, e.g. `molecule/rocky9/podman`.
    #[arg(long, requires = "schema")]
    source: Option<String>,
    /// Explicit transaction id, for idempotent retries.
    #[arg(long)]
    transaction_id: Option<String>,
}

fn parse_json(raw: &str) -> Result<Value, String> {
    serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {e}"))
}

fn to_json(value: impl Serialize) -> Result<Value, AdminError> {
    serde_json::to_value(value).map_err(|e| {
        AdminError::Validation(format!("cannot encode result: {e}"))
    })
}

async fn run_user(session: &Session, args: UserArgs, dry_run: bool) -> Result<Value, AdminError> {
    let ratelimit = match (args.messages_per_second, args.burst_count) {
        (None, None) => None,
        (messages_per_second, burst_count) => Some(RateLimit {
            messages_per_second: messages_per_second.unwrap_or(0),
            burst_count: burst_count.unwrap_or(0),
        }),
    };
    let desired = DesiredUser {
        state: args.state,
        spec: UserSpec {
            password: args.password,
            displayname: args.displayname,
            admin: args.admin,
            deactivated: args.deactivated,
        },
        erase: args.erase,
        ratelimit,
    };

    let mut outcome = users::ensure(session, &args.user_id, &desired, dry_run).await?;
    if args.clear_ratelimit && !dry_run {
        users::delete_ratelimit(session, &args.user_id).await?;
    }
    outcome.changed |= args.clear_ratelimit;
    to_json(outcome)
}

async fn run_users(session: &Session, args: UsersArgs) -> Result<Value, AdminError> {
    if let Some(user_id) = args.user_id {
        let users: Vec<_> = users::get(session, &user_id).await?.into_iter().collect();
        return Ok(json!({ "changed": false, "total": users.len(), "users": users }));
    }

    let query = UserQuery {
        limit: args.limit,
        deactivated: args.deactivated,
        admins: args.admin,
        name: args.name,
        user_type: args.user_type,
    };
    let page = users::list(session, &query).await?;
    Ok(json!({ "changed": false, "total": page.total, "users": page.users }))
}

async fn run_room(session: &Session, args: RoomArgs, dry_run: bool) -> Result<Value, AdminError> {
    let spec = RoomSpec {
        name: args.name,
        alias_name: args.alias_name,
        topic: args.topic,
        invite: args.invite,
        admins: args.admins,
        moderators: args.moderators,
        power_levels: args.power_levels,
        preset: args.preset,
        guest_access: args.guest_access,
    };
    let delete_options = DeleteOptions {
        purge: !args.no_purge,
        block: args.block,
        new_room_user_id: args.new_room_user_id,
        message: args.message,
    };
    let outcome =
        rooms::ensure(session, &args.room, args.state, &spec, &delete_options, dry_run).await?;
    to_json(outcome)
}

async fn run_rooms(session: &Session, args: RoomsArgs) -> Result<Value, AdminError> {
    let room_id = match (args.room_id, args.room_alias) {
        (Some(room_id), _) => Some(room_id),
        (None, Some(alias)) => Some(
            rooms::resolve(session, &alias)
                .await?
                .ok_or_else(|| AdminError::NotFound(format!("room alias {alias}")))?,
        ),
        (None, None) => None,
    };

    if let Some(room_id) = room_id {
        let room = rooms::details(session, &room_id)
            .await?
            .ok_or_else(|| AdminError::NotFound(format!("room {room_id}")))?;
        return Ok(json!({ "changed": false, "total": 1, "rooms": [room] }));
    }

    let page = rooms::list(session, args.limit, args.search_term.as_deref()).await?;
    Ok(json!({ "changed": false, "total": page.total, "rooms": page.rooms }))
}

async fn run_devices(
    session: &Session,
    args: DevicesArgs,
    dry_run: bool,
) -> Result<Value, AdminError> {
    let filter = DeviceFilter {
        user_agent: args.user_agent,
        display_name: args.display_name,
        older_than_days: args.older_than_days,
    };
    let report =
        devices::audit(session, &args.user_id, &filter, args.revoke_matched, dry_run).await?;
    to_json(report)
}

async fn run_info(session: &Session, args: InfoArgs) -> Result<Value, AdminError> {
    let query = FactQuery {
        limit: args.limit,
        users_filter: args.users_filter,
        rooms_filter: args.rooms_filter,
    };
    to_json(server::gather(session, &args.gather, &query).await?)
}

async fn run_registration_token(
    session: &Session,
    args: RegistrationTokenArgs,
    dry_run: bool,
) -> Result<Value, AdminError> {
    if dry_run {
        return Ok(json!({ "changed": true, "skipped": true }));
    }
    let token = NewRegistrationToken {
        token: args.token,
        uses_allowed: args.uses_allowed,
        expiry_time: args.expiry_time,
    };
    let created = server::create_registration_token(session, &token).await?;
    Ok(json!({ "changed": true, "registration_token": created }))
}

async fn run_event(session: &Session, args: EventArgs, dry_run: bool) -> Result<Value, AdminError> {
    let content = match (args.content, args.text, args.schema) {
        (Some(content), _, _) => content,
        (None, Some(text), _) => {
            events::message_content(&args.msgtype, &text, args.html.as_deref())
        }
        (None, None, Some(schema)) => {
            let data = args.data.unwrap_or(Value::Null);
            Envelope::new(&schema, data, args.source.as_deref())?.content()
        }
        (None, None, None) => {
            return Err(AdminError::Validation(
                "one of --content, --message or --schema is required".to_owned(),
            ));
        }
    };

    if dry_run {
        return Ok(json!({ "changed": true, "skipped": true, "content": content }));
    }

    let sent = events::send_event(
        session,
        &args.room,
        events::MESSAGE_EVENT,
        &content,
        args.transaction_id.as_deref(),
    )
    .await?;
    to_json(sent)
}

async fn run(args: Args) -> anyhow::Result<Value> {
    let config = Config::load(args.config.as_deref())?;
    let executor = Executor::new(&config.http_settings(), config.token_cache())?;
    let session = Session::new(executor, config.auth_context()?);
    let dry_run = args.check;

    let mut result = match args.command {
        Command::User(user_args) => run_user(&session, user_args, dry_run).await?,
        Command::Users(users_args) => run_users(&session, users_args).await?,
        Command::Room(room_args) => run_room(&session, room_args, dry_run).await?,
        Command::Rooms(rooms_args) => run_rooms(&session, rooms_args).await?,
        Command::Devices(devices_args) => run_devices(&session, devices_args, dry_run).await?,
        Command::Info(info_args) => run_info(&session, info_args).await?,
        Command::RegistrationToken(token_args) => {
            run_registration_token(&session, token_args, dry_run).await?
        }
        Command::Event(event_args) => run_event(&session, event_args, dry_run).await?,
    };

    if let Some(object) = result.as_object_mut() {
        object.insert("reauthenticated".to_owned(), json!(session.reauthenticated()));
    }
    Ok(result)
}

/// Machine-readable class of a failure.
fn failure_kind(error: &anyhow::Error) -> &'static str {
    if let Some(e) = error.downcast_ref::<AdminError>() {
        e.kind()
    } else if let Some(e) = error.downcast_ref::<ClientError>() {
        e.kind()
    } else {
        "configuration"
    }
}

/// Main entry point.
///
/// 1. **Logging Setup**: `info` level by default, overridable with `RUST_LOG`
/// 2. **Argument Parsing**
/// 3. **Operation**: configuration loading, then the requested subcommand
/// 4. **Output**: the JSON result on stdout, exit status 1 on failure
#[tokio::main]
async fn main() {
    // Put logger at info level by default
    let env = Env::default().filter_or("RUST_LOG", "info");
    env_logger::init_from_env(env);

    let args = Args::parse();
    info!("Starting synapse-mgr {}...", env!("CARGO_PKG_VERSION"));

    match run(args).await {
        Ok(result) => println!("{result}"),
        Err(e) => {
            error!("{:#}", e);
            let failure = json!({
                "failed": true,
                "kind": failure_kind(&e),
                "msg": format!("{e:#}"),
            });
            println!("{failure}");
            std::process::exit(1);
        }
    }
}
