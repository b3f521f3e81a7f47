//! Structured `com.solti.event` messages.
//!
//! An envelope carries machine-readable data inside a regular
//! `m.room.message` so bots can parse it while humans see a short body:
//!
//! ```json
//! {
//!   "msgtype": "com.solti.event",
//!   "body": "SOLTI event: verify.fail.v1",
//!   "solti": {
//!     "schema": "verify.fail.v1",
//!     "timestamp": "2026-02-11T15:30:45Z",
//!     "source": "molecule/rocky9/podman",
//!     "data": { ... }
//!   }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::admin::AdminError;

pub const ENVELOPE_MSGTYPE: &str = "com.solti.event";

const VERIFY_FIELDS: &[&str] = &[
    "distribution",
    "hostname",
    "summary",
    "summary.total_services",
    "summary.failed_services",
    "summary.passed_services",
    "services",
    "failed_service_names",
];

const DEPLOY_START_FIELDS: &[&str] = &["service", "host", "playbook", "operator"];

const DEPLOY_COMPLETE_FIELDS: &[&str] = &[
    "service", "host", "playbook", "operator", "duration", "status",
];

/// Dot-separated paths that `data` must contain for `schema`.
///
/// Unknown schemas have no requirement.
pub fn required_fields(schema: &str) -> &'static [&'static str] {
    match schema {
        "verify.fail.v1" | "verify.pass.v1" => VERIFY_FIELDS,
        "deploy.start.v1" => DEPLOY_START_FIELDS,
        "deploy.complete.v1" => DEPLOY_COMPLETE_FIELDS,
        _ => &[],
    }
}

fn has_path(data: &Value, path: &str) -> bool {
    path.split('.')
        .try_fold(data, |current, key| current.as_object()?.get(key))
        .is_some()
}

pub fn missing_fields(schema: &str, data: &Value) -> Vec<&'static str> {
    required_fields(schema)
        .iter()
        .copied()
        .filter(|path| !has_path(data, path))
        .collect()
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Solti {
    pub schema: String,
    pub timestamp: String,
    pub source: String,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Envelope {
    pub msgtype: &'static str,
    pub body: String,
    pub solti: Solti,
}

impl Envelope {
    /// Wraps `data` after checking it against `schema`.
    ///
    /// # Errors
    ///
    /// [`AdminError::Validation`] listing every missing field.
    pub fn new(schema: &str, data: Value, source: Option<&str>) -> Result<Self, AdminError> {
        Envelope::at(schema, data, source, Utc::now())
    }

    fn at(
        schema: &str,
        data: Value,
        source: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Self, AdminError> {
        let missing = missing_fields(schema, &data);
        if !missing.is_empty() {
            return Err(AdminError::Validation(format!(
                "{schema} data is missing {}",
                missing.join(", ")
            )));
        }

        Ok(Envelope {
            msgtype: ENVELOPE_MSGTYPE,
            body: format!("SOLTI event: {schema}"),
            solti: Solti {
                schema: schema.to_owned(),
                timestamp: now.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                source: source.unwrap_or("unknown").to_owned(),
                data,
            },
        })
    }

    /// Event content ready for [`send_event`](crate::events::send_event).
    pub fn content(&self) -> Value {
        serde_json::json!(self)
    }
}
