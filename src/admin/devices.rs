//! Device audit and revocation.

use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    admin::AdminError,
    matrix::{Authenticator, ClientError, Endpoint, Session},
};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Device from `GET /_synapse/admin/v2/users/{user_id}/devices`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    pub device_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub last_seen_ip: Option<String>,
    /// Milliseconds since the epoch, `None` for a device never seen.
    #[serde(default)]
    pub last_seen_ts: Option<i64>,
    #[serde(default)]
    pub last_seen_user_agent: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Selection of devices. Every set criterion must match.
#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    /// Case-insensitive substring of the last user agent.
    pub user_agent: Option<String>,
    /// Case-insensitive substring of the display name.
    pub display_name: Option<String>,
    /// Minimum age of the last activity. `0` selects never-seen devices only.
    pub older_than_days: Option<u32>,
}

fn contains_ignore_case(haystack: Option<&str>, needle: &str) -> bool {
    haystack
        .unwrap_or_default()
        .to_lowercase()
        .contains(&needle.to_lowercase())
}

impl DeviceFilter {
    pub fn matches(&self, device: &Device, now_ms: i64) -> bool {
        if let Some(user_agent) = &self.user_agent
            && !contains_ignore_case(device.last_seen_user_agent.as_deref(), user_agent)
        {
            return false;
        }
        if let Some(display_name) = &self.display_name
            && !contains_ignore_case(device.display_name.as_deref(), display_name)
        {
            return false;
        }
        match (self.older_than_days, device.last_seen_ts) {
            (None, _) => true,
            (Some(days), None) => days == 0,
            (Some(0), Some(_)) => false,
            (Some(days), Some(last_seen)) => now_ms - last_seen >= i64::from(days) * DAY_MS,
        }
    }

    pub fn apply(&self, devices: &[Device], now_ms: i64) -> Vec<Device> {
        devices
            .iter()
            .filter(|device| self.matches(device, now_ms))
            .cloned()
            .collect()
    }
}

/// Lists the devices of `user_id`; an unknown user has none.
pub async fn list<A: Authenticator>(
    session: &Session<A>,
    user_id: &str,
) -> Result<Vec<Device>, ClientError> {
    let endpoint = Endpoint::admin("v2")
        .segment("users")
        .segment(user_id)
        .segment("devices");

    #[derive(Deserialize)]
    struct Listing {
        #[serde(default)]
        devices: Vec<Device>,
    }

    match session.get(&endpoint).await {
        Ok(reply) => Ok(reply.decode::<Listing>()?.devices),
        Err(e) if e.is_not_found() => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// Deletes one device and its access tokens.
pub async fn revoke<A: Authenticator>(
    session: &Session<A>,
    user_id: &str,
    device_id: &str,
) -> Result<(), ClientError> {
    let endpoint = Endpoint::admin("v2")
        .segment("users")
        .segment(user_id)
        .segment("devices")
        .segment(device_id);
    info!("revoke device {} of {}", device_id, user_id);
    session.delete(&endpoint, None).await?;
    Ok(())
}

#[derive(Debug, Default, Serialize)]
pub struct DeviceReport {
    pub changed: bool,
    pub devices: Vec<Device>,
    pub matched_devices: Vec<Device>,
    pub total_devices: usize,
    pub matched_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoked_devices: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Lists, filters and optionally revokes the devices of `user_id`.
///
/// A device the homeserver refuses to delete is reported as a warning; the
/// other matched devices are still revoked.
pub async fn audit<A: Authenticator>(
    session: &Session<A>,
    user_id: &str,
    filter: &DeviceFilter,
    revoke_matched: bool,
    dry_run: bool,
) -> Result<DeviceReport, AdminError> {
    let devices = list(session, user_id).await?;
    let matched = filter.apply(&devices, Utc::now().timestamp_millis());

    let mut report = DeviceReport {
        total_devices: devices.len(),
        matched_count: matched.len(),
        devices,
        ..DeviceReport::default()
    };

    if revoke_matched && !matched.is_empty() {
        if dry_run {
            report.changed = true;
            report.revoked_devices = Some(matched.iter().map(|d| d.device_id.clone()).collect());
        } else {
            let mut revoked = Vec::new();
            let mut failed = Vec::new();
            for device in &matched {
                match revoke(session, user_id, &device.device_id).await {
                    Ok(()) => revoked.push(device.device_id.clone()),
                    Err(ClientError::Request(e)) => {
                        warn!("device {} not revoked: {}", device.device_id, e);
                        failed.push(device.device_id.clone());
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            if !failed.is_empty() {
                report
                    .warnings
                    .push(format!("failed to revoke devices: {}", failed.join(", ")));
            }
            report.changed = !revoked.is_empty();
            report.revoked_devices = Some(revoked);
        }
    }

    report.matched_devices = matched;
    Ok(report)
}
