//! Configuration of the synapse-mgr CLI.
//!
//! Settings come from an optional YAML file merged with environment variables
//! prefixed with `SYNAPSE_MGR_`; nested keys are separated by `__`. Environment
//! values win over the file.
//!
//! # Configuration File Format
//!
//! ```yaml
//! homeserver:
//!   # Base URL of the homeserver
//!   url: https://matrix.example.com
//!   # Fully qualified user id of the admin account
//!   user_id: "@admin:example.com"
//!   # Password used when no token is accepted (optional)
//!   password: "secret"
//!   # Access token tried first (optional)
//!   access_token: "syt_..."
//!   validate_certs: true
//!   connect_timeout: 10
//!   request_timeout: 30
//!   device_display_name: synapse-mgr
//!
//! cache:
//!   dir: /tmp/synapse-mgr-tokens
//! ```
//!
//! # Environment Variable Overrides
//!
//! ```bash
//! export SYNAPSE_MGR_HOMESERVER__URL="https://matrix.example.com"
//! export SYNAPSE_MGR_HOMESERVER__USER_ID="@admin:example.com"
//! export SYNAPSE_MGR_HOMESERVER__PASSWORD="secret"
//! ```

use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::Deserialize;

use crate::matrix::{AuthContext, Credentials, HttpSettings, Identity, TokenCache};

pub const ENV_PREFIX: &str = "SYNAPSE_MGR_";

/// Root configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    pub homeserver: Homeserver,
    #[serde(default)]
    pub cache: Cache,
}

/// Homeserver connection and account.
#[derive(Deserialize)]
pub struct Homeserver {
    pub url: String,
    pub user_id: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_true")]
    pub validate_certs: bool,
    /// Seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// Seconds, connection included.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_device_display_name")]
    pub device_display_name: String,
}

impl std::fmt::Debug for Homeserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Homeserver")
            .field("url", &self.url)
            .field("user_id", &self.user_id)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("validate_certs", &self.validate_certs)
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("device_display_name", &self.device_display_name)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct Cache {
    /// Token cache directory, `<temp dir>/synapse-mgr-tokens` when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_device_display_name() -> String {
    "synapse-mgr".to_owned()
}

impl Config {
    /// Loads the configuration from `path` (if any) and the environment.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            anyhow::ensure!(
                std::path::Path::new(path).is_file(),
                "config file {path} does not exist"
            );
            figment = figment.merge(Yaml::file(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("invalid configuration")
    }

    /// Network settings of the executor.
    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            connect_timeout: Duration::from_secs(self.homeserver.connect_timeout),
            request_timeout: Duration::from_secs(self.homeserver.request_timeout),
            validate_certs: self.homeserver.validate_certs,
            device_display_name: self.homeserver.device_display_name.clone(),
        }
    }

    pub fn token_cache(&self) -> TokenCache {
        match &self.cache.dir {
            Some(dir) => TokenCache::new(dir.clone()),
            None => TokenCache::default(),
        }
    }

    /// Authentication material of the configured account.
    pub fn auth_context(&self) -> anyhow::Result<AuthContext> {
        let identity = Identity::new(&self.homeserver.url, &self.homeserver.user_id)
            .context("invalid homeserver identity")?;
        let credentials = self
            .homeserver
            .password
            .as_deref()
            .map(Credentials::new);
        Ok(AuthContext::new(
            identity,
            self.homeserver.access_token.clone(),
            credentials,
        ))
    }
}
