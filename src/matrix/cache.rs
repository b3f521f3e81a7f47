//! Filesystem-backed token cache shared between processes.
//!
//! One JSON file per [`Identity`], named from a SHA-256 of the homeserver origin
//! and the user id. Writes go to a temporary file in the same directory which is
//! then renamed over the entry, so readers only ever see a complete record.
//! Concurrent writers need no lock: the last rename wins and any validly issued
//! token is an acceptable value.
//!
//! The cache is an optimization. Every failure is reported to the caller as a
//! [`CacheError`] on write, or as an absent entry on read, and never aborts an
//! operation.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::matrix::{Identity, Provenance, Token};

/// Directory created under the system temporary directory by default.
const DEFAULT_DIR_NAME: &str = "synapse-mgr-tokens";

/// Number of hex characters of the identity hash used in file names.
const KEY_LENGTH: usize = 32;

/// Errors raised while writing the cache.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache directory {path} is unavailable: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cache i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("cache entry serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("cache entry could not be moved into place: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// On-disk record for one identity.
#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    token: Token,
    last_validated: DateTime<Utc>,
}

/// Per-identity token store.
///
/// # Examples
///
/// ```ignore
/// use crate::matrix::{Identity, Provenance, Token, TokenCache};
///
/// let cache = TokenCache::new("/tmp/synapse-mgr-tokens".into());
/// let identity = Identity::new("https://example.com", "@bot:example.com").unwrap();
///
/// if cache.read(&identity).is_none() {
///     let token = Token::new(&identity, "syt_...", Provenance::FreshlyIssued);
///     let _ = cache.write(&identity, &token);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct TokenCache {
    dir: PathBuf,
}

impl Default for TokenCache {
    /// Cache stored in `<temp dir>/synapse-mgr-tokens`.
    fn default() -> Self {
        TokenCache::new(std::env::temp_dir().join(DEFAULT_DIR_NAME))
    }
}

impl TokenCache {
    /// Creates a cache rooted at `dir`. The directory is created lazily on the
    /// first write.
    pub fn new(dir: PathBuf) -> Self {
        TokenCache { dir }
    }

    /// Deterministic cache key of an identity.
    pub fn key(identity: &Identity) -> String {
        let mut hasher = Sha256::new();
        hasher.update(identity.origin().as_bytes());
        hasher.update(b"\n");
        hasher.update(identity.user_id().as_bytes());
        let digest = hex::encode(hasher.finalize());
        digest[..KEY_LENGTH].to_owned()
    }

    /// Path of the entry for `identity`.
    pub fn entry_path(&self, identity: &Identity) -> PathBuf {
        self.dir.join(format!("token-{}.json", Self::key(identity)))
    }

    /// Reads the cached token of `identity`.
    ///
    /// Missing, unreadable, corrupt, foreign or overly permissive entries are
    /// all reported as absent. The returned token is tagged [`Provenance::Cached`].
    pub fn read(&self, identity: &Identity) -> Option<Token> {
        let path = self.entry_path(identity);

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("no cached token for {}", identity);
                return None;
            }
            Err(e) => {
                warn!("cannot read token cache {}: {}", path.display(), e);
                return None;
            }
        };

        if !Self::is_private(&path) {
            warn!(
                "ignoring token cache {}: readable by other users",
                path.display()
            );
            return None;
        }

        let entry: CacheEntry = match serde_json::from_str(&contents) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("ignoring corrupt token cache {}: {}", path.display(), e);
                return None;
            }
        };

        if !entry.token.belongs_to(identity) {
            warn!(
                "ignoring token cache {}: entry belongs to another identity",
                path.display()
            );
            return None;
        }

        trace!(
            "cached token for {} last validated at {}",
            identity, entry.last_validated
        );
        Some(entry.token.with_provenance(Provenance::Cached))
    }

    /// Atomically replaces the entry of `identity` with `token`.
    ///
    /// # Errors
    ///
    /// Returns a [`CacheError`] if the directory cannot be created or the entry
    /// cannot be written. Callers are expected to log it and carry on.
    pub fn write(&self, identity: &Identity, token: &Token) -> Result<(), CacheError> {
        self.ensure_dir()?;

        let entry = CacheEntry {
            token: token.clone(),
            last_validated: Utc::now(),
        };
        let serialized = serde_json::to_vec_pretty(&entry)?;

        // NamedTempFile is created with mode 0600 on unix.
        let mut file = NamedTempFile::new_in(&self.dir)?;
        file.write_all(&serialized)?;
        file.as_file().sync_all()?;

        let path = self.entry_path(identity);
        file.persist(&path)?;

        debug!("cached {} token for {}", token.provenance(), identity);
        Ok(())
    }

    fn ensure_dir(&self) -> Result<(), CacheError> {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }

        builder
            .create(&self.dir)
            .map_err(|source| CacheError::Directory {
                path: self.dir.clone(),
                source,
            })
    }

    #[cfg(unix)]
    fn is_private(path: &Path) -> bool {
        use std::os::unix::fs::PermissionsExt;

        fs::metadata(path)
            .map(|metadata| metadata.permissions().mode() & 0o077 == 0)
            .unwrap_or(false)
    }

    #[cfg(not(unix))]
    fn is_private(_path: &Path) -> bool {
        true
    }
}
