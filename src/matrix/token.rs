use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::matrix::Identity;

/// Where a [`Token`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    /// Given explicitly by the caller.
    Supplied,
    /// Read back from the token cache.
    Cached,
    /// Issued by the homeserver during this process.
    FreshlyIssued,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Provenance::Supplied => "supplied",
            Provenance::Cached => "cached",
            Provenance::FreshlyIssued => "freshly-issued",
        };
        f.write_str(tag)
    }
}

/// An opaque bearer token and the metadata describing where it came from.
///
/// Validity is only ever decided by the homeserver: there is no client-side
/// expiry. The bearer value never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    access_token: String,
    /// Origin of the issuing homeserver.
    homeserver: String,
    user_id: String,
    acquired_at: DateTime<Utc>,
    provenance: Provenance,
}

impl Token {
    /// Creates a token for `identity`, acquired now.
    pub fn new(identity: &Identity, access_token: &str, provenance: Provenance) -> Self {
        Token {
            access_token: access_token.to_owned(),
            homeserver: identity.origin(),
            user_id: identity.user_id().to_owned(),
            acquired_at: Utc::now(),
            provenance,
        }
    }

    /// Returns the bearer value to put in the `Authorization` header.
    pub fn secret(&self) -> &str {
        &self.access_token
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Checks whether the token was issued for `identity`.
    pub fn belongs_to(&self, identity: &Identity) -> bool {
        self.homeserver == identity.origin() && self.user_id == identity.user_id()
    }

    /// Checks whether both tokens carry the same bearer value.
    pub fn same_value(&self, other: &Token) -> bool {
        self.access_token == other.access_token
    }

    /// Re-tags the token, keeping its value and acquisition time.
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"<redacted>")
            .field("homeserver", &self.homeserver)
            .field("user_id", &self.user_id)
            .field("acquired_at", &self.acquired_at)
            .field("provenance", &self.provenance)
            .finish()
    }
}
