use std::fmt;

use reqwest::Url;

use crate::matrix::ClientError;

const ADMIN_PREFIX: [&str; 2] = ["_synapse", "admin"];
const CLIENT_PREFIX: [&str; 3] = ["_matrix", "client", "v3"];

/// Path and query of an Admin API or Client API call.
///
/// Segments are percent-encoded when the final URL is built, so user ids,
/// room ids and aliases (`#ops:example.com`) can be passed as they are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    segments: Vec<String>,
    query: Vec<(String, String)>,
}

impl Endpoint {
    /// Synapse Admin API endpoint, `/_synapse/admin/{version}/...`.
    pub fn admin(version: &str) -> Self {
        let mut segments: Vec<String> = ADMIN_PREFIX.iter().map(|s| s.to_string()).collect();
        segments.push(version.to_owned());
        Endpoint {
            segments,
            query: Vec::new(),
        }
    }

    /// Matrix Client-Server API endpoint, `/_matrix/client/v3/...`.
    pub fn client() -> Self {
        Endpoint {
            segments: CLIENT_PREFIX.iter().map(|s| s.to_string()).collect(),
            query: Vec::new(),
        }
    }

    /// Appends one path segment.
    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// Appends one query parameter.
    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_owned(), value.to_string()));
        self
    }

    /// Appends a query parameter only when `value` is set.
    pub fn query_opt(self, key: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.query(key, value),
            None => self,
        }
    }

    /// Resolves the endpoint against a homeserver base URL.
    pub fn url(&self, homeserver: &Url) -> Result<Url, ClientError> {
        let mut url = homeserver.clone();
        url.set_query(None);
        url.set_fragment(None);

        url.path_segments_mut()
            .map_err(|_| {
                ClientError::Configuration(format!("homeserver url cannot be a base: {homeserver}"))
            })?
            .clear()
            .extend(&self.segments);

        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query);
        }

        Ok(url)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.segments.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn homeserver() -> Url {
        Url::parse("https://matrix.example.com").unwrap()
    }

    #[test]
    fn test_admin_endpoint() {
        let url = Endpoint::admin("v2")
            .segment("users")
            .segment("@bot:example.com")
            .url(&homeserver())
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://matrix.example.com/_synapse/admin/v2/users/@bot:example.com"
        );
    }

    #[test]
    fn test_client_endpoint_encodes_alias() {
        let url = Endpoint::client()
            .segment("directory")
            .segment("room")
            .segment("#ops:example.com")
            .url(&homeserver())
            .unwrap();
        assert_eq!(
            url.path(),
            "/_matrix/client/v3/directory/room/%23ops:example.com"
        );
    }

    #[test]
    fn test_segment_slashes_are_encoded() {
        let url = Endpoint::client()
            .segment("rooms")
            .segment("a/b")
            .url(&homeserver())
            .unwrap();
        assert_eq!(url.path(), "/_matrix/client/v3/rooms/a%2Fb");
    }

    #[test]
    fn test_query_parameters() {
        let url = Endpoint::admin("v1")
            .segment("rooms")
            .query("limit", 100)
            .query_opt("search_term", Some("ops team"))
            .query_opt("order_by", None::<&str>)
            .url(&homeserver())
            .unwrap();
        assert_eq!(url.query(), Some("limit=100&search_term=ops+team"));
    }

    #[test]
    fn test_display() {
        let endpoint = Endpoint::admin("v1").segment("server_version");
        assert_eq!(endpoint.to_string(), "/_synapse/admin/v1/server_version");
    }
}
