//! Client URI <-> wire URI conversion
//!
//! The editor addresses remote files as `sudu://<authority>/<stable id>/<path>`.
//! clangd only understands self-describing URIs of the form
//!
//! ```text
//! sudu://<endpoint label>~<root id>~<revision>~<profile><path>
//! ```
//!
//! e.g. `sudu://localhost:28081~300pb585gz9i41ynygtq08yv9p~2~Debug/src/B.h`.
//!
//! Both directions run inline in the protocol client's URI hooks for every
//! file reference, so they are synchronous and only consult in-memory tables.
//! URIs with any other scheme pass through untouched.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::trace;

use crate::dvfs::{
    ConnectionSource, EndpointError, EndpointResolver, RemotePath, RootResolver, SnapshotInfo,
    DVFS_SCHEME,
};

/// Separator between the metadata fields of a wire URI
pub const URI_DELIMITER: char = '~';

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UriError {
    #[error("failed to resolve remote root id: {0}")]
    UnresolvedRoot(String),
    #[error("no open remote root matches {host}~{root_id}~{revision}")]
    UnresolvedSnapshot {
        host: String,
        root_id: String,
        revision: u64,
    },
    #[error("cannot match web and dvfs endpoints: {0}")]
    UnresolvedEndpoint(#[from] EndpointError),
    #[error("malformed uri {uri}: {reason}")]
    MalformedUri { uri: String, reason: &'static str },
}

fn malformed(uri: &str, reason: &'static str) -> UriError {
    UriError::MalformedUri {
        uri: uri.to_string(),
        reason,
    }
}

/// Editor-side URI
///
/// Kept verbatim: no percent-decoding happens, so the string form of a
/// parsed value is byte-identical to its input.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientUri {
    pub scheme: String,
    /// `None` when the URI has no `//` part (e.g. `untitled:Untitled-1`)
    pub authority: Option<String>,
    pub path: String,
    pub query: Option<String>,
    pub fragment: Option<String>,
}

impl ClientUri {
    pub fn new(scheme: &str, authority: &str, path: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            authority: Some(authority.to_string()),
            path: path.to_string(),
            query: None,
            fragment: None,
        }
    }

    pub fn with_query(mut self, query: &str) -> Self {
        self.query = Some(query.to_string());
        self
    }

    pub fn is_remote(&self) -> bool {
        self.scheme == DVFS_SCHEME
    }

    /// Profile that produced this URI when it was decoded from the wire
    pub fn profile(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Split the path of a remote URI into stable id and in-root path
    pub fn split_remote_path(&self) -> Result<(&str, &str), UriError> {
        let tail = self
            .path
            .strip_prefix('/')
            .ok_or_else(|| malformed(&self.to_string(), "path must start with '/'"))?;

        Ok(match tail.find('/') {
            Some(i) => (&tail[..i], &tail[i..]),
            None => (tail, "/"),
        })
    }
}

impl FromStr for ClientUri {
    type Err = UriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| malformed(s, "missing scheme"))?;
        if scheme.is_empty() {
            return Err(malformed(s, "empty scheme"));
        }

        let (rest, fragment) = match rest.split_once('#') {
            Some((rest, fragment)) => (rest, Some(fragment.to_string())),
            None => (rest, None),
        };
        let (rest, query) = match rest.split_once('?') {
            Some((rest, query)) => (rest, Some(query.to_string())),
            None => (rest, None),
        };

        let (authority, path) = match rest.strip_prefix("//") {
            Some(hier) => match hier.find('/') {
                Some(i) => (Some(hier[..i].to_string()), &hier[i..]),
                None => (Some(hier.to_string()), ""),
            },
            None => (None, rest),
        };

        Ok(Self {
            scheme: scheme.to_string(),
            authority,
            path: path.to_string(),
            query,
            fragment,
        })
    }
}

impl fmt::Display for ClientUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme)?;
        if let Some(authority) = &self.authority {
            write!(f, "//{}", authority)?;
        }
        f.write_str(&self.path)?;
        if let Some(query) = &self.query {
            write!(f, "?{}", query)?;
        }
        if let Some(fragment) = &self.fragment {
            write!(f, "#{}", fragment)?;
        }
        Ok(())
    }
}

/// Fields of a wire URI
///
/// `remote.snapshot.host` is the endpoint label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireUriParts {
    pub remote: RemotePath,
    pub profile_name: String,
}

impl fmt::Display for WireUriParts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = &self.remote.snapshot;
        write!(
            f,
            "{scheme}://{host}{d}{root}{d}{revision}{d}{profile}{path}",
            scheme = DVFS_SCHEME,
            host = snapshot.host,
            root = snapshot.root_id,
            revision = snapshot.revision,
            profile = self.profile_name,
            path = self.remote.path,
            d = URI_DELIMITER,
        )
    }
}

/// Parse a `sudu` wire URI into its fields
pub fn parse_wire_uri(value: &str) -> Result<WireUriParts, UriError> {
    let rest = value
        .split_once("://")
        .filter(|(scheme, _)| *scheme == DVFS_SCHEME)
        .map(|(_, rest)| rest)
        .ok_or_else(|| malformed(value, "not a sudu uri"))?;

    let mut fields = rest.splitn(4, URI_DELIMITER);
    let (Some(host), Some(root_id), Some(revision_text), Some(profile_and_path)) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(malformed(value, "expected four '~'-separated fields"));
    };

    if !is_metadata_field(host) {
        return Err(malformed(value, "invalid endpoint label"));
    }
    if !is_metadata_field(root_id) {
        return Err(malformed(value, "invalid root id"));
    }
    let revision = parse_revision(revision_text)
        .ok_or_else(|| malformed(value, "revision must be a canonical decimal number"))?;

    let (profile_name, path) = match profile_and_path.find('/') {
        Some(i) => (&profile_and_path[..i], &profile_and_path[i..]),
        None => (profile_and_path, "/"),
    };

    Ok(WireUriParts {
        remote: RemotePath {
            snapshot: SnapshotInfo {
                host: host.to_string(),
                root_id: root_id.to_string(),
                revision,
            },
            path: path.to_string(),
        },
        profile_name: profile_name.to_string(),
    })
}

fn is_metadata_field(field: &str) -> bool {
    !field.is_empty() && !field.contains(['/', URI_DELIMITER])
}

// Leading zeros would not survive re-encoding, so only canonical forms parse.
fn parse_revision(text: &str) -> Option<u64> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if text.len() > 1 && text.starts_with('0') {
        return None;
    }
    text.parse().ok()
}

/// Read access to the active compilation profile of a root
pub trait ActiveProfile: Send + Sync {
    fn active_profile(&self, stable_id: &str) -> Option<String>;
}

/// Bidirectional URI converter
pub struct UriCodec {
    roots: Arc<dyn RootResolver>,
    connections: Arc<dyn ConnectionSource>,
    profiles: Arc<dyn ActiveProfile>,
}

impl UriCodec {
    pub fn new(
        roots: Arc<dyn RootResolver>,
        connections: Arc<dyn ConnectionSource>,
        profiles: Arc<dyn ActiveProfile>,
    ) -> Self {
        Self {
            roots,
            connections,
            profiles,
        }
    }

    /// Client URI -> wire URI string (code2Protocol)
    pub fn encode(&self, uri: &ClientUri) -> Result<String, UriError> {
        if !uri.is_remote() {
            return Ok(uri.to_string());
        }

        let (stable_id, path) = uri.split_remote_path()?;
        let root = self
            .roots
            .resolve_by_id(stable_id)
            .ok_or_else(|| UriError::UnresolvedRoot(stable_id.to_string()))?;

        let resolver = EndpointResolver::from_source(self.connections.as_ref())?;
        let label = resolver.to_label(&root.host)?;
        let profile_name = self.profiles.active_profile(&root.id).unwrap_or_default();

        if !is_metadata_field(&root.root_id) {
            return Err(malformed(&uri.to_string(), "root id cannot be carried on the wire"));
        }
        if profile_name.contains(['/', URI_DELIMITER]) {
            return Err(malformed(&uri.to_string(), "profile name cannot be carried on the wire"));
        }

        let wire = WireUriParts {
            remote: RemotePath {
                snapshot: SnapshotInfo {
                    host: label.to_string(),
                    root_id: root.root_id.clone(),
                    revision: root.revision_id,
                },
                path: path.to_string(),
            },
            profile_name,
        }
        .to_string();

        trace!(client = %uri, wire = %wire, "encoded uri");
        Ok(wire)
    }

    /// Wire URI string -> client URI (protocol2Code)
    pub fn decode(&self, value: &str) -> Result<ClientUri, UriError> {
        match value.split_once("://") {
            Some((scheme, _)) if scheme == DVFS_SCHEME => {}
            _ => return value.parse(),
        }

        let parts = parse_wire_uri(value)?;
        let resolver = EndpointResolver::from_source(self.connections.as_ref())?;
        let host = resolver.to_transport_endpoint(&parts.remote.snapshot.host)?;

        let snapshot = SnapshotInfo {
            host: host.to_string(),
            root_id: parts.remote.snapshot.root_id.clone(),
            revision: parts.remote.snapshot.revision,
        };
        let root = self
            .roots
            .resolve_by_snapshot(&snapshot)
            .ok_or_else(|| UriError::UnresolvedSnapshot {
                host: snapshot.host.clone(),
                root_id: snapshot.root_id.clone(),
                revision: snapshot.revision,
            })?;

        let mut client = ClientUri::new(
            DVFS_SCHEME,
            host,
            &format!("/{}{}", root.id, parts.remote.path),
        );
        if !parts.profile_name.is_empty() {
            client.query = Some(parts.profile_name);
        }

        trace!(wire = %value, client = %client, "decoded uri");
        Ok(client)
    }
}
