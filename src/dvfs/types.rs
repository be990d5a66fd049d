//! Remote filesystem data model
//!
//! Connection tables and remote root contexts as published by the Sudu
//! distributed filesystem extension.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Reserved URI scheme for Sudu remote workspaces
pub const DVFS_SCHEME: &str = "sudu";

/// Opaque identifier of an open remote root (the stable id)
pub type RemoteRootId = String;

/// One configured connection to a Sudu cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Human-facing endpoint label, the host written into wire URIs
    #[serde(
        default,
        rename = "dvfsEndpoint",
        skip_serializing_if = "Option::is_none"
    )]
    pub endpoint_label: Option<String>,
    /// Internal transport endpoint, the host of remote root contexts
    #[serde(
        default,
        rename = "webEndpoint",
        skip_serializing_if = "Option::is_none"
    )]
    pub transport_endpoint: Option<String>,
    /// Background index service address
    #[serde(
        default,
        rename = "cppCodeModelEndpoint",
        skip_serializing_if = "Option::is_none"
    )]
    pub code_model_endpoint: Option<String>,
    /// Compile commands service address
    #[serde(
        default,
        rename = "cppProjectModelEndpoint",
        skip_serializing_if = "Option::is_none"
    )]
    pub project_model_endpoint: Option<String>,
}

/// Connection table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfiguration {
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl ConnectionConfiguration {
    pub fn new(connections: Vec<Connection>) -> Self {
        Self { connections }
    }

    /// Load a connection table from a JSON file
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read connections {:?}: {}", path, e))?;

        serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse connections {:?}: {}", path, e))
    }

    /// Find the connection serving a transport endpoint
    pub fn by_transport_endpoint(&self, endpoint: &str) -> Option<&Connection> {
        self.connections
            .iter()
            .find(|c| c.transport_endpoint.as_deref() == Some(endpoint))
    }
}

/// Context of an open remote root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRootContext {
    /// Transport endpoint serving this root
    pub host: String,
    pub root_id: String,
    pub revision_id: u64,
    /// Stable id: survives revision changes, never sent on the wire
    pub id: RemoteRootId,
}

impl RemoteRootContext {
    pub fn new(host: &str, root_id: &str, revision_id: u64, id: &str) -> Self {
        Self {
            host: host.to_string(),
            root_id: root_id.to_string(),
            revision_id,
            id: id.to_string(),
        }
    }

    /// Create a context with a freshly generated stable id
    pub fn with_generated_id(host: &str, root_id: &str, revision_id: u64) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self::new(host, root_id, revision_id, &id)
    }

    pub fn snapshot(&self) -> SnapshotInfo {
        SnapshotInfo {
            host: self.host.clone(),
            root_id: self.root_id.clone(),
            revision: self.revision_id,
        }
    }
}

/// The (host, root, revision) triple a wire URI can carry
///
/// `host` is the endpoint label when parsed from a wire URI and the
/// transport endpoint when used as a registry key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotInfo {
    pub host: String,
    pub root_id: String,
    pub revision: u64,
}

/// A snapshot plus a slash-rooted path inside it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePath {
    #[serde(flatten)]
    pub snapshot: SnapshotInfo,
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_connection_json_field_names() {
        let json = r#"{
            "connections": [{
                "name": "local",
                "webEndpoint": "http://localhost:8080",
                "dvfsEndpoint": "localhost:28081",
                "cppCodeModelEndpoint": "localhost:30000"
            }]
        }"#;

        let config: ConnectionConfiguration = serde_json::from_str(json).unwrap();
        let connection = &config.connections[0];
        assert_eq!(connection.name.as_deref(), Some("local"));
        assert_eq!(
            connection.transport_endpoint.as_deref(),
            Some("http://localhost:8080")
        );
        assert_eq!(connection.endpoint_label.as_deref(), Some("localhost:28081"));
        assert_eq!(
            connection.code_model_endpoint.as_deref(),
            Some("localhost:30000")
        );
        assert!(connection.project_model_endpoint.is_none());
    }

    #[test]
    fn test_load_connections_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("connections.json");
        std::fs::write(
            &path,
            r#"{"connections":[{"webEndpoint":"web","dvfsEndpoint":"dvfs"}]}"#,
        )
        .unwrap();

        let config = ConnectionConfiguration::load(&path).unwrap();
        assert_eq!(
            config
                .by_transport_endpoint("web")
                .and_then(|c| c.endpoint_label.as_deref()),
            Some("dvfs")
        );
        assert!(ConnectionConfiguration::load(&temp.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_generated_ids_are_distinct() {
        let a = RemoteRootContext::with_generated_id("web", "root", 1);
        let b = RemoteRootContext::with_generated_id("web", "root", 1);
        assert_ne!(a.id, b.id);
        assert_eq!(a.snapshot(), b.snapshot());
    }
}
