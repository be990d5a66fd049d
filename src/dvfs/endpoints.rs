//! Endpoint label <-> transport endpoint resolution
//!
//! The wire format names a connection by its endpoint label while remote
//! root contexts carry the transport endpoint. Both directions are linear
//! scans over the connection table; the table is small and is re-obtained
//! from the [`ConnectionSource`] for every resolution.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use super::types::{Connection, ConnectionConfiguration};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("no connection matches endpoint {0}")]
    NoMatchingConnection(String),
    #[error("endpoint {0} is configured by more than one connection")]
    DuplicateEndpoint(String),
}

/// Capability yielding the current connection table
pub trait ConnectionSource: Send + Sync {
    fn connections(&self) -> Arc<ConnectionConfiguration>;
}

/// Fixed connection table
pub struct StaticConnections(Arc<ConnectionConfiguration>);

impl StaticConnections {
    pub fn new(config: ConnectionConfiguration) -> Self {
        Self(Arc::new(config))
    }
}

impl ConnectionSource for StaticConnections {
    fn connections(&self) -> Arc<ConnectionConfiguration> {
        Arc::clone(&self.0)
    }
}

/// Connection table that can be swapped when the extension republishes it
#[derive(Default)]
pub struct SharedConnections {
    current: RwLock<Arc<ConnectionConfiguration>>,
}

impl SharedConnections {
    pub fn new(config: ConnectionConfiguration) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub fn replace(&self, config: ConnectionConfiguration) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(config);
    }
}

impl ConnectionSource for SharedConnections {
    fn connections(&self) -> Arc<ConnectionConfiguration> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Resolver over one snapshot of the connection table
#[derive(Debug)]
pub struct EndpointResolver {
    config: Arc<ConnectionConfiguration>,
}

impl EndpointResolver {
    /// Build a resolver, rejecting tables where a label or transport
    /// endpoint appears on more than one connection
    pub fn new(config: Arc<ConnectionConfiguration>) -> Result<Self, EndpointError> {
        ensure_unique(&config.connections, |c| c.endpoint_label.as_deref())?;
        ensure_unique(&config.connections, |c| c.transport_endpoint.as_deref())?;
        Ok(Self { config })
    }

    pub fn from_source(source: &dyn ConnectionSource) -> Result<Self, EndpointError> {
        Self::new(source.connections())
    }

    /// Label -> transport endpoint
    pub fn to_transport_endpoint(&self, label: &str) -> Result<&str, EndpointError> {
        self.config
            .connections
            .iter()
            .find(|c| c.endpoint_label.as_deref() == Some(label))
            .and_then(|c| c.transport_endpoint.as_deref())
            .ok_or_else(|| EndpointError::NoMatchingConnection(label.to_string()))
    }

    /// Transport endpoint -> label
    pub fn to_label(&self, endpoint: &str) -> Result<&str, EndpointError> {
        self.config
            .connections
            .iter()
            .find(|c| c.transport_endpoint.as_deref() == Some(endpoint))
            .and_then(|c| c.endpoint_label.as_deref())
            .ok_or_else(|| EndpointError::NoMatchingConnection(endpoint.to_string()))
    }
}

fn ensure_unique<F>(connections: &[Connection], field: F) -> Result<(), EndpointError>
where
    F: Fn(&Connection) -> Option<&str>,
{
    let mut seen = HashSet::new();
    for value in connections.iter().filter_map(|c| field(c)) {
        if !seen.insert(value) {
            return Err(EndpointError::DuplicateEndpoint(value.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(label: Option<&str>, transport: Option<&str>) -> Connection {
        Connection {
            endpoint_label: label.map(str::to_string),
            transport_endpoint: transport.map(str::to_string),
            ..Connection::default()
        }
    }

    fn resolver(connections: Vec<Connection>) -> EndpointResolver {
        EndpointResolver::new(Arc::new(ConnectionConfiguration::new(connections))).unwrap()
    }

    #[test]
    fn test_label_round_trip() {
        let resolver = resolver(vec![
            connection(Some("localhost:28081"), Some("http://localhost:8080")),
            connection(Some("cluster:28081"), Some("https://cluster.example")),
        ]);

        for label in ["localhost:28081", "cluster:28081"] {
            let endpoint = resolver.to_transport_endpoint(label).unwrap();
            assert_eq!(resolver.to_label(endpoint).unwrap(), label);
        }
    }

    #[test]
    fn test_absent_label_fails() {
        let resolver = resolver(vec![connection(Some("a"), Some("web-a"))]);
        assert_eq!(
            resolver.to_transport_endpoint("b"),
            Err(EndpointError::NoMatchingConnection("b".to_string()))
        );
        assert_eq!(
            resolver.to_label("web-b"),
            Err(EndpointError::NoMatchingConnection("web-b".to_string()))
        );
    }

    #[test]
    fn test_partially_populated_connection_does_not_match() {
        let resolver = resolver(vec![
            connection(Some("only-label"), None),
            connection(None, Some("only-web")),
        ]);
        assert!(resolver.to_transport_endpoint("only-label").is_err());
        assert!(resolver.to_label("only-web").is_err());
    }

    #[test]
    fn test_duplicate_labels_rejected() {
        let config = ConnectionConfiguration::new(vec![
            connection(Some("dup"), Some("web-1")),
            connection(Some("dup"), Some("web-2")),
        ]);
        assert_eq!(
            EndpointResolver::new(Arc::new(config)).unwrap_err(),
            EndpointError::DuplicateEndpoint("dup".to_string())
        );

        let config = ConnectionConfiguration::new(vec![
            connection(Some("a"), Some("web")),
            connection(Some("b"), Some("web")),
        ]);
        assert!(EndpointResolver::new(Arc::new(config)).is_err());
    }

    #[test]
    fn test_shared_connections_replace() {
        let shared = SharedConnections::new(ConnectionConfiguration::new(vec![connection(
            Some("old"),
            Some("web"),
        )]));
        let before = EndpointResolver::from_source(&shared).unwrap();

        shared.replace(ConnectionConfiguration::new(vec![connection(
            Some("new"),
            Some("web"),
        )]));
        let after = EndpointResolver::from_source(&shared).unwrap();

        // A resolver keeps the table it was built from
        assert_eq!(before.to_label("web").unwrap(), "old");
        assert_eq!(after.to_label("web").unwrap(), "new");
    }
}
