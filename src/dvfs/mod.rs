//! Sudu distributed filesystem integration
//!
//! Connection tables, endpoint resolution and the registry of open remote
//! roots. Everything here is in-memory so the URI codec can use it inline.

pub mod endpoints;
pub mod registry;
pub mod types;

pub use endpoints::{
    ConnectionSource, EndpointError, EndpointResolver, SharedConnections, StaticConnections,
};
pub use registry::{RegistryError, RootRegistry, RootResolver};
pub use types::{
    Connection, ConnectionConfiguration, RemotePath, RemoteRootContext, RemoteRootId,
    SnapshotInfo, DVFS_SCHEME,
};
