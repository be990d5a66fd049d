//! Registry of open remote roots
//!
//! Populated by whoever owns root lifecycle (open, close, revision advance)
//! and read synchronously by the URI codec. Lookups never touch disk or
//! network: both indexes live in memory.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::{debug, info};

use super::types::{RemoteRootContext, RemoteRootId, SnapshotInfo};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("remote root {0} is already open")]
    DuplicateRoot(RemoteRootId),
    #[error("remote root {0} is not open")]
    UnknownRoot(RemoteRootId),
    #[error("snapshot {host}~{root_id}~{revision} is already open as {existing}")]
    DuplicateSnapshot {
        host: String,
        root_id: String,
        revision: u64,
        existing: RemoteRootId,
    },
    #[error("revision of remote root {id} cannot move from {current} to {requested}")]
    RevisionRegression {
        id: RemoteRootId,
        current: u64,
        requested: u64,
    },
}

/// Read side of the registry, as consumed by the URI codec
pub trait RootResolver: Send + Sync {
    /// Resolve a stable id to its context
    fn resolve_by_id(&self, id: &str) -> Option<RemoteRootContext>;

    /// Resolve (transport endpoint, root id, revision) to its context
    fn resolve_by_snapshot(&self, snapshot: &SnapshotInfo) -> Option<RemoteRootContext>;
}

#[derive(Default)]
struct Indexes {
    by_id: HashMap<RemoteRootId, RemoteRootContext>,
    by_snapshot: HashMap<SnapshotInfo, RemoteRootId>,
}

/// In-memory registry of open roots
#[derive(Default)]
pub struct RootRegistry {
    inner: RwLock<Indexes>,
}

impl RootRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly opened root
    pub fn open_root(&self, context: RemoteRootContext) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.by_id.contains_key(&context.id) {
            return Err(RegistryError::DuplicateRoot(context.id));
        }
        let snapshot = context.snapshot();
        if let Some(existing) = inner.by_snapshot.get(&snapshot) {
            return Err(duplicate_snapshot(snapshot, existing));
        }

        info!(
            id = %context.id,
            host = %context.host,
            root_id = %context.root_id,
            revision = context.revision_id,
            "remote root opened"
        );
        inner.by_snapshot.insert(snapshot, context.id.clone());
        inner.by_id.insert(context.id.clone(), context);
        Ok(())
    }

    /// Forget a closed root, returning its last context
    pub fn close_root(&self, id: &str) -> Option<RemoteRootContext> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let context = inner.by_id.remove(id)?;
        remove_snapshot(&mut inner.by_snapshot, &context);
        info!(id = %id, "remote root closed");
        Some(context)
    }

    /// Move a root to a newer snapshot revision
    ///
    /// Wire URIs naming the previous revision stop resolving.
    pub fn advance_revision(&self, id: &str, revision: u64) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let Indexes {
            by_id,
            by_snapshot,
        } = &mut *inner;

        let context = by_id
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownRoot(id.to_string()))?;

        if revision == context.revision_id {
            return Ok(());
        }
        if revision < context.revision_id {
            return Err(RegistryError::RevisionRegression {
                id: id.to_string(),
                current: context.revision_id,
                requested: revision,
            });
        }

        let next = SnapshotInfo {
            revision,
            ..context.snapshot()
        };
        if let Some(existing) = by_snapshot.get(&next) {
            return Err(duplicate_snapshot(next, existing));
        }

        remove_snapshot(by_snapshot, context);
        debug!(
            id = %id,
            from = context.revision_id,
            to = revision,
            "remote root revision advanced"
        );
        context.revision_id = revision;
        by_snapshot.insert(next, context.id.clone());
        Ok(())
    }

    /// Snapshot of all open roots
    pub fn roots(&self) -> Vec<RemoteRootContext> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Only drop the reverse entry while it still points at this root
fn remove_snapshot(
    by_snapshot: &mut HashMap<SnapshotInfo, RemoteRootId>,
    context: &RemoteRootContext,
) {
    let snapshot = context.snapshot();
    if by_snapshot.get(&snapshot) == Some(&context.id) {
        by_snapshot.remove(&snapshot);
    }
}

fn duplicate_snapshot(snapshot: SnapshotInfo, existing: &str) -> RegistryError {
    RegistryError::DuplicateSnapshot {
        host: snapshot.host,
        root_id: snapshot.root_id,
        revision: snapshot.revision,
        existing: existing.to_string(),
    }
}

impl RootResolver for RootRegistry {
    fn resolve_by_id(&self, id: &str) -> Option<RemoteRootContext> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .get(id)
            .cloned()
    }

    fn resolve_by_snapshot(&self, snapshot: &SnapshotInfo) -> Option<RemoteRootContext> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .by_snapshot
            .get(snapshot)
            .and_then(|id| inner.by_id.get(id))
            .cloned()
    }
}
