use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("workspace state io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("workspace state serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("could not determine config directory")]
    NoStateDir,
}

/// Persisted key-value layer scoped per workspace
///
/// Reads must be answerable from memory: the URI codec reaches this through
/// the profile store on every conversion.
pub trait WorkspaceState: Send + Sync {
    fn get(&self, key: &str, scope: &str) -> Option<String>;

    /// Store `value`, or remove the entry when `None`
    fn update(&self, key: &str, scope: &str, value: Option<&str>) -> Result<(), StateError>;
}

/// A single persisted value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateEntry {
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// On-disk layout of a workspace state file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStateFile {
    /// The workspace this state belongs to
    pub workspace: String,
    /// key -> scope -> entry
    #[serde(default)]
    pub entries: HashMap<String, HashMap<String, StateEntry>>,
}

impl WorkspaceStateFile {
    fn get(&self, key: &str, scope: &str) -> Option<&StateEntry> {
        self.entries.get(key).and_then(|scopes| scopes.get(scope))
    }

    fn set(&mut self, key: &str, scope: &str, value: Option<&str>) {
        match value {
            Some(value) => {
                self.entries.entry(key.to_string()).or_default().insert(
                    scope.to_string(),
                    StateEntry {
                        value: value.to_string(),
                        updated_at: Utc::now(),
                    },
                );
            }
            None => {
                if let Some(scopes) = self.entries.get_mut(key) {
                    scopes.remove(scope);
                    if scopes.is_empty() {
                        self.entries.remove(key);
                    }
                }
            }
        }
    }
}

/// In-memory state, for tests and sessions that need no persistence
#[derive(Default)]
pub struct MemoryWorkspaceState {
    file: Mutex<WorkspaceStateFile>,
}

impl MemoryWorkspaceState {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkspaceState for MemoryWorkspaceState {
    fn get(&self, key: &str, scope: &str) -> Option<String> {
        let file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.get(key, scope).map(|e| e.value.clone())
    }

    fn update(&self, key: &str, scope: &str, value: Option<&str>) -> Result<(), StateError> {
        self.file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set(key, scope, value);
        Ok(())
    }
}

/// State persisted as a JSON file, loaded once and written through
pub struct JsonWorkspaceState {
    path: PathBuf,
    file: Mutex<WorkspaceStateFile>,
}

impl JsonWorkspaceState {
    /// Open the state file at `path`, starting empty when it does not exist
    /// or belongs to another workspace
    pub fn open(path: PathBuf, workspace: &str) -> Result<Self, StateError> {
        let file = match fs::read_to_string(&path) {
            Ok(content) => {
                let file: WorkspaceStateFile = serde_json::from_str(&content)?;
                if file.workspace == workspace {
                    file
                } else {
                    tracing::warn!(path = ?path, "state file belongs to another workspace, ignoring");
                    Self::empty(workspace)
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::empty(workspace),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Open the state file for a workspace under the OS config directory
    pub fn for_workspace(workspace: &str) -> Result<Self, StateError> {
        let path = get_workspace_state_path(workspace).ok_or(StateError::NoStateDir)?;
        Self::open(path, workspace)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn empty(workspace: &str) -> WorkspaceStateFile {
        WorkspaceStateFile {
            workspace: workspace.to_string(),
            entries: HashMap::new(),
        }
    }

    fn save(&self, file: &WorkspaceStateFile) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(file)?;
        fs::write(&self.path, json)?;
        Ok(())
    }
}

impl WorkspaceState for JsonWorkspaceState {
    fn get(&self, key: &str, scope: &str) -> Option<String> {
        let file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.get(key, scope).map(|e| e.value.clone())
    }

    fn update(&self, key: &str, scope: &str, value: Option<&str>) -> Result<(), StateError> {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.set(key, scope, value);
        self.save(&file)
    }
}

/// Get the config directory for workspace state files
/// Uses OS-specific paths:
/// - Linux: ~/.config/sudu-clangd/workspaces/
/// - macOS: ~/Library/Application Support/com.sudu.sudu-clangd/workspaces/
/// - Windows: C:\Users\<User>\AppData\Roaming\sudu\sudu-clangd\config\workspaces\
fn get_state_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "sudu", "sudu-clangd").map(|dirs| dirs.config_dir().join("workspaces"))
}

/// Generate a unique filename for a workspace based on its identifier
fn workspace_state_filename(workspace: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(workspace.as_bytes());
    let digest = format!("{:x}", hasher.finalize());

    // Last path component + hash keeps the name readable
    let name = workspace
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|n| !n.is_empty())
        .unwrap_or("workspace");
    let name: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();

    format!("{}-{}.json", name, &digest[..16])
}

/// Get the full path to a workspace's state file
pub fn get_workspace_state_path(workspace: &str) -> Option<PathBuf> {
    get_state_dir().map(|dir| dir.join(workspace_state_filename(workspace)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_workspace_state_filename() {
        let name1 = workspace_state_filename("sudu://web/stable-1");
        let name2 = workspace_state_filename("sudu://web/stable-1");
        let name3 = workspace_state_filename("/home/user/projects/other");

        assert_eq!(name1, name2);
        assert_ne!(name1, name3);
        assert!(name1.starts_with("stable-1-"));
        assert!(name3.starts_with("other-"));
        assert!(name1.ends_with(".json"));
    }

    #[test]
    fn test_workspace_state_filename_is_stable() {
        // Fixed digest: file names must not change between toolchains
        assert_eq!(workspace_state_filename("abc"), "abc-ba7816bf8f01cfea.json");
    }

    #[test]
    fn test_memory_state_scopes_are_independent() {
        let state = MemoryWorkspaceState::new();
        state.update("key", "a", Some("one")).unwrap();
        state.update("key", "b", Some("two")).unwrap();

        assert_eq!(state.get("key", "a").as_deref(), Some("one"));
        assert_eq!(state.get("key", "b").as_deref(), Some("two"));
        assert_eq!(state.get("other", "a"), None);

        state.update("key", "a", None).unwrap();
        assert_eq!(state.get("key", "a"), None);
        assert_eq!(state.get("key", "b").as_deref(), Some("two"));
    }

    #[test]
    fn test_json_state_persists_across_reopen() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("state.json");

        let state = JsonWorkspaceState::open(path.clone(), "ws").unwrap();
        assert_eq!(state.get("key", "scope"), None);
        state.update("key", "scope", Some("Release")).unwrap();
        assert!(path.exists());

        let reopened = JsonWorkspaceState::open(path.clone(), "ws").unwrap();
        assert_eq!(reopened.get("key", "scope").as_deref(), Some("Release"));

        // A file written for another workspace is not reused
        let foreign = JsonWorkspaceState::open(path, "other-ws").unwrap();
        assert_eq!(foreign.get("key", "scope"), None);
    }

    #[test]
    fn test_corrupt_state_file_is_an_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("state.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            JsonWorkspaceState::open(path, "ws"),
            Err(StateError::Serialize(_))
        ));
    }
}
