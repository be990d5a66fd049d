//! Compilation profile selection
//!
//! Each remote root (keyed by its stable id) has one selected compilation
//! profile. An unset root reads as the project's default profile; the default
//! is persisted when the root is announced or a selection starts, never on a
//! read. After that it only changes by explicit user choice. Every actual change is
//! pushed to clangd as a `workspace/didChangeConfiguration` notification.
//!
//! Update paths follow a read, compare, conditionally write sequence: the
//! value observed when a selection starts is compared with the stored value
//! right before persisting, and the update is discarded if another selection
//! landed in between.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::lsp::LspError;
use crate::project_configuration::{
    load_project_configuration, CompilationProfile, LanguageConfiguration, ProjectConfiguration,
};
use crate::uri_codec::ActiveProfile;
use crate::workspace_state::{StateError, WorkspaceState};

/// Workspace state key of the selected profile
pub const COMPILATION_PROFILE_KEY: &str = "sudu-cpp-compilation-profile";

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("unknown compilation profile: {0}")]
    UnknownProfile(String),
    #[error("failed to load project configuration: {0}")]
    Configuration(String),
    #[error(transparent)]
    State(#[from] StateError),
}

/// `settings` payload of `workspace/didChangeConfiguration`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSettings {
    pub compilation_profile: String,
}

/// Sink for configuration changes, implemented by the protocol adapter
pub trait ConfigurationNotifier: Send + Sync {
    fn did_change_configuration(&self, settings: &ProfileSettings) -> Result<(), LspError>;
}

/// Result of a selection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// The profile was already active; nothing was sent
    Unchanged,
    /// Persisted; `notified` is false when the notification failed
    Changed {
        previous: Option<String>,
        notified: bool,
    },
    /// A newer selection was recorded first; this one was dropped
    Superseded { current: Option<String> },
}

/// A selection in progress, carrying the value it started from
#[derive(Debug, Clone)]
pub struct PendingSelection {
    stable_id: String,
    observed: Option<String>,
}

impl PendingSelection {
    pub fn observed(&self) -> Option<&str> {
        self.observed.as_deref()
    }
}

pub struct CompilationProfileStore {
    language: String,
    configuration: Option<LanguageConfiguration>,
    state: Arc<dyn WorkspaceState>,
    notifier: Arc<dyn ConfigurationNotifier>,
}

impl CompilationProfileStore {
    pub fn new(
        language: &str,
        project: Option<&ProjectConfiguration>,
        state: Arc<dyn WorkspaceState>,
        notifier: Arc<dyn ConfigurationNotifier>,
    ) -> Self {
        let configuration = project.and_then(|p| p.for_language(language)).cloned();
        if configuration.is_none() {
            debug!(language = %language, "no project configuration for language");
        }

        Self {
            language: language.to_string(),
            configuration,
            state,
            notifier,
        }
    }

    /// Build a store from the workspace's project configuration file
    pub async fn load(
        workspace_root: &Path,
        language: &str,
        state: Arc<dyn WorkspaceState>,
        notifier: Arc<dyn ConfigurationNotifier>,
    ) -> Result<Self, ProfileError> {
        let project = load_project_configuration(workspace_root)
            .await
            .map_err(ProfileError::Configuration)?;
        Ok(Self::new(language, project.as_ref(), state, notifier))
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn language_configuration(&self) -> Option<&LanguageConfiguration> {
        self.configuration.as_ref()
    }

    pub fn profiles(&self) -> &[CompilationProfile] {
        self.configuration
            .as_ref()
            .map(|c| c.compilation_profiles.as_slice())
            .unwrap_or_default()
    }

    pub fn profile_names(&self) -> Vec<String> {
        self.profiles().iter().map(|p| p.name.clone()).collect()
    }

    /// Currently selected profile of a root
    ///
    /// An unset root reads as the project's default profile. Never writes.
    pub fn get(&self, stable_id: &str) -> Option<String> {
        self.state
            .get(COMPILATION_PROFILE_KEY, stable_id)
            .or_else(|| self.default_profile().map(str::to_string))
    }

    /// Persist the default profile for an unset root
    ///
    /// Returns the root's effective profile, like [`get`](Self::get).
    pub fn seed(&self, stable_id: &str) -> Option<String> {
        if let Some(current) = self.state.get(COMPILATION_PROFILE_KEY, stable_id) {
            return Some(current);
        }

        let default = self.default_profile()?;
        if let Err(e) = self
            .state
            .update(COMPILATION_PROFILE_KEY, stable_id, Some(default))
        {
            warn!(stable_id = %stable_id, error = %e, "failed to persist default profile");
        }
        debug!(stable_id = %stable_id, profile = %default, "seeded default compilation profile");
        Some(default.to_string())
    }

    fn default_profile(&self) -> Option<&str> {
        self.configuration
            .as_ref()
            .map(|c| c.default_profile.as_str())
            .filter(|p| !p.is_empty())
    }

    /// Select a profile for a root
    pub fn set(&self, stable_id: &str, profile: &str) -> Result<SelectionOutcome, ProfileError> {
        let pending = self.begin_selection(stable_id);
        self.commit(pending, profile)
    }

    /// Start a selection that may complete after a suspension point
    pub fn begin_selection(&self, stable_id: &str) -> PendingSelection {
        PendingSelection {
            stable_id: stable_id.to_string(),
            observed: self.seed(stable_id),
        }
    }

    /// Finish a selection, discarding it when a newer one was recorded
    pub fn commit(
        &self,
        pending: PendingSelection,
        profile: &str,
    ) -> Result<SelectionOutcome, ProfileError> {
        if let Some(configuration) = &self.configuration {
            if configuration.profile(profile).is_none() {
                return Err(ProfileError::UnknownProfile(profile.to_string()));
            }
        }

        let PendingSelection { stable_id, observed } = pending;
        let current = self.state.get(COMPILATION_PROFILE_KEY, &stable_id);

        if current != observed {
            info!(
                stable_id = %stable_id,
                profile = %profile,
                "discarding stale compilation profile selection"
            );
            return Ok(SelectionOutcome::Superseded { current });
        }
        if current.as_deref() == Some(profile) {
            return Ok(SelectionOutcome::Unchanged);
        }

        self.state
            .update(COMPILATION_PROFILE_KEY, &stable_id, Some(profile))?;
        info!(stable_id = %stable_id, profile = %profile, "compilation profile selected");

        // The stored selection stays authoritative if the peer is unreachable
        let notified = match self.notify(profile) {
            Ok(()) => true,
            Err(e) => {
                warn!(profile = %profile, error = %e, "failed to notify compilation profile change");
                false
            }
        };

        Ok(SelectionOutcome::Changed {
            previous: current,
            notified,
        })
    }

    /// Offer the configured profiles to `chooser` and commit its answer
    ///
    /// Returns `Ok(None)` when the chooser was dismissed.
    pub async fn choose<F, Fut>(
        &self,
        stable_id: &str,
        chooser: F,
    ) -> Result<Option<SelectionOutcome>, ProfileError>
    where
        F: FnOnce(Vec<CompilationProfile>) -> Fut,
        Fut: Future<Output = Option<String>>,
    {
        let pending = self.begin_selection(stable_id);
        let Some(profile) = chooser(self.profiles().to_vec()).await else {
            return Ok(None);
        };
        self.commit(pending, &profile).map(Some)
    }

    /// Push the root's current profile to the peer without changing it
    ///
    /// Used when a root is opened so the server starts in sync.
    pub fn announce(&self, stable_id: &str) -> Result<bool, LspError> {
        match self.seed(stable_id) {
            Some(profile) => self.notify(&profile).map(|()| true),
            None => Ok(false),
        }
    }

    fn notify(&self, profile: &str) -> Result<(), LspError> {
        self.notifier.did_change_configuration(&ProfileSettings {
            compilation_profile: profile.to_string(),
        })
    }
}

impl ActiveProfile for CompilationProfileStore {
    fn active_profile(&self, stable_id: &str) -> Option<String> {
        self.get(stable_id)
    }
}
