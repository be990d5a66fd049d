use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A named set of build arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationProfile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub arguments: Vec<String>,
}

/// Build setup for one language of the project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageConfiguration {
    pub language: String,
    #[serde(default)]
    pub build_tool: String,
    #[serde(default)]
    pub docker_image: String,
    #[serde(default)]
    pub default_profile: String,
    #[serde(default)]
    pub compilation_profiles: Vec<CompilationProfile>,
}

impl LanguageConfiguration {
    pub fn profile(&self, name: &str) -> Option<&CompilationProfile> {
        self.compilation_profiles.iter().find(|p| p.name == name)
    }

    pub fn profile_names(&self) -> Vec<String> {
        self.compilation_profiles
            .iter()
            .map(|p| p.name.clone())
            .collect()
    }
}

/// Per-workspace build configuration stored in .sudu/project_configuration.json
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfiguration {
    #[serde(default)]
    pub configurations: Vec<LanguageConfiguration>,
}

impl ProjectConfiguration {
    pub fn for_language(&self, language: &str) -> Option<&LanguageConfiguration> {
        self.configurations.iter().find(|c| c.language == language)
    }
}

/// Language key of the C/C++ configuration
pub const CPP_LANGUAGE: &str = "c++";

/// Get the .sudu directory path for a workspace
pub fn get_sudu_dir(workspace_root: &Path) -> PathBuf {
    workspace_root.join(".sudu")
}

/// Get the project configuration file path for a workspace
pub fn get_configuration_path(workspace_root: &Path) -> PathBuf {
    get_sudu_dir(workspace_root).join("project_configuration.json")
}

/// Load the project configuration of a workspace
///
/// Returns `Ok(None)` when the workspace has no configuration file.
pub async fn load_project_configuration(
    workspace_root: &Path,
) -> Result<Option<ProjectConfiguration>, String> {
    let path = get_configuration_path(workspace_root);

    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(format!("Failed to read {:?}: {}", path, e)),
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| format!("Failed to parse {:?}: {}", path, e))
}
