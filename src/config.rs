use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// User settings of the clangd integration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionSettings {
    /// clangd executable
    #[serde(default = "default_clangd_path")]
    pub path: String,
    /// Extra server arguments, `--flag=value` or bare `--flag`
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Trace file written by clangd (`CLANGD_TRACE`)
    #[serde(default)]
    pub trace: Option<String>,
    /// Flags used for files without compile commands
    #[serde(default)]
    pub fallback_flags: Vec<String>,
    /// Restart clangd when it exits unexpectedly
    #[serde(default = "default_true")]
    pub restart_after_crash: bool,
}

/// Restarts allowed per session when `restartAfterCrash` is on
pub const MAX_CRASH_RESTARTS: u32 = 4;

impl ExtensionSettings {
    pub fn max_restarts(&self) -> u32 {
        if self.restart_after_crash {
            MAX_CRASH_RESTARTS
        } else {
            0
        }
    }
}

impl Default for ExtensionSettings {
    fn default() -> Self {
        Self {
            path: default_clangd_path(),
            arguments: Vec::new(),
            trace: None,
            fallback_flags: Vec::new(),
            restart_after_crash: true,
        }
    }
}

fn default_clangd_path() -> String {
    // Check environment variable first, then fall back to PATH lookup
    std::env::var("SUDU_CLANGD_PATH").unwrap_or_else(|_| "clangd".to_string())
}

fn default_true() -> bool {
    true
}

pub fn default_settings_path() -> PathBuf {
    let Some(dirs) = ProjectDirs::from("com", "sudu", "sudu-clangd") else {
        return Path::new("sudu-clangd.json").to_path_buf();
    };
    dirs.config_dir().join("settings.json")
}

/// Load settings, falling back to defaults when missing or invalid
pub fn load_settings(path: &Path) -> ExtensionSettings {
    let Ok(bytes) = fs::read(path) else {
        return ExtensionSettings::default();
    };
    serde_json::from_slice::<ExtensionSettings>(&bytes).unwrap_or_else(|e| {
        tracing::warn!(path = ?path, error = %e, "invalid settings file, using defaults");
        ExtensionSettings::default()
    })
}

pub fn save_settings(path: &Path, settings: &ExtensionSettings) -> Result<(), String> {
    let json = serde_json::to_vec_pretty(settings).map_err(|e| e.to_string())?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    fs::write(path, json).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = tempdir().unwrap();
        let settings = load_settings(&temp.path().join("absent.json"));
        assert_eq!(settings, ExtensionSettings::default());
        assert!(settings.restart_after_crash);
        assert_eq!(settings.max_restarts(), MAX_CRASH_RESTARTS);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("settings.json");
        fs::write(
            &path,
            r#"{"arguments": ["--log=verbose"], "restartAfterCrash": false}"#,
        )
        .unwrap();

        let settings = load_settings(&path);
        assert_eq!(settings.arguments, vec!["--log=verbose"]);
        assert!(!settings.restart_after_crash);
        assert_eq!(settings.max_restarts(), 0);
        assert_eq!(settings.trace, None);
        assert!(settings.fallback_flags.is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("settings.json");
        let settings = ExtensionSettings {
            trace: Some("/tmp/clangd.trace".to_string()),
            fallback_flags: vec!["-std=c++17".to_string()],
            ..ExtensionSettings::default()
        };

        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path), settings);
    }

    #[test]
    fn test_invalid_file_gives_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("settings.json");
        fs::write(&path, "[1, 2").unwrap();
        assert_eq!(load_settings(&path), ExtensionSettings::default());
    }
}
