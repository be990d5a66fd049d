//! clangd launch description
//!
//! User arguments are merged with the addresses published by the connection
//! serving the workspace's transport endpoint. Connection values win.

use serde_json::{json, Value};
use std::path::PathBuf;

use crate::config::ExtensionSettings;
use crate::dvfs::{Connection, ConnectionConfiguration};

pub const DVFS_ADDRESS: &str = "--distributed-file-system-address";
pub const CODE_MODEL_INDEX: &str = "--background-index-db-address";
pub const PROJECT_MODEL_INDEX: &str = "--compile-commands-address";

/// Merge user arguments with connection addresses
///
/// Keys keep the position of their first occurrence; a later value for the
/// same key replaces the earlier one.
pub fn server_arguments(settings: &[String], connection: Option<&Connection>) -> Vec<String> {
    let mut merged: Vec<(String, Option<String>)> = Vec::new();
    let mut set = |key: &str, value: Option<&str>| {
        let value = value.map(str::to_string);
        match merged.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => merged.push((key.to_string(), value)),
        }
    };

    for setting in settings {
        match setting.split_once('=') {
            Some((key, value)) => set(key, Some(value)),
            None => set(setting, None),
        }
    }

    if let Some(connection) = connection {
        let overrides = [
            (DVFS_ADDRESS, &connection.endpoint_label),
            (CODE_MODEL_INDEX, &connection.code_model_endpoint),
            (PROJECT_MODEL_INDEX, &connection.project_model_endpoint),
        ];
        for (key, value) in overrides {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                set(key, Some(value));
            }
        }
    }

    merged
        .into_iter()
        .map(|(key, value)| match value {
            Some(value) if !value.is_empty() => format!("{key}={value}"),
            _ => key,
        })
        .collect()
}

/// Everything needed to start a clangd process
#[derive(Debug, Clone, PartialEq)]
pub struct ClangdLaunch {
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    pub initialization_options: Value,
    /// Restarts allowed after clangd exits unexpectedly
    pub max_restarts: u32,
}

impl ClangdLaunch {
    /// Build the launch for a workspace served by `transport_endpoint`
    pub fn new(
        settings: &ExtensionSettings,
        connections: &ConnectionConfiguration,
        transport_endpoint: &str,
    ) -> Self {
        let connection = connections.by_transport_endpoint(transport_endpoint);
        if connection.is_none() {
            tracing::warn!(
                endpoint = %transport_endpoint,
                "no connection for transport endpoint, using configured arguments only"
            );
        }

        let env = settings
            .trace
            .iter()
            .filter(|t| !t.is_empty())
            .map(|t| ("CLANGD_TRACE".to_string(), t.clone()))
            .collect();

        Self {
            command: settings.path.clone(),
            args: server_arguments(&settings.arguments, connection),
            env,
            cwd: std::env::current_dir().ok(),
            initialization_options: json!({
                "clangdFileStatus": true,
                "fallbackFlags": settings.fallback_flags,
            }),
            max_restarts: settings.max_restarts(),
        }
    }
}
