//! LSP type definitions and conversions
//!
//! Provides error types and the protocol shapes the adapter exchanges with
//! clangd.

use serde::{Deserialize, Serialize};

use crate::dvfs::RegistryError;
use crate::uri_codec::{ClientUri, UriError};

/// Error types for LSP operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum LspError {
    /// Failed to spawn server process
    #[error("Failed to spawn clangd: {0}")]
    SpawnFailed(String),
    /// Server initialization failed
    #[error("clangd initialization failed: {0}")]
    InitializationFailed(String),
    /// JSON-RPC error from server
    #[error("LSP RPC error {code}: {message}")]
    RpcError { code: i32, message: String },
    /// Failed to parse response
    #[error("Failed to parse LSP response: {0}")]
    ParseError(String),
    /// Server shut down unexpectedly
    #[error("clangd shut down unexpectedly")]
    ServerShutdown,
    /// IO error during communication
    #[error("LSP IO error: {0}")]
    IoError(String),
    /// URI could not be converted between client and wire form
    #[error(transparent)]
    Uri(#[from] UriError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl From<std::io::Error> for LspError {
    fn from(err: std::io::Error) -> Self {
        LspError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for LspError {
    fn from(err: serde_json::Error) -> Self {
        LspError::ParseError(err.to_string())
    }
}

/// LSP Position (0-indexed line and character)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// LSP Range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }
}

/// Wire location annotated with the profiles it is valid in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LspLocationWithProfiles {
    pub uri: String,
    pub range: Range,
    #[serde(default)]
    pub profiles: Vec<String>,
}

/// Editor-side location annotated with the profiles it is valid in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationWithProfiles {
    pub uri: ClientUri,
    pub range: Range,
    pub profiles: Vec<String>,
}

/// Params of the `textDocument/referencesAll` request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferencesAllParams {
    pub text_document: TextDocumentIdentifier,
    pub position: Position,
    pub context: ReferenceContext,
    /// Profiles to search in
    pub profiles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextDocumentIdentifier {
    pub uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceContext {
    pub include_declaration: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_references_all_params_shape() {
        let params = ReferencesAllParams {
            text_document: TextDocumentIdentifier {
                uri: "sudu://host~root~2~Debug/a.cpp".to_string(),
            },
            position: Position::new(10, 5),
            context: ReferenceContext {
                include_declaration: false,
            },
            profiles: vec!["Debug".to_string(), "Release".to_string()],
        };

        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "textDocument": {"uri": "sudu://host~root~2~Debug/a.cpp"},
                "position": {"line": 10, "character": 5},
                "context": {"includeDeclaration": false},
                "profiles": ["Debug", "Release"]
            })
        );
    }

    #[test]
    fn test_location_with_profiles_defaults() {
        let loc: LspLocationWithProfiles = serde_json::from_value(serde_json::json!({
            "uri": "sudu://host~root~2~/a.cpp",
            "range": {
                "start": {"line": 1, "character": 0},
                "end": {"line": 1, "character": 3}
            }
        }))
        .unwrap();
        assert!(loc.profiles.is_empty());
    }
}
