//! clangd session for Sudu remote workspaces
//!
//! Ties the URI codec, the root registry and the compilation profile store to
//! one language server connection. Every URI crossing the connection is
//! converted here.

use serde_json::{json, Value};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::client::LanguageServerConnection;
use super::launch::ClangdLaunch;
use super::selector::DocumentSelector;
use super::supervisor::SupervisedConnection;
use super::types::{
    LocationWithProfiles, LspError, LspLocationWithProfiles, Position, ReferenceContext,
    ReferencesAllParams, TextDocumentIdentifier,
};
use crate::compilation_profiles::{
    CompilationProfileStore, ConfigurationNotifier, ProfileError, ProfileSettings,
    SelectionOutcome,
};
use crate::dvfs::{ConnectionSource, RemoteRootContext, RootRegistry};
use crate::project_configuration::{ProjectConfiguration, CPP_LANGUAGE};
use crate::uri_codec::{ClientUri, UriCodec};
use crate::workspace_state::WorkspaceState;

/// Forwards profile changes as `workspace/didChangeConfiguration`
pub struct ConnectionNotifier {
    connection: Arc<dyn LanguageServerConnection>,
}

impl ConnectionNotifier {
    pub fn new(connection: Arc<dyn LanguageServerConnection>) -> Self {
        Self { connection }
    }
}

impl ConfigurationNotifier for ConnectionNotifier {
    fn did_change_configuration(&self, settings: &ProfileSettings) -> Result<(), LspError> {
        self.connection.notify(
            "workspace/didChangeConfiguration",
            json!({ "settings": settings }),
        )
    }
}

pub struct ClangdSession {
    connection: Arc<dyn LanguageServerConnection>,
    roots: Arc<RootRegistry>,
    profiles: Arc<CompilationProfileStore>,
    codec: UriCodec,
    selector: DocumentSelector,
}

impl ClangdSession {
    /// `profiles` is expected to notify through the same `connection`
    pub fn new(
        connection: Arc<dyn LanguageServerConnection>,
        roots: Arc<RootRegistry>,
        connections: Arc<dyn ConnectionSource>,
        profiles: Arc<CompilationProfileStore>,
    ) -> Self {
        let codec = UriCodec::new(roots.clone(), connections, profiles.clone());
        Self {
            connection,
            roots,
            profiles,
            codec,
            selector: DocumentSelector::clangd(),
        }
    }

    /// Spawn clangd for `launch` and attach a profile store notifying it
    ///
    /// clangd is restarted up to `launch.max_restarts` times when it exits.
    pub fn start(
        launch: ClangdLaunch,
        root_uri: &str,
        roots: Arc<RootRegistry>,
        connections: Arc<dyn ConnectionSource>,
        project: Option<&ProjectConfiguration>,
        state: Arc<dyn WorkspaceState>,
    ) -> Result<Self, LspError> {
        let connection = Arc::new(SupervisedConnection::spawn(launch, root_uri)?);
        Ok(Self::with_connection(
            connection,
            roots,
            connections,
            project,
            state,
        ))
    }

    /// Session over an existing connection, profiles notified through it
    pub fn with_connection(
        connection: Arc<dyn LanguageServerConnection>,
        roots: Arc<RootRegistry>,
        connections: Arc<dyn ConnectionSource>,
        project: Option<&ProjectConfiguration>,
        state: Arc<dyn WorkspaceState>,
    ) -> Self {
        let profiles = Arc::new(CompilationProfileStore::new(
            CPP_LANGUAGE,
            project,
            state,
            Arc::new(ConnectionNotifier::new(connection.clone())),
        ));
        Self::new(connection, roots, connections, profiles)
    }

    /// Shut clangd down; later calls fail with `ServerShutdown`
    pub fn stop(&self) -> Result<(), LspError> {
        info!("stopping clangd");
        self.connection.shutdown()
    }

    pub fn profiles(&self) -> &CompilationProfileStore {
        &self.profiles
    }

    pub fn codec(&self) -> &UriCodec {
        &self.codec
    }

    pub fn selector(&self) -> &DocumentSelector {
        &self.selector
    }

    pub fn code_to_protocol(&self, uri: &ClientUri) -> Result<String, LspError> {
        Ok(self.codec.encode(uri)?)
    }

    pub fn protocol_to_code(&self, uri: &str) -> Result<ClientUri, LspError> {
        Ok(self.codec.decode(uri)?)
    }

    /// Register a newly opened root and push its profile to clangd
    pub fn root_opened(&self, context: RemoteRootContext) -> Result<(), LspError> {
        let id = context.id.clone();
        self.roots.open_root(context)?;

        // The root stays usable even if the server missed the announcement
        match self.profiles.announce(&id) {
            Ok(true) => debug!(stable_id = %id, "announced compilation profile"),
            Ok(false) => debug!(stable_id = %id, "root has no compilation profile"),
            Err(e) => warn!(stable_id = %id, error = %e, "failed to announce compilation profile"),
        }
        Ok(())
    }

    pub fn root_closed(&self, stable_id: &str) -> Option<RemoteRootContext> {
        self.roots.close_root(stable_id)
    }

    /// Switch a root's profile; clangd is notified by the store on change
    pub fn select_profile(
        &self,
        stable_id: &str,
        profile: &str,
    ) -> Result<SelectionOutcome, ProfileError> {
        self.profiles.set(stable_id, profile)
    }

    /// Open a document in clangd
    ///
    /// Returns `false` for documents outside the selector, which are not sent.
    pub fn did_open(&self, uri: &ClientUri, version: i32, text: &str) -> Result<bool, LspError> {
        let Some(language_id) = self.selector.language_for(uri) else {
            return Ok(false);
        };

        let wire = self.code_to_protocol(uri)?;
        self.connection.notify(
            "textDocument/didOpen",
            json!({
                "textDocument": {
                    "uri": wire,
                    "languageId": language_id,
                    "version": version,
                    "text": text
                }
            }),
        )?;
        Ok(true)
    }

    pub fn did_close(&self, uri: &ClientUri) -> Result<bool, LspError> {
        if !self.selector.matches(uri) {
            return Ok(false);
        }

        let wire = self.code_to_protocol(uri)?;
        self.connection.notify(
            "textDocument/didClose",
            json!({
                "textDocument": { "uri": wire }
            }),
        )?;
        Ok(true)
    }

    /// Find references of the symbol at `position` in every configured profile
    pub fn references_in_all_profiles(
        &self,
        uri: &ClientUri,
        position: Position,
    ) -> Result<Vec<LocationWithProfiles>, LspError> {
        let params = ReferencesAllParams {
            text_document: TextDocumentIdentifier {
                uri: self.code_to_protocol(uri)?,
            },
            position,
            context: ReferenceContext {
                include_declaration: false,
            },
            profiles: self.profiles.profile_names(),
        };

        let response = self
            .connection
            .request("textDocument/referencesAll", serde_json::to_value(&params)?)?;
        if response.is_null() {
            return Ok(Vec::new());
        }

        let locations: Vec<LspLocationWithProfiles> = serde_json::from_value(response)?;
        let locations = locations
            .into_iter()
            .map(|loc| {
                Ok(LocationWithProfiles {
                    uri: self.protocol_to_code(&loc.uri)?,
                    range: loc.range,
                    profiles: loc.profiles,
                })
            })
            .collect::<Result<Vec<_>, LspError>>()?;

        info!(uri = %uri, count = locations.len(), "references in all profiles");
        Ok(locations)
    }

    /// Send an arbitrary request whose params carry no URIs
    pub fn request(&self, method: &str, params: Value) -> Result<Value, LspError> {
        self.connection.request(method, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dvfs::{Connection, ConnectionConfiguration, StaticConnections};
    use crate::project_configuration::{CompilationProfile, LanguageConfiguration};
    use crate::workspace_state::MemoryWorkspaceState;
    use std::sync::Mutex;

    /// Fake clangd: records traffic and answers `textDocument/referencesAll`
    /// for a symbol that exists in Debug and Release builds only
    #[derive(Default)]
    struct FakeServer {
        notifications: Mutex<Vec<(String, Value)>>,
        requests: Mutex<Vec<(String, Value)>>,
    }

    impl FakeServer {
        fn notifications(&self, method: &str) -> Vec<Value> {
            self.notifications
                .lock()
                .unwrap()
                .iter()
                .filter(|(m, _)| m == method)
                .map(|(_, p)| p.clone())
                .collect()
        }
    }

    impl LanguageServerConnection for FakeServer {
        fn request(&self, method: &str, params: Value) -> Result<Value, LspError> {
            self.requests
                .lock()
                .unwrap()
                .push((method.to_string(), params.clone()));

            if method != "textDocument/referencesAll" {
                return Err(LspError::RpcError {
                    code: -32601,
                    message: "method not found".to_string(),
                });
            }

            let profiles: Vec<String> = params["profiles"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(|p| p.as_str().map(str::to_string))
                .filter(|p| p == "Debug" || p == "Release")
                .collect();

            Ok(json!([
                {
                    "uri": "sudu://host~root~2~/src/a.cpp",
                    "range": {"start": {"line": 4, "character": 2}, "end": {"line": 4, "character": 8}},
                    "profiles": profiles
                },
                {
                    "uri": "sudu://host~root~2~Debug/src/debug_only.cpp",
                    "range": {"start": {"line": 1, "character": 0}, "end": {"line": 1, "character": 6}},
                    "profiles": ["Debug"]
                }
            ]))
        }

        fn notify(&self, method: &str, params: Value) -> Result<(), LspError> {
            self.notifications
                .lock()
                .unwrap()
                .push((method.to_string(), params));
            Ok(())
        }
    }

    fn project() -> ProjectConfiguration {
        let profile = |name: &str| CompilationProfile {
            name: name.to_string(),
            description: String::new(),
            arguments: vec![],
        };
        ProjectConfiguration {
            configurations: vec![LanguageConfiguration {
                language: CPP_LANGUAGE.to_string(),
                build_tool: "cmake".to_string(),
                docker_image: String::new(),
                default_profile: "Debug".to_string(),
                compilation_profiles: vec![profile("Debug"), profile("Release"), profile("Profiling")],
            }],
        }
    }

    fn connections() -> Arc<StaticConnections> {
        Arc::new(StaticConnections::new(ConnectionConfiguration::new(vec![
            Connection {
                endpoint_label: Some("host".to_string()),
                transport_endpoint: Some("web".to_string()),
                ..Connection::default()
            },
        ])))
    }

    fn session() -> (ClangdSession, Arc<FakeServer>) {
        let server = Arc::new(FakeServer::default());

        let session = ClangdSession::with_connection(
            server.clone(),
            Arc::new(RootRegistry::new()),
            connections(),
            Some(&project()),
            Arc::new(MemoryWorkspaceState::new()),
        );
        (session, server)
    }

    /// `sh` standing in for clangd: answers requests 1 and 2 and copies
    /// everything it receives to `capture`
    #[cfg(unix)]
    fn scripted_clangd(capture: &std::path::Path) -> ClangdLaunch {
        let replies: String = [
            json!({"jsonrpc": "2.0", "id": 1, "result": {"capabilities": {}, "serverInfo": {"name": "clangd"}}}),
            json!({"jsonrpc": "2.0", "id": 2, "result": null}),
        ]
        .iter()
        .map(|reply| {
            let body = reply.to_string();
            format!("Content-Length: {}\\r\\n\\r\\n{}", body.len(), body)
        })
        .collect();

        ClangdLaunch {
            command: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                format!("printf '{replies}'; cat > \"$0\""),
                capture.display().to_string(),
            ],
            env: Vec::new(),
            cwd: None,
            initialization_options: json!({"clangdFileStatus": true, "fallbackFlags": ["-std=c++20"]}),
            max_restarts: 0,
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_start_initializes_and_stops_server() {
        let temp = tempfile::tempdir().unwrap();
        let capture = temp.path().join("received.jsonrpc");

        let session = ClangdSession::start(
            scripted_clangd(&capture),
            "file:///workspace",
            Arc::new(RootRegistry::new()),
            connections(),
            Some(&project()),
            Arc::new(MemoryWorkspaceState::new()),
        )
        .unwrap();
        session
            .root_opened(RemoteRootContext::new("web", "root", 2, "ws"))
            .unwrap();
        session.stop().unwrap();
        assert!(matches!(
            session.request("textDocument/hover", json!({})),
            Err(LspError::ServerShutdown)
        ));

        let received = std::fs::read(&capture).unwrap();
        let mut reader = std::io::Cursor::new(received);
        let mut messages = Vec::new();
        while let Some(message) = crate::lsp::read_message(&mut reader).unwrap() {
            messages.push(message);
        }

        let methods: Vec<&str> = messages
            .iter()
            .filter_map(|m| m["method"].as_str())
            .collect();
        assert_eq!(
            methods,
            vec![
                "initialize",
                "initialized",
                "workspace/didChangeConfiguration",
                "shutdown",
                "exit"
            ]
        );
        assert_eq!(messages[0]["params"]["rootUri"], "file:///workspace");
        assert_eq!(
            messages[0]["params"]["initializationOptions"],
            json!({"clangdFileStatus": true, "fallbackFlags": ["-std=c++20"]})
        );
        assert_eq!(
            messages[2]["params"],
            json!({"settings": {"compilationProfile": "Debug"}})
        );
    }

    #[test]
    fn test_root_opened_announces_profile() {
        let (session, server) = session();
        session
            .root_opened(RemoteRootContext::new("web", "root", 2, "ws"))
            .unwrap();

        assert_eq!(
            server.notifications("workspace/didChangeConfiguration"),
            vec![json!({"settings": {"compilationProfile": "Debug"}})]
        );
    }

    #[test]
    fn test_did_open_sends_wire_uri() {
        let (session, server) = session();
        session
            .root_opened(RemoteRootContext::new("web", "root", 2, "ws"))
            .unwrap();

        let uri = ClientUri::new("sudu", "web", "/ws/src/a.cpp");
        assert!(session.did_open(&uri, 1, "int main() {}").unwrap());

        let opened = server.notifications("textDocument/didOpen");
        assert_eq!(opened.len(), 1);
        assert_eq!(
            opened[0]["textDocument"]["uri"],
            "sudu://host~root~2~Debug/src/a.cpp"
        );
        assert_eq!(opened[0]["textDocument"]["languageId"], "cpp");

        let readme = ClientUri::new("sudu", "web", "/ws/README.md");
        assert!(!session.did_open(&readme, 1, "").unwrap());
        assert!(session.did_close(&uri).unwrap());
        assert_eq!(server.notifications("textDocument/didOpen").len(), 1);
    }

    #[test]
    fn test_did_open_unknown_root_fails() {
        let (session, _) = session();
        let uri = ClientUri::new("sudu", "web", "/missing/a.cpp");

        assert!(matches!(
            session.did_open(&uri, 1, ""),
            Err(LspError::Uri(_))
        ));
    }

    #[test]
    fn test_select_profile_notifies_once() {
        let (session, server) = session();
        session
            .root_opened(RemoteRootContext::new("web", "root", 2, "ws"))
            .unwrap();

        session.select_profile("ws", "Release").unwrap();
        session.select_profile("ws", "Release").unwrap();

        assert_eq!(
            server.notifications("workspace/didChangeConfiguration"),
            vec![
                json!({"settings": {"compilationProfile": "Debug"}}),
                json!({"settings": {"compilationProfile": "Release"}}),
            ]
        );

        let uri = ClientUri::new("sudu", "web", "/ws/a.cpp");
        assert_eq!(
            session.code_to_protocol(&uri).unwrap(),
            "sudu://host~root~2~Release/a.cpp"
        );
    }

    #[test]
    fn test_references_in_all_profiles() {
        let (session, server) = session();
        session
            .root_opened(RemoteRootContext::new("web", "root", 2, "ws"))
            .unwrap();

        let uri = ClientUri::new("sudu", "web", "/ws/src/a.cpp");
        let locations = session
            .references_in_all_profiles(&uri, Position::new(4, 3))
            .unwrap();

        let requests = server.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        let (method, params) = &requests[0];
        assert_eq!(method, "textDocument/referencesAll");
        assert_eq!(params["textDocument"]["uri"], "sudu://host~root~2~Debug/src/a.cpp");
        assert_eq!(params["context"]["includeDeclaration"], false);
        assert_eq!(params["profiles"], json!(["Debug", "Release", "Profiling"]));

        assert_eq!(locations.len(), 2);
        assert_eq!(locations[0].uri.to_string(), "sudu://web/ws/src/a.cpp");
        assert_eq!(locations[0].profiles, vec!["Debug", "Release"]);
        assert_eq!(locations[0].range.start, Position::new(4, 2));
        assert_eq!(locations[1].uri.profile(), Some("Debug"));
        assert_eq!(
            locations[1].uri.to_string(),
            "sudu://web/ws/src/debug_only.cpp?Debug"
        );
    }

    #[test]
    fn test_root_closed_stops_conversion() {
        let (session, _) = session();
        session
            .root_opened(RemoteRootContext::new("web", "root", 2, "ws"))
            .unwrap();
        assert!(session.root_closed("ws").is_some());

        assert!(session
            .protocol_to_code("sudu://host~root~2~Debug/a.cpp")
            .is_err());
    }
}
