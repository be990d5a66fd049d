//! Restarting clangd connection
//!
//! Wraps whatever connection the starter produces. When a call fails because
//! the server went away, the server is started again (up to a fixed number
//! of times), the last configuration is replayed and the call is retried once.

use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{error, info, warn};

use super::client::{LanguageServerConnection, LspClient};
use super::launch::ClangdLaunch;
use super::types::LspError;

const DID_CHANGE_CONFIGURATION: &str = "workspace/didChangeConfiguration";

/// Produces a started and initialized connection
pub type ConnectionStarter =
    Box<dyn Fn() -> Result<Arc<dyn LanguageServerConnection>, LspError> + Send + Sync>;

struct Supervised {
    /// `None` once stopped or out of restarts
    connection: Option<Arc<dyn LanguageServerConnection>>,
    /// Bumped on every restart
    generation: u64,
    restarts: u32,
    /// Params of the last `workspace/didChangeConfiguration`
    configuration: Option<Value>,
}

pub struct SupervisedConnection {
    start: ConnectionStarter,
    max_restarts: u32,
    state: Mutex<Supervised>,
}

impl SupervisedConnection {
    /// Start the first connection; fails if that start fails
    pub fn new(max_restarts: u32, start: ConnectionStarter) -> Result<Self, LspError> {
        let connection = start()?;
        Ok(Self {
            start,
            max_restarts,
            state: Mutex::new(Supervised {
                connection: Some(connection),
                generation: 0,
                restarts: 0,
                configuration: None,
            }),
        })
    }

    /// Spawn clangd and initialize it with `launch.initialization_options`
    pub fn spawn(launch: ClangdLaunch, root_uri: &str) -> Result<Self, LspError> {
        let root_uri = root_uri.to_string();
        let max_restarts = launch.max_restarts;
        Self::new(
            max_restarts,
            Box::new(move || {
                let client = LspClient::spawn(&launch)?;
                client.initialize(&root_uri, launch.initialization_options.clone())?;
                info!(command = %launch.command, root = %root_uri, "clangd started");
                Ok(Arc::new(client) as Arc<dyn LanguageServerConnection>)
            }),
        )
    }

    /// Restarts performed so far
    pub fn restarts(&self) -> u32 {
        self.lock().restarts
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Supervised> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> Result<(Arc<dyn LanguageServerConnection>, u64), LspError> {
        let state = self.lock();
        let connection = state.connection.clone().ok_or(LspError::ServerShutdown)?;
        Ok((connection, state.generation))
    }

    /// Replace the connection of `generation` after it failed with `cause`
    ///
    /// A caller that lost the race gets the connection already started by
    /// the winner.
    fn restart(
        &self,
        generation: u64,
        cause: LspError,
    ) -> Result<Arc<dyn LanguageServerConnection>, LspError> {
        let mut state = self.lock();
        if state.generation != generation {
            return state.connection.clone().ok_or(cause);
        }
        if state.connection.is_none() {
            return Err(cause);
        }
        if state.restarts >= self.max_restarts {
            error!(
                restarts = state.restarts,
                error = %cause,
                "clangd exited and will not be restarted"
            );
            state.connection = None;
            return Err(cause);
        }

        state.restarts += 1;
        warn!(
            attempt = state.restarts,
            max = self.max_restarts,
            error = %cause,
            "clangd exited unexpectedly, restarting"
        );
        let connection = (self.start)()?;
        if let Some(params) = &state.configuration {
            connection.notify(DID_CHANGE_CONFIGURATION, params.clone())?;
        }
        state.connection = Some(connection.clone());
        state.generation += 1;
        Ok(connection)
    }

    fn call<T>(
        &self,
        op: impl Fn(&dyn LanguageServerConnection) -> Result<T, LspError>,
    ) -> Result<T, LspError> {
        let (connection, generation) = self.current()?;
        match op(connection.as_ref()) {
            Err(e) if is_crash(&e) => {
                drop(connection);
                let connection = self.restart(generation, e)?;
                op(connection.as_ref())
            }
            result => result,
        }
    }
}

/// Failures meaning the server process is gone
fn is_crash(error: &LspError) -> bool {
    matches!(error, LspError::ServerShutdown | LspError::IoError(_))
}

impl LanguageServerConnection for SupervisedConnection {
    fn request(&self, method: &str, params: Value) -> Result<Value, LspError> {
        self.call(|connection| connection.request(method, params.clone()))
    }

    fn notify(&self, method: &str, params: Value) -> Result<(), LspError> {
        if method != DID_CHANGE_CONFIGURATION {
            return self.call(|connection| connection.notify(method, params.clone()));
        }

        self.lock().configuration = Some(params.clone());
        let (connection, generation) = self.current()?;
        match connection.notify(method, params) {
            // The restart replays the recorded configuration
            Err(e) if is_crash(&e) => {
                drop(connection);
                self.restart(generation, e).map(|_| ())
            }
            result => result,
        }
    }

    fn shutdown(&self) -> Result<(), LspError> {
        let connection = self.lock().connection.take();
        match connection {
            Some(connection) => connection.shutdown(),
            None => Ok(()),
        }
    }
}
