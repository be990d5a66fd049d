//! LSP (Language Server Protocol) integration with clangd
//!
//! Spawns clangd over stdin/stdout and converts every URI that crosses the
//! connection between the editor's form and the self-describing Sudu wire
//! form.

mod client;
pub mod launch;
pub mod selector;
mod session;
mod supervisor;
pub mod types;

pub use client::{read_message, write_message, LanguageServerConnection, LspClient};
pub use launch::{server_arguments, ClangdLaunch};
pub use selector::{DocumentFilter, DocumentSelector};
pub use session::{ClangdSession, ConnectionNotifier};
pub use supervisor::{ConnectionStarter, SupervisedConnection};
pub use types::{
    LocationWithProfiles, LspError, LspLocationWithProfiles, Position, Range, ReferenceContext,
    ReferencesAllParams, TextDocumentIdentifier,
};
