//! sudu-clangd command line
//!
//! Access to the URI codec, the compilation profile store and the clangd
//! launch description of a Sudu workspace, and a supervised clangd session.

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use sudu_clangd_lib::compilation_profiles::{
    CompilationProfileStore, ConfigurationNotifier, ProfileSettings, SelectionOutcome,
};
use sudu_clangd_lib::config::{default_settings_path, load_settings};
use sudu_clangd_lib::dvfs::{
    ConnectionConfiguration, RemoteRootContext, RootRegistry, StaticConnections,
};
use sudu_clangd_lib::lsp::{ClangdLaunch, ClangdSession, LspError};
use sudu_clangd_lib::project_configuration::{load_project_configuration, CPP_LANGUAGE};
use sudu_clangd_lib::uri_codec::{ClientUri, UriCodec};
use sudu_clangd_lib::workspace_state::JsonWorkspaceState;

#[derive(Parser)]
#[command(name = "sudu-clangd")]
#[command(author, version, about = "Sudu remote workspace bridge for clangd")]
#[command(propagate_version = true)]
struct Cli {
    /// Connection table published by the Sudu filesystem extension
    #[arg(long, value_name = "FILE", global = true)]
    connections: Option<PathBuf>,

    /// Open remote roots (JSON array of root contexts)
    #[arg(long, value_name = "FILE", global = true)]
    roots: Option<PathBuf>,

    /// Workspace holding .sudu/project_configuration.json
    #[arg(long, value_name = "DIR", default_value = ".", global = true)]
    workspace: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a client URI to its wire form
    Encode {
        #[arg(value_name = "URI")]
        uri: String,
    },

    /// Convert a wire URI to its client form
    Decode {
        #[arg(value_name = "URI")]
        uri: String,
    },

    /// Inspect or change compilation profiles
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },

    /// Print the clangd command line for a transport endpoint
    LaunchArgs {
        #[arg(value_name = "ENDPOINT")]
        transport_endpoint: String,

        /// Settings file (defaults to the user config directory)
        #[arg(long, value_name = "FILE")]
        settings: Option<PathBuf>,
    },

    /// Run clangd for the workspace until interrupted
    Start {
        #[arg(value_name = "ENDPOINT")]
        transport_endpoint: String,

        /// Settings file (defaults to the user config directory)
        #[arg(long, value_name = "FILE")]
        settings: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// List configured profiles
    List,
    /// Show the selected profile of a root
    Get {
        #[arg(value_name = "STABLE_ID")]
        stable_id: String,
    },
    /// Select a profile for a root
    Set {
        #[arg(value_name = "STABLE_ID")]
        stable_id: String,
        #[arg(value_name = "PROFILE")]
        profile: String,
    },
}

/// Entry of the roots file; `id` is generated when absent
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RootEntry {
    host: String,
    root_id: String,
    revision_id: u64,
    #[serde(default)]
    id: Option<String>,
}

/// No clangd is attached to the command line; changes are only logged
struct DetachedNotifier;

impl ConfigurationNotifier for DetachedNotifier {
    fn did_change_configuration(&self, settings: &ProfileSettings) -> Result<(), LspError> {
        tracing::info!(
            profile = %settings.compilation_profile,
            "no clangd attached, configuration change recorded only"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // stdout carries command output, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    match &cli.command {
        Commands::Encode { uri } => {
            let codec = build_codec(&cli).await?;
            let uri: ClientUri = uri.parse().map_err(|e| format!("{e}"))?;
            println!("{}", codec.encode(&uri).map_err(|e| e.to_string())?);
        }
        Commands::Decode { uri } => {
            let codec = build_codec(&cli).await?;
            println!("{}", codec.decode(uri).map_err(|e| e.to_string())?);
        }
        Commands::Profile { command } => {
            let store = open_store(&cli.workspace).await?;
            match command {
                ProfileCommands::List => {
                    for profile in store.profiles() {
                        if profile.description.is_empty() {
                            println!("{}", profile.name);
                        } else {
                            println!("{}\t{}", profile.name, profile.description);
                        }
                    }
                }
                ProfileCommands::Get { stable_id } => match store.get(stable_id) {
                    Some(profile) => println!("{profile}"),
                    None => return Err(format!("no compilation profile for {stable_id}")),
                },
                ProfileCommands::Set { stable_id, profile } => {
                    match store.set(stable_id, profile).map_err(|e| e.to_string())? {
                        SelectionOutcome::Unchanged => println!("{profile} (unchanged)"),
                        SelectionOutcome::Changed { previous, .. } => match previous {
                            Some(previous) => println!("{previous} -> {profile}"),
                            None => println!("{profile}"),
                        },
                        SelectionOutcome::Superseded { current } => {
                            return Err(format!(
                                "selection superseded by {}",
                                current.unwrap_or_default()
                            ))
                        }
                    }
                }
            }
        }
        Commands::LaunchArgs {
            transport_endpoint,
            settings,
        } => {
            let settings_path = settings.clone().unwrap_or_else(default_settings_path);
            let settings = load_settings(&settings_path);
            let connections = load_connections(cli.connections.as_deref())?;

            let launch = ClangdLaunch::new(&settings, &connections, transport_endpoint);
            for (key, value) in &launch.env {
                println!("{key}={value}");
            }
            println!("{}", launch.command);
            for arg in &launch.args {
                println!("{arg}");
            }
        }
        Commands::Start {
            transport_endpoint,
            settings,
        } => start(&cli, transport_endpoint, settings.as_deref()).await?,
    }

    Ok(())
}

async fn start(
    cli: &Cli,
    transport_endpoint: &str,
    settings: Option<&Path>,
) -> Result<(), String> {
    let settings_path = settings.map_or_else(default_settings_path, Path::to_path_buf);
    let settings = load_settings(&settings_path);
    let connections = load_connections(cli.connections.as_deref())?;
    let launch = ClangdLaunch::new(&settings, &connections, transport_endpoint);

    let workspace = std::fs::canonicalize(&cli.workspace)
        .map_err(|e| format!("Failed to resolve workspace {:?}: {}", cli.workspace, e))?;
    let project = load_project_configuration(&workspace).await?;
    let state = JsonWorkspaceState::for_workspace(&workspace.to_string_lossy())
        .map_err(|e| e.to_string())?;
    let roots = load_roots(cli.roots.as_deref())?;
    let root_uri = format!("file://{}", workspace.display());

    // The LSP client blocks on clangd's pipes
    let session = tokio::task::spawn_blocking(move || {
        let session = ClangdSession::start(
            launch,
            &root_uri,
            Arc::new(RootRegistry::new()),
            Arc::new(StaticConnections::new(connections)),
            project.as_ref(),
            Arc::new(state),
        )?;
        for root in roots {
            session.root_opened(root)?;
        }
        Ok::<_, LspError>(session)
    })
    .await
    .map_err(|e| e.to_string())?
    .map_err(|e| e.to_string())?;

    tracing::info!(endpoint = %transport_endpoint, "clangd running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await.map_err(|e| e.to_string())?;

    tokio::task::spawn_blocking(move || session.stop())
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| e.to_string())
}

fn load_connections(path: Option<&Path>) -> Result<ConnectionConfiguration, String> {
    match path {
        Some(path) => ConnectionConfiguration::load(path),
        None => Ok(ConnectionConfiguration::default()),
    }
}

fn load_roots(path: Option<&Path>) -> Result<Vec<RemoteRootContext>, String> {
    let Some(path) = path else {
        return Ok(Vec::new());
    };
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read roots {:?}: {}", path, e))?;
    let entries: Vec<RootEntry> = serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse roots {:?}: {}", path, e))?;

    Ok(entries
        .into_iter()
        .map(|entry| match entry.id {
            Some(id) => RemoteRootContext::new(&entry.host, &entry.root_id, entry.revision_id, &id),
            None => RemoteRootContext::with_generated_id(
                &entry.host,
                &entry.root_id,
                entry.revision_id,
            ),
        })
        .collect())
}

async fn open_store(workspace: &Path) -> Result<CompilationProfileStore, String> {
    let key = std::fs::canonicalize(workspace)
        .unwrap_or_else(|_| workspace.to_path_buf())
        .to_string_lossy()
        .to_string();
    let state = JsonWorkspaceState::for_workspace(&key).map_err(|e| e.to_string())?;

    CompilationProfileStore::load(
        workspace,
        CPP_LANGUAGE,
        Arc::new(state),
        Arc::new(DetachedNotifier),
    )
    .await
    .map_err(|e| e.to_string())
}

async fn build_codec(cli: &Cli) -> Result<UriCodec, String> {
    let connections = load_connections(cli.connections.as_deref())?;

    let registry = RootRegistry::new();
    for root in load_roots(cli.roots.as_deref())? {
        tracing::debug!(id = %root.id, host = %root.host, "opening root");
        registry.open_root(root).map_err(|e| e.to_string())?;
    }

    let store = open_store(&cli.workspace).await?;

    Ok(UriCodec::new(
        Arc::new(registry),
        Arc::new(StaticConnections::new(connections)),
        Arc::new(store),
    ))
}
