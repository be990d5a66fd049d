pub mod compilation_profiles;
pub mod config;
pub mod dvfs;
pub mod lsp;
pub mod project_configuration;
pub mod references;
pub mod uri_codec;
pub mod workspace_state;
