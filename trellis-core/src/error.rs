//! Error types for trellis operations

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum TrellisError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(String),

    #[error("Config already exists at {}", .0.display())]
    ConfigExists(PathBuf),

    #[error("Not a trellis root (no .trellis directory). Run 'trellis init' first.")]
    NotInitialized,

    #[error("Missing required setting: {0}. Edit .trellis/config.toml.")]
    MissingSetting(&'static str),

    #[error("Repository not found in index: {0}")]
    RepoNotFound(String),

    #[error("Command `{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Command `{command}` timed out after {seconds}s")]
    CommandTimeout { command: String, seconds: u64 },

    #[error("GitHub CLI unavailable or not authenticated. Run 'gh auth login' first.")]
    GhUnavailable,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
