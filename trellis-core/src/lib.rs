//! Trellis Core - Repository index reconciliation
//!
//! This library keeps per-category README indexes synchronized with the
//! repositories owned by a GitHub account: change detection over watched
//! markdown files, a durable repository index, a time-boxed lookup cache,
//! and a content-preserving document merge.

pub mod category;
pub mod command;
pub mod config;
pub mod detect;
pub mod error;
pub mod fingerprint;
pub mod git;
pub mod github;
pub mod merge;
pub mod reconcile;
pub mod store;
pub mod watch;

pub use category::Category;
pub use config::Config;
pub use detect::{ChangeSet, FileChange};
pub use error::TrellisError;
pub use fingerprint::FileFingerprint;
pub use github::{GhCli, RemoteRepo, RepoSource};
pub use reconcile::{Candidate, Reconciler, ScanSummary, StatusReport};
pub use store::{NewRepo, RepoRecord, Store};

/// Result type alias for trellis operations
pub type Result<T> = std::result::Result<T, TrellisError>;
