//! Remote repository enumeration through the GitHub CLI

use crate::command::{run_checked, run_with_timeout};
use crate::error::TrellisError;
use serde::{Deserialize, Serialize};
use std::process::Command;
use std::time::Duration;

/// One repository as reported by the external listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRepo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: String,
    pub url: String,
    #[serde(default)]
    pub is_private: bool,
}

impl RemoteRepo {
    pub fn description_or_empty(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }
}

/// Source of the full remote repository listing. The reconciler only ever
/// talks to this through the lookup cache.
pub trait RepoSource {
    /// List all repositories owned by an account, as the raw JSON array the
    /// external tool produced. The raw payload is what gets cached; decoding
    /// happens after.
    fn list_repositories(&self, username: &str) -> crate::Result<String>;

    /// Create a remote repository for a newly observed local item, so the
    /// next listing enumeration can pick it up.
    fn create_repository(&self, name: &str, description: &str) -> crate::Result<()>;
}

/// Decode a raw listing payload.
pub fn decode_listing(raw: &str) -> crate::Result<Vec<RemoteRepo>> {
    Ok(serde_json::from_str(raw)?)
}

/// `gh`-backed repository source.
pub struct GhCli {
    timeout: Duration,
}

impl GhCli {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Startup check: the CLI must exist and be authenticated. Fatal when it
    /// is not; nothing mid-loop ever depends on this succeeding again.
    pub fn ensure_available(&self) -> crate::Result<()> {
        let mut cmd = Command::new("gh");
        cmd.args(["auth", "status"]);
        match run_with_timeout(cmd, self.timeout) {
            Ok(output) if output.success => Ok(()),
            _ => Err(TrellisError::GhUnavailable),
        }
    }
}

impl RepoSource for GhCli {
    fn list_repositories(&self, username: &str) -> crate::Result<String> {
        let mut cmd = Command::new("gh");
        cmd.args([
            "repo",
            "list",
            username,
            "--json",
            "name,description,createdAt,url,isPrivate",
            "--limit",
            "1000",
        ]);
        run_checked(cmd, self.timeout)
    }

    fn create_repository(&self, name: &str, description: &str) -> crate::Result<()> {
        let mut cmd = Command::new("gh");
        cmd.args(["repo", "create", name, "--description", description, "--public"]);
        run_checked(cmd, self.timeout)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_listing() {
        let raw = r#"[
            {"name":"algo-trader","description":"auto trading bot",
             "createdAt":"2024-01-01T00:00:00Z",
             "url":"https://github.com/u/algo-trader","isPrivate":false},
            {"name":"bare","description":null,
             "createdAt":"2024-02-01T00:00:00Z",
             "url":"https://github.com/u/bare","isPrivate":true}
        ]"#;
        let repos = decode_listing(raw).unwrap();
        assert_eq!(repos.len(), 2);
        assert_eq!(repos[0].name, "algo-trader");
        assert_eq!(repos[0].description_or_empty(), "auto trading bot");
        assert_eq!(repos[1].description_or_empty(), "");
        assert!(repos[1].is_private);
    }

    #[test]
    fn test_decode_rejects_malformed_payload() {
        assert!(decode_listing("not json").is_err());
    }
}
