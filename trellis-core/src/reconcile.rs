//! Reconciliation passes: fetch, diff, index, publish
//!
//! One pass runs its steps in a fixed order and never lets a single failed
//! step abort the whole pass; transient failures are logged and skipped.

use crate::category::Category;
use crate::config::Config;
use crate::detect::{self, ChangeSet};
use crate::git::{self, CategoryRepos};
use crate::github::{decode_listing, RepoSource};
use crate::merge;
use crate::store::{NewRepo, Store};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A repository known to the external source but not yet indexed.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub name: String,
    pub description: String,
    pub url: String,
    pub created_at: String,
    pub category: Category,
}

/// What one full pass did, for reporting.
#[derive(Debug, Serialize)]
pub struct ScanSummary {
    pub changes: ChangeSet,
    pub candidates: Vec<Candidate>,
    pub categories_published: usize,
}

/// Per-category slice of a status report.
#[derive(Debug, Serialize)]
pub struct CategoryStatus {
    pub category: Category,
    pub indexed: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub categories: Vec<CategoryStatus>,
    pub unindexed: usize,
    pub listing_cached: bool,
}

/// Orchestrates reconciliation over one managed root.
pub struct Reconciler<S> {
    root: PathBuf,
    config: Config,
    store: Store,
    source: S,
    category_repos: CategoryRepos,
}

impl<S: RepoSource> Reconciler<S> {
    pub fn new(root: &Path, config: Config, store: Store, source: S) -> Self {
        let category_repos = CategoryRepos::new(
            root,
            &config.github.username,
            config.command_timeout(),
        );
        Self {
            root: root.to_path_buf(),
            config,
            store,
            source,
            category_repos,
        }
    }

    fn listing_cache_key(&self) -> String {
        format!("github_repos_{}", self.config.github.username)
    }

    /// Find repositories present at the external source but absent from the
    /// index, upserting each as an unindexed record.
    ///
    /// A failed or empty fetch yields an empty candidate list: no information
    /// is never treated as zero repositories.
    pub fn find_unindexed(&mut self) -> crate::Result<Vec<Candidate>> {
        let username = self.config.github.username.clone();
        let key = self.listing_cache_key();

        let raw = match self.store.cache_get(&key)? {
            Some(raw) => {
                debug!(key, "remote listing served from cache");
                raw
            }
            None => match self.source.list_repositories(&username) {
                Ok(raw) => {
                    // Cache the raw payload before decoding, so a decode
                    // problem does not force an immediate refetch.
                    self.store.cache_set(&key, &raw, self.config.cache_ttl())?;
                    raw
                }
                Err(e) => {
                    warn!(error = %e, "remote listing failed, skipping reconciliation");
                    return Ok(Vec::new());
                }
            },
        };

        let remote = match decode_listing(&raw) {
            Ok(remote) => remote,
            Err(e) => {
                warn!(error = %e, "remote listing undecodable, skipping reconciliation");
                return Ok(Vec::new());
            }
        };
        if remote.is_empty() {
            return Ok(Vec::new());
        }

        let already_indexed = self.store.list_indexed_names()?;

        let mut candidates = Vec::new();
        for repo in remote {
            if Category::is_reserved_name(&repo.name) || already_indexed.contains(&repo.name) {
                continue;
            }

            let description = repo.description_or_empty().to_string();
            let category = Category::classify(&repo.name, &description);
            let candidate = Candidate {
                name: repo.name,
                description,
                url: repo.url,
                created_at: repo.created_at,
                category,
            };

            self.store.upsert(&NewRepo {
                name: candidate.name.clone(),
                description: candidate.description.clone(),
                url: candidate.url.clone(),
                category: candidate.category,
                created_at: candidate.created_at.clone(),
            })?;
            info!(name = %candidate.name, category = %candidate.category, "found unindexed repository");
            candidates.push(candidate);
        }

        Ok(candidates)
    }

    /// One full reconciliation pass, steps in fixed order: detect local
    /// changes, record them, fetch-and-diff the remote listing, index the
    /// candidates, regenerate every category document, commit.
    pub fn scan_once(&mut self) -> crate::Result<ScanSummary> {
        info!("starting reconciliation pass");

        // 1. Local change detection feeds the index.
        let changes = match detect::detect(&mut self.store, &detect::watch_dirs(&self.root)) {
            Ok(changes) => changes,
            Err(e) => {
                warn!(error = %e, "change detection failed, continuing pass");
                ChangeSet::default()
            }
        };
        self.record_local_changes(&changes);

        // 2. Remote diff.
        let candidates = self.find_unindexed()?;

        // 3. Publish each candidate into its category.
        for candidate in &candidates {
            if let Err(e) = self.store.mark_indexed(&candidate.name, candidate.category) {
                warn!(name = %candidate.name, error = %e, "could not mark repository indexed");
            }
        }

        // 4. Regenerate every category document.
        let mut published = 0;
        for category in Category::ALL {
            match self.publish_category(category) {
                Ok(()) => published += 1,
                Err(e) => warn!(category = %category, error = %e, "category publish failed"),
            }
        }

        // 5. Commit the managed root.
        if let Err(e) = git::commit_all(&self.root, "Auto-update: scan complete", self.config.command_timeout()) {
            warn!(error = %e, "commit of managed root failed");
        }

        info!(
            added = changes.added.len(),
            modified = changes.modified.len(),
            deleted = changes.deleted.len(),
            candidates = candidates.len(),
            published,
            "reconciliation pass complete"
        );

        Ok(ScanSummary {
            changes,
            candidates,
            categories_published: published,
        })
    }

    /// Upsert records for locally observed items, creating the remote
    /// repository for items seen for the first time. Deletions are log-only:
    /// the index keeps history and never retracts an indexed flag.
    fn record_local_changes(&mut self, changes: &ChangeSet) {
        for change in changes.added.iter().chain(&changes.modified) {
            let path = Path::new(&change.fingerprint.path);
            let description = detect::extract_description(path);

            // A brand-new item gets a remote repository, so the next listing
            // enumeration finds it and indexes it. Creation failure is a
            // skipped step, not a failed pass.
            let known = self.store.contains(&change.name).unwrap_or(false);
            if !known {
                match self.source.create_repository(&change.name, &description) {
                    Ok(()) => info!(name = %change.name, "created remote repository"),
                    Err(e) => {
                        warn!(name = %change.name, error = %e, "could not create remote repository")
                    }
                }
            }

            let repo = NewRepo {
                name: change.name.clone(),
                description,
                url: format!(
                    "https://github.com/{}/{}",
                    self.config.github.username, change.name
                ),
                category: change.category,
                created_at: String::new(),
            };
            if let Err(e) = self.store.upsert(&repo) {
                warn!(name = %change.name, error = %e, "could not record local item");
            }
        }
        for change in &changes.deleted {
            info!(name = %change.name, "watched file deleted; index entry kept");
        }
    }

    /// Regenerate one category's documents: the local index document and the
    /// remote category repository's document.
    pub fn publish_category(&mut self, category: Category) -> crate::Result<()> {
        let repos = self.store.list_by_category(category)?;
        let region = merge::render_region(&repos);

        // Local document under the managed root.
        let local_doc = self.root.join(category.as_str()).join("README.md");
        merge_into_file(&local_doc, category, &region)?;

        // Remote category repository.
        let clone = self.category_repos.ensure_clone(category)?;
        merge_into_file(&clone.join("README.md"), category, &region)?;
        let message = format!("Auto-update: {} repositories indexed", repos.len());
        self.category_repos.publish(category, &message)?;

        Ok(())
    }

    /// Regenerate only the local documents, skipping remote synchronization.
    /// Used by tests and by callers that have no remote configured.
    pub fn publish_local_only(&mut self) -> crate::Result<()> {
        for category in Category::ALL {
            let repos = self.store.list_by_category(category)?;
            let region = merge::render_region(&repos);
            let local_doc = self.root.join(category.as_str()).join("README.md");
            merge_into_file(&local_doc, category, &region)?;
        }
        Ok(())
    }

    /// Drop the cached remote listing so the next pass re-enumerates.
    pub fn purge_listing_cache(&mut self) -> crate::Result<()> {
        let key = self.listing_cache_key();
        self.store.cache_delete(&key)?;
        info!(key, "purged remote listing cache");
        Ok(())
    }

    /// Delete expired cache entries. Safe at any time.
    pub fn purge_expired_cache(&mut self) -> crate::Result<usize> {
        self.store.cache_purge_expired()
    }

    /// Counts per category plus cache state.
    pub fn status(&mut self) -> crate::Result<StatusReport> {
        let mut categories = Vec::new();
        for category in Category::ALL {
            categories.push(CategoryStatus {
                category,
                indexed: self.store.count_indexed(category)?,
            });
        }
        let key = self.listing_cache_key();
        Ok(StatusReport {
            categories,
            unindexed: self.store.count_unindexed()?,
            listing_cached: self.store.cache_get(&key)?.is_some(),
        })
    }

    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }
}

/// Read a document (seeding it when absent), merge the region, write back.
fn merge_into_file(path: &Path, category: Category, region: &str) -> crate::Result<()> {
    let existing = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "document missing, seeding");
            merge::seed_document(category)
        }
        Err(e) => return Err(e.into()),
    };
    let merged = merge::merge(&existing, region);
    if merged != existing {
        std::fs::write(path, merged)?;
        debug!(path = %path.display(), "document regenerated");
    }
    Ok(())
}
