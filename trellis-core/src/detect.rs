//! Change detection over watched category directories

use crate::category::Category;
use crate::fingerprint::FileFingerprint;
use crate::store::Store;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// The reserved document name inside each watched directory: the index
/// document itself, never a monitored source item. Compared case-insensitively.
pub const INDEX_DOC_NAME: &str = "readme.md";

/// One detected event. Deleted items carry the last-known (stale)
/// fingerprint, not a live read.
#[derive(Debug, Clone, Serialize)]
pub struct FileChange {
    /// Logical item identifier: the file's base name without extension
    pub name: String,
    pub category: Category,
    pub fingerprint: FileFingerprint,
}

/// Result of one detection pass.
#[derive(Debug, Default, Serialize)]
pub struct ChangeSet {
    pub added: Vec<FileChange>,
    pub modified: Vec<FileChange>,
    pub deleted: Vec<FileChange>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// The watched (directory, category) pairs under a managed root.
pub fn watch_dirs(root: &Path) -> Vec<(PathBuf, Category)> {
    Category::ALL
        .iter()
        .map(|c| (root.join(c.as_str()), *c))
        .collect()
}

/// Run one detection pass: scan the watched directories, diff against the
/// stored snapshot, then commit the new snapshot atomically.
pub fn detect(store: &mut Store, dirs: &[(PathBuf, Category)]) -> crate::Result<ChangeSet> {
    let previous = store.load_fingerprints()?;

    let mut current: HashMap<String, (FileFingerprint, Category)> = HashMap::new();
    for (dir, category) in dirs {
        for path in scan_dir(dir) {
            match FileFingerprint::read(&path) {
                Ok(fp) => {
                    current.insert(fp.path.clone(), (fp, *category));
                }
                Err(e) => {
                    // A file vanishing or turning unreadable mid-scan must not
                    // fail the pass; it will surface as deleted next time.
                    warn!(path = %path.display(), error = %e, "skipping unreadable file");
                }
            }
        }
    }

    let mut changes = ChangeSet::default();

    for (path, (fp, category)) in &current {
        let change = FileChange {
            name: item_name(path),
            category: *category,
            fingerprint: fp.clone(),
        };
        match previous.get(path) {
            None => {
                info!(path, "detected new file");
                changes.added.push(change);
            }
            Some(old) if !fp.matches(old) => {
                info!(path, "detected modified file");
                changes.modified.push(change);
            }
            Some(_) => {}
        }
    }

    for (path, old) in &previous {
        if !current.contains_key(path) {
            info!(path, "detected deleted file");
            changes.deleted.push(FileChange {
                name: item_name(path),
                category: category_for(path, dirs),
                fingerprint: old.clone(),
            });
        }
    }

    // Atomic commit point: a crash before this leaves the previous snapshot
    // intact and the next pass recomputes the same diff.
    let snapshot = current
        .into_iter()
        .map(|(path, (fp, _))| (path, fp))
        .collect();
    store.replace_fingerprints(&snapshot)?;

    Ok(changes)
}

/// Non-recursive scan of one directory for watched markdown files.
/// An unreadable directory is logged and treated as empty.
fn scan_dir(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "watch directory unreadable, treating as empty");
            return Vec::new();
        }
    };

    let mut files = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let is_markdown = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("md"))
            .unwrap_or(false);
        let is_index_doc = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase() == INDEX_DOC_NAME)
            .unwrap_or(false);
        if is_markdown && !is_index_doc {
            files.push(path);
        }
    }
    debug!(dir = %dir.display(), count = files.len(), "scanned watch directory");
    files
}

fn item_name(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

/// Category of a stored path, derived from its parent directory. Paths whose
/// directory is no longer watched fall back to Default.
fn category_for(path: &str, dirs: &[(PathBuf, Category)]) -> Category {
    let parent = Path::new(path).parent();
    dirs.iter()
        .find(|(dir, _)| Some(dir.as_path()) == parent)
        .map(|(_, c)| *c)
        .unwrap_or(Category::Default)
}

/// Extract a description from a markdown file: the first heading, else the
/// first substantial line, else a generated placeholder.
pub fn extract_description(path: &Path) -> String {
    let fallback = || {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("Auto-generated repository for {}", stem)
    };

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return fallback(),
    };

    for line in content.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("# ") {
            return rest.trim().to_string();
        }
        if let Some(rest) = line.strip_prefix("## ") {
            return rest.trim().to_string();
        }
        if !line.is_empty() && !line.starts_with('#') && line.len() > 10 {
            return if line.len() > 100 {
                // Truncation must land on a char boundary; multibyte text
                // would otherwise panic the slice.
                let mut end = 100;
                while !line.is_char_boundary(end) {
                    end -= 1;
                }
                format!("{}...", &line[..end])
            } else {
                line.to_string()
            };
        }
    }

    fallback()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        Store::init(dir.path()).unwrap();
        let store = Store::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_detection_classifies_adds() {
        let (dir, mut store) = setup();
        let dirs = watch_dirs(dir.path());
        let default_dir = dir.path().join("Default");

        std::fs::write(default_dir.join("a.md"), "# A").unwrap();
        let first = detect(&mut store, &dirs).unwrap();
        assert_eq!(first.added.len(), 1);
        assert_eq!(first.added[0].name, "a");
        assert_eq!(first.added[0].category, Category::Default);

        // Snapshot S1 = {a}; current = {a, b} => added = [b] only.
        std::fs::write(default_dir.join("b.md"), "# B").unwrap();
        let second = detect(&mut store, &dirs).unwrap();
        assert_eq!(second.added.len(), 1);
        assert_eq!(second.added[0].name, "b");
        assert!(second.modified.is_empty());
        assert!(second.deleted.is_empty());
    }

    #[test]
    fn test_detection_is_stable_without_changes() {
        let (dir, mut store) = setup();
        let dirs = watch_dirs(dir.path());
        std::fs::write(dir.path().join("Script").join("tool.md"), "# Tool").unwrap();

        let first = detect(&mut store, &dirs).unwrap();
        assert!(!first.is_empty());

        // No filesystem change: two further passes both yield empty sets.
        for _ in 0..2 {
            let pass = detect(&mut store, &dirs).unwrap();
            assert!(pass.is_empty());
        }
    }

    #[test]
    fn test_detection_reports_modifications_and_deletions() {
        let (dir, mut store) = setup();
        let dirs = watch_dirs(dir.path());
        let path = dir.path().join("Trading").join("bot.md");
        std::fs::write(&path, "v1").unwrap();
        detect(&mut store, &dirs).unwrap();

        std::fs::write(&path, "v2 with different content").unwrap();
        let pass = detect(&mut store, &dirs).unwrap();
        assert_eq!(pass.modified.len(), 1);
        assert_eq!(pass.modified[0].name, "bot");

        std::fs::remove_file(&path).unwrap();
        let pass = detect(&mut store, &dirs).unwrap();
        assert_eq!(pass.deleted.len(), 1);
        assert_eq!(pass.deleted[0].category, Category::Trading);
        // Deleted events carry the stale fingerprint from the snapshot.
        assert!(!pass.deleted[0].fingerprint.hash.is_empty());
    }

    #[test]
    fn test_readme_and_non_markdown_are_ignored() {
        let (dir, mut store) = setup();
        let dirs = watch_dirs(dir.path());
        let default_dir = dir.path().join("Default");
        std::fs::write(default_dir.join("ReadMe.MD"), "# index doc").unwrap();
        std::fs::write(default_dir.join("notes.txt"), "not markdown").unwrap();

        let pass = detect(&mut store, &dirs).unwrap();
        assert!(pass.is_empty());
    }

    #[test]
    fn test_missing_directory_treated_as_empty() {
        let (dir, mut store) = setup();
        std::fs::remove_dir_all(dir.path().join("Crawler")).unwrap();
        let pass = detect(&mut store, &watch_dirs(dir.path())).unwrap();
        assert!(pass.is_empty());
    }

    #[test]
    fn test_extract_description() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("proj.md");

        std::fs::write(&path, "\n# My Project\nbody").unwrap();
        assert_eq!(extract_description(&path), "My Project");

        std::fs::write(&path, "just a plain description line").unwrap();
        assert_eq!(extract_description(&path), "just a plain description line");

        std::fs::write(&path, "").unwrap();
        assert_eq!(
            extract_description(&path),
            "Auto-generated repository for proj"
        );
    }

    #[test]
    fn test_extract_description_truncates_on_char_boundary() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("proj.md");

        // 80 three-byte chars: 240 bytes, and byte 100 is mid-character.
        let long_line = "汉".repeat(80);
        std::fs::write(&path, &long_line).unwrap();

        let description = extract_description(&path);
        assert!(description.ends_with("..."));
        let kept = description.trim_end_matches("...");
        assert!(kept.len() <= 100);
        assert!(long_line.starts_with(kept));
    }
}
