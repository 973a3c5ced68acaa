//! Durable state backed by SQLite: repository index, lookup cache,
//! and the watched-file fingerprint snapshot.

use crate::category::Category;
use crate::error::TrellisError;
use crate::fingerprint::FileFingerprint;
use crate::merge;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

const SCHEMA_VERSION: i32 = 1;

/// Directory holding trellis state under the managed root
pub const TRELLIS_DIR: &str = ".trellis";
const DB_FILE: &str = "trellis.db";
const CONFIG_FILE: &str = "config.toml";

/// A repository record as stored in the index.
#[derive(Debug, Clone, Serialize)]
pub struct RepoRecord {
    pub name: String,
    pub description: String,
    pub url: String,
    pub category: Category,
    /// Creation timestamp as reported by the external source (raw ISO-8601)
    pub created_at: String,
    pub is_indexed: bool,
    pub indexed_at: Option<i64>,
    pub updated_at: i64,
}

/// Fields accepted by [`Store::upsert`]. Inserts default to unindexed;
/// replacing an existing record never touches its indexed state.
#[derive(Debug, Clone)]
pub struct NewRepo {
    pub name: String,
    pub description: String,
    pub url: String,
    pub category: Category,
    pub created_at: String,
}

/// Single-process durable store. One SQLite database holds the repository
/// table, the expiring lookup cache, and the fingerprint snapshot; WAL mode
/// plus a busy timeout serialize access across connections.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Initialize a managed root: .trellis/, config.toml, the database,
    /// and one directory per category seeded with a markered README.
    pub fn init(root: &Path) -> crate::Result<()> {
        let trellis_dir = root.join(TRELLIS_DIR);
        let config_path = trellis_dir.join(CONFIG_FILE);

        if config_path.exists() {
            return Err(TrellisError::ConfigExists(config_path));
        }

        fs::create_dir_all(&trellis_dir)?;
        fs::write(&config_path, crate::config::DEFAULT_CONFIG)?;

        for category in Category::ALL {
            let dir = root.join(category.as_str());
            fs::create_dir_all(&dir)?;
            let readme = dir.join("README.md");
            if !readme.exists() {
                fs::write(&readme, merge::seed_document(category))?;
            }
        }

        let conn = Self::open_db(&trellis_dir.join(DB_FILE))?;
        drop(conn);
        info!(root = %root.display(), "initialized trellis root");
        Ok(())
    }

    /// Open the store under a managed root.
    ///
    /// An unreadable or malformed database is moved aside and rebuilt empty
    /// rather than failing: staleness is preferred over unavailability.
    pub fn open(root: &Path) -> crate::Result<Self> {
        let trellis_dir = root.join(TRELLIS_DIR);
        if !trellis_dir.exists() {
            return Err(TrellisError::NotInitialized);
        }

        let db_path = trellis_dir.join(DB_FILE);
        let conn = match Self::open_db(&db_path) {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, db = %db_path.display(), "database unreadable, rebuilding empty");
                let backup = db_path.with_extension("db.corrupt");
                let _ = fs::rename(&db_path, &backup);
                Self::open_db(&db_path)?
            }
        };

        Ok(Self { conn })
    }

    /// Path of the config file under a managed root.
    pub fn config_path(root: &Path) -> PathBuf {
        root.join(TRELLIS_DIR).join(CONFIG_FILE)
    }

    fn open_db(db_path: &Path) -> crate::Result<Connection> {
        let conn = Connection::open(db_path)?;
        Self::init_schema(&conn)?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> crate::Result<()> {
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            ",
        )?;

        let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version == 0 {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS repositories (
                    id INTEGER PRIMARY KEY,
                    name TEXT UNIQUE NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    url TEXT NOT NULL DEFAULT '',
                    category TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT '',
                    is_indexed INTEGER NOT NULL DEFAULT 0,
                    indexed_at INTEGER,
                    updated_at INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_repos_category ON repositories(category);
                CREATE INDEX IF NOT EXISTS idx_repos_indexed ON repositories(is_indexed);

                CREATE TABLE IF NOT EXISTS lookup_cache (
                    key TEXT PRIMARY KEY,
                    payload TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    expires_at INTEGER NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_cache_expires ON lookup_cache(expires_at);

                CREATE TABLE IF NOT EXISTS fingerprints (
                    path TEXT PRIMARY KEY,
                    size INTEGER NOT NULL,
                    mtime INTEGER NOT NULL,
                    hash TEXT NOT NULL
                );

                PRAGMA user_version = 1;
                ",
            )?;
        } else if version != SCHEMA_VERSION {
            // Old schema: rebuilt rather than migrated, same policy as corruption.
            return Err(rusqlite::Error::InvalidQuery.into());
        }

        Ok(())
    }

    // ---- repository index ----

    /// Insert-or-replace a repository record keyed by name.
    ///
    /// A replaced record keeps its is_indexed / indexed_at state; only the
    /// descriptive fields and updated_at change.
    pub fn upsert(&self, repo: &NewRepo) -> crate::Result<()> {
        self.conn.execute(
            "INSERT INTO repositories (name, description, url, category, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(name) DO UPDATE SET
                description = excluded.description,
                url = excluded.url,
                category = excluded.category,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at",
            params![
                repo.name,
                repo.description,
                repo.url,
                repo.category.as_str(),
                repo.created_at,
                now_secs(),
            ],
        )?;
        Ok(())
    }

    /// Mark a repository as indexed under a category.
    ///
    /// Idempotent apart from indexed_at advancing. Errors with RepoNotFound
    /// when no record exists for the name.
    pub fn mark_indexed(&self, name: &str, category: Category) -> crate::Result<()> {
        let now = now_secs();
        let changed = self.conn.execute(
            "UPDATE repositories
             SET is_indexed = 1, category = ?1, indexed_at = ?2, updated_at = ?2
             WHERE name = ?3",
            params![category.as_str(), now, name],
        )?;
        if changed == 0 {
            return Err(TrellisError::RepoNotFound(name.to_string()));
        }
        info!(name, category = %category, "marked repository indexed");
        Ok(())
    }

    /// Indexed repositories in one category, newest-first by indexed_at then
    /// created_at, insertion order breaking remaining ties.
    pub fn list_by_category(&self, category: Category) -> crate::Result<Vec<RepoRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, description, url, category, created_at, is_indexed, indexed_at, updated_at
             FROM repositories
             WHERE category = ?1 AND is_indexed = 1
             ORDER BY indexed_at DESC, created_at DESC, id DESC",
        )?;
        let repos = stmt
            .query_map(params![category.as_str()], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(repos)
    }

    /// Whether any record exists for a name, indexed or not.
    pub fn contains(&self, name: &str) -> crate::Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM repositories WHERE name = ?1",
                params![name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Names of all indexed repositories, for O(1) membership tests.
    pub fn list_indexed_names(&self) -> crate::Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM repositories WHERE is_indexed = 1")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(names)
    }

    /// All repository records, indexed first, newest-first.
    pub fn all_repositories(&self) -> crate::Result<Vec<RepoRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT name, description, url, category, created_at, is_indexed, indexed_at, updated_at
             FROM repositories
             ORDER BY is_indexed DESC, indexed_at DESC, created_at DESC, id DESC",
        )?;
        let repos = stmt
            .query_map([], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(repos)
    }

    /// Number of indexed repositories in a category.
    pub fn count_indexed(&self, category: Category) -> crate::Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM repositories WHERE category = ?1 AND is_indexed = 1",
            params![category.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Number of known-but-unindexed repositories.
    pub fn count_unindexed(&self) -> crate::Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM repositories WHERE is_indexed = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ---- lookup cache ----

    /// Read a cache entry. Expired entries behave as a miss even before they
    /// are physically purged.
    pub fn cache_get(&self, key: &str) -> crate::Result<Option<String>> {
        let payload = self
            .conn
            .query_row(
                "SELECT payload FROM lookup_cache WHERE key = ?1 AND expires_at > ?2",
                params![key, now_secs()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload)
    }

    /// Write a cache entry, overwriting any existing value for the key.
    pub fn cache_set(&self, key: &str, payload: &str, ttl: Duration) -> crate::Result<()> {
        let now = now_secs();
        self.conn.execute(
            "INSERT OR REPLACE INTO lookup_cache (key, payload, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![key, payload, now, now + ttl.as_secs() as i64],
        )?;
        Ok(())
    }

    /// Drop a cache entry regardless of expiry.
    pub fn cache_delete(&self, key: &str) -> crate::Result<()> {
        self.conn
            .execute("DELETE FROM lookup_cache WHERE key = ?1", params![key])?;
        Ok(())
    }

    /// Delete all expired entries. Maintenance only; correctness never
    /// depends on when (or whether) this runs.
    pub fn cache_purge_expired(&self) -> crate::Result<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM lookup_cache WHERE expires_at <= ?1",
            params![now_secs()],
        )?;
        Ok(deleted)
    }

    // ---- fingerprint snapshot ----

    /// Load the last committed fingerprint snapshot, keyed by path.
    pub fn load_fingerprints(&self) -> crate::Result<HashMap<String, FileFingerprint>> {
        let mut stmt = self
            .conn
            .prepare("SELECT path, size, mtime, hash FROM fingerprints")?;
        let rows = stmt.query_map([], |row| {
            Ok(FileFingerprint {
                path: row.get(0)?,
                size: row.get::<_, i64>(1)? as u64,
                mtime: row.get(2)?,
                hash: row.get(3)?,
            })
        })?;

        let mut snapshot = HashMap::new();
        for fp in rows {
            let fp = fp?;
            snapshot.insert(fp.path.clone(), fp);
        }
        Ok(snapshot)
    }

    /// Replace the snapshot wholesale in one transaction.
    ///
    /// This is the atomic commit point of a detection pass: a crash before
    /// it leaves the previous snapshot intact and the next pass recomputes
    /// the same diff.
    pub fn replace_fingerprints(
        &mut self,
        snapshot: &HashMap<String, FileFingerprint>,
    ) -> crate::Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM fingerprints", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO fingerprints (path, size, mtime, hash) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for fp in snapshot.values() {
                stmt.execute(params![fp.path, fp.size as i64, fp.mtime, fp.hash])?;
            }
        }
        tx.commit()?;
        Ok(())
    }
}

fn record_from_row(row: &rusqlite::Row) -> rusqlite::Result<RepoRecord> {
    let category_str: String = row.get(3)?;
    Ok(RepoRecord {
        name: row.get(0)?,
        description: row.get(1)?,
        url: row.get(2)?,
        category: Category::parse(&category_str).unwrap_or(Category::Default),
        created_at: row.get(4)?,
        is_indexed: row.get::<_, i64>(5)? != 0,
        indexed_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// Current time as unix seconds
pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        Store::init(dir.path()).unwrap();
        let store = Store::open(dir.path()).unwrap();
        (dir, store)
    }

    fn sample(name: &str) -> NewRepo {
        NewRepo {
            name: name.to_string(),
            description: format!("{} description", name),
            url: format!("https://github.com/u/{}", name),
            category: Category::Default,
            created_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_init_creates_category_dirs() {
        let dir = TempDir::new().unwrap();
        Store::init(dir.path()).unwrap();
        for category in Category::ALL {
            assert!(dir.path().join(category.as_str()).join("README.md").exists());
        }
        assert!(Store::config_path(dir.path()).exists());

        // Re-init refuses to clobber
        assert!(matches!(
            Store::init(dir.path()),
            Err(TrellisError::ConfigExists(_))
        ));
    }

    #[test]
    fn test_open_requires_init() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Store::open(dir.path()),
            Err(TrellisError::NotInitialized)
        ));
    }

    #[test]
    fn test_upsert_is_unique_by_name() {
        let (_dir, store) = open_store();
        store.upsert(&sample("one")).unwrap();
        let mut second = sample("one");
        second.description = "winner".to_string();
        store.upsert(&second).unwrap();

        let all = store.all_repositories().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].description, "winner");

        assert!(store.contains("one").unwrap());
        assert!(!store.contains("two").unwrap());
    }

    #[test]
    fn test_upsert_preserves_indexed_state() {
        let (_dir, store) = open_store();
        store.upsert(&sample("one")).unwrap();
        store.mark_indexed("one", Category::Trading).unwrap();

        store.upsert(&sample("one")).unwrap();
        let all = store.all_repositories().unwrap();
        assert!(all[0].is_indexed);
        assert!(all[0].indexed_at.is_some());
    }

    #[test]
    fn test_mark_indexed_requires_existing_record() {
        let (_dir, store) = open_store();
        assert!(matches!(
            store.mark_indexed("ghost", Category::Default),
            Err(TrellisError::RepoNotFound(_))
        ));
    }

    #[test]
    fn test_mark_indexed_is_idempotent() {
        let (_dir, store) = open_store();
        store.upsert(&sample("one")).unwrap();
        store.mark_indexed("one", Category::Default).unwrap();
        let first = store.all_repositories().unwrap().remove(0);

        store.mark_indexed("one", Category::Default).unwrap();
        let second = store.all_repositories().unwrap().remove(0);

        assert_eq!(first.name, second.name);
        assert_eq!(first.category, second.category);
        assert!(second.is_indexed);
        // Only indexed_at may advance, monotonically.
        assert!(second.indexed_at.unwrap() >= first.indexed_at.unwrap());
    }

    #[test]
    fn test_list_by_category_filters_and_orders() {
        let (_dir, store) = open_store();
        for name in ["a", "b", "c"] {
            store.upsert(&sample(name)).unwrap();
        }
        store.mark_indexed("a", Category::Trading).unwrap();
        store.mark_indexed("b", Category::Trading).unwrap();
        // "c" stays unindexed

        let trading = store.list_by_category(Category::Trading).unwrap();
        assert_eq!(trading.len(), 2);
        // Equal timestamps fall back to insertion order, newest first.
        assert_eq!(trading[0].name, "b");
        assert_eq!(trading[1].name, "a");
        assert!(store.list_by_category(Category::Default).unwrap().is_empty());

        let names = store.list_indexed_names().unwrap();
        assert!(names.contains("a") && names.contains("b"));
        assert!(!names.contains("c"));
    }

    #[test]
    fn test_cache_zero_ttl_is_immediate_miss() {
        let (_dir, store) = open_store();
        store.cache_set("k", "v", Duration::from_secs(0)).unwrap();
        assert_eq!(store.cache_get("k").unwrap(), None);
    }

    #[test]
    fn test_cache_set_get_and_overwrite() {
        let (_dir, store) = open_store();
        store.cache_set("k", "v1", Duration::from_secs(60)).unwrap();
        assert_eq!(store.cache_get("k").unwrap(), Some("v1".to_string()));

        // Last writer wins
        store.cache_set("k", "v2", Duration::from_secs(60)).unwrap();
        assert_eq!(store.cache_get("k").unwrap(), Some("v2".to_string()));

        store.cache_delete("k").unwrap();
        assert_eq!(store.cache_get("k").unwrap(), None);
    }

    #[test]
    fn test_cache_purge_only_removes_expired() {
        let (_dir, store) = open_store();
        store.cache_set("dead", "x", Duration::from_secs(0)).unwrap();
        store.cache_set("live", "y", Duration::from_secs(60)).unwrap();

        let purged = store.cache_purge_expired().unwrap();
        assert_eq!(purged, 1);
        assert_eq!(store.cache_get("live").unwrap(), Some("y".to_string()));
    }

    #[test]
    fn test_fingerprint_snapshot_replaced_wholesale() {
        let (_dir, mut store) = open_store();
        let fp = |path: &str, hash: &str| FileFingerprint {
            path: path.to_string(),
            size: 1,
            mtime: 1,
            hash: hash.to_string(),
        };

        let mut snapshot = HashMap::new();
        snapshot.insert("a".to_string(), fp("a", "h1"));
        snapshot.insert("b".to_string(), fp("b", "h2"));
        store.replace_fingerprints(&snapshot).unwrap();
        assert_eq!(store.load_fingerprints().unwrap().len(), 2);

        let mut next = HashMap::new();
        next.insert("b".to_string(), fp("b", "h3"));
        store.replace_fingerprints(&next).unwrap();

        let loaded = store.load_fingerprints().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded["b"].hash, "h3");
    }

    #[test]
    fn test_corrupt_database_is_rebuilt_empty() {
        let dir = TempDir::new().unwrap();
        Store::init(dir.path()).unwrap();
        let db_path = dir.path().join(TRELLIS_DIR).join(DB_FILE);
        std::fs::write(&db_path, "this is not a database").unwrap();

        let store = Store::open(dir.path()).unwrap();
        assert!(store.all_repositories().unwrap().is_empty());
    }
}
