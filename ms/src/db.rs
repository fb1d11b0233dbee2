//! Store open, schema migrations, and combined full-text search
//!
//! One store file per agent at `<root>/<name>.db`. Opening a store acquires
//! the cross-process lock directory, applies any unapplied schema migration
//! scripts, rebuilds the FTS shadow indices, seeds the well-known LTM
//! entries and the present-state row, and fails any worker or task records
//! left `running` by a previous process.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::lock::{DEFAULT_LOCK_TIMEOUT_MS, FileLock};
use crate::ltm::LtmTree;
use crate::present::PresentState;
use crate::tasks::{Tasks, Workers};
use crate::temporal::TemporalLog;
use crate::{mutex, now_ms};

/// Ordered migration scripts, identified by lexicographic name. Applied ids
/// are recorded in `_migrations`; a failure in any script aborts the open.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_init",
        r#"
        CREATE TABLE messages (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE distillations (
            id TEXT PRIMARY KEY,
            level INTEGER NOT NULL,
            range_start_id TEXT NOT NULL,
            range_end_id TEXT NOT NULL,
            body TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(level, range_start_id, range_end_id)
        );
        CREATE INDEX idx_distillations_level ON distillations(level, range_start_id);

        CREATE TABLE ltm_entries (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL,
            parent_slug TEXT,
            title TEXT NOT NULL,
            body TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            updated_at INTEGER NOT NULL,
            archived INTEGER NOT NULL DEFAULT 0,
            agent_type TEXT NOT NULL DEFAULT 'main'
        );
        CREATE UNIQUE INDEX idx_ltm_live_slug ON ltm_entries(slug) WHERE archived = 0;
        CREATE INDEX idx_ltm_parent ON ltm_entries(parent_slug);

        CREATE TABLE present_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            mission TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT '',
            tasks TEXT NOT NULL DEFAULT '[]'
        );

        CREATE TABLE background_tasks (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            description TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at INTEGER NOT NULL,
            fires_at INTEGER,
            result TEXT,
            error TEXT
        );
        CREATE INDEX idx_tasks_status ON background_tasks(status);

        CREATE TABLE workers (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'running',
            started_at INTEGER NOT NULL,
            completed_at INTEGER,
            error TEXT
        );

        CREATE TABLE meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
    ),
    (
        "0002_fts",
        r#"
        CREATE VIRTUAL TABLE messages_fts USING fts5(
            content, content='messages', content_rowid='rowid'
        );
        CREATE TRIGGER messages_ai AFTER INSERT ON messages BEGIN
            INSERT INTO messages_fts(rowid, content) VALUES (new.rowid, new.content);
        END;

        CREATE VIRTUAL TABLE distillations_fts USING fts5(
            body, content='distillations', content_rowid='rowid'
        );
        CREATE TRIGGER distillations_ai AFTER INSERT ON distillations BEGIN
            INSERT INTO distillations_fts(rowid, body) VALUES (new.rowid, new.body);
        END;

        CREATE VIRTUAL TABLE ltm_fts USING fts5(
            title, body, content='ltm_entries', content_rowid='rowid'
        );
        CREATE TRIGGER ltm_ai AFTER INSERT ON ltm_entries BEGIN
            INSERT INTO ltm_fts(rowid, title, body) VALUES (new.rowid, new.title, new.body);
        END;
        CREATE TRIGGER ltm_ad AFTER DELETE ON ltm_entries BEGIN
            INSERT INTO ltm_fts(ltm_fts, rowid, title, body)
                VALUES ('delete', old.rowid, old.title, old.body);
        END;
        CREATE TRIGGER ltm_au AFTER UPDATE ON ltm_entries BEGIN
            INSERT INTO ltm_fts(ltm_fts, rowid, title, body)
                VALUES ('delete', old.rowid, old.title, old.body);
            INSERT INTO ltm_fts(rowid, title, body) VALUES (new.rowid, new.title, new.body);
        END;
        "#,
    ),
];

/// The moment this process first touched a store. Worker records started
/// before this are leftovers from a previous process.
pub fn process_epoch_ms() -> i64 {
    static EPOCH: OnceLock<i64> = OnceLock::new();
    *EPOCH.get_or_init(now_ms)
}

/// Options for opening a store
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Cross-process lock acquisition timeout
    pub lock_timeout: Duration,
    /// Open without the cross-process lock, for short-lived snapshot reads
    pub read_only: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            read_only: false,
        }
    }
}

/// Which table a combined search hit came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtsKind {
    Message,
    Distillation,
}

/// A combined full-text search hit
#[derive(Debug, Clone)]
pub struct FtsHit {
    pub id: String,
    pub snippet: String,
    pub kind: FtsKind,
}

/// An open agent store. Cheap to clone; all clones share one connection,
/// one write mutex, and one cross-process lock.
#[derive(Clone)]
pub struct Store {
    path: PathBuf,
    conn: Arc<StdMutex<Connection>>,
    write_mutex: Arc<tokio::sync::Mutex<()>>,
    _file_lock: Arc<Option<FileLock>>,
    session_id: String,
}

impl Store {
    /// Open (creating if necessary) the store at `path`
    pub async fn open(path: impl AsRef<Path>, options: OpenOptions) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        validate_store_name(&path)?;

        let file_lock = if options.read_only {
            None
        } else {
            Some(FileLock::acquire(&path, options.lock_timeout).await?)
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        let mut store = Self {
            path: path.clone(),
            conn: Arc::new(StdMutex::new(conn)),
            write_mutex: mutex::for_path(&path),
            _file_lock: Arc::new(file_lock),
            session_id: String::new(),
        };

        store.migrate()?;
        store.session_id = store.ensure_session_id()?;

        if !options.read_only {
            store.ltm().seed_defaults()?;
            store.present().seed()?;

            let stale_workers = store.workers().fail_stale(process_epoch_ms())?;
            let orphaned_tasks = store.tasks().fail_running("process-restart")?;
            if stale_workers > 0 || orphaned_tasks > 0 {
                info!(stale_workers, orphaned_tasks, "cleaned up records from a previous process");
            }
        }

        debug!(path = %path.display(), session_id = %store.session_id, "opened store");
        Ok(store)
    }

    /// Open with default options
    pub async fn open_default(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open(path, OpenOptions::default()).await
    }

    /// The store file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stable session id, assigned on the database's first open
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Acquire the per-database write mutex. Writers that span multiple
    /// statements hold this for the duration; waiters wake in FIFO order.
    pub async fn write_lock(&self) -> tokio::sync::OwnedMutexGuard<()> {
        self.write_mutex.clone().lock_owned().await
    }

    /// Run a closure against the connection
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().expect("store connection poisoned");
        f(&conn)
    }

    /// Run a closure inside a transaction; commit on Ok, roll back on Err
    pub(crate) fn with_tx<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.lock().expect("store connection poisoned");
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // === Repositories ===

    pub fn temporal(&self) -> TemporalLog<'_> {
        TemporalLog::new(self)
    }

    pub fn ltm(&self) -> LtmTree<'_> {
        LtmTree::new(self)
    }

    pub fn present(&self) -> PresentState<'_> {
        PresentState::new(self)
    }

    pub fn tasks(&self) -> Tasks<'_> {
        Tasks::new(self)
    }

    pub fn workers(&self) -> Workers<'_> {
        Workers::new(self)
    }

    /// Combined full-text search over messages and distillation bodies.
    /// Matches are marked with the `>>>match<<<` convention so agents can
    /// spot them in tool output.
    pub fn search_fts(&self, query: &str, limit: usize) -> Result<Vec<FtsHit>, StoreError> {
        let query = sanitize_fts_query(query);
        if query.is_empty() {
            return Ok(Vec::new());
        }

        self.with_conn(|conn| {
            let mut hits = Vec::new();

            let mut stmt = conn.prepare(
                "SELECT m.id, snippet(messages_fts, 0, '>>>', '<<<', '…', 16)
                 FROM messages_fts JOIN messages m ON m.rowid = messages_fts.rowid
                 WHERE messages_fts MATCH ?1
                 ORDER BY rank LIMIT ?2",
            )?;
            let rows = stmt.query_map(rusqlite::params![query, limit as i64], |row| {
                Ok(FtsHit {
                    id: row.get(0)?,
                    snippet: row.get(1)?,
                    kind: FtsKind::Message,
                })
            })?;
            for row in rows {
                hits.push(row?);
            }

            let mut stmt = conn.prepare(
                "SELECT d.id, snippet(distillations_fts, 0, '>>>', '<<<', '…', 16)
                 FROM distillations_fts
                 JOIN distillations d ON d.rowid = distillations_fts.rowid
                 WHERE distillations_fts MATCH ?1
                 ORDER BY rank LIMIT ?2",
            )?;
            let rows = stmt.query_map(rusqlite::params![query, limit as i64], |row| {
                Ok(FtsHit {
                    id: row.get(0)?,
                    snippet: row.get(1)?,
                    kind: FtsKind::Distillation,
                })
            })?;
            for row in rows {
                hits.push(row?);
            }

            hits.truncate(limit);
            Ok(hits)
        })
    }

    /// Apply unapplied migrations in order, then rebuild FTS indices
    fn migrate(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().expect("store connection poisoned");

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                id TEXT PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )",
            [],
        )?;

        for (id, sql) in MIGRATIONS {
            let applied: bool = conn
                .query_row("SELECT 1 FROM _migrations WHERE id = ?1", [id], |_| Ok(true))
                .unwrap_or(false);
            if applied {
                continue;
            }

            let tx = conn.transaction()?;
            tx.execute_batch(sql)
                .map_err(|e| StoreError::SchemaMismatch(format!("migration {id} failed: {e}")))?;
            tx.execute(
                "INSERT INTO _migrations (id, applied_at) VALUES (?1, ?2)",
                rusqlite::params![id, now_ms()],
            )?;
            tx.commit()?;
            info!(migration = *id, "applied migration");
        }

        // FTS shadow indices are a pure function of the content rows;
        // rebuilding is idempotent and repairs any drift
        for table in ["messages_fts", "distillations_fts", "ltm_fts"] {
            if let Err(e) =
                conn.execute_batch(&format!("INSERT INTO {table}({table}) VALUES('rebuild')"))
            {
                warn!(table, error = %e, "FTS rebuild failed");
            }
        }

        Ok(())
    }

    fn ensure_session_id(&self) -> Result<String, StoreError> {
        self.with_conn(|conn| {
            let existing: Option<String> = conn
                .query_row("SELECT value FROM meta WHERE key = 'session_id'", [], |row| row.get(0))
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;

            if let Some(id) = existing {
                return Ok(id);
            }

            let fresh = uuid::Uuid::now_v7().to_string();
            conn.execute(
                "INSERT INTO meta (key, value) VALUES ('session_id', ?1)",
                [&fresh],
            )?;
            Ok(fresh)
        })
    }
}

/// Store file names follow `^[a-z0-9_-]+$` (stem), at most 64 characters
fn validate_store_name(path: &Path) -> Result<(), StoreError> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| StoreError::InvalidName(path.display().to_string()))?;

    let valid = !stem.is_empty()
        && stem.len() <= 64
        && stem
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(stem.to_string()))
    }
}

/// Quote each term so user input cannot inject FTS5 query syntax
fn sanitize_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| term.replace('"', ""))
        .filter(|t| t.chars().count() >= 2)
        .map(|term| format!("\"{term}\""))
        .collect::<Vec<_>>()
        .join(" ")
}
