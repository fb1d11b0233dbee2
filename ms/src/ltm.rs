//! Long-term memory tree
//!
//! Slug-addressed, versioned knowledge entries. Every mutation is a
//! compare-and-swap on `version`: a caller holding a stale version gets a
//! `Conflict` and the row is untouched. Archive is a soft delete; an
//! archived slug may be re-created, with the archived row still reachable
//! through `include_archived` queries (slugs are unique among live entries
//! only).
//!
//! Bodies may reference other entries as `[[slug]]`. Targets are not
//! enforced; `dangling_links` makes broken references discoverable.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::Store;
use crate::error::StoreError;
use crate::id::{IdKind, new_id};
use crate::now_ms;

/// Default body for the seeded `/identity` entry
const IDENTITY_DEFAULT: &str = "I am a continuous agent. I persist across sessions through this \
store: my identity and behavior live here in the knowledge tree, my recent history lives in the \
temporal log, and my current focus lives in the present state.";

/// Default body for the seeded `/behavior` entry
const BEHAVIOR_DEFAULT: &str = "Be direct and concrete. Record durable facts in the knowledge \
tree as they are learned, preferring updates to existing entries over near-duplicate new ones. \
Keep the mission, status, and task list current. Cite entries by [[slug]] when referring to them.";

/// One knowledge entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LtmEntry {
    pub id: String,
    pub slug: String,
    pub parent_slug: Option<String>,
    pub title: String,
    pub body: String,
    pub version: i64,
    pub updated_at: i64,
    pub archived: bool,
    /// Which worker last wrote this entry (audit)
    pub agent_type: String,
}

/// Repository over the LTM table
pub struct LtmTree<'a> {
    store: &'a Store,
}

impl<'a> LtmTree<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Seed `/`, `/identity`, and `/behavior` on first open
    pub(crate) fn seed_defaults(&self) -> Result<(), StoreError> {
        self.store.with_tx(|tx| {
            let seed = [
                ("/", None::<&str>, "Root", ""),
                ("/identity", Some("/"), "Identity", IDENTITY_DEFAULT),
                ("/behavior", Some("/"), "Behavior", BEHAVIOR_DEFAULT),
            ];
            for (slug, parent, title, body) in seed {
                let exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM ltm_entries WHERE slug = ?1 AND archived = 0)",
                    [slug],
                    |r| r.get(0),
                )?;
                if !exists {
                    tx.execute(
                        "INSERT INTO ltm_entries
                            (id, slug, parent_slug, title, body, version, updated_at, agent_type)
                         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, 'system')",
                        rusqlite::params![new_id(IdKind::Entry), slug, parent, title, body, now_ms()],
                    )?;
                }
            }
            Ok(())
        })
    }

    /// Read the live entry at `slug`
    pub fn read(&self, slug: &str) -> Result<LtmEntry, StoreError> {
        self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT id, slug, parent_slug, title, body, version, updated_at, archived, agent_type
                 FROM ltm_entries WHERE slug = ?1 AND archived = 0",
                [slug],
                row_to_entry,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(slug.to_string()),
                other => other.into(),
            })
        })
    }

    /// Entries whose slug matches a path-glob, ordered by slug
    pub fn glob(&self, pattern: &str, include_archived: bool) -> Result<Vec<LtmEntry>, StoreError> {
        let matcher = glob::Pattern::new(pattern)
            .map_err(|e| StoreError::Conflict(format!("invalid glob pattern '{pattern}': {e}")))?;

        let all = self.all(include_archived)?;
        Ok(all.into_iter().filter(|e| matcher.matches(&e.slug)).collect())
    }

    /// Full-text search over title and body of live entries
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<(LtmEntry, String)>, StoreError> {
        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| format!("\"{}\"", t.replace('"', "")))
            .collect();
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT e.id, e.slug, e.parent_slug, e.title, e.body, e.version, e.updated_at,
                        e.archived, e.agent_type,
                        snippet(ltm_fts, 1, '>>>', '<<<', '…', 16)
                 FROM ltm_fts JOIN ltm_entries e ON e.rowid = ltm_fts.rowid
                 WHERE ltm_fts MATCH ?1 AND e.archived = 0
                 ORDER BY rank LIMIT ?2",
            )?;
            let rows = stmt.query_map(rusqlite::params![terms.join(" "), limit as i64], |row| {
                Ok((row_to_entry(row)?, row.get::<_, String>(9)?))
            })?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Create a new entry. The slug must be free among live entries; the
    /// parent must exist and not be archived.
    pub fn create(
        &self,
        slug: &str,
        parent_slug: &str,
        title: &str,
        body: &str,
        agent_type: &str,
    ) -> Result<LtmEntry, StoreError> {
        validate_slug(slug)?;
        if title.trim().is_empty() {
            return Err(StoreError::Conflict("title required".to_string()));
        }

        self.store.with_tx(|tx| {
            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM ltm_entries WHERE slug = ?1 AND archived = 0)",
                [slug],
                |r| r.get(0),
            )?;
            if exists {
                return Err(StoreError::Conflict(format!("slug exists: {slug}")));
            }

            let parent_live: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM ltm_entries WHERE slug = ?1 AND archived = 0)",
                [parent_slug],
                |r| r.get(0),
            )?;
            if !parent_live {
                return Err(StoreError::Conflict(format!(
                    "parent missing or archived: {parent_slug}"
                )));
            }

            tx.execute(
                "INSERT INTO ltm_entries
                    (id, slug, parent_slug, title, body, version, updated_at, agent_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7)",
                rusqlite::params![new_id(IdKind::Entry), slug, parent_slug, title, body, now_ms(), agent_type],
            )?;
            Ok(())
        })?;

        debug!(slug, agent_type, "created ltm entry");
        self.read(slug)
    }

    /// Replace the body (CAS on version)
    pub fn update(
        &self,
        slug: &str,
        body: &str,
        expected_version: i64,
        agent_type: &str,
    ) -> Result<LtmEntry, StoreError> {
        self.store.with_tx(|tx| {
            cas_update(
                tx,
                slug,
                expected_version,
                "body = ?3, agent_type = ?4",
                rusqlite::params![slug, expected_version, body, agent_type],
            )
        })?;
        self.read(slug)
    }

    /// Surgical find-replace within the body. Fails unless `old` occurs
    /// exactly once.
    pub fn edit(
        &self,
        slug: &str,
        old: &str,
        new: &str,
        expected_version: i64,
        agent_type: &str,
    ) -> Result<LtmEntry, StoreError> {
        if old.is_empty() {
            return Err(StoreError::Conflict("old text must not be empty".to_string()));
        }

        let entry = self.read(slug)?;
        let occurrences = entry.body.matches(old).count();
        match occurrences {
            0 => {
                return Err(StoreError::Conflict(format!(
                    "old text not found in {slug}"
                )));
            }
            1 => {}
            n => {
                return Err(StoreError::Conflict(format!(
                    "old text found {n} times in {slug}; make it unique"
                )));
            }
        }

        let body = entry.body.replacen(old, new, 1);
        self.update(slug, &body, expected_version, agent_type)
    }

    /// Move an entry under a new parent, keeping its slug (CAS on version)
    pub fn reparent(
        &self,
        slug: &str,
        new_parent: &str,
        expected_version: i64,
        agent_type: &str,
    ) -> Result<LtmEntry, StoreError> {
        if new_parent == slug || new_parent.starts_with(&format!("{slug}/")) {
            return Err(StoreError::Conflict(format!(
                "cannot reparent {slug} under its own subtree"
            )));
        }

        self.store.with_tx(|tx| {
            let parent_live: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM ltm_entries WHERE slug = ?1 AND archived = 0)",
                [new_parent],
                |r| r.get(0),
            )?;
            if !parent_live {
                return Err(StoreError::Conflict(format!(
                    "parent missing or archived: {new_parent}"
                )));
            }

            cas_update(
                tx,
                slug,
                expected_version,
                "parent_slug = ?3, agent_type = ?4",
                rusqlite::params![slug, expected_version, new_parent, agent_type],
            )
        })?;
        self.read(slug)
    }

    /// Rename an entry, cascading the slug prefix over every live
    /// descendant. Each moved descendant's version increments by exactly 1.
    pub fn rename(
        &self,
        slug: &str,
        new_slug: &str,
        expected_version: i64,
        agent_type: &str,
    ) -> Result<LtmEntry, StoreError> {
        validate_slug(new_slug)?;
        if slug == "/" {
            return Err(StoreError::Conflict("cannot rename the root".to_string()));
        }
        if new_slug == slug || new_slug.starts_with(&format!("{slug}/")) {
            return Err(StoreError::Conflict(format!(
                "cannot rename {slug} into its own subtree"
            )));
        }

        self.store.with_tx(|tx| {
            let taken: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM ltm_entries WHERE slug = ?1 AND archived = 0)",
                [new_slug],
                |r| r.get(0),
            )?;
            if taken {
                return Err(StoreError::Conflict(format!("slug exists: {new_slug}")));
            }

            cas_update(
                tx,
                slug,
                expected_version,
                "slug = ?3, agent_type = ?4",
                rusqlite::params![slug, expected_version, new_slug, agent_type],
            )?;

            // Cascade: descendants keep their suffix under the new prefix,
            // and direct references in parent_slug follow the move
            let prefix = format!("{slug}/");
            let descendants: Vec<(String, Option<String>)> = {
                let mut stmt = tx.prepare(
                    "SELECT slug, parent_slug FROM ltm_entries
                     WHERE archived = 0 AND slug LIKE ?1 ESCAPE '\\'",
                )?;
                let rows = stmt.query_map([format!("{}%", like_escape(&prefix))], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?;
                rows.collect::<Result<_, _>>()?
            };

            let now = now_ms();
            for (old_child, old_parent) in descendants {
                let new_child = format!("{new_slug}{}", &old_child[slug.len()..]);
                let new_parent = old_parent.map(|p| {
                    if p == slug || p.starts_with(&prefix) {
                        format!("{new_slug}{}", &p[slug.len()..])
                    } else {
                        p
                    }
                });
                tx.execute(
                    "UPDATE ltm_entries
                     SET slug = ?2, parent_slug = ?3, version = version + 1,
                         updated_at = ?4, agent_type = ?5
                     WHERE slug = ?1 AND archived = 0",
                    rusqlite::params![old_child, new_child, new_parent, now, agent_type],
                )?;
            }

            // Entries reparented under the renamed node (slug elsewhere in
            // the tree) follow the new parent path too
            tx.execute(
                "UPDATE ltm_entries
                 SET parent_slug = ?2, version = version + 1, updated_at = ?3
                 WHERE parent_slug = ?1 AND archived = 0",
                rusqlite::params![slug, new_slug, now],
            )?;

            Ok(())
        })?;

        debug!(from = slug, to = new_slug, "renamed ltm entry");
        self.read(new_slug)
    }

    /// Soft-delete an entry (CAS on version). The row stays queryable via
    /// `include_archived`; the slug becomes available for re-creation.
    pub fn archive(
        &self,
        slug: &str,
        expected_version: i64,
        agent_type: &str,
    ) -> Result<(), StoreError> {
        if slug == "/" || slug == "/identity" || slug == "/behavior" {
            return Err(StoreError::Conflict(format!("cannot archive {slug}")));
        }

        self.store.with_tx(|tx| {
            cas_update(
                tx,
                slug,
                expected_version,
                "archived = 1, agent_type = ?3",
                rusqlite::params![slug, expected_version, agent_type],
            )
        })?;
        debug!(slug, "archived ltm entry");
        Ok(())
    }

    /// All entries, ordered by slug
    pub fn all(&self, include_archived: bool) -> Result<Vec<LtmEntry>, StoreError> {
        self.store.with_conn(|conn| {
            let sql = if include_archived {
                "SELECT id, slug, parent_slug, title, body, version, updated_at, archived, agent_type
                 FROM ltm_entries ORDER BY slug ASC, archived ASC"
            } else {
                "SELECT id, slug, parent_slug, title, body, version, updated_at, archived, agent_type
                 FROM ltm_entries WHERE archived = 0 ORDER BY slug ASC"
            };
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map([], row_to_entry)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Compact indented outline of the live tree for the system prompt
    pub fn tree_outline(&self, max_entries: usize) -> Result<String, StoreError> {
        let entries = self.all(false)?;
        let mut lines = Vec::new();
        for entry in entries.iter().take(max_entries) {
            if entry.slug == "/" {
                continue;
            }
            let depth = entry.slug.matches('/').count().saturating_sub(1);
            lines.push(format!("{}{} — {}", "  ".repeat(depth), entry.slug, entry.title));
        }
        if entries.len() > max_entries {
            lines.push(format!("… {} more entries", entries.len() - max_entries));
        }
        Ok(lines.join("\n"))
    }

    /// `[[slug]]` references whose target has no live entry
    pub fn dangling_links(&self) -> Result<Vec<(String, String)>, StoreError> {
        let entries = self.all(false)?;
        let live: std::collections::HashSet<&str> =
            entries.iter().map(|e| e.slug.as_str()).collect();

        let mut dangling = Vec::new();
        for entry in &entries {
            for target in extract_links(&entry.body) {
                if !live.contains(target.as_str()) {
                    dangling.push((entry.slug.clone(), target));
                }
            }
        }
        Ok(dangling)
    }
}

/// CAS core shared by the single-row mutations. `set_clause` references
/// params ?3.. for its values; ?1 is the slug and ?2 the expected version.
fn cas_update(
    tx: &rusqlite::Transaction<'_>,
    slug: &str,
    expected_version: i64,
    set_clause: &str,
    params: impl rusqlite::Params,
) -> Result<(), StoreError> {
    let sql = format!(
        "UPDATE ltm_entries
         SET {set_clause}, version = version + 1, updated_at = {now}
         WHERE slug = ?1 AND archived = 0 AND version = ?2",
        now = now_ms(),
    );
    let changed = tx.execute(&sql, params)?;
    if changed == 1 {
        return Ok(());
    }

    // Distinguish a missing entry from a version race
    let current: Option<i64> = tx
        .query_row(
            "SELECT version FROM ltm_entries WHERE slug = ?1 AND archived = 0",
            [slug],
            |r| r.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    match current {
        None => Err(StoreError::NotFound(slug.to_string())),
        Some(v) => Err(StoreError::Conflict(format!(
            "version mismatch on {slug}: expected {expected_version}, current {v}"
        ))),
    }
}

/// Slugs are absolute paths: `/`, or `/seg/seg` with non-empty segments and
/// no whitespace
fn validate_slug(slug: &str) -> Result<(), StoreError> {
    let ok = slug == "/"
        || (slug.starts_with('/')
            && !slug.ends_with('/')
            && slug.len() > 1
            && !slug.contains("//")
            && slug.chars().all(|c| !c.is_whitespace()));
    if ok {
        Ok(())
    } else {
        Err(StoreError::Conflict(format!("invalid slug: {slug}")))
    }
}

fn like_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Extract `[[slug]]` cross-link targets from a body
pub fn extract_links(body: &str) -> Vec<String> {
    let mut links = Vec::new();
    let mut rest = body;
    while let Some(open) = rest.find("[[") {
        rest = &rest[open + 2..];
        if let Some(close) = rest.find("]]") {
            let target = &rest[..close];
            if !target.is_empty() && !target.contains('\n') {
                links.push(target.to_string());
            }
            rest = &rest[close + 2..];
        } else {
            break;
        }
    }
    links
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LtmEntry> {
    Ok(LtmEntry {
        id: row.get(0)?,
        slug: row.get(1)?,
        parent_slug: row.get(2)?,
        title: row.get(3)?,
        body: row.get(4)?,
        version: row.get(5)?,
        updated_at: row.get(6)?,
        archived: row.get::<_, i64>(7)? != 0,
        agent_type: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use tempfile::tempdir;

    async fn open_temp() -> (tempfile::TempDir, Store) {
        let temp = tempdir().unwrap();
        let store = Store::open_default(temp.path().join("agent.db")).await.unwrap();
        (temp, store)
    }

    #[tokio::test]
    async fn test_create_and_duplicate_conflicts() {
        let (_temp, store) = open_temp().await;
        let ltm = store.ltm();

        let entry = ltm.create("/k/a", "/", "T", "B", "main").unwrap();
        assert_eq!(entry.version, 1);

        let dup = ltm.create("/k/a", "/", "T", "B", "main");
        assert!(matches!(dup, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_create_requires_live_parent() {
        let (_temp, store) = open_temp().await;
        let ltm = store.ltm();

        let orphan = ltm.create("/k/a", "/nope", "T", "B", "main");
        assert!(matches!(orphan, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_update_cas() {
        let (_temp, store) = open_temp().await;
        let ltm = store.ltm();

        ltm.create("/k/a", "/", "T", "B", "main").unwrap();

        let updated = ltm.update("/k/a", "B2", 1, "main").unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.body, "B2");

        // Stale expected_version fails and leaves state unchanged
        let stale = ltm.update("/k/a", "B3", 1, "main");
        assert!(matches!(stale, Err(StoreError::Conflict(_))));
        let current = ltm.read("/k/a").unwrap();
        assert_eq!(current.body, "B2");
        assert_eq!(current.version, 2);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let (_temp, store) = open_temp().await;
        let result = store.ltm().update("/ghost", "B", 1, "main");
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_edit_requires_unique_match() {
        let (_temp, store) = open_temp().await;
        let ltm = store.ltm();

        ltm.create("/note", "/", "Note", "alpha beta alpha", "main").unwrap();

        let missing = ltm.edit("/note", "gamma", "delta", 1, "main");
        assert!(matches!(missing, Err(StoreError::Conflict(_))));

        let ambiguous = ltm.edit("/note", "alpha", "delta", 1, "main");
        assert!(matches!(ambiguous, Err(StoreError::Conflict(_))));

        let edited = ltm.edit("/note", "beta", "delta", 1, "main").unwrap();
        assert_eq!(edited.body, "alpha delta alpha");
        assert_eq!(edited.version, 2);
    }

    #[tokio::test]
    async fn test_rename_cascades_descendants() {
        let (_temp, store) = open_temp().await;
        let ltm = store.ltm();

        ltm.create("/k", "/", "K", "", "main").unwrap();
        ltm.create("/k/a", "/k", "A", "body-a", "main").unwrap();
        ltm.create("/k/a/x", "/k/a", "X", "body-x", "main").unwrap();

        ltm.rename("/k", "/knowledge", 1, "main").unwrap();

        let moved = ltm.read("/knowledge/a/x").unwrap();
        assert_eq!(moved.body, "body-x");
        assert_eq!(moved.version, 2);
        assert_eq!(moved.parent_slug.as_deref(), Some("/knowledge/a"));

        let child = ltm.read("/knowledge/a").unwrap();
        assert_eq!(child.parent_slug.as_deref(), Some("/knowledge"));

        assert!(ltm.read("/k/a").is_err());
    }

    #[tokio::test]
    async fn test_rename_into_own_subtree_rejected() {
        let (_temp, store) = open_temp().await;
        let ltm = store.ltm();

        ltm.create("/k", "/", "K", "", "main").unwrap();
        let result = ltm.rename("/k", "/k/sub", 1, "main");
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_archive_then_recreate() {
        let (_temp, store) = open_temp().await;
        let ltm = store.ltm();

        ltm.create("/scratch", "/", "Scratch", "old body", "main").unwrap();
        ltm.archive("/scratch", 1, "main").unwrap();

        assert!(ltm.read("/scratch").is_err());

        // Slug is reusable; the archived row remains reachable
        let fresh = ltm.create("/scratch", "/", "Scratch", "new body", "main").unwrap();
        assert_eq!(fresh.version, 1);
        assert_eq!(fresh.body, "new body");

        let rows = ltm.glob("/scratch", true).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().any(|e| e.archived && e.body == "old body"));
    }

    #[tokio::test]
    async fn test_archive_well_known_rejected() {
        let (_temp, store) = open_temp().await;
        let result = store.ltm().archive("/identity", 1, "main");
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_reparent_keeps_slug() {
        let (_temp, store) = open_temp().await;
        let ltm = store.ltm();

        ltm.create("/a", "/", "A", "", "main").unwrap();
        ltm.create("/b", "/", "B", "", "main").unwrap();

        let moved = ltm.reparent("/b", "/a", 1, "main").unwrap();
        assert_eq!(moved.slug, "/b");
        assert_eq!(moved.parent_slug.as_deref(), Some("/a"));
        assert_eq!(moved.version, 2);
    }

    #[tokio::test]
    async fn test_glob_matches_paths() {
        let (_temp, store) = open_temp().await;
        let ltm = store.ltm();

        ltm.create("/k", "/", "K", "", "main").unwrap();
        ltm.create("/k/auth", "/k", "Auth", "", "main").unwrap();
        ltm.create("/k/billing", "/k", "Billing", "", "main").unwrap();

        let hits = ltm.glob("/k/*", false).unwrap();
        let slugs: Vec<&str> = hits.iter().map(|e| e.slug.as_str()).collect();
        assert_eq!(slugs, vec!["/k/auth", "/k/billing"]);
    }

    #[tokio::test]
    async fn test_search_finds_body_text() {
        let (_temp, store) = open_temp().await;
        let ltm = store.ltm();

        ltm.create("/k", "/", "K", "", "main").unwrap();
        ltm.create("/k/auth", "/k", "Auth Flow", "tokens expire after ninety days", "main")
            .unwrap();

        let hits = ltm.search("ninety", 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.slug, "/k/auth");
        assert!(hits[0].1.contains(">>>ninety<<<"));
    }

    #[tokio::test]
    async fn test_search_skips_archived() {
        let (_temp, store) = open_temp().await;
        let ltm = store.ltm();

        ltm.create("/gone", "/", "Gone", "unique zebra fact", "main").unwrap();
        ltm.archive("/gone", 1, "main").unwrap();

        let hits = ltm.search("zebra", 5).unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_dangling_links() {
        let (_temp, store) = open_temp().await;
        let ltm = store.ltm();

        ltm.create("/a", "/", "A", "see [[/b]] and [[/missing]]", "main").unwrap();
        ltm.create("/b", "/", "B", "", "main").unwrap();

        let dangling = ltm.dangling_links().unwrap();
        assert_eq!(dangling, vec![("/a".to_string(), "/missing".to_string())]);
    }

    #[test]
    fn test_extract_links() {
        assert_eq!(
            extract_links("x [[/a]] y [[/b/c]] z"),
            vec!["/a".to_string(), "/b/c".to_string()]
        );
        assert!(extract_links("no links").is_empty());
        assert!(extract_links("broken [[/a").is_empty());
    }

    #[test]
    fn test_validate_slug() {
        assert!(validate_slug("/").is_ok());
        assert!(validate_slug("/a/b-c_d").is_ok());
        assert!(validate_slug("a").is_err());
        assert!(validate_slug("/a/").is_err());
        assert!(validate_slug("/a//b").is_err());
        assert!(validate_slug("/a b").is_err());
    }
}
