//! Temporal log - append-only chronological memory
//!
//! Messages are immutable once appended; corrections are appended, never
//! edited in place. Distillations are compact rewrites of contiguous ID
//! ranges, layered recursively: level 1 covers raw messages, level L+1
//! covers adjacent level-L distillations. Sources are never deleted, so the
//! full history stays available for audit and reflection.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::Store;
use crate::error::StoreError;
use crate::id::{IdKind, new_id};
use crate::now_ms;

/// Message kinds in the temporal log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    User,
    Assistant,
    ToolCall,
    ToolResult,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::User => "user",
            MessageKind::Assistant => "assistant",
            MessageKind::ToolCall => "tool_call",
            MessageKind::ToolResult => "tool_result",
            MessageKind::System => "system",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageKind::User),
            "assistant" => Some(MessageKind::Assistant),
            "tool_call" => Some(MessageKind::ToolCall),
            "tool_result" => Some(MessageKind::ToolResult),
            "system" => Some(MessageKind::System),
            _ => None,
        }
    }

    /// Tool activity marks a conversation window as worth consolidating
    pub fn is_tool(&self) -> bool {
        matches!(self, MessageKind::ToolCall | MessageKind::ToolResult)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One record in the temporal log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalMessage {
    pub id: String,
    pub kind: MessageKind,
    pub content: String,
    pub created_at: i64,
}

/// A compact rewrite of a contiguous message range
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Distillation {
    pub id: String,
    pub level: u32,
    pub range_start_id: String,
    pub range_end_id: String,
    pub body: String,
    pub created_at: i64,
}

/// One element of a reconstructed temporal view, in strict temporal order
#[derive(Debug, Clone)]
pub enum ViewItem {
    Distilled(Distillation),
    Raw(TemporalMessage),
}

impl ViewItem {
    pub fn text(&self) -> &str {
        match self {
            ViewItem::Distilled(d) => &d.body,
            ViewItem::Raw(m) => &m.content,
        }
    }
}

/// A budget-fitted reconstruction of history
#[derive(Debug, Clone)]
pub struct TemporalView {
    pub items: Vec<ViewItem>,
    /// Estimated token total for all items
    pub token_estimate: usize,
    /// Minimum distillation level the cover had to use (0 = all raw)
    pub min_level: u32,
    /// True when even the most compact cover exceeds the budget; the
    /// caller should schedule further distillation
    pub needs_escalation: bool,
}

/// Repository over the temporal tables
pub struct TemporalLog<'a> {
    store: &'a Store,
}

impl<'a> TemporalLog<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Append a message; returns its id. O(1), no rewriting of history.
    pub fn append(&self, kind: MessageKind, content: &str) -> Result<String, StoreError> {
        let id = new_id(IdKind::Message);
        self.store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, kind, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, kind.as_str(), content, now_ms()],
            )?;
            Ok(())
        })?;
        debug!(%id, kind = %kind, len = content.len(), "appended message");
        Ok(id)
    }

    /// Fetch one message
    pub fn get(&self, id: &str) -> Result<TemporalMessage, StoreError> {
        self.store.with_conn(|conn| {
            conn.query_row(
                "SELECT id, kind, content, created_at FROM messages WHERE id = ?1",
                [id],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(id.to_string()),
                other => other.into(),
            })
        })
    }

    /// Messages strictly after `after_id` (all from the start when None),
    /// in temporal order, up to `limit`
    pub fn range(&self, after_id: Option<&str>, limit: usize) -> Result<Vec<TemporalMessage>, StoreError> {
        self.store.with_conn(|conn| {
            let mut out = Vec::new();
            match after_id {
                Some(after) => {
                    let mut stmt = conn.prepare(
                        "SELECT id, kind, content, created_at FROM messages
                         WHERE id > ?1 ORDER BY id ASC LIMIT ?2",
                    )?;
                    let rows = stmt.query_map(rusqlite::params![after, limit as i64], row_to_message)?;
                    for row in rows {
                        out.push(row?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(
                        "SELECT id, kind, content, created_at FROM messages
                         ORDER BY id ASC LIMIT ?1",
                    )?;
                    let rows = stmt.query_map(rusqlite::params![limit as i64], row_to_message)?;
                    for row in rows {
                        out.push(row?);
                    }
                }
            }
            Ok(out)
        })
    }

    /// The last `limit` messages, returned in temporal order
    pub fn recent(&self, limit: usize) -> Result<Vec<TemporalMessage>, StoreError> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, kind, content, created_at FROM messages
                 ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(rusqlite::params![limit as i64], row_to_message)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            out.reverse();
            Ok(out)
        })
    }

    /// Total number of messages
    pub fn count(&self) -> Result<u64, StoreError> {
        self.store
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM messages", [], |r| r.get::<_, i64>(0))? as u64))
    }

    /// Id of the newest message, if any
    pub fn latest_id(&self) -> Result<Option<String>, StoreError> {
        self.store.with_conn(|conn| {
            let id = conn
                .query_row("SELECT MAX(id) FROM messages", [], |r| r.get::<_, Option<String>>(0))?;
            Ok(id)
        })
    }

    /// Full-text search over message content with `>>>match<<<` snippets
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<(String, String)>, StoreError> {
        let hits = self.store.search_fts(query, limit)?;
        Ok(hits
            .into_iter()
            .filter(|h| h.kind == crate::db::FtsKind::Message)
            .map(|h| (h.id, h.snippet))
            .collect())
    }

    /// A message with `before` predecessors and `after` successors, in
    /// temporal order
    pub fn get_with_context(
        &self,
        id: &str,
        before: usize,
        after: usize,
    ) -> Result<Vec<TemporalMessage>, StoreError> {
        let target = self.get(id)?;
        self.store.with_conn(|conn| {
            let mut out = Vec::new();

            let mut stmt = conn.prepare(
                "SELECT id, kind, content, created_at FROM messages
                 WHERE id < ?1 ORDER BY id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(rusqlite::params![id, before as i64], row_to_message)?;
            for row in rows {
                out.push(row?);
            }
            out.reverse();

            out.push(target);

            let mut stmt = conn.prepare(
                "SELECT id, kind, content, created_at FROM messages
                 WHERE id > ?1 ORDER BY id ASC LIMIT ?2",
            )?;
            let rows = stmt.query_map(rusqlite::params![id, after as i64], row_to_message)?;
            for row in rows {
                out.push(row?);
            }

            Ok(out)
        })
    }

    // === Distillations ===

    /// Insert a distillation covering `[range_start_id, range_end_id]`.
    /// The write and the sibling-range invariant check share one
    /// transaction: overlapping or non-contiguous ranges roll back with
    /// [`StoreError::InvariantViolation`]. Source messages are retained.
    pub fn insert_distillation(
        &self,
        level: u32,
        range_start_id: &str,
        range_end_id: &str,
        body: &str,
    ) -> Result<String, StoreError> {
        if range_start_id > range_end_id {
            return Err(StoreError::InvariantViolation(format!(
                "inverted range {range_start_id}..{range_end_id}"
            )));
        }

        let id = new_id(IdKind::Distillation);
        self.store.with_tx(|tx| {
            tx.execute(
                "INSERT INTO distillations (id, level, range_start_id, range_end_id, body, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, level, range_start_id, range_end_id, body, now_ms()],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(err, _)
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    StoreError::Conflict(format!(
                        "distillation for level {level} range {range_start_id}..{range_end_id} already exists"
                    ))
                }
                other => other.into(),
            })?;

            check_level_invariants(tx, level)?;
            Ok(())
        })?;

        debug!(%id, level, range_start_id, range_end_id, "inserted distillation");
        Ok(id)
    }

    /// All distillations at one level, ordered by range start
    pub fn distillations_at(&self, level: u32) -> Result<Vec<Distillation>, StoreError> {
        self.store.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, level, range_start_id, range_end_id, body, created_at
                 FROM distillations WHERE level = ?1 ORDER BY range_start_id ASC",
            )?;
            let rows = stmt.query_map([level], row_to_distillation)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
    }

    /// Highest distillation level present (0 when there are none)
    pub fn max_level(&self) -> Result<u32, StoreError> {
        self.store.with_conn(|conn| {
            let level: Option<i64> =
                conn.query_row("SELECT MAX(level) FROM distillations", [], |r| r.get(0))?;
            Ok(level.unwrap_or(0) as u32)
        })
    }

    /// Newest id covered by any distillation; messages after this form the
    /// uncompressed tail
    pub fn covered_end(&self) -> Result<Option<String>, StoreError> {
        self.store.with_conn(|conn| {
            let id: Option<String> =
                conn.query_row("SELECT MAX(range_end_id) FROM distillations", [], |r| r.get(0))?;
            Ok(id)
        })
    }

    /// Messages after the distilled prefix, in temporal order
    pub fn uncompressed_tail(&self) -> Result<Vec<TemporalMessage>, StoreError> {
        match self.covered_end()? {
            Some(end) => self.range(Some(&end), usize::MAX / 2),
            None => self.range(None, usize::MAX / 2),
        }
    }

    /// Build the smallest prefix+suffix cover of history that fits
    /// `budget_tokens`: the most compressed distillation prefix allowed by
    /// `min_level`, then raw messages past its end. Tries `min_level` = 0
    /// (all raw) upward; when even the maximal compression exceeds the
    /// budget the view is returned with `needs_escalation` set.
    pub fn build_view(
        &self,
        budget_tokens: usize,
        estimate: impl Fn(&str) -> usize,
    ) -> Result<TemporalView, StoreError> {
        let max_level = self.max_level()?;
        let mut by_level: Vec<Vec<Distillation>> = Vec::new();
        for level in 1..=max_level {
            by_level.push(self.distillations_at(level)?);
        }
        let messages = self.range(None, usize::MAX / 2)?;

        let mut most_compact = None;
        for min_level in 0..=max_level {
            let view = build_cover(min_level, max_level, &by_level, &messages, &estimate);
            if view.token_estimate <= budget_tokens {
                return Ok(view);
            }
            most_compact = Some(view);
        }

        let mut view = most_compact.expect("at least the raw cover exists");
        view.needs_escalation = true;
        Ok(view)
    }
}

fn build_cover(
    min_level: u32,
    max_level: u32,
    by_level: &[Vec<Distillation>],
    messages: &[TemporalMessage],
    estimate: &impl Fn(&str) -> usize,
) -> TemporalView {
    let mut items: Vec<ViewItem> = Vec::new();
    let mut covered_end: Option<String> = None;

    if min_level > 0 {
        // Highest levels first; lower levels extend the prefix past them
        for level in (min_level..=max_level).rev() {
            for d in &by_level[(level - 1) as usize] {
                let beyond = covered_end
                    .as_deref()
                    .map(|end| d.range_start_id.as_str() > end)
                    .unwrap_or(true);
                if beyond {
                    covered_end = Some(d.range_end_id.clone());
                    items.push(ViewItem::Distilled(d.clone()));
                }
            }
        }
        items.sort_by(|a, b| start_id(a).cmp(start_id(b)));
    }

    for m in messages {
        let in_tail = covered_end
            .as_deref()
            .map(|end| m.id.as_str() > end)
            .unwrap_or(true);
        if in_tail {
            items.push(ViewItem::Raw(m.clone()));
        }
    }

    let token_estimate = items.iter().map(|i| estimate(i.text())).sum();
    TemporalView {
        items,
        token_estimate,
        min_level,
        needs_escalation: false,
    }
}

fn start_id(item: &ViewItem) -> &str {
    match item {
        ViewItem::Distilled(d) => &d.range_start_id,
        ViewItem::Raw(m) => &m.id,
    }
}

/// Siblings at a level must be sorted, non-overlapping, and contiguous: no
/// message may fall between one range's end and the next range's start.
fn check_level_invariants(tx: &rusqlite::Transaction<'_>, level: u32) -> Result<(), StoreError> {
    let mut stmt = tx.prepare(
        "SELECT range_start_id, range_end_id FROM distillations
         WHERE level = ?1 ORDER BY range_start_id ASC",
    )?;
    let ranges: Vec<(String, String)> = stmt
        .query_map([level], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<_, _>>()?;

    for pair in ranges.windows(2) {
        let (_, prev_end) = &pair[0];
        let (next_start, _) = &pair[1];

        if next_start <= prev_end {
            return Err(StoreError::InvariantViolation(format!(
                "level {level} ranges overlap: ..{prev_end} and {next_start}.."
            )));
        }

        let gap: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM messages WHERE id > ?1 AND id < ?2)",
            rusqlite::params![prev_end, next_start],
            |r| r.get(0),
        )?;
        if gap {
            return Err(StoreError::InvariantViolation(format!(
                "level {level} ranges not contiguous: messages exist between {prev_end} and {next_start}"
            )));
        }
    }

    Ok(())
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<TemporalMessage> {
    let kind_str: String = row.get(1)?;
    Ok(TemporalMessage {
        id: row.get(0)?,
        kind: MessageKind::from_str(&kind_str).unwrap_or(MessageKind::System),
        content: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn row_to_distillation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Distillation> {
    Ok(Distillation {
        id: row.get(0)?,
        level: row.get::<_, i64>(1)? as u32,
        range_start_id: row.get(2)?,
        range_end_id: row.get(3)?,
        body: row.get(4)?,
        created_at: row.get(5)?,
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

    fn words(text: &str) -> usize {
        text.split_whitespace().count()
    }

    #[tokio::test]
    async fn test_append_preserves_order() {
        let (_temp, store) = open_temp().await;
        let log = store.temporal();

        let ids: Vec<String> = (0..10)
            .map(|i| log.append(MessageKind::User, &format!("message {i}")).unwrap())
            .collect();

        let fetched = log.range(None, 100).unwrap();
        let fetched_ids: Vec<&str> = fetched.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(fetched_ids, ids.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_range_after_id() {
        let (_temp, store) = open_temp().await;
        let log = store.temporal();

        let first = log.append(MessageKind::User, "first").unwrap();
        log.append(MessageKind::Assistant, "second").unwrap();
        log.append(MessageKind::User, "third").unwrap();

        let rest = log.range(Some(&first), 10).unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].content, "second");
        assert_eq!(rest[1].content, "third");
    }

    #[tokio::test]
    async fn test_get_with_context() {
        let (_temp, store) = open_temp().await;
        let log = store.temporal();

        let ids: Vec<String> = (0..7)
            .map(|i| log.append(MessageKind::User, &format!("msg {i}")).unwrap())
            .collect();

        let window = log.get_with_context(&ids[3], 2, 2).unwrap();
        let contents: Vec<&str> = window.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["msg 1", "msg 2", "msg 3", "msg 4", "msg 5"]);
    }

    #[tokio::test]
    async fn test_distillation_duplicate_range_conflicts() {
        let (_temp, store) = open_temp().await;
        let log = store.temporal();

        let a = log.append(MessageKind::User, "a").unwrap();
        let b = log.append(MessageKind::Assistant, "b").unwrap();

        log.insert_distillation(1, &a, &b, "summary").unwrap();
        let dup = log.insert_distillation(1, &a, &b, "summary again");
        assert!(matches!(dup, Err(StoreError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_overlapping_distillations_rejected() {
        let (_temp, store) = open_temp().await;
        let log = store.temporal();

        let ids: Vec<String> = (0..4)
            .map(|i| log.append(MessageKind::User, &format!("m{i}")).unwrap())
            .collect();

        log.insert_distillation(1, &ids[0], &ids[2], "first span").unwrap();
        let overlap = log.insert_distillation(1, &ids[1], &ids[3], "overlapping span");
        assert!(matches!(overlap, Err(StoreError::InvariantViolation(_))));

        // The rollback left only the first distillation behind
        assert_eq!(log.distillations_at(1).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_gap_between_distillations_rejected() {
        let (_temp, store) = open_temp().await;
        let log = store.temporal();

        let ids: Vec<String> = (0..6)
            .map(|i| log.append(MessageKind::User, &format!("m{i}")).unwrap())
            .collect();

        log.insert_distillation(1, &ids[0], &ids[1], "head").unwrap();
        // Skipping ids[2] leaves an uncovered message between siblings
        let gapped = log.insert_distillation(1, &ids[3], &ids[4], "tail");
        assert!(matches!(gapped, Err(StoreError::InvariantViolation(_))));
    }

    #[tokio::test]
    async fn test_adjacent_distillations_accepted() {
        let (_temp, store) = open_temp().await;
        let log = store.temporal();

        let ids: Vec<String> = (0..6)
            .map(|i| log.append(MessageKind::User, &format!("m{i}")).unwrap())
            .collect();

        log.insert_distillation(1, &ids[0], &ids[2], "first").unwrap();
        log.insert_distillation(1, &ids[3], &ids[5], "second").unwrap();
        assert_eq!(log.distillations_at(1).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_build_view_empty_log() {
        let (_temp, store) = open_temp().await;
        let view = store.temporal().build_view(1000, words).unwrap();
        assert!(view.items.is_empty());
        assert!(!view.needs_escalation);
    }

    #[tokio::test]
    async fn test_build_view_uncompressed_when_it_fits() {
        let (_temp, store) = open_temp().await;
        let log = store.temporal();

        for i in 0..5 {
            log.append(MessageKind::User, &format!("short {i}")).unwrap();
        }

        let view = log.build_view(1000, words).unwrap();
        assert_eq!(view.min_level, 0);
        assert_eq!(view.items.len(), 5);
    }

    #[tokio::test]
    async fn test_build_view_prefers_distilled_prefix() {
        let (_temp, store) = open_temp().await;
        let log = store.temporal();

        let ids: Vec<String> = (0..20)
            .map(|i| {
                log.append(MessageKind::User, &format!("one two three four five six {i}"))
                    .unwrap()
            })
            .collect();
        log.insert_distillation(1, &ids[0], &ids[14], "compact summary").unwrap();

        // 20 raw messages are ~140 words; budget 50 forces the distilled prefix
        let view = log.build_view(50, words).unwrap();
        assert_eq!(view.min_level, 1);
        assert!(matches!(view.items[0], ViewItem::Distilled(_)));
        // The 5 uncovered messages follow as raw tail
        assert_eq!(view.items.len(), 6);
        assert!(!view.needs_escalation);

        // Strict temporal order is preserved
        for pair in view.items.windows(2) {
            assert!(start_id(&pair[0]) < start_id(&pair[1]));
        }
    }

    #[tokio::test]
    async fn test_build_view_escalates_when_nothing_fits() {
        let (_temp, store) = open_temp().await;
        let log = store.temporal();

        for i in 0..10 {
            log.append(MessageKind::User, &format!("alpha beta gamma delta {i}")).unwrap();
        }

        let view = log.build_view(3, words).unwrap();
        assert!(view.needs_escalation);
    }

    #[tokio::test]
    async fn test_uncompressed_tail_follows_covered_prefix() {
        let (_temp, store) = open_temp().await;
        let log = store.temporal();

        let ids: Vec<String> = (0..8)
            .map(|i| log.append(MessageKind::User, &format!("m{i}")).unwrap())
            .collect();
        log.insert_distillation(1, &ids[0], &ids[4], "head summary").unwrap();

        let tail = log.uncompressed_tail().unwrap();
        let contents: Vec<&str> = tail.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m5", "m6", "m7"]);
    }
}
