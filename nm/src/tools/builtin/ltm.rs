//! Long-term memory tools
//!
//! The knowledge tree exposed to the model. Conflict and not-found errors
//! come back as descriptive result text so the model can re-read and retry
//! with the current version.

use std::sync::Arc;

use async_trait::async_trait;
use memstore::{LtmEntry, Store, StoreError};
use serde::Deserialize;
use serde_json::Value;

use crate::events::{Event, EventBus};
use crate::tools::{CallCtx, Tool, ToolError, ToolOutcome, parse_args};

/// Shared dependencies for the LTM tool family
#[derive(Clone)]
struct LtmDeps {
    store: Store,
    bus: EventBus,
    /// Recorded on every mutation for audit
    agent_type: String,
}

impl LtmDeps {
    fn emit_changed(&self, entry: &LtmEntry) {
        self.bus.emit(Event::LtmChanged {
            slug: entry.slug.clone(),
            version: entry.version,
            agent_type: self.agent_type.clone(),
        });
    }
}

/// Map store errors: recoverable ones become result text the model can act
/// on, the rest propagate as executor failures
fn outcome(result: Result<String, StoreError>) -> Result<ToolOutcome, ToolError> {
    match result {
        Ok(text) => Ok(ToolOutcome::success(text)),
        Err(e) if e.is_recoverable() => Ok(ToolOutcome::error(format!("Error: {e}"))),
        Err(e) => Err(ToolError::Exec(e.into())),
    }
}

fn render_entry(entry: &LtmEntry) -> String {
    format!(
        "{} (v{}) — {}{}\n\n{}",
        entry.slug,
        entry.version,
        entry.title,
        if entry.archived { " [archived]" } else { "" },
        entry.body,
    )
}

/// The full read+write family, for the main agent and the consolidator
pub fn ltm_tools(store: Store, bus: EventBus, agent_type: &str) -> Vec<Arc<dyn Tool>> {
    let deps = LtmDeps {
        store,
        bus,
        agent_type: agent_type.to_string(),
    };
    vec![
        Arc::new(LtmReadTool { deps: deps.clone() }),
        Arc::new(LtmGlobTool { deps: deps.clone() }),
        Arc::new(LtmSearchTool { deps: deps.clone() }),
        Arc::new(LtmCreateTool { deps: deps.clone() }),
        Arc::new(LtmUpdateTool { deps: deps.clone() }),
        Arc::new(LtmEditTool { deps: deps.clone() }),
        Arc::new(LtmReparentTool { deps: deps.clone() }),
        Arc::new(LtmRenameTool { deps: deps.clone() }),
        Arc::new(LtmArchiveTool { deps }),
    ]
}

/// Read-only subset, for the reflection sub-agent
pub fn ltm_read_tools(store: Store, bus: EventBus, agent_type: &str) -> Vec<Arc<dyn Tool>> {
    let deps = LtmDeps {
        store,
        bus,
        agent_type: agent_type.to_string(),
    };
    vec![
        Arc::new(LtmReadTool { deps: deps.clone() }),
        Arc::new(LtmGlobTool { deps: deps.clone() }),
        Arc::new(LtmSearchTool { deps }),
    ]
}

// === ltm_read ===

pub struct LtmReadTool {
    deps: LtmDeps,
}

#[derive(Deserialize)]
struct ReadParams {
    slug: String,
}

#[async_trait]
impl Tool for LtmReadTool {
    fn name(&self) -> &str {
        "ltm_read"
    }

    fn description(&self) -> &str {
        "Read a knowledge entry by slug, returning its title, version, and body"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "slug": { "type": "string", "description": "Entry path, e.g. /knowledge/auth" }
            },
            "required": ["slug"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &CallCtx) -> Result<ToolOutcome, ToolError> {
        let params: ReadParams = parse_args(self.name(), &input)?;
        outcome(self.deps.store.ltm().read(&params.slug).map(|e| render_entry(&e)))
    }
}

// === ltm_glob ===

pub struct LtmGlobTool {
    deps: LtmDeps,
}

#[derive(Deserialize)]
struct GlobParams {
    pattern: String,
    #[serde(default)]
    include_archived: bool,
}

#[async_trait]
impl Tool for LtmGlobTool {
    fn name(&self) -> &str {
        "ltm_glob"
    }

    fn description(&self) -> &str {
        "List knowledge entries whose slug matches a path glob, e.g. /knowledge/*"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string" },
                "include_archived": { "type": "boolean" }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &CallCtx) -> Result<ToolOutcome, ToolError> {
        let params: GlobParams = parse_args(self.name(), &input)?;
        outcome(
            self.deps
                .store
                .ltm()
                .glob(&params.pattern, params.include_archived)
                .map(|entries| {
                    if entries.is_empty() {
                        return "No entries match.".to_string();
                    }
                    entries
                        .iter()
                        .map(|e| {
                            format!(
                                "{} (v{}) — {}{}",
                                e.slug,
                                e.version,
                                e.title,
                                if e.archived { " [archived]" } else { "" }
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                }),
        )
    }
}

// === ltm_search ===

pub struct LtmSearchTool {
    deps: LtmDeps,
}

#[derive(Deserialize)]
struct SearchParams {
    query: String,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    10
}

#[async_trait]
impl Tool for LtmSearchTool {
    fn name(&self) -> &str {
        "ltm_search"
    }

    fn description(&self) -> &str {
        "Full-text search over knowledge entry titles and bodies; matches are marked >>>like this<<<"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "limit": { "type": "integer", "minimum": 1, "maximum": 50 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &CallCtx) -> Result<ToolOutcome, ToolError> {
        let params: SearchParams = parse_args(self.name(), &input)?;
        outcome(self.deps.store.ltm().search(&params.query, params.limit).map(|hits| {
            if hits.is_empty() {
                return "No matches.".to_string();
            }
            hits.iter()
                .map(|(entry, snippet)| format!("{} — {}\n  {}", entry.slug, entry.title, snippet))
                .collect::<Vec<_>>()
                .join("\n")
        }))
    }
}

// === ltm_create ===

pub struct LtmCreateTool {
    deps: LtmDeps,
}

#[derive(Deserialize)]
struct CreateParams {
    slug: String,
    parent_slug: String,
    title: String,
    #[serde(default)]
    body: String,
}

#[async_trait]
impl Tool for LtmCreateTool {
    fn name(&self) -> &str {
        "ltm_create"
    }

    fn description(&self) -> &str {
        "Create a knowledge entry. The slug must be free and the parent must exist."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "slug": { "type": "string" },
                "parent_slug": { "type": "string" },
                "title": { "type": "string" },
                "body": { "type": "string" }
            },
            "required": ["slug", "parent_slug", "title"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &CallCtx) -> Result<ToolOutcome, ToolError> {
        let params: CreateParams = parse_args(self.name(), &input)?;
        let result = self.deps.store.ltm().create(
            &params.slug,
            &params.parent_slug,
            &params.title,
            &params.body,
            &self.deps.agent_type,
        );
        if let Ok(entry) = &result {
            self.deps.emit_changed(entry);
        }
        outcome(result.map(|e| format!("Created {} at version {}", e.slug, e.version)))
    }
}

// === ltm_update ===

pub struct LtmUpdateTool {
    deps: LtmDeps,
}

#[derive(Deserialize)]
struct UpdateParams {
    slug: String,
    body: String,
    expected_version: i64,
}

#[async_trait]
impl Tool for LtmUpdateTool {
    fn name(&self) -> &str {
        "ltm_update"
    }

    fn description(&self) -> &str {
        "Replace an entry's body. Requires the entry's current version; re-read on conflict."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "slug": { "type": "string" },
                "body": { "type": "string" },
                "expected_version": { "type": "integer" }
            },
            "required": ["slug", "body", "expected_version"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &CallCtx) -> Result<ToolOutcome, ToolError> {
        let params: UpdateParams = parse_args(self.name(), &input)?;
        let result = self.deps.store.ltm().update(
            &params.slug,
            &params.body,
            params.expected_version,
            &self.deps.agent_type,
        );
        if let Ok(entry) = &result {
            self.deps.emit_changed(entry);
        }
        outcome(result.map(|e| format!("Updated {} to version {}", e.slug, e.version)))
    }
}

// === ltm_edit ===

pub struct LtmEditTool {
    deps: LtmDeps,
}

#[derive(Deserialize)]
struct EditParams {
    slug: String,
    old: String,
    new: String,
    expected_version: i64,
}

#[async_trait]
impl Tool for LtmEditTool {
    fn name(&self) -> &str {
        "ltm_edit"
    }

    fn description(&self) -> &str {
        "Find-replace within an entry's body. The old text must occur exactly once."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "slug": { "type": "string" },
                "old": { "type": "string" },
                "new": { "type": "string" },
                "expected_version": { "type": "integer" }
            },
            "required": ["slug", "old", "new", "expected_version"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &CallCtx) -> Result<ToolOutcome, ToolError> {
        let params: EditParams = parse_args(self.name(), &input)?;
        let result = self.deps.store.ltm().edit(
            &params.slug,
            &params.old,
            &params.new,
            params.expected_version,
            &self.deps.agent_type,
        );
        if let Ok(entry) = &result {
            self.deps.emit_changed(entry);
        }
        outcome(result.map(|e| format!("Edited {} to version {}", e.slug, e.version)))
    }
}

// === ltm_reparent ===

pub struct LtmReparentTool {
    deps: LtmDeps,
}

#[derive(Deserialize)]
struct ReparentParams {
    slug: String,
    new_parent: String,
    expected_version: i64,
}

#[async_trait]
impl Tool for LtmReparentTool {
    fn name(&self) -> &str {
        "ltm_reparent"
    }

    fn description(&self) -> &str {
        "Move an entry under a new parent without changing its slug"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "slug": { "type": "string" },
                "new_parent": { "type": "string" },
                "expected_version": { "type": "integer" }
            },
            "required": ["slug", "new_parent", "expected_version"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &CallCtx) -> Result<ToolOutcome, ToolError> {
        let params: ReparentParams = parse_args(self.name(), &input)?;
        let result = self.deps.store.ltm().reparent(
            &params.slug,
            &params.new_parent,
            params.expected_version,
            &self.deps.agent_type,
        );
        if let Ok(entry) = &result {
            self.deps.emit_changed(entry);
        }
        outcome(result.map(|e| format!("Moved {} under {}", e.slug, params.new_parent)))
    }
}

// === ltm_rename ===

pub struct LtmRenameTool {
    deps: LtmDeps,
}

#[derive(Deserialize)]
struct RenameParams {
    slug: String,
    new_slug: String,
    expected_version: i64,
}

#[async_trait]
impl Tool for LtmRenameTool {
    fn name(&self) -> &str {
        "ltm_rename"
    }

    fn description(&self) -> &str {
        "Rename an entry's slug; descendant entries move with it"
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "slug": { "type": "string" },
                "new_slug": { "type": "string" },
                "expected_version": { "type": "integer" }
            },
            "required": ["slug", "new_slug", "expected_version"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &CallCtx) -> Result<ToolOutcome, ToolError> {
        let params: RenameParams = parse_args(self.name(), &input)?;
        let result = self.deps.store.ltm().rename(
            &params.slug,
            &params.new_slug,
            params.expected_version,
            &self.deps.agent_type,
        );
        if let Ok(entry) = &result {
            self.deps.emit_changed(entry);
        }
        outcome(result.map(|e| format!("Renamed {} to {} (v{})", params.slug, e.slug, e.version)))
    }
}

// === ltm_archive ===

pub struct LtmArchiveTool {
    deps: LtmDeps,
}

#[derive(Deserialize)]
struct ArchiveParams {
    slug: String,
    expected_version: i64,
}

#[async_trait]
impl Tool for LtmArchiveTool {
    fn name(&self) -> &str {
        "ltm_archive"
    }

    fn description(&self) -> &str {
        "Archive an entry (soft delete). The slug becomes reusable."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "slug": { "type": "string" },
                "expected_version": { "type": "integer" }
            },
            "required": ["slug", "expected_version"]
        })
    }

    async fn execute(&self, input: Value, _ctx: &CallCtx) -> Result<ToolOutcome, ToolError> {
        let params: ArchiveParams = parse_args(self.name(), &input)?;
        let result = self
            .deps
            .store
            .ltm()
            .archive(&params.slug, params.expected_version, &self.deps.agent_type);
        if result.is_ok() {
            self.deps.bus.emit(Event::LtmChanged {
                slug: params.slug.clone(),
                version: params.expected_version + 1,
                agent_type: self.deps.agent_type.clone(),
            });
        }
        outcome(result.map(|_| format!("Archived {}", params.slug)))
    }
}
