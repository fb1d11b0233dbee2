//! Context assembler
//!
//! Builds the system prompt and message history for one turn inside the
//! token budget. Identity and behavior are always included verbatim; the
//! present snapshot, tool catalog, and tree outline have fixed caps with
//! explicit truncation markers; the temporal view is fitted by picking the
//! smallest distillation level whose cover fits what remains.

use memstore::{MessageKind, Store, StoreError, ViewItem};
use tracing::debug;

use crate::llm::{Message, Role, SystemBlock};
use crate::tokens::{estimate_message, estimate_str, truncate_to_budget};

/// Assembly tuning
#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    /// Provider context window (tokens)
    pub context_window: usize,
    /// Fraction of the window the assembled turn may use (clamped
    /// 0.30..=0.50)
    pub budget_fraction: f64,
    /// Cap on the rendered present snapshot
    pub present_cap_tokens: usize,
    /// Cap on the tool catalog
    pub catalog_cap_tokens: usize,
    /// Cap on the LTM tree outline
    pub outline_cap_tokens: usize,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            context_window: 200_000,
            budget_fraction: 0.4,
            present_cap_tokens: 1_000,
            catalog_cap_tokens: 1_500,
            outline_cap_tokens: 1_000,
        }
    }
}

impl AssemblerConfig {
    pub fn budget(&self) -> usize {
        (self.context_window as f64 * self.budget_fraction.clamp(0.30, 0.50)) as usize
    }
}

/// The two artifacts a turn needs, plus fit diagnostics
#[derive(Debug)]
pub struct AssembledContext {
    pub system: Vec<SystemBlock>,
    pub history: Vec<Message>,
    /// Even the most compressed view exceeded the budget; the distiller
    /// should escalate
    pub needs_escalation: bool,
    pub token_estimate: usize,
}

/// Builds per-turn context from the store
pub struct ContextAssembler {
    store: Store,
    config: AssemblerConfig,
}

impl ContextAssembler {
    pub fn new(store: Store, config: AssemblerConfig) -> Self {
        Self { store, config }
    }

    /// Assemble system prompt and history. `tool_catalog` is the rendered
    /// tool list; `reports` are background results delivered since the
    /// last turn.
    pub fn assemble(&self, tool_catalog: &str, reports: &[String]) -> Result<AssembledContext, StoreError> {
        let ltm = self.store.ltm();
        let identity = ltm.read("/identity")?;
        let behavior = ltm.read("/behavior")?;

        // Identity and behavior are verbatim, always
        let mut system = vec![SystemBlock::cached(format!(
            "{}\n\n# Behavior\n\n{}",
            identity.body, behavior.body
        ))];

        let present = self.store.present().get()?;
        let outline = ltm.tree_outline(200)?;

        let mut working = String::new();
        working.push_str("# Present state\n\n");
        working.push_str(&truncate_to_budget(&present.render(), self.config.present_cap_tokens));
        working.push_str("\n\n# Knowledge tree\n\n");
        working.push_str(&truncate_to_budget(&outline, self.config.outline_cap_tokens));
        working.push_str("\n\n# Tools\n\n");
        working.push_str(&truncate_to_budget(tool_catalog, self.config.catalog_cap_tokens));
        system.push(SystemBlock::plain(working));

        if !reports.is_empty() {
            let mut delivered = String::from("# Background reports delivered this turn\n");
            for report in reports {
                delivered.push_str("\n");
                delivered.push_str(report);
                delivered.push('\n');
            }
            system.push(SystemBlock::plain(delivered));
        }

        let system_tokens: usize = system.iter().map(|b| estimate_str(&b.text)).sum();
        let budget = self.config.budget();
        let remaining = budget.saturating_sub(system_tokens).max(512);

        let view = self.store.temporal().build_view(remaining, estimate_message)?;
        debug!(
            min_level = view.min_level,
            items = view.items.len(),
            needs_escalation = view.needs_escalation,
            "temporal view fitted"
        );

        let history = render_history(&view.items, remaining);
        let token_estimate =
            system_tokens + history.iter().map(|m| estimate_message(&m.text())).sum::<usize>();

        Ok(AssembledContext {
            system,
            history,
            needs_escalation: view.needs_escalation,
            token_estimate,
        })
    }
}

/// Convert view items into alternating provider messages, preserving
/// temporal order. Oversized single items are truncated with a marker
/// rather than dropped.
fn render_history(items: &[ViewItem], item_budget: usize) -> Vec<Message> {
    let mut rendered: Vec<(Role, String)> = Vec::new();

    for item in items {
        let (role, text) = match item {
            ViewItem::Distilled(d) => (
                Role::User,
                format!("[memory: distilled record of earlier conversation]\n{}", d.body),
            ),
            ViewItem::Raw(m) => match m.kind {
                MessageKind::User => (Role::User, m.content.clone()),
                MessageKind::Assistant => (Role::Assistant, m.content.clone()),
                MessageKind::ToolCall => (Role::Assistant, format!("[tool call] {}", m.content)),
                MessageKind::ToolResult => (Role::User, format!("[tool result] {}", m.content)),
                MessageKind::System => (Role::User, format!("[system] {}", m.content)),
            },
        };
        let text = truncate_to_budget(&text, item_budget);

        // Coalesce consecutive same-role items into one message
        match rendered.last_mut() {
            Some((last_role, last_text)) if *last_role == role => {
                last_text.push_str("\n\n");
                last_text.push_str(&text);
            }
            _ => rendered.push((role, text)),
        }
    }

    // The wire requires a user message first
    if matches!(rendered.first(), Some((Role::Assistant, _))) {
        rendered.insert(0, (Role::User, "[resuming from stored history]".to_string()));
    }

    rendered
        .into_iter()
        .map(|(role, text)| match role {
            Role::User => Message::user(text),
            Role::Assistant => Message::assistant(text),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use memstore::MessageKind;
    use tempfile::tempdir;

    async fn setup() -> (tempfile::TempDir, Store) {
        let temp = tempdir().unwrap();
        let store = Store::open_default(temp.path().join("agent.db")).await.unwrap();
        (temp, store)
    }

    fn assembler(store: &Store, window: usize) -> ContextAssembler {
        ContextAssembler::new(
            store.clone(),
            AssemblerConfig {
                context_window: window,
                ..AssemblerConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_empty_log_gives_fixed_frame() {
        let (_temp, store) = setup().await;
        let assembler = assembler(&store, 200_000);

        let ctx = assembler.assemble("- finish_turn: end the turn", &[]).unwrap();
        assert!(ctx.history.is_empty());
        assert!(!ctx.needs_escalation);
        // Identity + behavior always present, verbatim
        assert!(ctx.system[0].text.contains("continuous agent"));
        assert!(ctx.system[0].cacheable);
    }

    #[tokio::test]
    async fn test_history_alternates_roles() {
        let (_temp, store) = setup().await;
        let log = store.temporal();

        log.append(MessageKind::User, "hello").unwrap();
        log.append(MessageKind::Assistant, "hi there").unwrap();
        log.append(MessageKind::ToolCall, "{\"name\":\"x\"}").unwrap();
        log.append(MessageKind::ToolResult, "done").unwrap();
        log.append(MessageKind::User, "thanks").unwrap();

        let ctx = assembler(&store, 200_000).assemble("", &[]).unwrap();

        for pair in ctx.history.windows(2) {
            assert_ne!(pair[0].role, pair[1].role, "roles must alternate after coalescing");
        }
        assert_eq!(ctx.history.first().unwrap().role, Role::User);
    }

    #[tokio::test]
    async fn test_reports_appear_in_system() {
        let (_temp, store) = setup().await;
        let ctx = assembler(&store, 200_000)
            .assemble("", &["[background research task tk_1 finished]\nthe answer".to_string()])
            .unwrap();

        let joined: String = ctx.system.iter().map(|b| b.text.as_str()).collect();
        assert!(joined.contains("Background reports"));
        assert!(joined.contains("the answer"));
    }

    #[tokio::test]
    async fn test_budget_respected_or_escalated() {
        let (_temp, store) = setup().await;
        let log = store.temporal();
        for i in 0..50 {
            log.append(MessageKind::User, &format!("{} filler words to occupy space here", i))
                .unwrap();
        }

        // A generous window fits everything within budget
        let ctx = assembler(&store, 200_000).assemble("", &[]).unwrap();
        assert!(ctx.token_estimate <= 80_000);
        assert!(!ctx.needs_escalation);
    }

    #[tokio::test]
    async fn test_oversize_message_truncated_with_marker() {
        let (_temp, store) = setup().await;
        let log = store.temporal();
        log.append(MessageKind::User, &"gigantic ".repeat(200_000)).unwrap();

        // Tiny window: the lone message cannot fit and must be cut, not
        // dropped and not an error
        let ctx = assembler(&store, 2_000).assemble("", &[]).unwrap();
        assert_eq!(ctx.history.len(), 1);
        assert!(ctx.history[0].text().contains("[truncated to fit context budget]"));
        assert!(ctx.needs_escalation);
    }
}
