//! Turn observer hooks
//!
//! A structure of optional callbacks the loop invokes at fixed points.
//! Hosts fill in only what they care about; everything defaults to no-op.

use crate::tools::ToolOutcome;

/// Optional callbacks into the host
#[derive(Default)]
pub struct TurnObserver {
    /// Called before each provider call; may return extra user content to
    /// inject (beyond the injection queue, which the loop drains itself)
    pub on_before_turn: Option<Box<dyn FnMut() -> Option<String> + Send>>,

    /// Called when the loop continues past its first iteration
    pub on_thinking: Option<Box<dyn FnMut() + Send>>,

    /// Called with each piece of assistant text as it lands
    pub on_assistant_text: Option<Box<dyn FnMut(&str) + Send>>,

    /// Called after each tool dispatch with the tool name and outcome
    pub on_tool_result: Option<Box<dyn FnMut(&str, &ToolOutcome) + Send>>,
}

impl TurnObserver {
    pub(crate) fn before_turn(&mut self) -> Option<String> {
        self.on_before_turn.as_mut().and_then(|hook| hook())
    }

    pub(crate) fn thinking(&mut self) {
        if let Some(hook) = self.on_thinking.as_mut() {
            hook();
        }
    }

    pub(crate) fn assistant_text(&mut self, text: &str) {
        if let Some(hook) = self.on_assistant_text.as_mut() {
            hook(text);
        }
    }

    pub(crate) fn tool_result(&mut self, name: &str, outcome: &ToolOutcome) {
        if let Some(hook) = self.on_tool_result.as_mut() {
            hook(name, outcome);
        }
    }
}

impl std::fmt::Debug for TurnObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnObserver")
            .field("on_before_turn", &self.on_before_turn.is_some())
            .field("on_thinking", &self.on_thinking.is_some())
            .field("on_assistant_text", &self.on_assistant_text.is_some())
            .field("on_tool_result", &self.on_tool_result.is_some())
            .finish()
    }
}
