//! Token estimation
//!
//! Budget arithmetic runs on a chars/4 heuristic rather than a real
//! tokenizer. Estimates only need to be stable and conservative enough for
//! the assembler to stay inside its budget; the provider reports exact
//! usage after the fact.

/// Approximate tokens in a string
pub fn estimate_str(text: &str) -> usize {
    text.chars().count() / 4 + 1
}

/// Approximate tokens for a message, including framing overhead
pub fn estimate_message(text: &str) -> usize {
    estimate_str(text) + 4
}

/// Truncate `text` so its estimate fits `budget_tokens`, appending an
/// explicit marker when anything was dropped
pub fn truncate_to_budget(text: &str, budget_tokens: usize) -> String {
    const MARKER: &str = "\n… [truncated to fit context budget]";

    if estimate_str(text) <= budget_tokens {
        return text.to_string();
    }

    let keep_chars = budget_tokens.saturating_mul(4).saturating_sub(MARKER.len());
    let mut cut: String = text.chars().take(keep_chars).collect();
    cut.push_str(MARKER);
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_scales_with_length() {
        assert!(estimate_str("") <= 1);
        let short = estimate_str("hello");
        let long = estimate_str(&"hello ".repeat(100));
        assert!(long > short * 10);
    }

    #[test]
    fn test_truncate_noop_when_fits() {
        assert_eq!(truncate_to_budget("short", 100), "short");
    }

    #[test]
    fn test_truncate_appends_marker() {
        let long = "word ".repeat(1000);
        let cut = truncate_to_budget(&long, 50);
        assert!(cut.ends_with("[truncated to fit context budget]"));
        assert!(estimate_str(&cut) <= 60);
    }
}
