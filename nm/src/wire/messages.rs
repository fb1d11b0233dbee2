//! Wire message types - newline-delimited JSON over stdio

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::Usage;

/// Messages a host sends in
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Inbound {
    User { message: InboundUser },
    Control { action: ControlAction },
}

#[derive(Debug, Deserialize)]
pub struct InboundUser {
    pub role: String,
    pub content: Value,
}

impl InboundUser {
    /// Flatten string-or-blocks content to text
    pub fn text(&self) -> String {
        match &self.content {
            Value::String(s) => s.clone(),
            Value::Array(blocks) => blocks
                .iter()
                .filter_map(|b| b["text"].as_str())
                .collect::<Vec<_>>()
                .join("\n"),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Interrupt,
    Status,
    Heartbeat,
}

/// Messages the engine sends out. Every variant carries the stable
/// session id.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Outbound {
    System {
        subtype: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        session_id: String,
    },
    Assistant {
        message: Value,
        session_id: String,
    },
    Result {
        subtype: String,
        duration_ms: u64,
        num_turns: u32,
        session_id: String,
        usage: Usage,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl Outbound {
    pub fn system(subtype: &str, data: Option<Value>, session_id: &str) -> Self {
        Outbound::System {
            subtype: subtype.to_string(),
            data,
            session_id: session_id.to_string(),
        }
    }

    pub fn assistant(text: &str, session_id: &str) -> Self {
        Outbound::Assistant {
            message: serde_json::json!({ "role": "assistant", "content": text }),
            session_id: session_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_user_parses() {
        let raw = r#"{"type":"user","message":{"role":"user","content":"hello"}}"#;
        match serde_json::from_str::<Inbound>(raw).unwrap() {
            Inbound::User { message } => {
                assert_eq!(message.role, "user");
                assert_eq!(message.text(), "hello");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_inbound_block_content_flattens() {
        let raw = r#"{"type":"user","message":{"role":"user","content":[{"type":"text","text":"a"},{"type":"text","text":"b"}]}}"#;
        match serde_json::from_str::<Inbound>(raw).unwrap() {
            Inbound::User { message } => assert_eq!(message.text(), "a\nb"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_inbound_control_parses() {
        let raw = r#"{"type":"control","action":"interrupt"}"#;
        match serde_json::from_str::<Inbound>(raw).unwrap() {
            Inbound::Control { action } => assert_eq!(action, ControlAction::Interrupt),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_outbound_result_shape() {
        let out = Outbound::Result {
            subtype: "success".to_string(),
            duration_ms: 1234,
            num_turns: 3,
            session_id: "sess".to_string(),
            usage: Usage::default(),
            error: None,
        };
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["type"], "result");
        assert_eq!(json["subtype"], "success");
        assert_eq!(json["session_id"], "sess");
        assert!(json.get("error").is_none());
    }
}
