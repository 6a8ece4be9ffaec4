use serde::{Deserialize, Serialize};

/// One role/content pair sent to the completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiMessage {
    pub role: String,
    pub content: String,
}

/// One entry of the tool manifest advertised with each completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolManifestEntry {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Decoded event from the completion stream, ready for the orchestrator.
///
/// This is the adapter's whole output contract: incremental text, or an
/// incremental JSON-encoded argument fragment for a named tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionEvent {
    TextDelta {
        text: String,
    },
    ToolCallDelta {
        /// Wire content-block index; two calls to the same tool in one turn
        /// arrive under distinct indexes and must stay separate.
        index: usize,
        name: String,
        arguments_fragment: String,
    },
}

/// Raw wire event as framed by the streaming endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireEvent {
    MessageStart {
        message: MessageStartData,
    },
    ContentBlockStart {
        index: usize,
        content_block: WireContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: WireDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: WireMessageDelta,
    },
    MessageStop,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default = "default_json_object")]
        input: serde_json::Value,
    },
}

fn default_json_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireDelta {
    #[serde(rename = "type")]
    #[serde(default)]
    pub delta_type: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub partial_json: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageStartData {
    pub id: String,
    pub role: String,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireMessageDelta {
    pub stop_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_use_block_without_input_defaults_to_empty_object() {
        let json = r#"{"type":"tool_use","id":"call_1","name":"update_bot_config"}"#;
        let block: WireContentBlock = serde_json::from_str(json).unwrap();
        match block {
            WireContentBlock::ToolUse { input, .. } => {
                assert_eq!(input, serde_json::json!({}));
            }
            other => panic!("unexpected block: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_wire_event_type_is_tolerated() {
        let json = r#"{"type":"ping"}"#;
        let event: WireEvent = serde_json::from_str(json).unwrap();
        assert!(matches!(event, WireEvent::Unknown));
    }
}
