use super::logging::emit_sse_parse_error;
use crate::types::{CompletionEvent, WireContentBlock, WireEvent};
use std::collections::HashMap;

/// Incremental SSE decoder for the completion stream.
///
/// Frames may arrive fragmented across chunks; the parser buffers until a
/// complete `event:`/`data:` frame (terminated by a blank line) is available.
/// Wire events are flattened into [`CompletionEvent`]s: tool-call argument
/// fragments are attributed to the tool name registered by the matching
/// `content_block_start`. Malformed frames are logged and dropped, never
/// fatal.
#[derive(Default)]
pub struct EventParser {
    buffer: String,
    tool_names: HashMap<usize, String>,
}

impl EventParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, chunk: &[u8]) -> Vec<CompletionEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));
        let mut events = Vec::new();
        let mut start = 0;

        while let Some(end) = self.buffer[start..].find("\n\n") {
            let frame_end = start + end + 2;
            let frame_text = &self.buffer[start..frame_end];

            let mut event_type = None;
            let mut data = None;

            for line in frame_text.lines() {
                if let Some(rest) = line.strip_prefix("event: ") {
                    event_type = Some(rest.to_string());
                } else if let Some(rest) = line.strip_prefix("data: ") {
                    data = Some(rest.trim().to_string());
                }
            }

            if let (Some(evt_type), Some(json_data)) = (event_type, data) {
                if json_data == "[DONE]"
                    || !matches!(
                        evt_type.as_str(),
                        "message_start"
                            | "content_block_start"
                            | "content_block_delta"
                            | "content_block_stop"
                            | "message_delta"
                            | "message_stop"
                    )
                {
                    start = frame_end;
                    continue;
                }

                match serde_json::from_str::<WireEvent>(&json_data) {
                    Ok(event) => self.flatten(event, &mut events),
                    Err(error) => {
                        emit_sse_parse_error(Some(&evt_type), &json_data, &error);
                    }
                }
            }

            start = frame_end;
        }

        if start > 0 {
            self.buffer.drain(..start);
        }

        events
    }

    fn flatten(&mut self, event: WireEvent, out: &mut Vec<CompletionEvent>) {
        match event {
            WireEvent::ContentBlockStart {
                index,
                content_block,
            } => {
                if let WireContentBlock::ToolUse { name, .. } = content_block {
                    self.tool_names.insert(index, name);
                }
            }
            WireEvent::ContentBlockDelta { index, delta } => {
                if let Some(text) = delta.text {
                    if !text.is_empty() {
                        out.push(CompletionEvent::TextDelta { text });
                    }
                }
                if let Some(partial_json) = delta.partial_json {
                    if let Some(name) = self.tool_names.get(&index) {
                        out.push(CompletionEvent::ToolCallDelta {
                            index,
                            name: name.clone(),
                            arguments_fragment: partial_json,
                        });
                    }
                }
            }
            WireEvent::ContentBlockStop { index } => {
                self.tool_names.remove(&index);
            }
            WireEvent::MessageStart { .. }
            | WireEvent::MessageDelta { .. }
            | WireEvent::MessageStop
            | WireEvent::Unknown => {}
        }
    }
}
