//! Dual-channel classification of the buffered completion text.
//!
//! The model is asked to delimit its reply with `---CHAT_RESPONSE---`,
//! `---AI_PROMPT---` and `---END---`. When the markers are present they are
//! authoritative; when they are missing or malformed an ordered heuristic
//! rule list decides how the text splits across the two channels.
//! Classification never fails: the worst case resolves to "whole text is
//! chat", so ambiguous content can never pollute the story document.

mod markers;
mod rules;

use log::debug;

pub const CHAT_RESPONSE_LABEL: &str = "CHAT_RESPONSE";
pub const AI_PROMPT_LABEL: &str = "AI_PROMPT";
pub const END_LABEL: &str = "END";

pub const GENERIC_ACKNOWLEDGEMENT: &str = "I've updated your bot's behavior based on your \
     request. Review the prompt draft and let me know if anything should change.";

/// Result of classifying one full response buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSplit {
    /// Conversational reply for the message list. `None` means no chat
    /// content was produced (empty captures normalize to absent).
    pub chat_response: Option<String>,
    /// Structured bot-behavior prompt destined for the story document.
    pub ai_prompt: Option<String>,
    pub source: SplitSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitSource {
    /// The marker protocol was found and parsed.
    Markers,
    /// A heuristic rule decided the split; carries the rule name.
    Heuristic(&'static str),
    /// The buffer was empty or whitespace.
    Empty,
}

impl ChannelSplit {
    fn empty() -> Self {
        Self {
            chat_response: None,
            ai_prompt: None,
            source: SplitSource::Empty,
        }
    }
}

/// Split one fully buffered response into its chat and prompt channels.
pub fn classify(full_text: &str) -> ChannelSplit {
    if full_text.trim().is_empty() {
        return ChannelSplit::empty();
    }

    let split = match markers::split_marked(full_text) {
        Some(split) => split,
        None => rules::classify_unmarked(full_text),
    };
    debug!(
        "classified response (source={:?}, chat={}, prompt={})",
        split.source,
        split.chat_response.is_some(),
        split.ai_prompt.is_some()
    );
    apply_prompt_leak_guard(split)
}

/// Final guard: a resolved chat channel that itself reads like a prompt
/// document, with no prompt channel found separately, is re-classified so
/// the directive text reaches the story instead of the message list.
fn apply_prompt_leak_guard(split: ChannelSplit) -> ChannelSplit {
    if split.ai_prompt.is_some() {
        return split;
    }
    let Some(chat) = &split.chat_response else {
        return split;
    };
    if !rules::looks_like_prompt_document(chat) {
        return split;
    }

    debug!("prompt-like content found in chat channel, re-classifying");
    ChannelSplit {
        chat_response: Some(GENERIC_ACKNOWLEDGEMENT.to_string()),
        ai_prompt: Some(chat.clone()),
        source: SplitSource::Heuristic("prompt-leak-guard"),
    }
}

fn normalize_capture(capture: &str) -> Option<String> {
    let trimmed = capture.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
