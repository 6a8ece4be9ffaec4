use super::{normalize_capture, ChannelSplit, SplitSource, GENERIC_ACKNOWLEDGEMENT};
use log::debug;

const CONVERSATIONAL_HINTS: [&str; 14] = [
    "hello",
    "hi there",
    "great",
    "thanks",
    "thank you",
    "you're welcome",
    "anything else",
    "let me know",
    "happy to",
    "sure thing",
    "no problem",
    "sounds good",
    "glad",
    "of course",
];

const DIRECTIVE_HINTS: [&str; 14] = [
    "when user",
    "when the user",
    "if user",
    "if the user",
    "respond with",
    "responds with",
    "reply with",
    "replies with",
    "you are",
    "act as",
    "your role",
    "always answer",
    "never reveal",
    "instructions:",
];

const DIRECTIVE_LINE_OPENERS: [&str; 3] = ["you are", "act as", "instructions:"];

/// Signals computed once over the whole text, evaluated by the rules below.
#[derive(Debug, Clone, Copy)]
pub(super) struct TextSignals {
    conversational_hits: usize,
    directive_hits: usize,
    leading_numbered_list: bool,
    directive_reply_pair: bool,
    /// Byte offset of the first line that opens a directive pattern.
    boundary: Option<usize>,
}

fn analyze(text: &str) -> TextSignals {
    // ASCII lowercasing preserves byte offsets, so boundary positions found
    // in the lowered copy index directly into the original text.
    let lower = text.to_ascii_lowercase();

    let conversational_hits = CONVERSATIONAL_HINTS
        .iter()
        .filter(|hint| lower.contains(*hint))
        .count();
    let directive_hits = DIRECTIVE_HINTS
        .iter()
        .filter(|hint| lower.contains(*hint))
        .count();

    let leading_numbered_list = lower
        .lines()
        .find(|line| !line.trim().is_empty())
        .is_some_and(|line| is_numbered_item(line));

    let mentions_user_condition = lower.contains("when user")
        || lower.contains("when the user")
        || lower.contains("if user")
        || lower.contains("if the user");
    let directive_reply_pair =
        mentions_user_condition && (lower.contains("respond") || lower.contains("reply"));

    let mut boundary = None;
    let mut offset = 0;
    for line in lower.split_inclusive('\n') {
        if opens_directive(line.trim_end_matches('\n')) {
            boundary = Some(offset);
            break;
        }
        offset += line.len();
    }

    TextSignals {
        conversational_hits,
        directive_hits,
        leading_numbered_list,
        directive_reply_pair,
        boundary,
    }
}

fn is_numbered_item(line: &str) -> bool {
    let trimmed = line.trim_start();
    let digits = trimmed.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return false;
    }
    matches!(trimmed.chars().nth(digits), Some('.') | Some(')'))
}

/// A line "opens" the structured channel if it is a numbered item carrying a
/// user-condition phrase, or starts with a known directive opener.
fn opens_directive(line: &str) -> bool {
    let trimmed = line.trim_start();
    if is_numbered_item(trimmed)
        && (trimmed.contains("when user")
            || trimmed.contains("when the user")
            || trimmed.contains("if user")
            || trimmed.contains("if the user"))
    {
        return true;
    }
    DIRECTIVE_LINE_OPENERS
        .iter()
        .any(|opener| trimmed.starts_with(opener))
}

/// True for text that reads like a prompt document even without markers:
/// numbered directive lists, or the "respond with ... text:" idiom.
pub(super) fn looks_like_prompt_document(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    let numbered_directive = lower.lines().any(|line| {
        is_numbered_item(line)
            && (line.contains("when user")
                || line.contains("when the user")
                || line.contains("if user")
                || line.contains("if the user"))
    });
    let respond_text_idiom = (lower.contains("respond with")
        || lower.contains("responds with")
        || lower.contains("reply with")
        || lower.contains("replies with"))
        && lower.contains("text:");

    numbered_directive || respond_text_idiom
}

struct Rule {
    name: &'static str,
    applies: fn(&TextSignals) -> bool,
    resolve: fn(&str, &TextSignals) -> ChannelSplit,
}

/// Ordered rule list; the first matching rule wins and the last rule always
/// matches, so classification can never fall through.
const RULES: [Rule; 4] = [
    Rule {
        name: "structural-directive",
        applies: |s| {
            (s.leading_numbered_list || s.directive_reply_pair)
                && s.directive_hits >= 1
                && s.directive_hits >= s.conversational_hits
        },
        resolve: |text, _| ChannelSplit {
            chat_response: Some(GENERIC_ACKNOWLEDGEMENT.to_string()),
            ai_prompt: normalize_capture(text),
            source: SplitSource::Heuristic("structural-directive"),
        },
    },
    Rule {
        name: "conversational-only",
        applies: |s| s.directive_hits == 0 && !s.leading_numbered_list && s.conversational_hits > 0,
        resolve: |text, _| ChannelSplit {
            chat_response: normalize_capture(text),
            ai_prompt: None,
            source: SplitSource::Heuristic("conversational-only"),
        },
    },
    Rule {
        name: "mixed-boundary",
        applies: |s| s.boundary.is_some(),
        resolve: |text, signals| {
            let boundary = signals.boundary.unwrap_or(0);
            ChannelSplit {
                chat_response: normalize_capture(&text[..boundary]),
                ai_prompt: normalize_capture(&text[boundary..]),
                source: SplitSource::Heuristic("mixed-boundary"),
            }
        },
    },
    // Conservative default: never silently promote ambiguous text into the
    // structured channel.
    Rule {
        name: "default-chat",
        applies: |_| true,
        resolve: |text, _| ChannelSplit {
            chat_response: normalize_capture(text),
            ai_prompt: None,
            source: SplitSource::Heuristic("default-chat"),
        },
    },
];

/// Heuristic fallback used when no channel marker was found.
pub(super) fn classify_unmarked(text: &str) -> ChannelSplit {
    let signals = analyze(text);
    for rule in &RULES {
        if (rule.applies)(&signals) {
            debug!("heuristic rule matched (rule={})", rule.name);
            return (rule.resolve)(text, &signals);
        }
    }
    unreachable!("the final rule matches unconditionally")
}
