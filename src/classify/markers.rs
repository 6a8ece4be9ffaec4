use super::{
    normalize_capture, ChannelSplit, SplitSource, AI_PROMPT_LABEL, CHAT_RESPONSE_LABEL, END_LABEL,
};

/// Byte span of one recognized marker, dash runs included.
#[derive(Debug, Clone, Copy)]
struct MarkerHit {
    start: usize,
    end: usize,
}

/// Find a marker like `---CHAT_RESPONSE---`, tolerating longer dash runs.
/// The label must be fenced by at least two dashes on each side so plain
/// prose occurrences of a label (e.g. the word "END") never match.
fn find_marker(text: &str, label: &str) -> Option<MarkerHit> {
    let bytes = text.as_bytes();
    let mut search = 0;

    while let Some(rel) = text[search..].find(label) {
        let at = search + rel;

        let mut dash_start = at;
        while dash_start > 0 && bytes[dash_start - 1] == b'-' {
            dash_start -= 1;
        }
        let label_end = at + label.len();
        let mut dash_end = label_end;
        while dash_end < bytes.len() && bytes[dash_end] == b'-' {
            dash_end += 1;
        }

        if at - dash_start >= 2 && dash_end - label_end >= 2 {
            return Some(MarkerHit {
                start: dash_start,
                end: dash_end,
            });
        }

        search = label_end;
    }

    None
}

/// Extract the text between `marker_end` and the nearest following marker
/// among `stop_labels`, or the rest of the text when no stop marker follows
/// (an unterminated final section defaults to "rest of text").
fn capture_section(text: &str, section_start: usize, stop_labels: &[&str]) -> String {
    let tail = &text[section_start..];
    let mut end = tail.len();
    for label in stop_labels {
        if let Some(hit) = find_marker(tail, label) {
            end = end.min(hit.start);
        }
    }
    tail[..end].to_string()
}

/// Primary marker parse. Returns `None` when neither channel marker is
/// present, handing the text over to the heuristic rules. Each section is
/// captured independently from its own marker, which keeps out-of-order
/// markers tolerable.
pub(super) fn split_marked(text: &str) -> Option<ChannelSplit> {
    let chat_marker = find_marker(text, CHAT_RESPONSE_LABEL);
    let prompt_marker = find_marker(text, AI_PROMPT_LABEL);

    if chat_marker.is_none() && prompt_marker.is_none() {
        return None;
    }

    let chat_response = chat_marker.and_then(|hit| {
        normalize_capture(&capture_section(
            text,
            hit.end,
            &[AI_PROMPT_LABEL, END_LABEL],
        ))
    });
    let ai_prompt = prompt_marker.and_then(|hit| {
        normalize_capture(&capture_section(
            text,
            hit.end,
            &[CHAT_RESPONSE_LABEL, END_LABEL],
        ))
    });

    Some(ChannelSplit {
        chat_response,
        ai_prompt,
        source: SplitSource::Markers,
    })
}
