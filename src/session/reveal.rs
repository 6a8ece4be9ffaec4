/// Reveal heuristic for progressive message rendering.
///
/// While a response streams, text is only appended to the visible assistant
/// message once it is confirmed to be outside a marker region: content that
/// may still be part of a partial marker token is held back, everything
/// before a `CHAT_RESPONSE` marker is swallowed, and the gate closes for
/// good once an `AI_PROMPT` or `END` marker appears. Revealing also waits
/// until a minimum amount of visible text has accumulated so a lone leading
/// dash does not flicker into the UI.
///
/// The gate is a rendering optimization only: the end-of-stream
/// classification is authoritative for what gets persisted.
pub(super) struct RevealGate {
    pending: String,
    started: bool,
    closed: bool,
    min_visible: usize,
}

const MARKER_TOKENS: [&str; 3] = ["---CHAT_RESPONSE---", "---AI_PROMPT---", "---END---"];

impl RevealGate {
    pub(super) fn new(min_visible: usize) -> Self {
        Self {
            pending: String::new(),
            started: false,
            closed: false,
            min_visible,
        }
    }

    /// Feed one text delta; returns the text that is safe to show now.
    pub(super) fn push(&mut self, delta: &str) -> String {
        if self.closed {
            return String::new();
        }
        self.pending.push_str(delta);

        // The chat channel starts after a CHAT_RESPONSE marker; everything
        // up to and including the marker is protocol framing, not content.
        if let Some(end) = complete_marker_end(&self.pending, "---CHAT_RESPONSE---") {
            self.pending.drain(..end);
        }

        // A prompt or end marker closes the visible channel for this turn.
        for token in ["---AI_PROMPT---", "---END---"] {
            if let Some(start) = self.pending.find(token) {
                let visible = self.pending[..start].to_string();
                self.pending.clear();
                self.closed = true;
                self.started = true;
                return visible;
            }
        }

        let holdback = marker_prefix_holdback(&self.pending);
        let safe_len = self.pending.len() - holdback;

        if !self.started && self.pending[..safe_len].trim().chars().count() < self.min_visible {
            return String::new();
        }

        self.started = true;
        self.pending.drain(..safe_len).collect()
    }

    pub(super) fn is_closed(&self) -> bool {
        self.closed
    }
}

fn complete_marker_end(text: &str, token: &str) -> Option<usize> {
    text.find(token).map(|start| start + token.len())
}

/// Length of the longest suffix of `text` that is a prefix of any marker
/// token. That many bytes must be held back: they could become a marker
/// once more deltas arrive.
fn marker_prefix_holdback(text: &str) -> usize {
    let mut holdback = 0;
    for token in MARKER_TOKENS {
        let max_len = token.len().min(text.len());
        for k in (1..=max_len).rev() {
            if text.ends_with(&token[..k]) {
                holdback = holdback.max(k);
                break;
            }
        }
    }
    holdback
}
