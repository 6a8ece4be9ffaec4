use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Assistant,
}

impl Sender {
    pub fn as_role(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Assistant => "assistant",
        }
    }
}

/// One turn in a conversation. Ids are assigned at creation and never
/// reused; content may grow in place while a response streams.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: String,
    pub content: String,
    pub sender: Sender,
    pub timestamp: SystemTime,
    pub attachments: Vec<String>,
}

/// Per-turn state machine phase, visible for UI status rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    AwaitingFirstToken,
    Streaming,
    Committing,
    ErrorRecovery,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    pub(super) messages: Vec<ChatMessage>,
    pub(super) is_typing: bool,
    pub(super) is_generating: bool,
    pub(super) phase: TurnPhase,
}

impl Conversation {
    pub(super) fn new() -> Self {
        Self {
            messages: Vec::new(),
            is_typing: false,
            is_generating: false,
            phase: TurnPhase::Idle,
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn is_typing(&self) -> bool {
        self.is_typing
    }

    pub fn is_generating(&self) -> bool {
        self.is_generating
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// Rollback for an empty failed assistant turn; the only way a message
    /// is ever removed individually.
    pub(super) fn remove_last_message(&mut self) -> Option<ChatMessage> {
        self.messages.pop()
    }
}

/// How one `handle_turn` call ended. Transport failures terminate the turn
/// with a visible message and report `Failed` here; they are never raised.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Completed {
        chat_response: Option<String>,
        committed_version_id: Option<String>,
        tool_summary: Option<String>,
    },
    /// No completion backend is configured; a synthetic assistant message
    /// explains the disconnection.
    Disconnected,
    /// The caller canceled mid-stream; partial revealed content is kept and
    /// no commit ran.
    Cancelled,
    Failed {
        error: String,
    },
}
