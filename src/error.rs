use thiserror::Error;

/// Failures opening or consuming the completion stream.
///
/// Everything in here is terminal for the current turn; partial events
/// already yielded by the stream remain valid.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The endpoint could not be reached at all.
    #[error("cannot reach completion endpoint '{url}': {reason}")]
    Connect { url: String, reason: String },
    /// The request or stream exceeded the transport's own timeout.
    #[error("completion request to '{url}' timed out")]
    Timeout { url: String },
    /// HTTP 429. Callers should surface a distinct "try again later" message.
    #[error("completion endpoint is rate limiting requests; try again later")]
    RateLimited,
    /// Any other non-success HTTP status.
    #[error("completion endpoint '{url}' returned HTTP {status}")]
    Http { url: String, status: u16 },
    /// The stream failed mid-flight after opening successfully.
    #[error("completion stream failed: {0}")]
    Stream(String),
}

impl TransportError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TransportError::RateLimited)
    }
}

/// Rejected story/version operations. No partial mutation occurs for any of
/// these; the store is left exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoryError {
    #[error("story '{0}' not found")]
    StoryNotFound(String),
    #[error("version '{0}' does not belong to this story")]
    VersionNotFound(String),
    #[error("cannot delete the last remaining version")]
    LastVersion,
    #[error("template '{0}' not found")]
    TemplateNotFound(String),
}

/// Turn-level refusals from the session orchestrator. Transport failures are
/// not represented here: they terminate the turn with a visible message and
/// never escape `handle_turn`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("a turn is already streaming for conversation '{0}'")]
    TurnInProgress(String),
}
