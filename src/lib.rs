//! Streaming core of a chatbot-platform administration console: consumes an
//! AI completion stream, splits it into a conversational channel and a
//! structured prompt channel, maintains versioned story documents, and
//! dispatches bot-configuration tool calls.

pub mod api;
pub mod cache;
pub mod classify;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod session;
pub mod story;
#[cfg(test)]
pub mod test_support;
pub mod types;
pub mod util;

pub use config::Config;
pub use error::{SessionError, StoryError, TransportError};
pub use session::{SessionOrchestrator, TurnOutcome};
