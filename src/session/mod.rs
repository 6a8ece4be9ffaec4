//! Per-conversation session orchestration: drives one chat turn from user
//! message through streaming, classification, story commit and tool
//! dispatch.

mod reveal;
mod state;
#[cfg(test)]
mod tests;
mod turn;

pub use state::{ChatMessage, Conversation, Sender, TurnOutcome, TurnPhase};
pub use turn::SessionOrchestrator;
