use super::state::{Sender, TurnOutcome, TurnPhase};
use super::SessionOrchestrator;
use crate::api::client::{ByteStream, MockStreamProducer};
use crate::api::mock_client::{MockApiClient, MockTurn};
use crate::api::ApiClient;
use crate::classify::GENERIC_ACKNOWLEDGEMENT;
use crate::dispatch::{ConfigAction, ConfigSink};
use crate::error::{SessionError, TransportError};
use crate::types::ApiMessage;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
struct RecordingSink {
    applied: Arc<Mutex<Vec<(ConfigAction, String)>>>,
}

impl RecordingSink {
    fn new() -> Self {
        Self {
            applied: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl ConfigSink for RecordingSink {
    fn apply(&mut self, action: ConfigAction, value: &str) -> Result<String, String> {
        self.applied.lock().unwrap().push((action, value.to_string()));
        Ok(format!("{} set to \"{value}\"", action.label()))
    }
}

/// Hands out one stream per turn that stays pending until its release
/// channel fires, then ends cleanly. Lets a test hold a turn mid-stream.
struct GatedStreamProducer {
    releases: Mutex<Vec<oneshot::Receiver<()>>>,
}

impl GatedStreamProducer {
    fn new(releases: Vec<oneshot::Receiver<()>>) -> Self {
        Self {
            releases: Mutex::new(releases),
        }
    }
}

impl MockStreamProducer for GatedStreamProducer {
    fn create_mock_stream(&self, _messages: &[ApiMessage]) -> Result<ByteStream, TransportError> {
        let mut releases = self.releases.lock().unwrap();
        if releases.is_empty() {
            return Err(TransportError::Stream(
                "GatedStreamProducer: no more gated streams configured".to_string(),
            ));
        }
        let release = releases.remove(0);
        let stream = futures::stream::once(async move {
            let _ = release.await;
            Ok(Bytes::from(
                "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
            ))
        });
        Ok(Box::pin(stream))
    }
}

fn sse_text_delta(text: &str) -> String {
    format!(
        "event: content_block_delta\ndata: {}",
        serde_json::json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": { "type": "text_delta", "text": text }
        })
    )
}

fn sse_tool_start(index: usize, name: &str) -> String {
    format!(
        "event: content_block_start\ndata: {}",
        serde_json::json!({
            "type": "content_block_start",
            "index": index,
            "content_block": { "type": "tool_use", "id": format!("call_{index}"), "name": name, "input": {} }
        })
    )
}

fn sse_tool_fragment(index: usize, fragment: &str) -> String {
    format!(
        "event: content_block_delta\ndata: {}",
        serde_json::json!({
            "type": "content_block_delta",
            "index": index,
            "delta": { "type": "input_json_delta", "partial_json": fragment }
        })
    )
}

fn sse_tool_stop(index: usize) -> String {
    format!(
        "event: content_block_stop\ndata: {}",
        serde_json::json!({ "type": "content_block_stop", "index": index })
    )
}

fn orchestrator_with(turns: Vec<MockTurn>, sink: RecordingSink) -> SessionOrchestrator {
    let client = ApiClient::new_mock(Arc::new(MockApiClient::new(turns)));
    SessionOrchestrator::new(Some(client), Box::new(sink))
}

fn assert_flags_settled(orchestrator: &SessionOrchestrator, conversation_id: &str) {
    let convo = orchestrator.conversation(conversation_id).expect("conversation exists");
    assert!(!convo.is_typing());
    assert!(!convo.is_generating());
    assert_eq!(convo.phase(), TurnPhase::Idle);
}

#[tokio::test]
async fn test_marked_response_sets_chat_and_commits_story() {
    let turns = vec![MockTurn::text(vec![sse_text_delta(
        "---CHAT_RESPONSE---\nAll set!\n---AI_PROMPT---\nYou are a greeter bot.\n---END---",
    )])];
    let orchestrator = orchestrator_with(turns, RecordingSink::new());
    let cancel = CancellationToken::new();

    let outcome = orchestrator
        .handle_turn("conv-1", "Make a greeter bot".to_string(), &cancel)
        .await
        .expect("turn should run");

    match outcome {
        TurnOutcome::Completed {
            chat_response,
            committed_version_id,
            tool_summary,
        } => {
            assert_eq!(chat_response.as_deref(), Some("All set!"));
            assert!(committed_version_id.is_some());
            assert_eq!(tool_summary, None);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    let story = orchestrator.story("conv-1").expect("story committed");
    assert_eq!(story.content(), "You are a greeter bot.");
    assert_eq!(story.versions().len(), 1);

    let convo = orchestrator.conversation("conv-1").unwrap();
    assert_eq!(convo.messages().len(), 2);
    assert_eq!(convo.messages()[0].sender, Sender::User);
    assert_eq!(convo.last_message().unwrap().content, "All set!");
    assert_flags_settled(&orchestrator, "conv-1");
}

#[tokio::test]
async fn test_transport_error_removes_placeholder_and_appends_one_error() {
    let turns = vec![MockTurn::failing(
        vec![],
        TransportError::Stream("connection reset".to_string()),
    )];
    let orchestrator = orchestrator_with(turns, RecordingSink::new());
    let cancel = CancellationToken::new();

    let outcome = orchestrator
        .handle_turn("conv-1", "Hello".to_string(), &cancel)
        .await
        .expect("turn should run");

    assert!(matches!(outcome, TurnOutcome::Failed { .. }));
    let convo = orchestrator.conversation("conv-1").unwrap();
    // User message plus exactly one error message; the empty placeholder is
    // gone.
    assert_eq!(convo.messages().len(), 2);
    assert_eq!(convo.last_message().unwrap().sender, Sender::Assistant);
    assert!(convo
        .last_message()
        .unwrap()
        .content
        .contains("Something went wrong"));
    assert_flags_settled(&orchestrator, "conv-1");
}

#[tokio::test]
async fn test_rate_limited_error_uses_try_again_wording() {
    let turns = vec![MockTurn::failing(vec![], TransportError::RateLimited)];
    let orchestrator = orchestrator_with(turns, RecordingSink::new());
    let cancel = CancellationToken::new();

    orchestrator
        .handle_turn("conv-1", "Hello".to_string(), &cancel)
        .await
        .expect("turn should run");

    let convo = orchestrator.conversation("conv-1").unwrap();
    assert!(convo
        .last_message()
        .unwrap()
        .content
        .contains("try again in a moment"));
}

#[tokio::test]
async fn test_disconnected_backend_appends_synthetic_message() {
    let orchestrator = SessionOrchestrator::new(None, Box::new(RecordingSink::new()));
    let cancel = CancellationToken::new();

    let outcome = orchestrator
        .handle_turn("conv-1", "Hello".to_string(), &cancel)
        .await
        .expect("turn should run");

    assert_eq!(outcome, TurnOutcome::Disconnected);
    let convo = orchestrator.conversation("conv-1").unwrap();
    assert_eq!(convo.messages().len(), 2);
    assert!(convo.last_message().unwrap().content.contains("not connected"));
    assert_flags_settled(&orchestrator, "conv-1");
}

#[tokio::test]
async fn test_second_turn_for_streaming_conversation_is_refused() {
    let (release_tx, release_rx) = oneshot::channel();
    let producer = Arc::new(GatedStreamProducer::new(vec![release_rx]));
    let client = ApiClient::new_mock(producer);
    let orchestrator = SessionOrchestrator::new(Some(client), Box::new(RecordingSink::new()));
    let cancel = CancellationToken::new();

    let first = orchestrator.handle_turn("conv-1", "one".to_string(), &cancel);
    let second = async {
        // The first turn is parked mid-stream and still holds the
        // conversation.
        let refused = orchestrator
            .handle_turn("conv-1", "two".to_string(), &cancel)
            .await;
        assert_eq!(
            refused,
            Err(SessionError::TurnInProgress("conv-1".to_string()))
        );
        release_tx.send(()).unwrap();
    };

    let (outcome, ()) = tokio::join!(first, second);
    assert!(outcome.is_ok());
    assert_flags_settled(&orchestrator, "conv-1");
}

#[tokio::test]
async fn test_independent_conversations_stream_concurrently() {
    let (release_a_tx, release_a_rx) = oneshot::channel();
    let (release_b_tx, release_b_rx) = oneshot::channel();
    let producer = Arc::new(GatedStreamProducer::new(vec![release_a_rx, release_b_rx]));
    let client = ApiClient::new_mock(producer);
    let orchestrator = SessionOrchestrator::new(Some(client), Box::new(RecordingSink::new()));
    let cancel = CancellationToken::new();

    let turn_a = orchestrator.handle_turn("conv-a", "Hello".to_string(), &cancel);
    let turn_b = orchestrator.handle_turn("conv-b", "Hello".to_string(), &cancel);
    let release = async {
        // Both turns are parked mid-stream before either is released, and
        // the second one finishes first.
        release_b_tx.send(()).unwrap();
        release_a_tx.send(()).unwrap();
    };

    let (outcome_a, outcome_b, ()) = tokio::join!(turn_a, turn_b, release);
    assert!(outcome_a.is_ok());
    assert!(outcome_b.is_ok());
    assert_eq!(orchestrator.conversation("conv-a").unwrap().messages().len(), 2);
    assert_eq!(orchestrator.conversation("conv-b").unwrap().messages().len(), 2);
    assert_flags_settled(&orchestrator, "conv-a");
    assert_flags_settled(&orchestrator, "conv-b");
}

#[tokio::test]
async fn test_cancelled_turn_skips_commit() {
    let turns = vec![MockTurn::text(vec![sse_text_delta(
        "---AI_PROMPT---\nYou are a bot.\n---END---",
    )])];
    let orchestrator = orchestrator_with(turns, RecordingSink::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = orchestrator
        .handle_turn("conv-1", "Update the bot".to_string(), &cancel)
        .await
        .expect("turn should run");

    assert_eq!(outcome, TurnOutcome::Cancelled);
    assert!(orchestrator.story("conv-1").is_none());
    let convo = orchestrator.conversation("conv-1").unwrap();
    // Placeholder removed: only the user message remains.
    assert_eq!(convo.messages().len(), 1);
    assert_flags_settled(&orchestrator, "conv-1");
}

#[tokio::test]
async fn test_tool_calls_dispatch_and_append_summary() {
    let fragment_head = r#"{"tasks":[{"key":"change_language","value":"fr"},"#;
    let fragment_tail = r#"{"key":"unknown_key","value":"x"}]}"#;
    let turns = vec![MockTurn::text(vec![
        sse_text_delta("---CHAT_RESPONSE---\nUpdating your settings now.\n---END---"),
        sse_tool_start(1, "update_bot_config"),
        sse_tool_fragment(1, fragment_head),
        sse_tool_fragment(1, fragment_tail),
    ])];
    let sink = RecordingSink::new();
    let applied = sink.applied.clone();
    let orchestrator = orchestrator_with(turns, sink);
    let cancel = CancellationToken::new();

    let outcome = orchestrator
        .handle_turn("conv-1", "Switch to French".to_string(), &cancel)
        .await
        .expect("turn should run");

    let summary = match outcome {
        TurnOutcome::Completed { tool_summary, .. } => tool_summary.expect("summary present"),
        other => panic!("unexpected outcome: {other:?}"),
    };
    assert!(summary.contains("Applied:"));
    assert!(summary.contains("Failed:"));
    assert!(summary.contains("unknown_key"));

    let applied = applied.lock().unwrap();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0], (ConfigAction::UpdateLanguage, "fr".to_string()));

    let convo = orchestrator.conversation("conv-1").unwrap();
    // User message, chat reply, then the dispatch summary.
    assert_eq!(convo.messages().len(), 3);
    assert_eq!(convo.last_message().unwrap().content, summary);
}

#[tokio::test]
async fn test_two_calls_to_the_same_tool_dispatch_separately() {
    let turns = vec![MockTurn::text(vec![
        sse_text_delta("---CHAT_RESPONSE---\nDone.\n---END---"),
        sse_tool_start(1, "update_bot_config"),
        sse_tool_fragment(1, r#"{"tasks":[{"key":"language","value":"fr"}]}"#),
        sse_tool_stop(1),
        sse_tool_start(2, "update_bot_config"),
        sse_tool_fragment(2, r#"{"tasks":[{"key":"display_name","value":"Nova"}]}"#),
        sse_tool_stop(2),
    ])];
    let sink = RecordingSink::new();
    let applied = sink.applied.clone();
    let orchestrator = orchestrator_with(turns, sink);
    let cancel = CancellationToken::new();

    let outcome = orchestrator
        .handle_turn("conv-1", "French, and rename the bot".to_string(), &cancel)
        .await
        .expect("turn should run");

    let summary = match outcome {
        TurnOutcome::Completed { tool_summary, .. } => tool_summary.expect("summary present"),
        other => panic!("unexpected outcome: {other:?}"),
    };
    // Both calls survive as separate dispatches; nothing fails.
    assert!(summary.contains("language"));
    assert!(summary.contains("display name"));
    assert!(!summary.contains("Failed:"));

    let applied = applied.lock().unwrap();
    assert_eq!(applied.len(), 2);
    assert_eq!(applied[0], (ConfigAction::UpdateLanguage, "fr".to_string()));
    assert_eq!(applied[1], (ConfigAction::UpdateName, "Nova".to_string()));
}

#[tokio::test]
async fn test_unmarked_directive_text_commits_prompt_with_ack() {
    let directive = "1. When user says \"Hi\", bot replies with: - Text: \"Hello\"";
    let turns = vec![MockTurn::text(vec![sse_text_delta(directive)])];
    let orchestrator = orchestrator_with(turns, RecordingSink::new());
    let cancel = CancellationToken::new();

    let outcome = orchestrator
        .handle_turn("conv-1", "Add a greeting".to_string(), &cancel)
        .await
        .expect("turn should run");

    match outcome {
        TurnOutcome::Completed {
            chat_response,
            committed_version_id,
            ..
        } => {
            assert_eq!(chat_response.as_deref(), Some(GENERIC_ACKNOWLEDGEMENT));
            assert!(committed_version_id.is_some());
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(orchestrator.story("conv-1").unwrap().content(), directive);
}

#[tokio::test]
async fn test_empty_stream_appends_notice() {
    let turns = vec![MockTurn::text(vec![])];
    let orchestrator = orchestrator_with(turns, RecordingSink::new());
    let cancel = CancellationToken::new();

    let outcome = orchestrator
        .handle_turn("conv-1", "Hello".to_string(), &cancel)
        .await
        .expect("turn should run");

    assert!(matches!(
        outcome,
        TurnOutcome::Completed {
            chat_response: None,
            ..
        }
    ));
    let convo = orchestrator.conversation("conv-1").unwrap();
    assert_eq!(convo.messages().len(), 2);
    assert!(convo
        .last_message()
        .unwrap()
        .content
        .contains("empty response"));
    assert_flags_settled(&orchestrator, "conv-1");
}

#[tokio::test]
async fn test_default_template_seeds_first_story() {
    let turns = vec![MockTurn::text(vec![sse_text_delta(
        "---CHAT_RESPONSE---\nHi! How can I help with your bot?\n---END---",
    )])];
    let orchestrator = orchestrator_with(turns, RecordingSink::new());
    orchestrator.with_templates(|templates| {
        let template_id = templates.add("support seed", "You are a friendly support bot.");
        templates.set_default(&template_id).expect("template exists");
    });
    let cancel = CancellationToken::new();

    orchestrator
        .handle_turn("conv-1", "Hello".to_string(), &cancel)
        .await
        .expect("turn should run");

    let story = orchestrator.story("conv-1").expect("seeded story");
    assert_eq!(story.content(), "You are a friendly support bot.");
    assert_eq!(story.versions().len(), 1);
}

#[tokio::test]
async fn test_each_turn_with_prompt_appends_a_version() {
    let marked = |prompt: &str| {
        MockTurn::text(vec![sse_text_delta(&format!(
            "---CHAT_RESPONSE---\nDone.\n---AI_PROMPT---\n{prompt}\n---END---"
        ))])
    };
    let turns = vec![marked("Prompt one."), marked("Prompt two.")];
    let orchestrator = orchestrator_with(turns, RecordingSink::new());
    let cancel = CancellationToken::new();

    orchestrator
        .handle_turn("conv-1", "First".to_string(), &cancel)
        .await
        .expect("first turn");
    orchestrator
        .handle_turn("conv-1", "Second".to_string(), &cancel)
        .await
        .expect("second turn");

    let story = orchestrator.story("conv-1").unwrap();
    assert_eq!(story.versions().len(), 2);
    assert_eq!(story.content(), "Prompt two.");
    let active: Vec<_> = story
        .versions()
        .iter()
        .filter(|v| story.is_active(&v.id))
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].content, "Prompt two.");
}
