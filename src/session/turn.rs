use super::reveal::RevealGate;
use super::state::{ChatMessage, Conversation, Sender, TurnOutcome, TurnPhase};
use crate::api::client::tool_manifest;
use crate::api::stream::EventParser;
use crate::api::ApiClient;
use crate::cache::CacheService;
use crate::classify::{classify, GENERIC_ACKNOWLEDGEMENT};
use crate::dispatch::{dispatch, ConfigSink, ToolCall};
use crate::error::{SessionError, TransportError};
use crate::story::{Story, StoryStore, TemplateRegistry};
use crate::types::{ApiMessage, CompletionEvent};
use crate::util::env_override_usize;
use futures::StreamExt;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

const DISCONNECTED_MESSAGE: &str = "The AI prompt designer is not connected right now. \
     Check the completion backend configuration and try again.";
const EMPTY_RESPONSE_MESSAGE: &str =
    "The assistant returned an empty response. Please try again.";
const RATE_LIMITED_MESSAGE: &str = "The assistant is handling too many requests right now. \
     Please try again in a moment.";

const DEFAULT_MIN_REVEAL_CHARS: usize = 12;
const DEFAULT_TEMPLATE_CACHE_KEY: &str = "default_template";
const TEMPLATE_CACHE_TTL: Duration = Duration::from_secs(30);

/// Coordinates one chat turn per conversation: transport, reveal gating,
/// classification, story commits and tool dispatch.
///
/// Turns run on `&self`: each field sits behind its own short-lived lock and
/// no lock is ever held across an await, so independent conversations stream
/// concurrently on one orchestrator. A second `handle_turn` for a
/// conversation that is already streaming or committing is refused.
pub struct SessionOrchestrator {
    client: Option<Arc<ApiClient>>,
    sink: Mutex<Box<dyn ConfigSink + Send>>,
    store: Mutex<StoryStore>,
    templates: Mutex<TemplateRegistry>,
    template_cache: Mutex<CacheService<String>>,
    conversations: Mutex<HashMap<String, Conversation>>,
    busy: Mutex<HashSet<String>>,
    next_message_id: AtomicU64,
}

/// Buffered argument fragments for one tool-use content block. Keyed by the
/// wire block index, not the tool name: two calls to the same tool in one
/// turn must assemble into two separate calls.
struct ToolCallBuffer {
    index: usize,
    name: String,
    arguments: String,
}

impl SessionOrchestrator {
    pub fn new(client: Option<ApiClient>, sink: Box<dyn ConfigSink + Send>) -> Self {
        Self {
            client: client.map(Arc::new),
            sink: Mutex::new(sink),
            store: Mutex::new(StoryStore::new()),
            templates: Mutex::new(TemplateRegistry::new()),
            template_cache: Mutex::new(CacheService::new()),
            conversations: Mutex::new(HashMap::new()),
            busy: Mutex::new(HashSet::new()),
            next_message_id: AtomicU64::new(0),
        }
    }

    /// Snapshot of one conversation's messages and status flags.
    pub fn conversation(&self, conversation_id: &str) -> Option<Conversation> {
        self.conversations
            .lock()
            .unwrap()
            .get(conversation_id)
            .cloned()
    }

    /// Snapshot of the story bound to a conversation.
    pub fn story(&self, conversation_id: &str) -> Option<Story> {
        self.store.lock().unwrap().story(conversation_id).cloned()
    }

    /// Run an operation against the story store (revert, delete, pruning).
    pub fn with_store<R>(&self, f: impl FnOnce(&mut StoryStore) -> R) -> R {
        f(&mut self.store.lock().unwrap())
    }

    /// Run an operation against the template registry. Every access
    /// invalidates the memoized default-template lookup so the next
    /// conversation seeds from fresh data.
    pub fn with_templates<R>(&self, f: impl FnOnce(&mut TemplateRegistry) -> R) -> R {
        let result = f(&mut self.templates.lock().unwrap());
        self.template_cache
            .lock()
            .unwrap()
            .invalidate(DEFAULT_TEMPLATE_CACHE_KEY);
        result
    }

    /// Run one full turn for a conversation. Transport failures never
    /// escape: they terminate the turn with a visible message and a
    /// `TurnOutcome::Failed`. The only error is a refusal of a concurrent
    /// turn for the same conversation.
    pub async fn handle_turn(
        &self,
        conversation_id: &str,
        text: String,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, SessionError> {
        if !self.busy.lock().unwrap().insert(conversation_id.to_string()) {
            return Err(SessionError::TurnInProgress(conversation_id.to_string()));
        }

        let outcome = self.run_turn(conversation_id, text, cancel).await;

        // Single settle point: typing/generating flags and the phase reset
        // exactly once per turn, on every exit path.
        {
            let mut conversations = self.conversations.lock().unwrap();
            if let Some(convo) = conversations.get_mut(conversation_id) {
                convo.is_typing = false;
                convo.is_generating = false;
                convo.phase = TurnPhase::Idle;
            }
        }
        self.busy.lock().unwrap().remove(conversation_id);
        Ok(outcome)
    }

    async fn run_turn(
        &self,
        conversation_id: &str,
        text: String,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        self.conversations
            .lock()
            .unwrap()
            .entry(conversation_id.to_string())
            .or_insert_with(Conversation::new);
        self.seed_story_from_default_template(conversation_id);
        self.push_message(conversation_id, Sender::User, text);

        let Some(client) = self.client.clone() else {
            warn!("no completion backend configured (conversation_id={conversation_id})");
            self.push_message(
                conversation_id,
                Sender::Assistant,
                DISCONNECTED_MESSAGE.to_string(),
            );
            return TurnOutcome::Disconnected;
        };

        {
            let mut conversations = self.conversations.lock().unwrap();
            if let Some(convo) = conversations.get_mut(conversation_id) {
                convo.is_typing = true;
                convo.is_generating = true;
                convo.phase = TurnPhase::AwaitingFirstToken;
            }
        }

        let api_messages = self.api_messages_for(conversation_id);
        let placeholder_id = self.push_message(conversation_id, Sender::Assistant, String::new());

        let mut stream = match client.create_stream(&api_messages, &tool_manifest()).await {
            Ok(stream) => stream,
            Err(error) => return self.fail_turn(conversation_id, &placeholder_id, error),
        };

        let mut parser = EventParser::new();
        let mut gate = RevealGate::new(min_reveal_chars());
        let mut full_text = String::new();
        let mut tool_buffers: Vec<ToolCallBuffer> = Vec::new();
        let mut failure: Option<TransportError> = None;
        let mut cancelled = cancel.is_cancelled();

        while !cancelled {
            tokio::select! {
                _ = cancel.cancelled() => {
                    cancelled = true;
                }
                chunk = stream.next() => match chunk {
                    None => break,
                    Some(Err(error)) => {
                        failure = Some(error);
                        break;
                    }
                    Some(Ok(bytes)) => {
                        for event in parser.process(&bytes) {
                            match event {
                                CompletionEvent::TextDelta { text } => {
                                    full_text.push_str(&text);
                                    // Nothing more is revealed after a
                                    // prompt/end marker closed the gate.
                                    if !gate.is_closed() {
                                        let revealed = gate.push(&text);
                                        if !revealed.is_empty() {
                                            self.append_to_message(
                                                conversation_id,
                                                &placeholder_id,
                                                &revealed,
                                            );
                                        }
                                    }
                                    self.set_phase(conversation_id, TurnPhase::Streaming);
                                }
                                CompletionEvent::ToolCallDelta {
                                    index,
                                    name,
                                    arguments_fragment,
                                } => {
                                    upsert_fragment(
                                        &mut tool_buffers,
                                        index,
                                        &name,
                                        &arguments_fragment,
                                    );
                                }
                            }
                        }
                    }
                }
            }
        }
        // Stop pulling; dropping the stream cancels the in-flight request.
        drop(stream);

        if cancelled {
            info!("turn cancelled mid-stream (conversation_id={conversation_id})");
            self.remove_message_if_empty(conversation_id, &placeholder_id);
            return TurnOutcome::Cancelled;
        }
        if let Some(error) = failure {
            return self.fail_turn(conversation_id, &placeholder_id, error);
        }

        self.set_phase(conversation_id, TurnPhase::Committing);

        if full_text.trim().is_empty() && tool_buffers.is_empty() {
            self.remove_message_if_empty(conversation_id, &placeholder_id);
            self.push_message(
                conversation_id,
                Sender::Assistant,
                EMPTY_RESPONSE_MESSAGE.to_string(),
            );
            return TurnOutcome::Completed {
                chat_response: None,
                committed_version_id: None,
                tool_summary: None,
            };
        }

        // The full-buffer classification is authoritative for what persists
        // as the last message, not the progressively revealed text.
        let split = classify(&full_text);
        let final_chat = split.chat_response.clone().or_else(|| {
            split
                .ai_prompt
                .is_some()
                .then(|| GENERIC_ACKNOWLEDGEMENT.to_string())
        });
        match &final_chat {
            Some(chat) => self.set_message_content(conversation_id, &placeholder_id, chat),
            None => {
                self.remove_message_if_empty(conversation_id, &placeholder_id);
            }
        }

        let committed_version_id = split.ai_prompt.as_ref().map(|prompt| {
            self.store
                .lock()
                .unwrap()
                .commit(conversation_id, prompt, true)
        });

        let tool_summary = if tool_buffers.is_empty() {
            None
        } else {
            let calls = assemble_tool_calls(&tool_buffers);
            debug!(
                "dispatching {} buffered tool call(s) (conversation_id={conversation_id})",
                calls.len()
            );
            let summary = {
                let mut sink = self.sink.lock().unwrap();
                dispatch(&calls, sink.as_mut()).render()
            };
            self.push_message(conversation_id, Sender::Assistant, summary.clone());
            Some(summary)
        };

        TurnOutcome::Completed {
            chat_response: final_chat,
            committed_version_id,
            tool_summary,
        }
    }

    fn fail_turn(
        &self,
        conversation_id: &str,
        placeholder_id: &str,
        error: TransportError,
    ) -> TurnOutcome {
        warn!("turn failed (conversation_id={conversation_id}): {error}");
        self.set_phase(conversation_id, TurnPhase::ErrorRecovery);
        self.remove_message_if_empty(conversation_id, placeholder_id);
        let message = render_transport_failure(&error);
        self.push_message(conversation_id, Sender::Assistant, message);
        TurnOutcome::Failed {
            error: error.to_string(),
        }
    }

    /// Seed a first story version from the default template for brand-new
    /// conversations. The lookup is memoized with a short TTL.
    fn seed_story_from_default_template(&self, conversation_id: &str) {
        if self.store.lock().unwrap().contains(conversation_id) {
            return;
        }
        let cached = self
            .template_cache
            .lock()
            .unwrap()
            .get(DEFAULT_TEMPLATE_CACHE_KEY)
            .cloned();
        let content = match cached {
            Some(content) => content,
            None => {
                let Some(content) = self
                    .templates
                    .lock()
                    .unwrap()
                    .default_template()
                    .map(|template| template.content.clone())
                else {
                    return;
                };
                self.template_cache.lock().unwrap().set(
                    DEFAULT_TEMPLATE_CACHE_KEY,
                    content.clone(),
                    Some(TEMPLATE_CACHE_TTL),
                );
                content
            }
        };
        self.store
            .lock()
            .unwrap()
            .commit(conversation_id, &content, true);
        info!("seeded story from default template (conversation_id={conversation_id})");
    }

    fn api_messages_for(&self, conversation_id: &str) -> Vec<ApiMessage> {
        self.conversations
            .lock()
            .unwrap()
            .get(conversation_id)
            .map(|convo| {
                convo
                    .messages
                    .iter()
                    .filter(|m| !m.content.is_empty())
                    .map(|m| ApiMessage {
                        role: m.sender.as_role().to_string(),
                        content: m.content.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn push_message(&self, conversation_id: &str, sender: Sender, content: String) -> String {
        let id = format!(
            "msg_{}",
            self.next_message_id.fetch_add(1, Ordering::Relaxed) + 1
        );
        let mut conversations = self.conversations.lock().unwrap();
        if let Some(convo) = conversations.get_mut(conversation_id) {
            convo.messages.push(ChatMessage {
                id: id.clone(),
                content,
                sender,
                timestamp: SystemTime::now(),
                attachments: Vec::new(),
            });
        }
        id
    }

    fn append_to_message(&self, conversation_id: &str, message_id: &str, text: &str) {
        let mut conversations = self.conversations.lock().unwrap();
        if let Some(message) = find_message(&mut conversations, conversation_id, message_id) {
            message.content.push_str(text);
            message.timestamp = SystemTime::now();
        }
    }

    fn set_message_content(&self, conversation_id: &str, message_id: &str, content: &str) {
        let mut conversations = self.conversations.lock().unwrap();
        if let Some(message) = find_message(&mut conversations, conversation_id, message_id) {
            message.content = content.to_string();
            message.timestamp = SystemTime::now();
        }
    }

    /// Drop the placeholder if it is still the empty last message, so the
    /// user never sees an orphan empty bubble.
    fn remove_message_if_empty(&self, conversation_id: &str, message_id: &str) {
        let mut conversations = self.conversations.lock().unwrap();
        if let Some(convo) = conversations.get_mut(conversation_id) {
            let is_empty_last = convo
                .last_message()
                .is_some_and(|m| m.id == message_id && m.content.is_empty());
            if is_empty_last {
                convo.remove_last_message();
            }
        }
    }

    fn set_phase(&self, conversation_id: &str, phase: TurnPhase) {
        let mut conversations = self.conversations.lock().unwrap();
        if let Some(convo) = conversations.get_mut(conversation_id) {
            convo.phase = phase;
        }
    }
}

fn find_message<'a>(
    conversations: &'a mut HashMap<String, Conversation>,
    conversation_id: &str,
    message_id: &str,
) -> Option<&'a mut ChatMessage> {
    conversations
        .get_mut(conversation_id)?
        .messages
        .iter_mut()
        .find(|m| m.id == message_id)
}

fn render_transport_failure(error: &TransportError) -> String {
    if error.is_rate_limited() {
        return RATE_LIMITED_MESSAGE.to_string();
    }
    format!("Something went wrong while generating a response: {error}")
}

fn min_reveal_chars() -> usize {
    env_override_usize("BOTSTUDIO_MIN_REVEAL_CHARS", DEFAULT_MIN_REVEAL_CHARS, 1, 200)
}

fn upsert_fragment(buffers: &mut Vec<ToolCallBuffer>, index: usize, name: &str, fragment: &str) {
    if let Some(buffer) = buffers.iter_mut().find(|b| b.index == index) {
        buffer.arguments.push_str(fragment);
    } else {
        buffers.push(ToolCallBuffer {
            index,
            name: name.to_string(),
            arguments: fragment.to_string(),
        });
    }
}

fn assemble_tool_calls(buffers: &[ToolCallBuffer]) -> Vec<ToolCall> {
    buffers
        .iter()
        .map(|buffer| {
            let parameters =
                serde_json::from_str(&buffer.arguments).unwrap_or(serde_json::Value::Null);
            ToolCall {
                name: buffer.name.clone(),
                parameters,
            }
        })
        .collect()
}
