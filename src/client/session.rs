//! One chat conversation as the user sees it.

use std::time::Duration;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::accumulator::StreamAccumulator;
use super::reveal::{self, DEFAULT_REVEAL_INTERVAL, RevealEnd};
use super::transport::{ChatTransport, ClientError};
use crate::llm::{ChatMessage, ChatRequest, DEFAULT_MODEL, Role};

/// The opening assistant message of every fresh conversation.
pub const GREETING: &str = "Hello! I'm an LLM chat app. How can I help you today?";

/// Prefix of the inline message shown when a turn fails.
pub const ERROR_PREFIX: &str = "Sorry, an error occurred: ";

/// Where the current (or last) turn is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Sending,
    Receiving,
    Revealing,
    Done,
    Cancelled,
    Failed,
}

/// A message as displayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    /// `false` while a reveal is still typing the text out.
    pub rendered: bool,
}

impl TranscriptEntry {
    fn final_text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            rendered: true,
        }
    }
}

/// What [`ChatSession::send`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Blank input, or a turn was already in flight.
    Ignored,
    Completed { reply: String },
    Cancelled,
    Failed { message: String },
}

/// Conversation state: model choice, system prompt, history and transcript.
///
/// History only grows when a turn completes; a cancelled or failed turn
/// leaves it exactly as it was.
pub struct ChatSession<T> {
    transport: T,
    model: String,
    system_prompt: String,
    history: Vec<ChatMessage>,
    transcript: Vec<TranscriptEntry>,
    processing: bool,
    phase: Phase,
    reveal_interval: Duration,
}

impl<T: ChatTransport> ChatSession<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            model: DEFAULT_MODEL.to_string(),
            system_prompt: String::new(),
            history: Vec::new(),
            transcript: vec![TranscriptEntry::final_text(Role::Assistant, GREETING)],
            processing: false,
            phase: Phase::Idle,
            reveal_interval: DEFAULT_REVEAL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_reveal_interval(mut self, interval: Duration) -> Self {
        self.reveal_interval = interval;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        &self.transcript
    }

    pub fn is_processing(&self) -> bool {
        self.processing
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn set_system_prompt(&mut self, prompt: impl Into<String>) {
        self.system_prompt = prompt.into();
    }

    /// Switches backends. A different model starts a fresh conversation.
    /// Returns whether anything changed.
    pub fn select_model(&mut self, model: impl Into<String>) -> bool {
        let model = model.into();
        if model == self.model {
            return false;
        }
        self.model = model;
        self.reset();
        true
    }

    /// Clears history and shows only the greeting.
    pub fn reset(&mut self) {
        self.history.clear();
        self.transcript.clear();
        self.transcript
            .push(TranscriptEntry::final_text(Role::Assistant, GREETING));
        self.phase = Phase::Idle;
    }

    /// Sends one user message and plays the answer.
    ///
    /// `cancel` aborts the turn from any phase; a reveal in progress then
    /// shows the full text at once.
    pub async fn send(&mut self, text: &str, cancel: &CancellationToken) -> TurnOutcome {
        let text = text.trim();
        if text.is_empty() || self.processing {
            return TurnOutcome::Ignored;
        }

        self.processing = true;
        self.phase = Phase::Sending;
        self.transcript
            .push(TranscriptEntry::final_text(Role::User, text));

        let result = self.run_turn(text, cancel).await;
        let outcome = self.settle(text, result);
        self.cleanup();
        outcome
    }

    fn request_for(&self, text: &str) -> ChatRequest {
        let mut messages = self.history.clone();
        messages.push(ChatMessage::user(text));
        let mut request = ChatRequest::new(messages).with_model(self.model.as_str());
        let prompt = self.system_prompt.trim();
        if !prompt.is_empty() {
            request = request.with_system_prompt(prompt);
        }
        request
    }

    async fn run_turn(
        &mut self,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<String, ClientError> {
        let request = self.request_for(text);

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Aborted),
            response = self.transport.post_chat(&request) => response?,
        };
        if !response.is_success() {
            return Err(ClientError::Status(response.status));
        }

        self.phase = Phase::Receiving;
        let mut body = response.body;
        let mut accumulator = StreamAccumulator::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ClientError::Aborted),
                next = body.next() => next,
            };
            match next {
                Some(chunk) => accumulator.push(&chunk?),
                None => break,
            }
        }
        debug!(events = accumulator.events(), "answer received");
        let reply = accumulator.finish();

        self.phase = Phase::Revealing;
        let index = self.transcript.len();
        self.transcript.push(TranscriptEntry {
            role: Role::Assistant,
            text: String::new(),
            rendered: false,
        });
        let interval = self.reveal_interval;
        let entry = &mut self.transcript[index];
        let end = reveal::play(&reply, interval, cancel, |shown| {
            entry.text.clear();
            entry.text.push_str(shown);
        })
        .await;
        entry.rendered = true;

        match end {
            RevealEnd::Completed => Ok(reply),
            RevealEnd::Interrupted => Err(ClientError::Aborted),
        }
    }

    fn settle(&mut self, text: &str, result: Result<String, ClientError>) -> TurnOutcome {
        match result {
            Ok(reply) => {
                self.history.push(ChatMessage::user(text));
                self.history.push(ChatMessage::assistant(reply.as_str()));
                self.phase = Phase::Done;
                TurnOutcome::Completed { reply }
            }
            Err(ClientError::Aborted) => {
                debug!(phase = ?self.phase, "turn cancelled");
                self.phase = Phase::Cancelled;
                TurnOutcome::Cancelled
            }
            Err(e) => {
                warn!(error = %e, "turn failed");
                let message = format!("{ERROR_PREFIX}{e}");
                self.transcript
                    .push(TranscriptEntry::final_text(Role::Assistant, message.as_str()));
                self.phase = Phase::Failed;
                TurnOutcome::Failed { message }
            }
        }
    }

    fn cleanup(&mut self) {
        self.processing = false;
    }
}
