//! Message adapter: chat history in, native payloads out; native responses in,
//! normalized events out.

use std::pin::Pin;

use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::backend::{BackendKind, ByteStream, RawResponse};
use super::error::{BackendError, ChatError};
use super::gemini::{Content, GeminiBody, GenerateContentRequest, TurnRole};
use super::message::{ChatMessage, ChatRequest, NormalizedEvent, Role};
use crate::realtime::{SseDecoder, parse_event};

/// The synthetic model turn that follows the injected system instruction.
pub const REMOTE_ACKNOWLEDGEMENT: &str = "Understood.";

/// Prefix of the synthetic user turn carrying the system prompt.
pub const SYSTEM_INSTRUCTION_PREFIX: &str = "System Instruction: ";

/// Normalized events as the relay consumes them.
pub type EventStream =
    Pin<Box<dyn Stream<Item = Result<NormalizedEvent, ChatError>> + Send + 'static>>;

/// Body of a local inference call. The model id travels in the URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LocalPayload {
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
}

/// A request in one backend's native shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum BackendPayload {
    Local(LocalPayload),
    Remote(GenerateContentRequest),
}

impl BackendPayload {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Local(_) => BackendKind::Local,
            Self::Remote(_) => BackendKind::Remote,
        }
    }
}

/// Builds the native payload for `kind`.
///
/// `default_prompt` is used when the request carries no usable override.
pub fn to_backend_payload(
    request: &ChatRequest,
    kind: BackendKind,
    default_prompt: &str,
) -> Result<BackendPayload, ChatError> {
    match kind {
        BackendKind::Local => Ok(BackendPayload::Local(local_payload(request, default_prompt))),
        BackendKind::Remote => remote_payload(request, default_prompt).map(BackendPayload::Remote),
    }
}

fn local_payload(request: &ChatRequest, default_prompt: &str) -> LocalPayload {
    let has_system = request.messages.iter().any(|m| m.role == Role::System);
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if !has_system {
        let prompt = request.system_prompt_override().unwrap_or(default_prompt);
        messages.push(ChatMessage::system(prompt));
    }
    messages.extend(request.messages.iter().cloned());
    LocalPayload {
        messages,
        stream: true,
    }
}

fn remote_payload(
    request: &ChatRequest,
    default_prompt: &str,
) -> Result<GenerateContentRequest, ChatError> {
    let prompt = request
        .system_prompt_override()
        .or_else(|| {
            request
                .messages
                .iter()
                .find(|m| m.role == Role::System)
                .map(|m| m.content.as_str())
        })
        .unwrap_or(default_prompt);

    let mut turns: Vec<Content> = Vec::with_capacity(request.messages.len());
    for message in &request.messages {
        let role = match message.role {
            Role::User => TurnRole::User,
            Role::Assistant => TurnRole::Model,
            Role::System => continue,
        };
        match turns.last_mut() {
            Some(last) if last.role == role => {
                last.parts.extend(Content::text(role, message.content.as_str()).parts);
            }
            _ => turns.push(Content::text(role, message.content.as_str())),
        }
    }

    match turns.last() {
        None => {
            return Err(ChatError::InvalidHistory(
                "conversation has no user or assistant turns".into(),
            ));
        }
        Some(last) if last.role != TurnRole::User => {
            return Err(ChatError::InvalidHistory(
                "conversation must end with a user turn".into(),
            ));
        }
        Some(_) => {}
    }

    let mut contents = Vec::with_capacity(turns.len() + 2);
    contents.push(Content::text(
        TurnRole::User,
        format!("{SYSTEM_INSTRUCTION_PREFIX}{prompt}"),
    ));
    contents.push(Content::text(TurnRole::Model, REMOTE_ACKNOWLEDGEMENT));
    contents.extend(turns);
    Ok(GenerateContentRequest { contents })
}

/// Normalizes a raw upstream response.
///
/// Streamed bodies are decoded record by record and raced against `cancel`;
/// batch bodies become exactly one event.
pub fn from_backend_response(raw: RawResponse, cancel: CancellationToken) -> EventStream {
    match raw {
        RawResponse::Stream(body) => Box::pin(normalize_stream(body, cancel)),
        RawResponse::Batch(bytes) => {
            let event = match serde_json::from_slice::<GeminiBody>(&bytes) {
                Ok(body) => Ok(NormalizedEvent::new(body.text())),
                Err(e) => {
                    warn!(error = %e, "undecodable remote body");
                    Err(ChatError::from(BackendError::Decode(e.to_string())))
                }
            };
            Box::pin(futures_util::stream::iter([event]))
        }
    }
}

enum Step {
    Chunk(Bytes),
    Failed(BackendError),
    Ended,
    Cancelled,
}

fn normalize_stream(
    mut body: ByteStream,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<NormalizedEvent, ChatError>> + Send + 'static {
    async_stream::stream! {
        let mut decoder = SseDecoder::new();
        let mut tokens = 0usize;
        loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                next = body.next() => match next {
                    Some(Ok(chunk)) => Step::Chunk(chunk),
                    Some(Err(e)) => Step::Failed(e),
                    None => Step::Ended,
                },
            };

            let payloads = match step {
                Step::Chunk(chunk) => decoder.push(&chunk),
                Step::Ended => {
                    for payload in decoder.finish() {
                        if let Some(event) = parse_event(&payload) {
                            tokens += 1;
                            yield Ok(event);
                        }
                    }
                    debug!(tokens, "local stream complete");
                    break;
                }
                Step::Failed(e) => {
                    yield Err(ChatError::from(e));
                    break;
                }
                Step::Cancelled => {
                    debug!(tokens, "local stream cancelled");
                    yield Err(ChatError::Aborted);
                    break;
                }
            };

            for payload in payloads {
                if let Some(event) = parse_event(&payload) {
                    tokens += 1;
                    yield Ok(event);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::gemini::Part;
    use futures_util::stream;

    const DEFAULT: &str = "You are a helpful, friendly assistant.";

    fn remote(request: &ChatRequest) -> Result<Vec<Content>, ChatError> {
        match to_backend_payload(request, BackendKind::Remote, DEFAULT)? {
            BackendPayload::Remote(r) => Ok(r.contents),
            BackendPayload::Local(_) => panic!("expected remote payload"),
        }
    }

    fn local(request: &ChatRequest) -> LocalPayload {
        match to_backend_payload(request, BackendKind::Local, DEFAULT).unwrap() {
            BackendPayload::Local(l) => l,
            BackendPayload::Remote(_) => panic!("expected local payload"),
        }
    }

    async fn drain(events: EventStream) -> Vec<Result<NormalizedEvent, ChatError>> {
        events.collect().await
    }

    #[test]
    fn remote_injects_instruction_and_acknowledgement() {
        let contents = remote(&ChatRequest::new(vec![ChatMessage::user("hi")])).unwrap();
        assert_eq!(
            contents,
            vec![
                Content::text(TurnRole::User, format!("System Instruction: {DEFAULT}")),
                Content::text(TurnRole::Model, "Understood."),
                Content::text(TurnRole::User, "hi"),
            ]
        );
    }

    #[test]
    fn remote_rejects_empty_history_even_with_prompt() {
        let req = ChatRequest::new(vec![]).with_system_prompt("be terse");
        assert!(matches!(remote(&req), Err(ChatError::InvalidHistory(_))));
    }

    #[test]
    fn remote_rejects_history_ending_on_model() {
        let req = ChatRequest::new(vec![
            ChatMessage::user("hi"),
            ChatMessage::assistant("hello"),
        ]);
        assert!(matches!(remote(&req), Err(ChatError::InvalidHistory(_))));
    }

    #[test]
    fn remote_system_only_history_is_invalid() {
        let req = ChatRequest::new(vec![ChatMessage::system("rules")]);
        assert!(matches!(remote(&req), Err(ChatError::InvalidHistory(_))));
    }

    #[test]
    fn remote_prompt_precedence() {
        let history = vec![ChatMessage::system("from history"), ChatMessage::user("q")];

        let contents = remote(&ChatRequest::new(history.clone())).unwrap();
        assert_eq!(contents[0].parts[0].text, "System Instruction: from history");

        let contents = remote(&ChatRequest::new(history).with_system_prompt("override")).unwrap();
        assert_eq!(contents[0].parts[0].text, "System Instruction: override");
    }

    #[test]
    fn remote_maps_roles_and_merges_neighbours() {
        let req = ChatRequest::new(vec![
            ChatMessage::user("a"),
            ChatMessage::system("dropped"),
            ChatMessage::user("b"),
            ChatMessage::assistant("c"),
            ChatMessage::user("d"),
        ]);
        let contents = remote(&req).unwrap();
        assert_eq!(contents.len(), 5);
        assert_eq!(contents[2].role, TurnRole::User);
        assert_eq!(
            contents[2].parts,
            vec![Part { text: "a".into() }, Part { text: "b".into() }]
        );
        assert_eq!(contents[3], Content::text(TurnRole::Model, "c"));
        assert_eq!(contents[4], Content::text(TurnRole::User, "d"));

        for pair in contents.windows(2) {
            assert_ne!(pair[0].role, pair[1].role);
        }
    }

    #[test]
    fn local_prepends_prompt_without_system_message() {
        let request = ChatRequest::new(vec![ChatMessage::user("hi")]).with_system_prompt("pirate");
        let payload = local(&request);
        assert!(payload.stream);
        assert_eq!(
            payload.messages,
            vec![ChatMessage::system("pirate"), ChatMessage::user("hi")]
        );

        let payload = local(&ChatRequest::new(vec![ChatMessage::user("hi")]));
        assert_eq!(payload.messages[0], ChatMessage::system(DEFAULT));
    }

    #[test]
    fn local_keeps_existing_system_message() {
        let history = vec![ChatMessage::user("hi"), ChatMessage::system("mine")];
        let payload = local(&ChatRequest::new(history.clone()).with_system_prompt("ignored"));
        assert_eq!(payload.messages, history);
    }

    #[test]
    fn local_payload_wire_shape() {
        let request = ChatRequest::new(vec![ChatMessage::user("hi")]);
        let payload = to_backend_payload(&request, BackendKind::Local, "p").unwrap();
        assert_eq!(payload.kind(), BackendKind::Local);
        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            concat!(
                r#"{"messages":[{"role":"system","content":"p"},"#,
                r#"{"role":"user","content":"hi"}],"stream":true}"#,
            )
        );
    }

    #[tokio::test]
    async fn stream_tokens_survive_chunk_splits() {
        let chunks: Vec<Result<Bytes, BackendError>> = vec![
            Ok(Bytes::from_static(b"data: {\"response\":\"Hel\"}\n\nda")),
            Ok(Bytes::from_static(b"ta: {\"response\":\"lo\"}\n")),
            Ok(Bytes::from_static(b"\ndata: [DONE]\n\n")),
        ];
        let raw = RawResponse::Stream(Box::pin(stream::iter(chunks)));
        let events = drain(from_backend_response(raw, CancellationToken::new())).await;
        let text: String = events.into_iter().map(|e| e.unwrap().response).collect();
        assert_eq!(text, "Hello");
    }

    #[tokio::test]
    async fn stream_transport_error_is_surfaced() {
        let chunks: Vec<Result<Bytes, BackendError>> = vec![
            Ok(Bytes::from_static(b"data: {\"response\":\"a\"}\n\n")),
            Err(BackendError::Transport("reset".into())),
        ];
        let raw = RawResponse::Stream(Box::pin(stream::iter(chunks)));
        let events = drain(from_backend_response(raw, CancellationToken::new())).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], Err(ChatError::Backend(BackendError::Transport(_)))));
    }

    #[tokio::test]
    async fn cancelled_stream_ends_with_abort() {
        let raw = RawResponse::Stream(Box::pin(stream::pending::<Result<Bytes, BackendError>>()));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let events = drain(from_backend_response(raw, cancel)).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Err(ChatError::Aborted)));
    }

    #[tokio::test]
    async fn batch_body_is_exactly_one_event() {
        let raw = RawResponse::Batch(Bytes::from_static(
            concat!(
                r#"[{"candidates":[{"content":{"parts":[{"text":"one "}]}}]},"#,
                r#"{"candidates":[{"content":{"parts":[{"text":"piece"}]}}]}]"#,
            )
            .as_bytes(),
        ));
        let events = drain(from_backend_response(raw, CancellationToken::new())).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().response, "one piece");
    }

    #[tokio::test]
    async fn undecodable_batch_is_decode_error() {
        let raw = RawResponse::Batch(Bytes::from_static(b"<html>oops</html>"));
        let events = drain(from_backend_response(raw, CancellationToken::new())).await;
        assert!(matches!(events[0], Err(ChatError::Backend(BackendError::Decode(_)))));
    }
}
