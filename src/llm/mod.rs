//! LLM integration: the chat data model, per-backend payload adapters, the
//! outbound clients and the invoker that ties them together.
//!
//! The relay's contract with the browser is backend-agnostic: whatever the
//! backend, the answer arrives as a stream of [`NormalizedEvent`]s whose
//! `response` fields concatenate to the full text.

pub mod adapter;
pub mod backend;
pub mod error;
pub mod gemini;
pub mod invoker;
pub mod message;

pub use adapter::{
    BackendPayload, EventStream, LocalPayload, from_backend_response, to_backend_payload,
};
pub use backend::{BackendClient, BackendKind, GeminiClient, RawResponse, WorkersAiClient};
pub use error::{BackendError, ChatError};
pub use invoker::Invoker;
pub use message::{ChatMessage, ChatRequest, DEFAULT_MODEL, NormalizedEvent, Role};
