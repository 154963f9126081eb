//! How a chat session reaches the relay.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt;
use thiserror::Error;

use crate::app::CHAT_PATH;
use crate::llm::ChatRequest;

/// Client-side failures. Displayed verbatim in the transcript.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("API error: {0}")]
    Status(u16),

    #[error("{0}")]
    Transport(String),

    #[error("request aborted")]
    Aborted,
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Response body chunks as they arrive.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Bytes, ClientError>> + Send + 'static>>;

/// The relay's answer: its status and the still-unread body.
pub struct ChatResponse {
    pub status: u16,
    pub body: ChunkStream,
}

impl ChatResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub type PostFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ChatResponse, ClientError>> + Send + 'a>>;

pub trait ChatTransport: Send + Sync {
    fn post_chat<'a>(&'a self, request: &'a ChatRequest) -> PostFuture<'a>;
}

/// Posts to `<base>/api/chat` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpChatTransport {
    http: reqwest::Client,
    url: String,
}

impl HttpChatTransport {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            url: format!("{}{CHAT_PATH}", base_url.trim_end_matches('/')),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ChatTransport for HttpChatTransport {
    fn post_chat<'a>(&'a self, request: &'a ChatRequest) -> PostFuture<'a> {
        Box::pin(async move {
            let response = self.http.post(&self.url).json(request).send().await?;
            let status = response.status().as_u16();
            let body = response.bytes_stream().map(|chunk| chunk.map_err(ClientError::from));
            Ok(ChatResponse {
                status,
                body: Box::pin(body),
            })
        })
    }
}
