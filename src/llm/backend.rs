//! Upstream backends and the transport seam in front of them.
//!
//! Two backends sit behind the relay:
//!
//! - **Local**: a Workers-AI-style inference endpoint that streams
//!   `data: {"response": "<token>"}` records.
//! - **Remote**: Gemini `generateContent`, which answers with one JSON body.
//!
//! Both are reached through [`BackendClient`], so the invoker and its tests
//! never depend on a live network.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::adapter::BackendPayload;
use super::error::{BackendError, ChatError};
use crate::config::{ConfigError, LocalConfig, RemoteConfig};

/// Raw upstream body chunks.
pub type ByteStream =
    Pin<Box<dyn Stream<Item = Result<Bytes, BackendError>> + Send + 'static>>;

/// Which of the two backends serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Token-streaming inference binding. The default.
    Local,
    /// Batch-only, turn-alternating generative API.
    Remote,
}

impl BackendKind {
    /// Any selector containing this (case-insensitively) goes to the remote backend.
    pub const REMOTE_MARKER: &'static str = "gemini";

    /// Case-insensitive substring match; unknown selectors fall back to [`Local`](Self::Local).
    pub fn select(model: &str) -> Self {
        if model.to_ascii_lowercase().contains(Self::REMOTE_MARKER) {
            Self::Remote
        } else {
            Self::Local
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

/// What an upstream handed back, before normalization.
pub enum RawResponse {
    /// An incremental SSE body.
    Stream(ByteStream),
    /// A complete JSON document.
    Batch(Bytes),
}

/// Boxed future returned by [`BackendClient::send`].
pub type SendFuture<'a> =
    Pin<Box<dyn Future<Output = Result<RawResponse, ChatError>> + Send + 'a>>;

/// The outbound call to one backend.
///
/// Implementations must race every await against `cancel` and return
/// [`ChatError::Aborted`] as soon as it fires, dropping the in-flight call.
pub trait BackendClient: Send + Sync {
    fn kind(&self) -> BackendKind;

    fn send<'a>(
        &'a self,
        payload: &'a BackendPayload,
        cancel: &'a CancellationToken,
    ) -> SendFuture<'a>;
}

/// Awaits `fut` unless `cancel` fires first.
pub(crate) async fn or_abort<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = T>,
) -> Result<T, ChatError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ChatError::Aborted),
        out = fut => Ok(out),
    }
}

/// Turns a non-success upstream answer into [`BackendError::Status`].
async fn check_status(
    response: reqwest::Response,
    cancel: &CancellationToken,
) -> Result<reqwest::Response, ChatError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = or_abort(cancel, response.text()).await?.unwrap_or_default();
    Err(BackendError::Status {
        status: status.as_u16(),
        body,
    }
    .into())
}

/// Client for the token-streaming local backend.
#[derive(Clone)]
pub struct WorkersAiClient {
    http: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl WorkersAiClient {
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            token,
        }
    }

    pub fn from_config(http: reqwest::Client, config: &LocalConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(http, config.endpoint()?, config.token.clone()))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl BackendClient for WorkersAiClient {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn send<'a>(
        &'a self,
        payload: &'a BackendPayload,
        cancel: &'a CancellationToken,
    ) -> SendFuture<'a> {
        Box::pin(async move {
            let mut request = self.http.post(&self.endpoint).json(payload);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }

            debug!(endpoint = %self.endpoint, "calling local backend");
            let response = or_abort(cancel, request.send())
                .await?
                .map_err(BackendError::from)?;
            let response = check_status(response, cancel).await?;

            let body = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(BackendError::from));
            Ok(RawResponse::Stream(Box::pin(body)))
        })
    }
}

/// Client for the batch-only remote backend.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl GeminiClient {
    pub fn new(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            api_key,
        }
    }

    pub fn from_config(http: reqwest::Client, config: &RemoteConfig) -> Self {
        Self::new(http, config.endpoint(), config.api_key.clone())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl BackendClient for GeminiClient {
    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }

    fn send<'a>(
        &'a self,
        payload: &'a BackendPayload,
        cancel: &'a CancellationToken,
    ) -> SendFuture<'a> {
        Box::pin(async move {
            let mut request = self.http.post(&self.endpoint).json(payload);
            if let Some(key) = &self.api_key {
                request = request.header("x-goog-api-key", key);
            }

            debug!(endpoint = %self.endpoint, "calling remote backend");
            let response = or_abort(cancel, request.send())
                .await?
                .map_err(BackendError::from)?;
            let response = check_status(response, cancel).await?;

            // The remote backend does not stream; read the whole document.
            let body = or_abort(cancel, response.bytes())
                .await?
                .map_err(BackendError::from)?;
            Ok(RawResponse::Batch(body))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_is_case_insensitive_substring() {
        assert_eq!(BackendKind::select("gemini"), BackendKind::Remote);
        assert_eq!(BackendKind::select("Google-GEMINI-2.5"), BackendKind::Remote);
        assert_eq!(BackendKind::select("llama"), BackendKind::Local);
        assert_eq!(BackendKind::select(""), BackendKind::Local);
        assert_eq!(BackendKind::select("gpt-something"), BackendKind::Local);
    }

    #[test]
    fn clients_report_their_kind() {
        let http = reqwest::Client::new();
        let local = WorkersAiClient::new(http.clone(), "http://127.0.0.1:9/run/m", None);
        let remote = GeminiClient::new(http, "http://127.0.0.1:9/models/m:generateContent", None);
        assert_eq!(local.kind(), BackendKind::Local);
        assert_eq!(remote.kind(), BackendKind::Remote);
    }

    #[tokio::test]
    async fn cancelled_token_aborts_before_sending() {
        let client = WorkersAiClient::new(reqwest::Client::new(), "http://127.0.0.1:9/run/m", None);
        let payload = BackendPayload::Local(crate::llm::LocalPayload {
            messages: vec![],
            stream: true,
        });
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = client.send(&payload, &cancel).await;
        assert!(matches!(outcome, Err(ChatError::Aborted)));
    }

    #[tokio::test]
    async fn unreachable_upstream_is_transient() {
        // Port 9 (discard) is closed on test machines; the connect fails fast.
        let client = GeminiClient::new(reqwest::Client::new(), "http://127.0.0.1:9/x", None);
        let payload = BackendPayload::Local(crate::llm::LocalPayload {
            messages: vec![],
            stream: true,
        });
        let outcome = client.send(&payload, &CancellationToken::new()).await;
        match outcome {
            Err(ChatError::Backend(e)) => assert!(e.is_transient()),
            Err(other) => panic!("expected backend error, got {other:?}"),
            Ok(_) => panic!("expected backend error, got a response"),
        }
    }
}
