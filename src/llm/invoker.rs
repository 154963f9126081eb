//! Backend invoker: picks a backend, builds its payload, makes the call and
//! hands back normalized events.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::adapter::{EventStream, from_backend_response, to_backend_payload};
use super::backend::{BackendClient, BackendKind, GeminiClient, WorkersAiClient};
use super::error::ChatError;
use super::message::ChatRequest;
use crate::config::{Config, ConfigError};

/// Owns one client per backend. Shared read-only across requests.
#[derive(Clone)]
pub struct Invoker {
    local: Arc<dyn BackendClient>,
    remote: Arc<dyn BackendClient>,
    default_system_prompt: String,
}

impl Invoker {
    pub fn new(
        local: Arc<dyn BackendClient>,
        remote: Arc<dyn BackendClient>,
        default_system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            local,
            remote,
            default_system_prompt: default_system_prompt.into(),
        }
    }

    /// Builds reqwest-backed clients for both backends.
    pub fn from_config(config: &Config, http: reqwest::Client) -> Result<Self, ConfigError> {
        let local = WorkersAiClient::from_config(http.clone(), &config.local)?;
        let remote = GeminiClient::from_config(http, &config.remote);
        Ok(Self::new(
            Arc::new(local),
            Arc::new(remote),
            config.system_prompt.clone(),
        ))
    }

    fn client(&self, kind: BackendKind) -> &dyn BackendClient {
        match kind {
            BackendKind::Local => self.local.as_ref(),
            BackendKind::Remote => self.remote.as_ref(),
        }
    }

    /// Serves `request` with the backend its `model` selects.
    pub async fn invoke(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<EventStream, ChatError> {
        self.invoke_with(request, BackendKind::select(request.model()), cancel)
            .await
    }

    /// Serves `request` with an explicitly chosen backend.
    ///
    /// Fails fast with [`ChatError::Aborted`] if `cancel` has already fired.
    pub async fn invoke_with(
        &self,
        request: &ChatRequest,
        kind: BackendKind,
        cancel: &CancellationToken,
    ) -> Result<EventStream, ChatError> {
        if cancel.is_cancelled() {
            return Err(ChatError::Aborted);
        }

        let payload = to_backend_payload(request, kind, &self.default_system_prompt)?;
        info!(
            backend = kind.name(),
            model = request.model(),
            messages = request.messages.len(),
            "invoking backend"
        );

        match self.client(kind).send(&payload, cancel).await {
            Ok(raw) => Ok(from_backend_response(raw, cancel.clone())),
            Err(ChatError::Aborted) => {
                info!(backend = kind.name(), "backend call aborted");
                Err(ChatError::Aborted)
            }
            Err(e) => {
                warn!(backend = kind.name(), error = %e, "backend call failed");
                Err(e)
            }
        }
    }
}
