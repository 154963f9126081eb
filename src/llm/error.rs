//! Error taxonomy for the chat path.

use serde::Serialize;
use thiserror::Error;

use crate::http::{Response, StatusCode};

/// A failure talking to an upstream backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("upstream unreachable: {0}")]
    Transport(String),

    #[error("upstream sent an unreadable body: {0}")]
    Decode(String),
}

impl BackendError {
    /// Network-level failures may succeed on retry; upstream verdicts will not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// The upstream status, when the upstream answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Every way a chat request can end other than a successful stream.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The client body was not a well-formed chat request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The conversation cannot be expressed for the chosen backend.
    #[error("invalid history: {0}")]
    InvalidHistory(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The caller went away. Not an error from the user's point of view.
    #[error("request aborted by the client")]
    Aborted,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

impl ChatError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::InvalidHistory(_) => StatusCode::BadRequest,
            Self::Backend(_) => StatusCode::InternalServerError,
            Self::Aborted => StatusCode::ClientClosedRequest,
        }
    }

    /// Renders the error as a non-SSE `{"error": "..."}` response.
    pub fn into_response(self) -> Response {
        let message = self.to_string();
        Response::new(self.status_code()).json(&ErrorBody { error: &message })
    }
}
