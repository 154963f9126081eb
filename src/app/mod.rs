//! Request dispatcher: wires the router to the invoker, the SSE encoder and
//! the asset source.
//!
//! | Request                       | Outcome                          |
//! |-------------------------------|----------------------------------|
//! | `POST /api/chat`              | chat relay (SSE or JSON error)   |
//! | any other `/api/*`            | `404 Not Found`                  |
//! | everything else               | static asset passthrough         |

pub mod assets;

use std::sync::Arc;

use futures_util::{StreamExt, stream};
use tracing::{debug, warn};

pub use assets::{AssetSource, DirectoryAssets, NoAssets};

use crate::context::Context;
use crate::llm::{ChatError, ChatRequest, Invoker};
use crate::middleware::LoggerMiddleware;
use crate::realtime::sse;
use crate::router::Router;
use crate::{Response, StatusCode};

/// The one API route.
pub const CHAT_PATH: &str = "/api/chat";

/// Builds the relay's router.
pub fn router(invoker: Arc<Invoker>, assets: Arc<dyn AssetSource>) -> Router {
    let mut router = Router::new();
    router.layer(LoggerMiddleware);

    router.post(CHAT_PATH, move |ctx: Context| {
        let invoker = invoker.clone();
        async move { chat(&invoker, ctx).await }
    });
    router.any("/api/*", |ctx: Context| async move { unknown_api(&ctx) });
    router.fallback(move |ctx: Context| {
        let assets = assets.clone();
        async move { assets.fetch(ctx.into_request()).await }
    });

    router
}

fn unknown_api(ctx: &Context) -> Response {
    debug!(
        method = %ctx.request().method(),
        tail = ctx.params().get("wildcard").unwrap_or_default(),
        "no such API route"
    );
    Response::new(StatusCode::NotFound).body("Not found")
}

/// Handles `POST /api/chat`.
///
/// Failures before the first event become a JSON error response with the
/// matching status. Once the first event is in hand the status line is
/// committed, and later failures just end the stream.
pub async fn chat(invoker: &Invoker, ctx: Context) -> Response {
    let request: ChatRequest = match ctx.json() {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "rejecting malformed chat body");
            return ChatError::InvalidRequest(e.to_string()).into_response();
        }
    };

    let cancel = ctx.cancellation().clone();
    let mut events = match invoker.invoke(&request, &cancel).await {
        Ok(events) => events,
        Err(e) => return error_response(e),
    };

    let first = match events.next().await {
        Some(Err(e)) => return error_response(e),
        Some(Ok(event)) => Some(Ok(event)),
        None => None,
    };

    let body = sse::encode(stream::iter(first).chain(events));
    Response::new(StatusCode::Ok)
        .header("Content-Type", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .stream(body)
}

fn error_response(err: ChatError) -> Response {
    match &err {
        ChatError::Aborted => debug!("chat request aborted before streaming"),
        ChatError::Backend(e) => {
            warn!(error = %e, upstream_status = ?e.status(), "chat relay failed")
        }
        _ => debug!(error = %err, "chat request rejected"),
    }
    err.into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;
    use futures_util::stream;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::Request;
    use crate::http::Body;
    use crate::llm::backend::{RawResponse, SendFuture};
    use crate::llm::{BackendClient, BackendError, BackendKind, BackendPayload};

    struct Canned {
        kind: BackendKind,
        reply: Mutex<Option<Result<RawResponse, ChatError>>>,
    }

    impl Canned {
        fn new(kind: BackendKind, reply: Result<RawResponse, ChatError>) -> Arc<Self> {
            Arc::new(Self {
                kind,
                reply: Mutex::new(Some(reply)),
            })
        }
    }

    impl BackendClient for Canned {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn send<'a>(
            &'a self,
            _payload: &'a BackendPayload,
            _cancel: &'a CancellationToken,
        ) -> SendFuture<'a> {
            let reply = self.reply.lock().unwrap().take();
            Box::pin(async move { reply.unwrap_or(Err(ChatError::Aborted)) })
        }
    }

    fn stream_reply(records: &[&'static str]) -> Result<RawResponse, ChatError> {
        let chunks: Vec<Result<Bytes, BackendError>> = records
            .iter()
            .map(|r| Ok(Bytes::from_static((*r).as_bytes())))
            .collect();
        Ok(RawResponse::Stream(Box::pin(stream::iter(chunks))))
    }

    fn service(local: Result<RawResponse, ChatError>) -> crate::router::Service {
        let invoker = Invoker::new(
            Canned::new(BackendKind::Local, local),
            Canned::new(BackendKind::Remote, Ok(RawResponse::Batch(Bytes::from_static(b"{}")))),
            "prompt",
        );
        router(Arc::new(invoker), Arc::new(NoAssets)).into_service()
    }

    fn post(path: &str, body: &str) -> Request {
        let raw = format!(
            "POST {path} HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\n\
             Content-Length: {}\r\n\r\n{body}",
            body.len()
        );
        Request::parse(raw.as_bytes()).unwrap().0
    }

    fn get(path: &str) -> Request {
        let raw = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\n\r\n");
        Request::parse(raw.as_bytes()).unwrap().0
    }

    async fn streamed_text(response: Response) -> String {
        let (_, body) = response.into_parts();
        let Body::Stream(body) = body else {
            panic!("expected a streamed body");
        };
        let chunks: Vec<Bytes> = body.collect().await;
        chunks.iter().map(|c| std::str::from_utf8(c).unwrap()).collect()
    }

    fn full_text(response: Response) -> String {
        let bytes = response.into_bytes().unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        text.split("\r\n\r\n").nth(1).unwrap_or_default().to_string()
    }

    const HI: &str = r#"{"messages":[{"role":"user","content":"hi"}]}"#;

    #[tokio::test]
    async fn chat_streams_sse() {
        let svc = service(stream_reply(&[
            "data: {\"response\":\"Hel\"}\n\n",
            "data: {\"response\":\"lo\"}\n\ndata: [DONE]\n\n",
        ]));
        let res = svc.route(post(CHAT_PATH, HI)).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.headers().get("content-type"), Some("text/event-stream"));
        assert_eq!(res.headers().get("cache-control"), Some("no-cache"));
        assert_eq!(
            streamed_text(res).await,
            "data: {\"response\":\"Hel\"}\n\ndata: {\"response\":\"lo\"}\n\n"
        );
    }

    #[tokio::test]
    async fn remote_answer_is_one_record() {
        let invoker = Invoker::new(
            Canned::new(BackendKind::Local, Err(ChatError::Aborted)),
            Canned::new(
                BackendKind::Remote,
                Ok(RawResponse::Batch(Bytes::from_static(concat!(
                    r#"{"candidates":[{"content":{"parts":"#,
                    r#"[{"text":"all "},{"text":"at once"}]}}]}"#,
                ).as_bytes()))),
            ),
            "prompt",
        );
        let svc = router(Arc::new(invoker), Arc::new(NoAssets)).into_service();
        let body = r#"{"model":"gemini","messages":[{"role":"user","content":"hi"}]}"#;
        let res = svc.route(post(CHAT_PATH, body)).await;
        assert_eq!(streamed_text(res).await, "data: {\"response\":\"all at once\"}\n\n");
    }

    #[tokio::test]
    async fn malformed_body_is_400() {
        let svc = service(stream_reply(&[]));
        let res = svc.route(post(CHAT_PATH, "{not json")).await;
        assert_eq!(res.status(), StatusCode::BadRequest);
        assert!(full_text(res).starts_with(r#"{"error":"invalid request"#));

        let res = svc.route(post(CHAT_PATH, r#"{"model":"llama"}"#)).await;
        assert_eq!(res.status(), StatusCode::BadRequest);
    }

    #[tokio::test]
    async fn invalid_history_is_400() {
        let svc = service(stream_reply(&[]));
        let body = r#"{"model":"gemini","systemPrompt":"x","messages":[]}"#;
        let res = svc.route(post(CHAT_PATH, body)).await;
        assert_eq!(res.status(), StatusCode::BadRequest);
    }

    #[tokio::test]
    async fn upstream_failure_is_500_json() {
        let svc = service(Err(BackendError::Status {
            status: 500,
            body: "model crashed".into(),
        }
        .into()));
        let res = svc.route(post(CHAT_PATH, HI)).await;
        assert_eq!(res.status(), StatusCode::InternalServerError);
        assert!(!res.is_streaming());
        assert_eq!(
            full_text(res),
            r#"{"error":"upstream returned 500: model crashed"}"#
        );
    }

    #[tokio::test]
    async fn failure_before_first_event_is_500() {
        let chunks: Vec<Result<Bytes, BackendError>> =
            vec![Err(BackendError::Transport("reset".into()))];
        let svc = service(Ok(RawResponse::Stream(Box::pin(stream::iter(chunks)))));
        let res = svc.route(post(CHAT_PATH, HI)).await;
        assert_eq!(res.status(), StatusCode::InternalServerError);
    }

    #[tokio::test]
    async fn abort_before_stream_is_499() {
        let svc = service(Err(ChatError::Aborted));
        let res = svc.route(post(CHAT_PATH, HI)).await;
        assert_eq!(res.status(), StatusCode::ClientClosedRequest);
    }

    #[tokio::test]
    async fn other_api_paths_are_404() {
        let svc = service(stream_reply(&[]));
        assert_eq!(svc.route(get("/api/other")).await.status(), StatusCode::NotFound);
        assert_eq!(svc.route(get(CHAT_PATH)).await.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn non_api_paths_go_to_assets() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "home").unwrap();
        let invoker = Invoker::new(
            Canned::new(BackendKind::Local, Err(ChatError::Aborted)),
            Canned::new(BackendKind::Remote, Err(ChatError::Aborted)),
            "prompt",
        );
        let assets = Arc::new(DirectoryAssets::new(dir.path()));
        let svc = router(Arc::new(invoker), assets).into_service();

        let res = svc.route(get("/")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(full_text(res), "home");
        assert_eq!(svc.route(get("/apiary")).await.status(), StatusCode::NotFound);

        // The bare prefix is not an API route.
        std::fs::write(dir.path().join("api"), "not an endpoint").unwrap();
        let res = svc.route(get("/api")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(full_text(res), "not an endpoint");
        assert_eq!(svc.route(get("/api/x")).await.status(), StatusCode::NotFound);
    }
}
