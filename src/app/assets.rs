//! Static asset passthrough.

use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;

use tracing::debug;

use crate::{Method, Request, Response, StatusCode};

/// Anything that can answer a non-API request.
pub trait AssetSource: Send + Sync {
    fn fetch(&self, request: Request) -> Pin<Box<dyn Future<Output = Response> + Send + '_>>;
}

/// Serves files from a directory on disk, with `index.html` for `/`.
#[derive(Debug, Clone)]
pub struct DirectoryAssets {
    root: PathBuf,
}

impl DirectoryAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    // Maps a URL path onto the root. Anything that could escape it is refused.
    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let relative = path.trim_start_matches('/');
        let relative = if relative.is_empty() || relative.ends_with('/') {
            format!("{relative}index.html")
        } else {
            relative.to_string()
        };

        let mut resolved = self.root.clone();
        for component in Path::new(&relative).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                _ => return None,
            }
        }
        Some(resolved)
    }
}

impl AssetSource for DirectoryAssets {
    fn fetch(&self, request: Request) -> Pin<Box<dyn Future<Output = Response> + Send + '_>> {
        Box::pin(async move {
            let head_only = match request.method() {
                Method::Get => false,
                Method::Head => true,
                _ => {
                    return Response::new(StatusCode::MethodNotAllowed)
                        .header("Allow", "GET, HEAD")
                        .body("Method not allowed");
                }
            };

            let Some(file) = self.resolve(request.path()) else {
                debug!(path = request.path(), "refusing asset path");
                return Response::new(StatusCode::NotFound).body("Not found");
            };

            match tokio::fs::read(&file).await {
                Ok(bytes) => {
                    let response =
                        Response::new(StatusCode::Ok).header("Content-Type", content_type(&file));
                    if head_only {
                        response.header("Content-Length", bytes.len().to_string())
                    } else {
                        response.body_bytes(bytes)
                    }
                }
                Err(e) => {
                    debug!(path = %file.display(), error = %e, "asset not found");
                    Response::new(StatusCode::NotFound).body("Not found")
                }
            }
        })
    }
}

/// Used when no asset directory is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAssets;

impl AssetSource for NoAssets {
    fn fetch(&self, _request: Request) -> Pin<Box<dyn Future<Output = Response> + Send + '_>> {
        Box::pin(async { Response::new(StatusCode::NotFound).body("Not found") })
    }
}

fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("webp") => "image/webp",
        Some("woff2") => "font/woff2",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
