//! # chatrelay
//!
//! A streaming chat relay. One endpoint, `POST /api/chat`, fronts two LLM
//! backends: a local one that streams tokens and a remote one that answers
//! in a single batch. Whichever answers, the browser receives the same
//! Server-Sent Events body of `{"response": "..."}` records.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use chatrelay::app::{self, NoAssets};
//! use chatrelay::config::Config;
//! use chatrelay::llm::Invoker;
//! use chatrelay::server::Server;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load()?;
//!     let invoker = Invoker::from_config(&config, reqwest::Client::new())?;
//!     let service = app::router(Arc::new(invoker), Arc::new(NoAssets)).into_service();
//!
//!     let server = Server::bind(&config.server.bind).await?;
//!     server.serve(service, CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod client;
pub mod config;
pub mod context;
pub mod http;
pub mod llm;
pub mod middleware;
pub mod realtime;
pub mod router;
pub mod server;

pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::Router;
pub use server::{Server, ServerError};
