//! Server-Sent Events encoding and decoding.

pub mod sse;

pub use sse::{SseDecoder, encode, encode_event, parse_event};
