//! The consuming side of the relay: posts a conversation, reads the SSE body
//! until it ends (or the turn is cancelled), then plays the answer back one
//! character at a time.

pub mod accumulator;
pub mod reveal;
pub mod session;
pub mod transport;

pub use accumulator::StreamAccumulator;
pub use reveal::{DEFAULT_REVEAL_INTERVAL, Reveal, RevealEnd};
pub use session::{ChatSession, GREETING, Phase, TranscriptEntry, TurnOutcome};
pub use transport::{ChatResponse, ChatTransport, ClientError, HttpChatTransport};
