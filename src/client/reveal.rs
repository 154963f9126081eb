//! Typewriter-style reveal of a finished answer.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Pause between revealed characters.
pub const DEFAULT_REVEAL_INTERVAL: Duration = Duration::from_millis(20);

/// Yields successively longer char-prefixes of a text.
///
/// The last item is the whole text. With a token attached, iteration stops
/// as soon as the token fires.
#[derive(Debug, Clone)]
pub struct Reveal<'a> {
    text: &'a str,
    // Byte offset of the end of the last yielded prefix.
    pos: usize,
    cancel: Option<CancellationToken>,
}

impl<'a> Reveal<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            pos: 0,
            cancel: None,
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

impl<'a> Iterator for Reveal<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.is_cancelled() {
            return None;
        }
        let ch = self.text[self.pos..].chars().next()?;
        self.pos += ch.len_utf8();
        Some(&self.text[..self.pos])
    }
}

/// How a played reveal ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealEnd {
    Completed,
    Interrupted,
}

/// Plays `text` through `render`, one character per `interval`.
///
/// On cancellation the full text is rendered at once.
pub async fn play<F>(
    text: &str,
    interval: Duration,
    cancel: &CancellationToken,
    mut render: F,
) -> RevealEnd
where
    F: FnMut(&str),
{
    for prefix in Reveal::new(text).with_cancel(cancel.clone()) {
        render(prefix);
        if prefix.len() == text.len() {
            return RevealEnd::Completed;
        }
        let interrupted = tokio::select! {
            biased;
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(interval) => false,
        };
        if interrupted {
            break;
        }
    }

    render(text);
    if text.is_empty() && !cancel.is_cancelled() {
        return RevealEnd::Completed;
    }
    RevealEnd::Interrupted
}
