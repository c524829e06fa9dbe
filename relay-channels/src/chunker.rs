//! Reply chunking for platform message-size limits.
//!
//! Lengths are counted in Unicode scalar values, so a chunk never ends in the
//! middle of a character. Concatenating the chunks always yields the input.

use relay_common::config::ChunkingConfig;
use std::num::NonZeroUsize;

/// Maximum message length for Discord.
pub const DISCORD_MAX_MESSAGE_LENGTH: NonZeroUsize = match NonZeroUsize::new(2000) {
    Some(n) => n,
    None => unreachable!(),
};

/// Splits replies according to a configured limit and mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseChunker {
    max_len: NonZeroUsize,
    prefer_boundaries: bool,
}

impl Default for ResponseChunker {
    fn default() -> Self {
        Self::new(DISCORD_MAX_MESSAGE_LENGTH)
    }
}

impl ResponseChunker {
    /// Hard-splitting chunker.
    pub fn new(max_len: NonZeroUsize) -> Self {
        Self {
            max_len,
            prefer_boundaries: false,
        }
    }

    /// Prefer cutting at newlines and whitespace.
    pub fn with_boundaries(mut self, prefer: bool) -> Self {
        self.prefer_boundaries = prefer;
        self
    }

    /// Build from configuration. Returns `None` when `max_len` is zero.
    pub fn from_config(config: &ChunkingConfig) -> Option<Self> {
        NonZeroUsize::new(config.max_len)
            .map(|max_len| Self::new(max_len).with_boundaries(config.prefer_boundaries))
    }

    pub fn max_len(&self) -> NonZeroUsize {
        self.max_len
    }

    /// Split `text` using the configured mode.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        if self.prefer_boundaries {
            split_on_boundaries(text, self.max_len)
        } else {
            split(text, self.max_len)
        }
    }
}

/// Split into consecutive chunks of exactly `max_len` characters, the last
/// one possibly shorter. Empty input yields no chunks.
pub fn split(text: &str, max_len: NonZeroUsize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let (head, tail) = rest.split_at(char_boundary(rest, max_len.get()));
        chunks.push(head.to_string());
        rest = tail;
    }

    chunks
}

/// Like [`split`], but cut after the last newline in the window, else after
/// the last whitespace, else hard at `max_len`.
pub fn split_on_boundaries(text: &str, max_len: NonZeroUsize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let hard = char_boundary(rest, max_len.get());
        let cut = if hard == rest.len() {
            hard
        } else {
            soft_cut(&rest[..hard]).unwrap_or(hard)
        };

        let (head, tail) = rest.split_at(cut);
        chunks.push(head.to_string());
        rest = tail;
    }

    chunks
}

/// Byte offset just past the first `chars` characters (or the whole string).
fn char_boundary(text: &str, chars: usize) -> usize {
    text.char_indices().nth(chars).map_or(text.len(), |(i, _)| i)
}

/// Byte offset just past the preferred break in `window`, if any.
fn soft_cut(window: &str) -> Option<usize> {
    if let Some(i) = window.rfind('\n') {
        return Some(i + 1);
    }

    window
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map(|(i, c)| i + c.len_utf8())
}
