//! Word-window text chunker
//!
//! Splits a document into windows of `chunk_size` words, each sharing
//! `overlap` words with the next one. With chunk_size=5, overlap=2:
//!
//! ```text
//! "A B C D E F G H I J"
//!  -> "A B C D E", "D E F G H", "G H I J"
//! ```

use crate::error::AgentError;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if chunk_size == 0 || overlap >= chunk_size {
            return Err(AgentError::ConfigurationError(format!(
                "invalid chunking: size {} overlap {}",
                chunk_size, overlap
            )));
        }
        Ok(Self { chunk_size, overlap })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn chunk(&self, text: &str) -> Vec<String> {
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            return Vec::new();
        }

        let stride = self.chunk_size - self.overlap;
        let mut chunks = Vec::with_capacity(words.len() / stride + 1);
        let mut start = 0usize;

        loop {
            let end = (start + self.chunk_size).min(words.len());
            chunks.push(words[start..end].join(" "));

            if end == words.len() {
                break;
            }
            start += stride;
        }

        chunks
    }
}
