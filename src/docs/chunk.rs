//! Token-bounded document chunking.
//!
//! A document is encoded once, truncated to the input budget, and split into
//! consecutive non-overlapping windows of at most `chunk_length` units. Without
//! a tokenizer the same logic runs over chars.

use std::sync::Arc;

use anyhow::Result;

use super::tokenizer::Tokenizer;
use crate::state::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truncation {
    /// Keep the leading `max` units.
    Front,
    /// Keep the leading `max / 2` units and fill the rest of the budget from
    /// the tail.
    Middle,
}

/// Truncate `input` to at most `max_length` units.
///
/// `Middle` with an odd budget takes the extra unit from the tail.
pub fn truncate<T: Clone>(input: &[T], max_length: usize, manner: Truncation) -> Vec<T> {
    if input.len() <= max_length {
        return input.to_vec();
    }
    match manner {
        Truncation::Front => input[..max_length].to_vec(),
        Truncation::Middle => {
            let half = max_length / 2;
            let mut out = Vec::with_capacity(max_length);
            out.extend_from_slice(&input[..half]);
            out.extend_from_slice(&input[input.len() - (max_length - half)..]);
            out
        }
    }
}

/// Split into consecutive windows of `chunk_length`; the last may be shorter.
pub fn split<T>(input: &[T], chunk_length: usize) -> Vec<&[T]> {
    input.chunks(chunk_length).collect()
}

pub struct Chunker {
    tokenizer: Option<Arc<dyn Tokenizer>>,
    chunk_length: usize,
    input_length: usize,
}

impl Chunker {
    pub fn new(
        tokenizer: Option<Arc<dyn Tokenizer>>,
        chunk_length: usize,
        input_length: usize,
    ) -> Result<Self, ConfigError> {
        if chunk_length == 0 {
            return Err(ConfigError::ZeroChunkLength);
        }
        Ok(Self {
            tokenizer,
            chunk_length,
            input_length,
        })
    }

    pub fn chunk(&self, context: &str, manner: Truncation) -> Result<Vec<String>> {
        match &self.tokenizer {
            Some(tokenizer) => {
                let tokens = tokenizer.encode(context)?;
                let tokens = truncate(&tokens, self.input_length, manner);
                split(&tokens, self.chunk_length)
                    .into_iter()
                    .map(|ids| tokenizer.decode(ids))
                    .collect()
            }
            None => {
                let chars: Vec<char> = context.chars().collect();
                let chars = truncate(&chars, self.input_length, manner);
                Ok(split(&chars, self.chunk_length)
                    .into_iter()
                    .map(|c| c.iter().collect())
                    .collect())
            }
        }
    }
}
