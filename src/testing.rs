//! Test doubles for the model service and tokenizer.

use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::docs::tokenizer::Tokenizer;
use crate::llm::{ChatModel, Message};

type Handler = Box<dyn Fn(usize, &str) -> Result<String, String> + Send + Sync>;

/// A chat model driven by a closure over `(call index, user prompt)`.
/// Every user prompt is recorded for assertions.
pub struct ScriptedModel {
    handler: Handler,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(handler: impl Fn(usize, &str) -> Result<String, String> + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Replies with each scripted response in order, then fails.
    pub fn sequence(responses: Vec<Result<String, String>>) -> Self {
        Self::new(move |i, _| {
            responses
                .get(i)
                .cloned()
                .unwrap_or_else(|| Err("script exhausted".to_string()))
        })
    }

    pub fn constant(text: &str) -> Self {
        let text = text.to_string();
        Self::new(move |_, _| Ok(text.clone()))
    }

    pub fn always_failing() -> Self {
        Self::new(|_, _| Err("service unavailable".to_string()))
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn chat(&self, messages: &[Message]) -> Result<String> {
        let prompt = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .unwrap_or_default();
        let index = {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.clone());
            prompts.len() - 1
        };
        (self.handler)(index, &prompt).map_err(|e| anyhow::anyhow!(e))
    }
}

/// One token per whitespace-separated word; decoding rejoins with single spaces.
pub struct WordTokenizer {
    vocab: Mutex<Vec<String>>,
}

impl WordTokenizer {
    pub fn new() -> Self {
        Self {
            vocab: Mutex::new(Vec::new()),
        }
    }
}

impl Tokenizer for WordTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let mut vocab = self.vocab.lock().unwrap();
        Ok(text
            .split_whitespace()
            .map(|word| match vocab.iter().position(|w| w == word) {
                Some(id) => id as u32,
                None => {
                    vocab.push(word.to_string());
                    (vocab.len() - 1) as u32
                }
            })
            .collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let vocab = self.vocab.lock().unwrap();
        let words = ids
            .iter()
            .map(|&id| {
                vocab
                    .get(id as usize)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("unknown token id {}", id))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(words.join(" "))
    }
}
