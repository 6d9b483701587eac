use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::docs::tokenizer::Tokenizer;
use crate::gateway::Gateway;
use crate::llm;
use crate::mapreduce::task::Task;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("chunk_length must be at least 1")]
    ZeroChunkLength,
    #[error("max_iterations must be at least 1")]
    ZeroIterations,
    #[error("num_workers must be at least 1")]
    ZeroWorkers,
}

/// Run-wide parameters, fixed once the CLI has been parsed.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub task: Task,
    pub chunk_length: usize,
    pub input_length: usize,
    pub max_iterations: u32,
    pub model: String,
    pub num_workers: usize,
    pub output_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            task: Task::Rag,
            chunk_length: 8000,
            input_length: 8000,
            max_iterations: 5,
            model: "gpt-4o-mini-2024-07-18".to_string(),
            num_workers: 1,
            output_dir: PathBuf::from("./results"),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_length == 0 {
            return Err(ConfigError::ZeroChunkLength);
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::ZeroIterations);
        }
        if self.num_workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        Ok(())
    }

    pub fn is_open_weight_model(&self) -> bool {
        llm::is_open_weight(&self.model)
    }
}

/// Everything one pipeline instance needs, built once and shared by reference.
pub struct PipelineContext {
    pub config: RunConfig,
    pub gateway: Gateway,
    pub tokenizer: Option<Arc<dyn Tokenizer>>,
}
