use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tracing::{info, warn};

use crate::batch::BatchRunner;
use crate::docs::tokenizer::{HfTokenizer, Tokenizer};
use crate::docs::types::Example;
use crate::docs::{read_jsonl, ResultStore};
use crate::gateway::{Gateway, RetryPolicy};
use crate::llm::LlmClient;
use crate::mapreduce::task::Task;
use crate::state::{PipelineContext, RunConfig};

#[derive(Debug, Args)]
pub struct RunArgs {
    #[arg(long, value_enum, default_value_t = Task::Rag)]
    pub task: Task,

    /// Directory holding final_preds.jsonl
    #[arg(long, default_value = "./results")]
    pub output_dir: PathBuf,

    /// Maximum tokens per chunk
    #[arg(long, default_value_t = 8000)]
    pub chunk_length: usize,

    /// Documents longer than this many tokens are truncated first
    #[arg(long, default_value_t = 8000)]
    pub input_length: usize,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub api_url: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, default_value = "gpt-4o-mini-2024-07-18")]
    pub model: String,

    #[arg(long, default_value_t = 1)]
    pub num_workers: usize,

    /// Input JSONL; defaults to the task's dataset under ./data
    #[arg(long)]
    pub data_path: Option<PathBuf>,

    /// HuggingFace tokenizer.json; without it documents are chunked by character
    #[arg(long)]
    pub tokenizer: Option<PathBuf>,

    #[arg(long, default_value_t = 5)]
    pub max_iterations: u32,

    #[arg(long, default_value_t = 10)]
    pub retry_backoff_secs: u64,

    /// Total attempts per model request; retries forever when unset
    #[arg(long)]
    pub max_attempts: Option<u32>,
}

impl RunArgs {
    pub fn config(&self) -> RunConfig {
        RunConfig {
            task: self.task,
            chunk_length: self.chunk_length,
            input_length: self.input_length,
            max_iterations: self.max_iterations,
            model: self.model.clone(),
            num_workers: self.num_workers,
            output_dir: self.output_dir.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            backoff: Duration::from_secs(self.retry_backoff_secs),
            max_attempts: self.max_attempts,
        }
    }

    pub fn data_path(&self) -> PathBuf {
        self.data_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(self.task.default_data_path()))
    }
}

pub async fn run(args: RunArgs) -> Result<()> {
    let config = args.config();
    config.validate()?;
    info!(task = %config.task, model = %config.model, "Starting run");

    let tokenizer: Option<Arc<dyn Tokenizer>> = match &args.tokenizer {
        Some(path) => {
            let tokenizer = HfTokenizer::from_file(path)?;
            info!(path = %path.display(), "Tokenizer loaded");
            Some(Arc::new(tokenizer))
        }
        None => {
            warn!("No tokenizer configured, chunking by character");
            None
        }
    };

    let data_path = args.data_path();
    let examples: Vec<Example> = read_jsonl(&data_path)
        .with_context(|| format!("Failed to load examples from {}", data_path.display()))?;
    info!(path = %data_path.display(), count = examples.len(), "Examples loaded");

    let store = ResultStore::open(&config.output_dir)?;
    let client = LlmClient::new(&args.api_url, &config.model, args.api_key.clone())?;
    let gateway = Gateway::new(Arc::new(client), args.retry_policy());

    let ctx = Arc::new(PipelineContext {
        config,
        gateway,
        tokenizer,
    });
    let runner = Arc::new(BatchRunner::new(ctx)?);
    let output = store.path().to_path_buf();
    let summary = runner.run(examples, store).await?;

    info!(
        output = %output.display(),
        processed = summary.processed,
        failed = summary.failed,
        "Results saved"
    );
    Ok(())
}
