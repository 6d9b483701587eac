//! Resumable fan-out of the map-reduce pipeline over a dataset.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::docs::types::{Example, RunRecord};
use crate::docs::ResultStore;
use crate::mapreduce::task::Task;
use crate::mapreduce::{ExampleOutcome, MapReduceEngine};
use crate::state::{ConfigError, PipelineContext};

#[derive(Debug, Clone, Default)]
pub struct BatchSummary {
    pub total: usize,
    pub skipped: usize,
    pub processed: usize,
    pub failed: usize,
    pub map_time: Duration,
    pub reduce_time: Duration,
    pub elapsed: Duration,
}

pub struct BatchRunner {
    engine: Arc<MapReduceEngine>,
    task: Task,
    num_workers: usize,
}

impl BatchRunner {
    pub fn new(ctx: Arc<PipelineContext>) -> Result<Self, ConfigError> {
        let task = ctx.config.task;
        let num_workers = ctx.config.num_workers;
        let engine = Arc::new(MapReduceEngine::new(ctx)?);
        Ok(Self {
            engine,
            task,
            num_workers,
        })
    }

    fn record_for(&self, id: usize, example: &Example, prediction: String) -> RunRecord {
        let ground_truth = self.task.records_ground_truth().then(|| {
            example
                .answer
                .clone()
                .unwrap_or_else(|| serde_json::Value::String(String::new()))
        });
        RunRecord {
            id,
            prediction,
            ground_truth,
        }
    }

    /// Process every example whose id is not already in `store`.
    ///
    /// Each finished example is appended and the store rewritten under one
    /// lock; the final rewrite is sorted by id.
    pub async fn run(
        self: Arc<Self>,
        examples: Vec<Example>,
        store: ResultStore,
    ) -> Result<BatchSummary> {
        let started = Instant::now();
        let done = store.processed_ids();
        if !done.is_empty() {
            info!(count = done.len(), "Found already processed examples");
        }

        let examples = Arc::new(examples);
        let pending: Vec<usize> = (0..examples.len()).filter(|id| !done.contains(id)).collect();
        let mut summary = BatchSummary {
            total: examples.len(),
            skipped: examples.len() - pending.len(),
            ..BatchSummary::default()
        };
        info!(
            pending = pending.len(),
            workers = self.num_workers,
            "Processing examples"
        );

        let store = Arc::new(Mutex::new(store));
        let sem = Arc::new(Semaphore::new(self.num_workers));
        let mut join_set: JoinSet<(usize, Option<ExampleOutcome>)> = JoinSet::new();

        for id in pending {
            let runner = self.clone();
            let examples = examples.clone();
            let store = store.clone();
            let sem = sem.clone();

            join_set.spawn(async move {
                let Ok(_permit) = sem.acquire_owned().await else {
                    return (id, None);
                };
                let example = &examples[id];
                match runner.engine.answer(id, example).await {
                    Ok(outcome) => {
                        let record = runner.record_for(id, example, outcome.prediction.clone());
                        {
                            let mut store = store.lock().await;
                            if let Err(e) = store.push(record) {
                                warn!(id, error = %format!("{:#}", e), "Failed to persist results");
                            }
                        }
                        info!(
                            id,
                            iterations = outcome.iterations,
                            extractions = outcome.extractions,
                            prediction = %outcome.prediction,
                            "Final prediction"
                        );
                        (id, Some(outcome))
                    }
                    Err(e) => {
                        error!(id, error = %format!("{:#}", e), "Error in example, no result recorded");
                        (id, None)
                    }
                }
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((_, Some(outcome))) => {
                    summary.processed += 1;
                    summary.map_time += outcome.map_time;
                    summary.reduce_time += outcome.reduce_time;
                }
                Ok((id, None)) => {
                    warn!(id, "No result for example");
                    summary.failed += 1;
                }
                Err(e) => {
                    error!(error = %e, "Worker panicked");
                    summary.failed += 1;
                }
            }
        }

        store.lock().await.finalize()?;
        summary.elapsed = started.elapsed();

        info!(
            total = summary.total,
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            total_secs = summary.elapsed.as_secs_f64(),
            map_secs = summary.map_time.as_secs_f64(),
            reduce_secs = summary.reduce_time.as_secs_f64(),
            "Batch complete"
        );
        Ok(summary)
    }
}
