//! HotpotQA prediction export.
//!
//! Predictions are keyed by position: the i-th question in the questions file
//! takes the prediction recorded for example id i.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::docs::read_jsonl;
use crate::docs::types::RunRecord;

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// JSON array of HotpotQA questions, each with an `_id`
    #[arg(long, default_value = "./data/sampled_hotpot_questions.json")]
    pub questions: PathBuf,

    #[arg(long, default_value = "./results/final_preds.jsonl")]
    pub final_preds: PathBuf,

    #[arg(long)]
    pub output_file: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct HotpotQuestion {
    #[serde(rename = "_id")]
    pub id: String,
}

/// Build `{"answer": {question_id: prediction}}`. Questions without a recorded
/// prediction map to an empty string.
pub fn hotpot_predictions(questions: &[HotpotQuestion], records: &[RunRecord]) -> Value {
    let by_id: HashMap<usize, &str> = records
        .iter()
        .map(|r| (r.id, r.prediction.as_str()))
        .collect();

    let answers: Map<String, Value> = questions
        .iter()
        .enumerate()
        .map(|(i, q)| {
            let pred = by_id.get(&i).copied().unwrap_or("");
            (q.id.clone(), Value::String(pred.to_string()))
        })
        .collect();

    json!({ "answer": answers })
}

pub fn export(args: &ExportArgs) -> Result<()> {
    let raw = std::fs::read_to_string(&args.questions)
        .with_context(|| format!("Failed to read {}", args.questions.display()))?;
    let questions: Vec<HotpotQuestion> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of questions", args.questions.display()))?;
    let records: Vec<RunRecord> = read_jsonl(&args.final_preds)?;

    let missing = (0..questions.len())
        .filter(|i| !records.iter().any(|r| r.id == *i))
        .count();
    if missing > 0 {
        warn!(missing, "Questions without a prediction exported as empty answers");
    }

    let out = hotpot_predictions(&questions, &records);
    if let Some(parent) = args.output_file.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(&args.output_file, serde_json::to_string_pretty(&out)?)
        .with_context(|| format!("Failed to write {}", args.output_file.display()))?;

    info!(
        questions = questions.len(),
        output = %args.output_file.display(),
        "Predictions exported"
    );
    Ok(())
}
