pub mod chunk;
pub mod tokenizer;
pub mod types;

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use types::RunRecord;

pub const FINAL_PREDS_FILE: &str = "final_preds.jsonl";

/// Read every non-blank line of a JSONL file.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: malformed JSON line", path.display(), i + 1))
        })
        .collect()
}

/// Overwrite `path` with one JSON object per line.
///
/// Writes a sibling temp file and renames it over the target, so readers never
/// observe a half-written file.
pub fn write_jsonl<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let tmp = path.with_extension("jsonl.tmp");
    {
        let mut out = fs::File::create(&tmp)
            .with_context(|| format!("Failed to create {}", tmp.display()))?;
        for record in records {
            let line = serde_json::to_string(record).context("serialize record")?;
            writeln!(out, "{}", line)?;
        }
        out.sync_all()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// The output store: every record produced so far, mirrored to disk as a
/// complete snapshot after each change.
pub struct ResultStore {
    path: PathBuf,
    records: Vec<RunRecord>,
}

impl ResultStore {
    /// Open the store in `output_dir`, creating the directory if needed and
    /// loading any records a previous run left behind.
    pub fn open(output_dir: &Path) -> Result<Self> {
        fs::create_dir_all(output_dir)
            .with_context(|| format!("Failed to create output dir {}", output_dir.display()))?;
        let path = output_dir.join(FINAL_PREDS_FILE);
        let records = if path.exists() {
            read_jsonl(&path)?
        } else {
            Vec::new()
        };
        debug!(path = %path.display(), existing = records.len(), "result store opened");
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    pub fn records(&self) -> &[RunRecord] {
        &self.records
    }

    pub fn processed_ids(&self) -> HashSet<usize> {
        self.records.iter().map(|r| r.id).collect()
    }

    /// Append a record and rewrite the whole file.
    pub fn push(&mut self, record: RunRecord) -> Result<()> {
        self.records.push(record);
        self.flush()
    }

    /// Sort by id and rewrite the whole file.
    pub fn finalize(&mut self) -> Result<()> {
        self.records.sort_by_key(|r| r.id);
        self.flush()
    }

    fn flush(&self) -> Result<()> {
        write_jsonl(&self.path, &self.records)
    }
}
