use serde::{Deserialize, Serialize};

/// One benchmark input line. Identified by its position in the input file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Example {
    pub context: String,
    #[serde(default)]
    pub question: Option<String>,
    /// Older dataset dumps carry the question under `input`.
    #[serde(default)]
    pub input: Option<String>,
    /// Ground truth; a string or a list of accepted strings depending on the dataset.
    #[serde(default)]
    pub answer: Option<serde_json::Value>,
}

impl Example {
    pub fn question(&self) -> &str {
        self.question
            .as_deref()
            .or(self.input.as_deref())
            .unwrap_or("")
    }
}

/// One line of `final_preds.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: usize,
    pub prediction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<serde_json::Value>,
}
