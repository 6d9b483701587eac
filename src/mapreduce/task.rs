//! Per-task policy table.

use std::fmt;

use crate::docs::chunk::Truncation;

/// Model replies containing this (case-insensitively) carry nothing for the question.
pub const NO_INFORMATION: &str = "no information";

const NO_ANSWER_PHRASE: &str = "no answer";
const NO_INFO_PHRASE: &str = "no info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Task {
    /// English long-book QA
    En,
    /// Chinese long-book QA
    Zh,
    /// Retrieval-augmented QA over very long contexts
    Rag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    English,
    Chinese,
}

/// How the first round picks candidate sets for its reduce attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstReduce {
    /// Top-r by score for r in 1, 2, 4, ..., n.
    RankLadder,
    /// Informative entries among the first 1, 2, 4, ... extractions.
    PrefixSweep,
}

impl Task {
    pub fn language(self) -> Language {
        match self {
            Task::Zh => Language::Chinese,
            Task::En | Task::Rag => Language::English,
        }
    }

    pub fn truncation(self) -> Truncation {
        match self {
            Task::Rag => Truncation::Front,
            Task::En | Task::Zh => Truncation::Middle,
        }
    }

    /// Each extraction is rated 0-100 for usefulness before ranking.
    pub fn scores_extractions(self) -> bool {
        matches!(self, Task::En | Task::Zh)
    }

    /// "NO INFORMATION" extractions are dropped from reduce input and end the
    /// loop when nothing else is left.
    pub fn filters_uninformative(self) -> bool {
        matches!(self, Task::Rag)
    }

    pub fn first_reduce(self) -> FirstReduce {
        match self {
            Task::En | Task::Zh => FirstReduce::RankLadder,
            Task::Rag => FirstReduce::PrefixSweep,
        }
    }

    /// Whether a reduce result counts as an answer.
    ///
    /// `rag` only rejects "no answer"; the QA tasks also reject "no info".
    pub fn accepts(self, prediction: &str) -> bool {
        let lower = prediction.to_lowercase();
        match self {
            Task::En | Task::Zh => {
                !lower.contains(NO_ANSWER_PHRASE) && !lower.contains(NO_INFO_PHRASE)
            }
            Task::Rag => !lower.contains(NO_ANSWER_PHRASE),
        }
    }

    /// Answers from open-weight models get one extra shortening pass.
    pub fn condenses_answers(self) -> bool {
        matches!(self, Task::Rag)
    }

    pub fn records_ground_truth(self) -> bool {
        matches!(self, Task::En | Task::Zh)
    }

    pub fn default_data_path(self) -> &'static str {
        match self {
            Task::En => "./data/longbook_qa_eng.jsonl",
            Task::Zh => "./data/longbook_qa_chn.jsonl",
            Task::Rag => "./data/rag_1000k.jsonl",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Task::En => "en",
            Task::Zh => "zh",
            Task::Rag => "rag",
        };
        f.write_str(name)
    }
}

pub fn is_informative(text: &str) -> bool {
    !text.to_lowercase().contains(NO_INFORMATION)
}
