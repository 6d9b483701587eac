//! Iterative map-reduce answer synthesis.
//!
//! Each round maps every chunk through the model to pull out question-relevant
//! snippets, then tries to reduce the accumulated snippets into a short
//! answer. Rounds repeat until a reduce result is accepted, the `rag` map
//! stage comes back empty, or the final round has been reduced.

pub mod candidates;
pub mod prompts;
pub mod task;

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use anyhow::Result;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::docs::chunk::Chunker;
use crate::docs::types::Example;
use crate::gateway::GatewayError;
use crate::state::{ConfigError, PipelineContext};

use task::{FirstReduce, Task};

/// Prediction of an example no round could answer.
pub const NO_ANSWER: &str = "NO ANSWER";

/// One chunk's contribution to one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub text: String,
    /// Usefulness 0-100; always 0 for tasks that skip scoring.
    pub score: u32,
}

#[derive(Debug, Clone)]
pub struct ExampleOutcome {
    pub prediction: String,
    pub iterations: u32,
    pub extractions: usize,
    pub map_time: Duration,
    pub reduce_time: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    First,
    Middle,
    Final,
}

impl Stage {
    /// Round 1 is always `First`, even when it is also the last round.
    fn of(iteration: u32, max_iterations: u32) -> Self {
        if iteration == 1 {
            Stage::First
        } else if iteration == max_iterations {
            Stage::Final
        } else {
            Stage::Middle
        }
    }
}

/// Per-example working state carried across rounds.
struct Progress {
    extracted: Vec<Extraction>,
    /// Informative subset of `extracted`, refreshed after each map stage.
    filtered: Vec<String>,
    prediction: String,
    map_time: Duration,
    reduce_time: Duration,
}

impl Progress {
    fn new() -> Self {
        Self {
            extracted: Vec::new(),
            filtered: Vec::new(),
            prediction: NO_ANSWER.to_string(),
            map_time: Duration::ZERO,
            reduce_time: Duration::ZERO,
        }
    }
}

fn score_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"Score:\s*([0-9]+)").expect("valid score regex"))
}

/// Pull the integer out of a `Score: <n>` reply, clamped to 100.
pub fn parse_score(reply: &str) -> Option<u32> {
    let caps = score_pattern().captures(reply)?;
    // only overflow can fail on an ASCII digit run
    let value: u64 = caps[1].parse().unwrap_or(u64::MAX);
    Some(value.min(100) as u32)
}

pub struct MapReduceEngine {
    ctx: Arc<PipelineContext>,
    chunker: Chunker,
}

impl MapReduceEngine {
    pub fn new(ctx: Arc<PipelineContext>) -> Result<Self, ConfigError> {
        ctx.config.validate()?;
        let chunker = Chunker::new(
            ctx.tokenizer.clone(),
            ctx.config.chunk_length,
            ctx.config.input_length,
        )?;
        Ok(Self { ctx, chunker })
    }

    fn task(&self) -> Task {
        self.ctx.config.task
    }

    /// Run every round for one example and return its final prediction.
    pub async fn answer(&self, id: usize, example: &Example) -> Result<ExampleOutcome> {
        let task = self.task();
        let max_iterations = self.ctx.config.max_iterations;
        let question = example.question();

        let chunks = self.chunker.chunk(&example.context, task.truncation())?;
        debug!(id, chunks = chunks.len(), "Context chunked");

        let mut progress = Progress::new();
        let mut iterations = 0;

        for iteration in 1..=max_iterations {
            iterations = iteration;

            self.map_round(iteration, &chunks, question, &mut progress)
                .await?;

            if task.filters_uninformative() {
                progress.filtered = candidates::informative(&progress.extracted);
                if progress.filtered.is_empty() {
                    info!(id, iteration, "No chunk produced information, stopping early");
                    break;
                }
            }

            let stage = Stage::of(iteration, max_iterations);
            let accepted = self.reduce_round(stage, question, &mut progress).await?;
            debug!(
                id,
                iteration,
                ?stage,
                accepted,
                prediction = %progress.prediction,
                "Reduce stage done"
            );
            if accepted {
                break;
            }
        }

        if task.condenses_answers()
            && self.ctx.config.is_open_weight_model()
            && progress.prediction != NO_ANSWER
        {
            let started = Instant::now();
            progress.prediction = self.condense(&progress.prediction, question).await;
            progress.reduce_time += started.elapsed();
        }

        Ok(ExampleOutcome {
            prediction: progress.prediction,
            iterations,
            extractions: progress.extracted.len(),
            map_time: progress.map_time,
            reduce_time: progress.reduce_time,
        })
    }

    async fn map_round(
        &self,
        iteration: u32,
        chunks: &[String],
        question: &str,
        progress: &mut Progress,
    ) -> Result<()> {
        let task = self.task();
        // Snapshot before this round appends anything.
        let prior: Vec<String> = if iteration == 1 {
            Vec::new()
        } else if task.filters_uninformative() {
            progress.filtered.clone()
        } else {
            candidates::all_texts(&progress.extracted)
        };

        for (chunk_id, chunk) in chunks.iter().enumerate() {
            let prompt = if iteration == 1 {
                prompts::first_pass(task, chunk, question)
            } else {
                prompts::continuation(task, iteration, chunk, question, &prior)
            };

            let started = Instant::now();
            let text = self
                .ctx
                .gateway
                .complete(&prompts::chat_messages(prompt))
                .await?;
            progress.map_time += started.elapsed();

            let score = if task.scores_extractions() {
                let started = Instant::now();
                let score = self.score(&text, question).await?;
                progress.reduce_time += started.elapsed();
                score
            } else {
                0
            };

            debug!(iteration, chunk_id, score, len = text.len(), "Chunk mapped");
            progress.extracted.push(Extraction { text, score });
        }
        Ok(())
    }

    /// Returns whether the round produced an accepted answer.
    async fn reduce_round(
        &self,
        stage: Stage,
        question: &str,
        progress: &mut Progress,
    ) -> Result<bool> {
        let task = self.task();
        match (stage, task.first_reduce()) {
            (Stage::First, FirstReduce::RankLadder) => {
                for r in candidates::rank_ladder(progress.extracted.len()) {
                    let selected = candidates::top_ranked(&progress.extracted, r);
                    if self.try_reduce(&selected, question, false, progress).await? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            (Stage::First, FirstReduce::PrefixSweep) => {
                for size in candidates::prefix_sizes(progress.extracted.len()) {
                    let selected = candidates::informative(&progress.extracted[..size]);
                    if selected.is_empty() {
                        continue;
                    }
                    if self.try_reduce(&selected, question, false, progress).await? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            (Stage::Middle, _) => {
                let selected = self.reduce_pool(progress);
                self.try_reduce(&selected, question, false, progress).await
            }
            (Stage::Final, _) => {
                let selected = self.reduce_pool(progress);
                self.try_reduce(&selected, question, true, progress).await
            }
        }
    }

    fn reduce_pool(&self, progress: &Progress) -> Vec<String> {
        if self.task().filters_uninformative() {
            progress.filtered.clone()
        } else {
            candidates::all_texts(&progress.extracted)
        }
    }

    /// Issue one reduce request; the reply always becomes the current prediction.
    async fn try_reduce(
        &self,
        selected: &[String],
        question: &str,
        final_attempt: bool,
        progress: &mut Progress,
    ) -> Result<bool> {
        let prompt = prompts::reduce(self.task(), selected, question, final_attempt);
        let started = Instant::now();
        let reply = self
            .ctx
            .gateway
            .complete(&prompts::chat_messages(prompt))
            .await?;
        progress.reduce_time += started.elapsed();

        let accepted = self.task().accepts(&reply);
        debug!(candidates = selected.len(), final_attempt, accepted, "Reduce attempt");
        progress.prediction = reply;
        Ok(accepted)
    }

    /// Ask for a usefulness score until the reply parses.
    async fn score(&self, info: &str, question: &str) -> Result<u32> {
        let messages =
            prompts::chat_messages(prompts::score(self.task().language(), info, question));
        let max_attempts = self.ctx.gateway.policy().max_attempts;
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let reply = self.ctx.gateway.complete(&messages).await?;
            if let Some(score) = parse_score(&reply) {
                return Ok(score);
            }
            warn!(attempt, reply = %reply, "Invalid score response, asking again");
            if max_attempts.is_some_and(|max| attempt >= max) {
                return Err(GatewayError::Exhausted {
                    attempts: attempt,
                    last_error: format!("unparseable score reply: {}", reply),
                }
                .into());
            }
        }
    }

    /// Shorten an answer to a bare phrase; keeps the original if the call fails.
    async fn condense(&self, prediction: &str, question: &str) -> String {
        let messages = prompts::chat_messages(prompts::condense(prediction, question));
        match self.ctx.gateway.complete(&messages).await {
            Ok(short) => {
                debug!(before = %prediction, after = %short, "Prediction condensed");
                short
            }
            Err(e) => {
                warn!(error = %e, "Post-processing failed, keeping original prediction");
                prediction.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{Gateway, RetryPolicy};
    use crate::state::RunConfig;
    use crate::testing::ScriptedModel;

    fn engine(task: Task, model: Arc<ScriptedModel>, tweak: impl FnOnce(&mut RunConfig)) -> MapReduceEngine {
        let mut config = RunConfig {
            task,
            ..RunConfig::default()
        };
        tweak(&mut config);
        let gateway = Gateway::new(
            model,
            RetryPolicy {
                backoff: Duration::ZERO,
                max_attempts: Some(2),
            },
        );
        let ctx = PipelineContext {
            config,
            gateway,
            tokenizer: None,
        };
        MapReduceEngine::new(Arc::new(ctx)).unwrap()
    }

    fn example(context: &str, question: &str) -> Example {
        Example {
            context: context.to_string(),
            question: Some(question.to_string()),
            input: None,
            answer: None,
        }
    }

    #[derive(Debug, PartialEq)]
    enum Kind {
        Map,
        Score,
        Reduce,
        FinalReduce,
        Condense,
    }

    fn kind(prompt: &str) -> Kind {
        if prompt.contains("Score: (0-100)") {
            Kind::Score
        } else if prompt.contains("This is the final attempt") || prompt.contains("这是最后一次尝试") {
            Kind::FinalReduce
        } else if prompt.starts_with("We have the following information extracted")
            || prompt.starts_with("我们有以下")
        {
            Kind::Reduce
        } else if prompt.starts_with("Please condense") {
            Kind::Condense
        } else {
            Kind::Map
        }
    }

    /// The chunk text embedded in a map prompt.
    fn chunk_of(prompt: &str) -> String {
        match prompt.split_once("Your chunk:\n") {
            Some((_, rest)) => rest.split("\n\n").next().unwrap_or("").to_string(),
            None => prompt.split("\n\n").nth(1).unwrap_or("").to_string(),
        }
    }

    fn info_of(score_prompt: &str) -> String {
        score_prompt
            .split_once("Extracted information: ")
            .and_then(|(_, rest)| rest.split("\n\n").next())
            .unwrap_or("")
            .to_string()
    }

    fn prompts_of(model: &ScriptedModel, wanted: Kind) -> Vec<String> {
        model
            .prompts()
            .into_iter()
            .filter(|p| kind(p) == wanted)
            .collect()
    }

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score("Score: 85"), Some(85));
        assert_eq!(parse_score("Reasoning...\nScore:42 because"), Some(42));
        assert_eq!(parse_score("Score: 250"), Some(100));
        assert_eq!(parse_score("Score: 99999999999999999999999"), Some(100));
        assert_eq!(parse_score("score: 85"), None);
        assert_eq!(parse_score("I'd say eighty"), None);
    }

    #[test]
    fn test_stage_precedence() {
        assert_eq!(Stage::of(1, 1), Stage::First);
        assert_eq!(Stage::of(1, 5), Stage::First);
        assert_eq!(Stage::of(3, 5), Stage::Middle);
        assert_eq!(Stage::of(5, 5), Stage::Final);
    }

    #[tokio::test]
    async fn test_en_single_chunk_answers_in_one_round() {
        let model = Arc::new(ScriptedModel::new(|_, prompt| {
            Ok(match kind(prompt) {
                Kind::Map => "Paris is the capital of France.",
                Kind::Score => "Score: 95",
                _ => "Paris",
            }
            .to_string())
        }));
        let engine = engine(Task::En, model.clone(), |_| {});

        let outcome = engine
            .answer(
                0,
                &example("Paris is the capital of France.", "What is the capital of France?"),
            )
            .await
            .unwrap();

        assert_eq!(outcome.prediction, "Paris");
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.extractions, 1);
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn test_rag_single_chunk_answers_in_one_round() {
        let model = Arc::new(ScriptedModel::new(|_, prompt| {
            Ok(match kind(prompt) {
                Kind::Map => "The text says Paris is the capital of France.",
                _ => "Paris",
            }
            .to_string())
        }));
        let engine = engine(Task::Rag, model.clone(), |_| {});

        let outcome = engine
            .answer(
                0,
                &example("Paris is the capital of France.", "What is the capital of France?"),
            )
            .await
            .unwrap();

        assert_eq!(outcome.prediction, "Paris");
        assert_eq!(outcome.iterations, 1);
        // no scoring for rag: one map call and one reduce call
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_en_rank_ladder_uses_top_scored_extractions() {
        let model = Arc::new(ScriptedModel::new(|_, prompt| {
            Ok(match kind(prompt) {
                Kind::Map => format!("fact {}", chunk_of(prompt)),
                Kind::Score => {
                    let score = match info_of(prompt).as_str() {
                        "fact A" => 10,
                        "fact B" => 50,
                        "fact C" => 90,
                        "fact D" => 50,
                        _ => 20,
                    };
                    format!("Score: {}", score)
                }
                _ => "NO ANSWER".to_string(),
            })
        }));
        let engine = engine(Task::En, model.clone(), |c| {
            c.chunk_length = 1;
            c.max_iterations = 1;
        });

        let outcome = engine.answer(0, &example("ABCDE", "q")).await.unwrap();
        assert_eq!(outcome.prediction, "NO ANSWER");
        assert_eq!(outcome.iterations, 1);

        let reduces = prompts_of(&model, Kind::Reduce);
        // ladder for five extractions: 1, 2, 4, 5
        assert_eq!(reduces.len(), 4);
        assert!(reduces[0].contains("[1] fact C") && !reduces[0].contains("[2]"));
        assert!(reduces[1].contains("[1] fact C\n\n[2] fact B"));
        assert!(reduces[2].contains("[3] fact D\n\n[4] fact E") && !reduces[2].contains("[5]"));
        assert!(reduces[3].contains("[5] fact A"));
        assert!(prompts_of(&model, Kind::FinalReduce).is_empty());
    }

    #[tokio::test]
    async fn test_en_ladder_stops_at_first_accepted() {
        let model = Arc::new(ScriptedModel::new(|_, prompt| {
            Ok(match kind(prompt) {
                Kind::Map => format!("fact {}", chunk_of(prompt)),
                Kind::Score => "Score: 50".to_string(),
                // accept once two candidates are present
                _ if prompt.contains("[2]") => "Rome".to_string(),
                _ => "No information to answer".to_string(),
            })
        }));
        let engine = engine(Task::En, model.clone(), |c| c.chunk_length = 1);

        let outcome = engine.answer(0, &example("ABCD", "q")).await.unwrap();
        assert_eq!(outcome.prediction, "Rome");
        assert_eq!(outcome.iterations, 1);
        assert_eq!(prompts_of(&model, Kind::Reduce).len(), 2);
    }

    #[tokio::test]
    async fn test_en_escalates_to_final_round() {
        let model = Arc::new(ScriptedModel::new(|_, prompt| {
            Ok(match kind(prompt) {
                Kind::Map if prompt.contains("Previously extracted information") => {
                    "a later clue".to_string()
                }
                Kind::Map => "an early clue".to_string(),
                Kind::Score => "Score: 30".to_string(),
                Kind::Reduce => "NO ANSWER".to_string(),
                Kind::FinalReduce => "Best guess".to_string(),
                Kind::Condense => unreachable!("en never condenses"),
            })
        }));
        let engine = engine(Task::En, model.clone(), |c| c.max_iterations = 3);

        let outcome = engine.answer(0, &example("one chunk", "q")).await.unwrap();
        assert_eq!(outcome.prediction, "Best guess");
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.extractions, 3);

        let maps = prompts_of(&model, Kind::Map);
        assert_eq!(maps.len(), 3);
        assert!(maps[1].contains("round 2") && maps[1].contains("[1] an early clue"));
        assert!(maps[2].contains("[2] a later clue"));

        // middle round reduces over everything accumulated so far, unranked
        let reduces = prompts_of(&model, Kind::Reduce);
        assert_eq!(reduces.len(), 2);
        assert!(reduces[1].contains("[2] a later clue"));

        let finals = prompts_of(&model, Kind::FinalReduce);
        assert_eq!(finals.len(), 1);
        assert!(finals[0].contains("[3] a later clue"));
    }

    #[tokio::test]
    async fn test_en_middle_round_accepts_and_stops() {
        let model = Arc::new(ScriptedModel::new(|_, prompt| {
            Ok(match kind(prompt) {
                Kind::Map if prompt.contains("Previously extracted information") => {
                    "a later clue".to_string()
                }
                Kind::Map => "an early clue".to_string(),
                Kind::Score => "Score: 40".to_string(),
                Kind::Reduce if prompt.contains("[2] a later clue") => "Answer".to_string(),
                Kind::Reduce => "NO ANSWER".to_string(),
                other => panic!("unexpected {:?} call", other),
            })
        }));
        let engine = engine(Task::En, model.clone(), |c| c.max_iterations = 3);

        let outcome = engine.answer(0, &example("one chunk", "q")).await.unwrap();
        assert_eq!(outcome.prediction, "Answer");
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.extractions, 2);
        assert_eq!(prompts_of(&model, Kind::Reduce).len(), 2);
        assert!(prompts_of(&model, Kind::FinalReduce).is_empty());
    }

    #[tokio::test]
    async fn test_rag_middle_round_reduces_filtered_info() {
        let model = Arc::new(ScriptedModel::new(|_, prompt| {
            let later = prompt.contains("Previously extracted information");
            Ok(match kind(prompt) {
                Kind::Map if chunk_of(prompt) == "A" && later => "fact A2".to_string(),
                Kind::Map if chunk_of(prompt) == "A" => "fact A".to_string(),
                Kind::Map => "NO INFORMATION".to_string(),
                Kind::Reduce if prompt.contains("fact A2") => "A".to_string(),
                Kind::Reduce => "NO ANSWER".to_string(),
                other => panic!("unexpected {:?} call", other),
            })
        }));
        let engine = engine(Task::Rag, model.clone(), |c| {
            c.chunk_length = 1;
            c.max_iterations = 3;
        });

        let outcome = engine.answer(0, &example("AB", "q")).await.unwrap();
        assert_eq!(outcome.prediction, "A");
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.extractions, 4);
        assert!(prompts_of(&model, Kind::FinalReduce).is_empty());

        // round one sweeps prefixes 1 and 2, round two reduces once
        let reduces = prompts_of(&model, Kind::Reduce);
        assert_eq!(reduces.len(), 3);
        assert!(reduces[2].contains("[1] fact A\n\n[2] fact A2"));
        assert!(!reduces[2].contains("[3]"));
    }

    #[tokio::test]
    async fn test_final_round_stops_even_when_rejected() {
        let model = Arc::new(ScriptedModel::new(|_, prompt| {
            Ok(match kind(prompt) {
                Kind::Score => "Score: 1".to_string(),
                Kind::Map => "nothing useful".to_string(),
                _ => "NO ANSWER".to_string(),
            })
        }));
        let engine = engine(Task::Zh, model.clone(), |c| c.max_iterations = 2);

        let outcome = engine.answer(0, &example("文本", "问题")).await.unwrap();
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.prediction, "NO ANSWER");
    }

    #[tokio::test]
    async fn test_rag_stops_when_nothing_informative() {
        let model = Arc::new(ScriptedModel::new(|_, prompt| {
            Ok(match kind(prompt) {
                Kind::Map => "NO INFORMATION".to_string(),
                other => panic!("unexpected {:?} call", other),
            })
        }));
        let engine = engine(Task::Rag, model.clone(), |c| c.chunk_length = 2);

        let outcome = engine.answer(0, &example("abcdef", "q")).await.unwrap();
        assert_eq!(outcome.prediction, NO_ANSWER);
        assert_eq!(outcome.iterations, 1);
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn test_rag_prefix_sweep_skips_empty_prefixes() {
        let model = Arc::new(ScriptedModel::new(|_, prompt| {
            Ok(match kind(prompt) {
                Kind::Map if prompt.contains("Previously extracted information") => {
                    "NO INFORMATION".to_string()
                }
                Kind::Map if chunk_of(prompt) == "C" => "fact C".to_string(),
                Kind::Map => "no information here".to_string(),
                Kind::Reduce => "NO ANSWER".to_string(),
                Kind::FinalReduce => "C".to_string(),
                other => panic!("unexpected {:?} call", other),
            })
        }));
        let engine = engine(Task::Rag, model.clone(), |c| {
            c.chunk_length = 1;
            c.max_iterations = 2;
        });

        let outcome = engine.answer(0, &example("ABC", "q")).await.unwrap();
        assert_eq!(outcome.prediction, "C");
        assert_eq!(outcome.iterations, 2);

        // prefixes of size 1 and 2 hold only "no information", so round one reduces nothing
        assert!(prompts_of(&model, Kind::Reduce).is_empty());

        let maps = prompts_of(&model, Kind::Map);
        assert_eq!(maps.len(), 6);
        assert!(maps[3].contains("Previously extracted information:\n[1] fact C\n\n"));

        let finals = prompts_of(&model, Kind::FinalReduce);
        assert_eq!(finals.len(), 1);
        assert!(finals[0].contains("[1] fact C") && !finals[0].contains("[2]"));
    }

    #[tokio::test]
    async fn test_rag_prefix_sweep_doubles_prefix() {
        let model = Arc::new(ScriptedModel::new(|_, prompt| {
            Ok(match kind(prompt) {
                Kind::Map => format!("fact {}", chunk_of(prompt)),
                Kind::Reduce if prompt.contains("fact D") => "D".to_string(),
                _ => "NO ANSWER".to_string(),
            })
        }));
        let engine = engine(Task::Rag, model.clone(), |c| c.chunk_length = 1);

        let outcome = engine.answer(0, &example("ABCDE", "q")).await.unwrap();
        assert_eq!(outcome.prediction, "D");
        let reduces = prompts_of(&model, Kind::Reduce);
        // prefixes 1, 2, 4; "fact D" first appears in the size-4 prefix
        assert_eq!(reduces.len(), 3);
        assert!(!reduces[2].contains("fact E"));
    }

    #[tokio::test]
    async fn test_acceptance_asymmetry_between_tasks() {
        let reply = |_: usize, prompt: &str| -> Result<String, String> {
            Ok(match kind(prompt) {
                Kind::Map => "something".to_string(),
                Kind::Score => "Score: 60".to_string(),
                Kind::Reduce => "No info, but probably Paris".to_string(),
                _ => "fallback".to_string(),
            })
        };

        let rag_model = Arc::new(ScriptedModel::new(reply));
        let rag = engine(Task::Rag, rag_model, |_| {});
        let outcome = rag.answer(0, &example("x", "q")).await.unwrap();
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.prediction, "No info, but probably Paris");

        let en_model = Arc::new(ScriptedModel::new(reply));
        let en = engine(Task::En, en_model, |c| c.max_iterations = 2);
        let outcome = en.answer(0, &example("x", "q")).await.unwrap();
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.prediction, "fallback");
    }

    #[tokio::test]
    async fn test_score_reasked_until_parseable() {
        let model = Arc::new(ScriptedModel::new(|i, prompt| {
            Ok(match kind(prompt) {
                Kind::Map => "clue".to_string(),
                Kind::Score if i == 1 => "It is quite useful".to_string(),
                Kind::Score => "Score: 70".to_string(),
                _ => "Answer".to_string(),
            })
        }));
        let engine = engine(Task::En, model.clone(), |_| {});

        let outcome = engine.answer(0, &example("x", "q")).await.unwrap();
        assert_eq!(outcome.prediction, "Answer");
        let scores = prompts_of(&model, Kind::Score);
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[0], scores[1]);
    }

    #[tokio::test]
    async fn test_open_weight_rag_answer_is_condensed() {
        let model = Arc::new(ScriptedModel::new(|_, prompt| {
            Ok(match kind(prompt) {
                Kind::Map => "Paris".to_string(),
                Kind::Condense => "Paris".to_string(),
                _ => "The capital of France is Paris.".to_string(),
            })
        }));
        let engine = engine(Task::Rag, model.clone(), |c| {
            c.model = "meta-llama/Llama-3.1-8B-Instruct".to_string()
        });

        let outcome = engine.answer(0, &example("x", "q")).await.unwrap();
        assert_eq!(outcome.prediction, "Paris");
        assert_eq!(prompts_of(&model, Kind::Condense).len(), 1);
    }

    #[tokio::test]
    async fn test_condense_failure_keeps_original() {
        let model = Arc::new(ScriptedModel::new(|_, prompt| match kind(prompt) {
            Kind::Map => Ok("Paris".to_string()),
            Kind::Condense => Err("timeout".to_string()),
            _ => Ok("The capital of France is Paris.".to_string()),
        }));
        let engine = engine(Task::Rag, model.clone(), |c| c.model = "llama-3-70b".to_string());

        let outcome = engine.answer(0, &example("x", "q")).await.unwrap();
        assert_eq!(outcome.prediction, "The capital of France is Paris.");
        // two attempts allowed by the test retry policy
        assert_eq!(prompts_of(&model, Kind::Condense).len(), 2);
    }

    #[tokio::test]
    async fn test_sentinel_is_not_condensed() {
        let model = Arc::new(ScriptedModel::new(|_, prompt| {
            Ok(match kind(prompt) {
                Kind::Map => "NO INFORMATION".to_string(),
                other => panic!("unexpected {:?} call", other),
            })
        }));
        let engine = engine(Task::Rag, model, |c| c.model = "llama-3-70b".to_string());
        let outcome = engine.answer(0, &example("x", "q")).await.unwrap();
        assert_eq!(outcome.prediction, NO_ANSWER);
    }

    #[tokio::test]
    async fn test_gateway_exhaustion_fails_example() {
        let model = Arc::new(ScriptedModel::always_failing());
        let engine = engine(Task::En, model, |_| {});
        let err = engine.answer(0, &example("x", "q")).await.unwrap_err();
        assert!(err.downcast_ref::<GatewayError>().is_some());
    }
}
