//! Candidate-set construction for reduce requests.

use super::task::is_informative;
use super::Extraction;

/// Candidate counts for the first-round ranked reduce: 1, 2, 4, ... up to `n`,
/// always ending at exactly `n`.
///
/// An empty pool still gets one attempt, with zero candidates.
pub fn rank_ladder(n: usize) -> Vec<usize> {
    if n == 0 {
        return vec![0];
    }
    let mut ladder = Vec::new();
    let mut r = 1;
    while r <= n {
        ladder.push(r);
        r *= 2;
    }
    if ladder.last() != Some(&n) {
        ladder.push(n);
    }
    ladder
}

/// Prefix sizes 1, 2, 4, ... that fit in `n`. Unlike [`rank_ladder`] the pool
/// size itself is not appended.
pub fn prefix_sizes(n: usize) -> Vec<usize> {
    std::iter::successors(Some(1usize), |r| r.checked_mul(2))
        .take_while(|&r| r <= n)
        .collect()
}

/// Texts of the `r` highest-scored extractions; ties keep insertion order.
pub fn top_ranked(extractions: &[Extraction], r: usize) -> Vec<String> {
    let mut ranked: Vec<&Extraction> = extractions.iter().collect();
    ranked.sort_by(|a, b| b.score.cmp(&a.score));
    ranked.into_iter().take(r).map(|e| e.text.clone()).collect()
}

pub fn all_texts(extractions: &[Extraction]) -> Vec<String> {
    extractions.iter().map(|e| e.text.clone()).collect()
}

/// Texts that are not "no information" replies, in order.
pub fn informative(extractions: &[Extraction]) -> Vec<String> {
    extractions
        .iter()
        .filter(|e| is_informative(&e.text))
        .map(|e| e.text.clone())
        .collect()
}
