use std::{cmp::Ordering, collections::HashMap, collections::HashSet, sync::Arc};

use common::{error::AppError, storage::ledger::FeedbackLedger};
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    keyword::{extract_keywords, keyword_score},
    vector::{VectorIndex, VectorMatch},
};

/// Keyword score above which a candidate counts as surfaced by both signals.
const OVERLAP_THRESHOLD: f64 = 0.3;
/// The index is asked for this multiple of the requested result count so
/// fusion has candidates to reorder.
const CANDIDATE_MULTIPLIER: usize = 3;

/// Weights used for linear score fusion.
#[derive(Debug, Clone, Copy)]
pub struct HybridWeights {
    pub semantic: f64,
    pub keyword: f64,
    pub feedback: f64,
    pub overlap_bonus: f64,
}

impl Default for HybridWeights {
    fn default() -> Self {
        // Semantic similarity dominates; keyword overlap complements it and
        // the persisted feedback signal nudges documents users vouched for.
        Self {
            semantic: 0.6,
            keyword: 0.3,
            feedback: 0.1,
            overlap_bonus: 0.05,
        }
    }
}

/// One fused candidate. Each id appears at most once per query execution.
#[derive(Debug, Clone)]
pub struct HybridResult {
    pub id: String,
    pub semantic_score: f64,
    pub keyword_score: f64,
    pub feedback_score: f64,
    pub final_score: f64,
    pub metadata: HashMap<String, Value>,
    pub appears_in_both: bool,
}

/// Fuses dense similarity, keyword overlap and the ledger's per-document
/// feedback signal into a single ranking.
#[derive(Clone)]
pub struct HybridRetriever {
    index: Arc<dyn VectorIndex>,
    ledger: FeedbackLedger,
    weights: HybridWeights,
}

impl HybridRetriever {
    pub fn new(index: Arc<dyn VectorIndex>, ledger: FeedbackLedger) -> Self {
        Self {
            index,
            ledger,
            weights: HybridWeights::default(),
        }
    }

    pub fn with_weights(mut self, weights: HybridWeights) -> Self {
        self.weights = weights;
        self
    }

    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<HybridResult>, AppError> {
        let keywords = extract_keywords(query);
        let (matches, _) = self
            .index
            .query(query, top_k * CANDIDATE_MULTIPLIER)
            .await?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut candidates: Vec<HybridResult> = Vec::new();
        for candidate in matches {
            if !seen.insert(candidate.id.clone()) {
                continue;
            }

            let text = metadata_text(&candidate.metadata);
            let keyword = keyword_score(&keywords, &text);
            candidates.push(HybridResult {
                id: candidate.id,
                semantic_score: candidate.score,
                keyword_score: keyword,
                feedback_score: 0.0,
                final_score: 0.0,
                metadata: candidate.metadata,
                appears_in_both: keyword > OVERLAP_THRESHOLD,
            });
        }

        // Feedback lookups run concurrently; a failed lookup zeroes that
        // candidate's feedback signal instead of aborting the search.
        let feedback_scores = join_all(
            candidates
                .iter()
                .map(|candidate| self.ledger.document_global_score(&candidate.id)),
        )
        .await;

        for (candidate, feedback) in candidates.iter_mut().zip(feedback_scores) {
            candidate.feedback_score = match feedback {
                Ok(score) => score,
                Err(error) => {
                    warn!(document_id = %candidate.id, %error, "Feedback lookup failed");
                    0.0
                }
            };
            candidate.final_score = self.weights.semantic * candidate.semantic_score
                + self.weights.keyword * candidate.keyword_score
                + self.weights.feedback * candidate.feedback_score
                + if candidate.appears_in_both {
                    self.weights.overlap_bonus
                } else {
                    0.0
                };
        }

        sort_by_final_desc(&mut candidates);
        candidates.truncate(top_k);

        debug!(query_chars = query.len(), results = candidates.len(), "Hybrid search complete");
        Ok(candidates)
    }
}

pub fn highest_score(results: &[HybridResult]) -> Option<f64> {
    results
        .iter()
        .map(|r| r.final_score)
        .max_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal))
}

pub fn sort_by_final_desc(results: &mut [HybridResult]) {
    results.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                b.semantic_score
                    .partial_cmp(&a.semantic_score)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Concatenation of the metadata fields keyword matching runs against.
pub fn metadata_text(metadata: &HashMap<String, Value>) -> String {
    let mut parts: Vec<String> = Vec::new();
    for key in ["text", "title", "source"] {
        if let Some(Value::String(value)) = metadata.get(key) {
            parts.push(value.clone());
        }
    }
    if let Some(Value::Array(tags)) = metadata.get("tags") {
        for tag in tags {
            if let Value::String(tag) = tag {
                parts.push(tag.clone());
            }
        }
    }
    parts.join(" ")
}
