use std::{collections::HashSet, sync::Arc};

use common::{
    error::AppError,
    storage::{
        ledger::FeedbackLedger,
        types::{hop::Hop, hop_document::HopDocument, query_record::QueryRecord},
    },
};
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    answer::{build_context, strip_code_fences},
    hybrid::{sort_by_final_desc, HybridResult, HybridRetriever},
    llm::{ChatModel, ChatRequest},
    prompts::{decomposition_user_message, DECOMPOSITION_SYSTEM_PROMPT},
};

const INITIAL_TOP_K: usize = 10;
const FANOUT_TOP_K: usize = 5;
/// Sufficiency evaluation sees evidence above this fused score, which is
/// looser than the answer threshold on purpose.
const EVALUATION_CONTEXT_THRESHOLD: f64 = 0.4;

const INITIAL_REASONING: &str = "Initial Query";
const FANOUT_REASONING: &str = "LLM Generated";
const REPLAY_REASONING: &str = "Replay from history";

/// Everything one retrieval run produced, deduplicated and ranked.
#[derive(Debug)]
pub struct MultiHopOutcome {
    pub results: Vec<HybridResult>,
    pub hops: usize,
    pub generated_queries: Vec<String>,
    pub query_id: String,
    pub hop_ids: Vec<String>,
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct Decomposition {
    pub sufficient: bool,
    #[serde(default)]
    pub queries: Vec<String>,
}

/// Drives retrieval rounds for one query: replays a stored decomposition when
/// the exact question succeeded before, otherwise retrieves, evaluates
/// sufficiency and fans out over LLM-generated sub-queries.
pub struct MultiHopController {
    retriever: HybridRetriever,
    ledger: FeedbackLedger,
    model: Arc<dyn ChatModel>,
    max_hops: usize,
}

struct RunState {
    query_id: String,
    seen: HashSet<String>,
    results: Vec<HybridResult>,
    hop_ids: Vec<String>,
    generated_queries: Vec<String>,
}

impl RunState {
    fn new(query_id: String) -> Self {
        Self {
            query_id,
            seen: HashSet::new(),
            results: Vec::new(),
            hop_ids: Vec::new(),
            generated_queries: Vec::new(),
        }
    }

    fn into_outcome(mut self) -> MultiHopOutcome {
        sort_by_final_desc(&mut self.results);
        MultiHopOutcome {
            hops: self.hop_ids.len(),
            results: self.results,
            generated_queries: self.generated_queries,
            query_id: self.query_id,
            hop_ids: self.hop_ids,
        }
    }
}

impl MultiHopController {
    pub fn new(
        retriever: HybridRetriever,
        ledger: FeedbackLedger,
        model: Arc<dyn ChatModel>,
        max_hops: usize,
    ) -> Self {
        Self {
            retriever,
            ledger,
            model,
            max_hops,
        }
    }

    pub async fn run(&self, original_query: &str) -> Result<MultiHopOutcome, AppError> {
        let query_id = Uuid::new_v4().to_string();
        self.ledger
            .log_query(QueryRecord::new(query_id.clone(), original_query))
            .await?;

        let mut state = RunState::new(query_id);

        // One-shot learning: an identical question that earned positive
        // feedback replays its hop breakdown and skips evaluation entirely.
        let template = self.ledger.successful_template(original_query).await?;
        if !template.is_empty() {
            debug!(steps = template.len(), "Replaying stored decomposition");
            for step in template {
                self.execute_hop(
                    &mut state,
                    step.hop_order,
                    &step.sub_query,
                    REPLAY_REASONING,
                    FANOUT_TOP_K,
                )
                .await?;
                state.generated_queries.push(step.sub_query);
            }
            return Ok(state.into_outcome());
        }

        self.execute_hop(&mut state, 0, original_query, INITIAL_REASONING, INITIAL_TOP_K)
            .await?;

        let mut current_hop = 0;
        while current_hop < self.max_hops {
            let (context, _) = build_context(&state.results, EVALUATION_CONTEXT_THRESHOLD);
            let Some(decomposition) = self.evaluate(&context, original_query).await else {
                break;
            };
            if decomposition.sufficient {
                debug!("Evidence judged sufficient");
                break;
            }
            if decomposition.queries.is_empty() {
                break;
            }

            current_hop += 1;
            debug!(round = current_hop, sub_queries = decomposition.queries.len(), "Fanning out");
            for sub_query in decomposition.queries {
                self.execute_hop(
                    &mut state,
                    current_hop as u32,
                    &sub_query,
                    FANOUT_REASONING,
                    FANOUT_TOP_K,
                )
                .await?;
                state.generated_queries.push(sub_query);
            }
        }

        Ok(state.into_outcome())
    }

    /// Logs the hop, retrieves for the sub-query, records every surfaced
    /// document in rank order and merges new documents into the accumulator.
    async fn execute_hop(
        &self,
        state: &mut RunState,
        hop_order: u32,
        sub_query: &str,
        reasoning: &str,
        top_k: usize,
    ) -> Result<(), AppError> {
        let hop_id = Uuid::new_v4().to_string();
        self.ledger
            .log_hop(Hop::new(
                hop_id.clone(),
                state.query_id.clone(),
                hop_order,
                sub_query,
                reasoning,
            ))
            .await?;

        let results = self.retriever.search(sub_query, top_k).await?;

        for (position, result) in results.iter().enumerate() {
            self.ledger
                .log_hop_document(HopDocument::new(
                    Uuid::new_v4().to_string(),
                    hop_id.clone(),
                    result.id.clone(),
                    result.semantic_score,
                    result.keyword_score,
                    position as u32 + 1,
                ))
                .await?;
        }

        for result in results {
            if state.seen.insert(result.id.clone()) {
                state.results.push(result);
            }
        }
        state.hop_ids.push(hop_id);

        Ok(())
    }

    /// Asks the model whether the evidence suffices. Any model or parse
    /// failure degrades to "use what we have".
    async fn evaluate(&self, context: &str, question: &str) -> Option<Decomposition> {
        let request = ChatRequest {
            system_prompt: DECOMPOSITION_SYSTEM_PROMPT.to_string(),
            user_message: decomposition_user_message(context, question),
        };

        let raw = match self.model.complete(request).await {
            Ok(raw) => raw,
            Err(error) => {
                warn!(%error, "Sufficiency evaluation failed, using gathered evidence");
                return None;
            }
        };

        parse_decomposition(&raw)
    }
}

pub fn parse_decomposition(raw: &str) -> Option<Decomposition> {
    match serde_json::from_str(strip_code_fences(raw)) {
        Ok(decomposition) => Some(decomposition),
        Err(error) => {
            warn!(%error, "Decomposition reply was not valid JSON, terminating loop");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        llm::ScriptedModel,
        vector::{text_match, StaticIndex},
    };
    use common::storage::{
        db::SurrealDbClient,
        types::{evidence_chain::EvidenceChain, response_record::ResponseRecord},
    };

    async fn test_ledger() -> FeedbackLedger {
        let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb");
        FeedbackLedger::new(Arc::new(db))
    }

    fn controller(
        index: StaticIndex,
        ledger: FeedbackLedger,
        model: ScriptedModel,
        max_hops: usize,
    ) -> MultiHopController {
        let retriever = HybridRetriever::new(Arc::new(index), ledger.clone());
        MultiHopController::new(retriever, ledger, Arc::new(model), max_hops)
    }

    #[tokio::test]
    async fn sufficient_evidence_stops_after_the_initial_hop() {
        let index = StaticIndex::with_fallback(vec![text_match("doc-a", 0.8, "alpha facts")]);
        let ledger = test_ledger().await;
        let model = ScriptedModel::new([r#"{"sufficient": true, "queries": []}"#]);

        let outcome = controller(index, ledger.clone(), model, 1)
            .run("What is alpha?")
            .await
            .expect("run failed");

        assert_eq!(outcome.hops, 1);
        assert!(outcome.generated_queries.is_empty());
        assert_eq!(outcome.results.len(), 1);

        let hops = Hop::for_query(&outcome.query_id, ledger.db())
            .await
            .expect("hop query failed");
        assert_eq!(hops.len(), 1);
        assert_eq!(hops[0].hop_order, 0);
        assert_eq!(hops[0].reasoning, "Initial Query");
    }

    #[tokio::test]
    async fn insufficient_evidence_fans_out_once() {
        let index = StaticIndex::with_fallback(vec![text_match("doc-x", 0.45, "thin evidence")]);
        index.stage("What is A?", vec![text_match("doc-a", 0.8, "about A")]);
        index.stage(
            "What is B?",
            vec![
                text_match("doc-b", 0.7, "about B"),
                // also surfaced by the first sub-query's document id
                text_match("doc-a", 0.6, "about A"),
            ],
        );

        let ledger = test_ledger().await;
        let model = ScriptedModel::new(
            [r#"{"sufficient": false, "queries": ["What is A?", "What is B?"]}"#],
        );

        let outcome = controller(index, ledger.clone(), model, 1)
            .run("Compare A and B")
            .await
            .expect("run failed");

        assert_eq!(outcome.hops, 3);
        assert_eq!(
            outcome.generated_queries,
            vec!["What is A?".to_string(), "What is B?".to_string()]
        );

        let hops = Hop::for_query(&outcome.query_id, ledger.db())
            .await
            .expect("hop query failed");
        let orders: Vec<u32> = hops.iter().map(|h| h.hop_order).collect();
        assert_eq!(orders, vec![0, 1, 1]);

        // accumulator deduplicates doc-a, the ledger keeps one row per hop
        let ids: Vec<&str> = outcome.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(
            ids.iter().collect::<std::collections::HashSet<_>>().len(),
            ids.len()
        );
        let mut doc_a_rows = 0;
        for hop in &hops {
            let rows = HopDocument::for_hop(&hop.id, ledger.db())
                .await
                .expect("hop document query failed");
            doc_a_rows += rows.iter().filter(|r| r.document_id == "doc-a").count();
        }
        assert_eq!(doc_a_rows, 2);
    }

    #[tokio::test]
    async fn results_stay_sorted_and_unique_across_hops() {
        let index = StaticIndex::with_fallback(vec![text_match("doc-x", 0.45, "thin")]);
        index.stage("What is A?", vec![text_match("doc-a", 0.9, "about A")]);

        let ledger = test_ledger().await;
        let model =
            ScriptedModel::new([r#"{"sufficient": false, "queries": ["What is A?"]}"#]);

        let outcome = controller(index, ledger, model, 1)
            .run("Tell me about A")
            .await
            .expect("run failed");

        assert!(outcome
            .results
            .windows(2)
            .all(|w| w[0].final_score >= w[1].final_score));
    }

    #[tokio::test]
    async fn unparseable_decomposition_terminates_the_loop() {
        let index = StaticIndex::with_fallback(vec![text_match("doc-x", 0.45, "thin")]);
        let ledger = test_ledger().await;
        let model = ScriptedModel::new(["the model rambled instead of emitting JSON"]);

        let outcome = controller(index, ledger, model, 3)
            .run("What is X?")
            .await
            .expect("run failed");

        assert_eq!(outcome.hops, 1);
        assert!(outcome.generated_queries.is_empty());
    }

    #[tokio::test]
    async fn model_failure_degrades_to_gathered_evidence() {
        let index = StaticIndex::with_fallback(vec![text_match("doc-x", 0.45, "thin")]);
        let ledger = test_ledger().await;
        let model = ScriptedModel::failing("provider exploded");

        let outcome = controller(index, ledger, model, 2)
            .run("What is X?")
            .await
            .expect("run should degrade, not fail");

        assert_eq!(outcome.hops, 1);
        assert_eq!(outcome.results.len(), 1);
    }

    #[tokio::test]
    async fn successful_template_is_replayed_without_the_model() {
        let index = StaticIndex::with_fallback(vec![text_match("doc-x", 0.45, "thin")]);
        index.stage("What is A?", vec![text_match("doc-a", 0.8, "about A")]);
        index.stage("What is B?", vec![text_match("doc-b", 0.7, "about B")]);

        let ledger = test_ledger().await;
        let first_model = ScriptedModel::new(
            [r#"{"sufficient": false, "queries": ["What is A?", "What is B?"]}"#],
        );

        let first = controller(index, ledger.clone(), first_model, 1)
            .run("Compare A and B")
            .await
            .expect("first run failed");
        assert_eq!(first.hops, 3);

        // the user endorses the answer built from this run
        ledger
            .log_response(ResponseRecord::new("r1", first.query_id.clone(), "answer"))
            .await
            .unwrap();
        ledger
            .log_evidence_chain(EvidenceChain::new(
                "e1",
                "r1",
                first.hop_ids.clone(),
                vec![],
                0.8,
            ))
            .await
            .unwrap();
        ledger.submit_feedback("r1", 1, None).await.unwrap();

        // an exhausted model proves the replay path never evaluates
        let replay_index = StaticIndex::with_fallback(vec![text_match("doc-x", 0.45, "thin")]);
        replay_index.stage("What is A?", vec![text_match("doc-a", 0.8, "about A")]);
        replay_index.stage("What is B?", vec![text_match("doc-b", 0.7, "about B")]);
        let silent_model = ScriptedModel::new(Vec::<String>::new());

        let replayed = controller(replay_index, ledger.clone(), silent_model, 1)
            .run("Compare A and B")
            .await
            .expect("replay failed");

        assert_eq!(replayed.hops, first.hops);
        assert_eq!(
            replayed.generated_queries,
            vec![
                "Compare A and B".to_string(),
                "What is A?".to_string(),
                "What is B?".to_string()
            ]
        );

        let hops = Hop::for_query(&replayed.query_id, ledger.db())
            .await
            .expect("hop query failed");
        assert!(hops.iter().all(|h| h.reasoning == "Replay from history"));
    }

    #[test]
    fn decomposition_parsing_strips_fences() {
        let parsed =
            parse_decomposition("```json\n{\"sufficient\": false, \"queries\": [\"q\"]}\n```")
                .expect("should parse");
        assert!(!parsed.sufficient);
        assert_eq!(parsed.queries, vec!["q".to_string()]);

        assert!(parse_decomposition("no json here").is_none());
    }
}
