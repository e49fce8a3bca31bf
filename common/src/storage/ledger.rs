use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::AppError;

use super::{
    db::SurrealDbClient,
    types::{
        evidence_chain::EvidenceChain,
        hop::{deserialize_flexible_id, Hop},
        hop_document::HopDocument,
        query_record::QueryRecord,
        response_record::ResponseRecord,
        StoredObject,
    },
};

/// Raw feedback sums are squashed through tanh(raw / 10).
const FEEDBACK_SATURATION: f64 = 10.0;
/// Per-day exponential decay applied to the squashed score.
const FEEDBACK_DECAY_LAMBDA: f64 = 0.1;
const MS_PER_DAY: f64 = 86_400_000.0;
/// Corrections shorter than this (after trimming) are discarded.
const CORRECTION_MIN_CHARS: usize = 5;

/// One step of a previously successful query decomposition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateStep {
    pub hop_order: u32,
    pub sub_query: String,
    pub reasoning: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct FailedSubQuery {
    pub sub_query: String,
    pub failures: u64,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct NegativeDocument {
    pub document_id: String,
    pub associations: u64,
}

/// Aggregate feedback counters exposed on the debug surface.
#[derive(Debug, Serialize)]
pub struct LedgerMetrics {
    pub positive_feedback: u64,
    pub negative_feedback: u64,
    pub total_feedback: u64,
    pub failed_sub_queries: Vec<FailedSubQuery>,
    pub negative_documents: Vec<NegativeDocument>,
}

/// Durable record of queries, hops, retrieved documents and responses, plus
/// the feedback aggregates derived from them. All ids are caller-generated
/// UUIDs; inserts are idempotent per id.
#[derive(Clone)]
pub struct FeedbackLedger {
    db: Arc<SurrealDbClient>,
}

impl FeedbackLedger {
    pub fn new(db: Arc<SurrealDbClient>) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Arc<SurrealDbClient> {
        &self.db
    }

    pub async fn log_query(&self, record: QueryRecord) -> Result<(), AppError> {
        debug!(query_id = %record.id, "Logging query");
        self.db.put_item(record).await?;
        Ok(())
    }

    pub async fn log_hop(&self, hop: Hop) -> Result<(), AppError> {
        debug!(hop_id = %hop.id, hop_order = hop.hop_order, "Logging hop");
        self.db.put_item(hop).await?;
        Ok(())
    }

    pub async fn log_hop_document(&self, document: HopDocument) -> Result<(), AppError> {
        self.db.put_item(document).await?;
        Ok(())
    }

    pub async fn log_response(&self, response: ResponseRecord) -> Result<(), AppError> {
        debug!(response_id = %response.id, "Logging response");
        self.db.put_item(response).await?;
        Ok(())
    }

    pub async fn log_evidence_chain(&self, chain: EvidenceChain) -> Result<(), AppError> {
        debug!(chain_id = %chain.id, hops = chain.hop_ids.len(), "Logging evidence chain");
        self.db.put_item(chain).await?;
        Ok(())
    }

    /// Finalises the user verdict on a response. On negative feedback the
    /// weakest hop of the response's evidence chain is diagnosed and marked
    /// failed. Returns the sanitised correction text, if any, so the caller
    /// can inject it into the vector index.
    pub async fn submit_feedback(
        &self,
        response_id: &str,
        feedback: i32,
        correction: Option<&str>,
    ) -> Result<Option<String>, AppError> {
        if feedback != 1 && feedback != -1 {
            return Err(AppError::Validation(format!(
                "Feedback must be -1 or +1, got {feedback}"
            )));
        }

        let sanitised = correction
            .map(str::trim)
            .filter(|c| c.chars().count() > CORRECTION_MIN_CHARS)
            .map(ToString::to_string);

        ResponseRecord::finalize_feedback(response_id, feedback, sanitised.clone(), &self.db)
            .await?;

        if feedback == -1 {
            self.diagnose_weakest_hop(response_id).await?;
        }

        Ok(sanitised)
    }

    /// Blames the hop with the lowest mean combined (dense + sparse) score
    /// for a badly received answer. Ties break on earliest hop order, then
    /// lexicographic hop id. Returns the failed hop id when a chain exists.
    pub async fn diagnose_weakest_hop(
        &self,
        response_id: &str,
    ) -> Result<Option<String>, AppError> {
        let Some(chain) = EvidenceChain::for_response(response_id, &self.db).await? else {
            debug!(%response_id, "No evidence chain, skipping weakest-hop diagnosis");
            return Ok(None);
        };

        let mut weakest: Option<(f64, u32, String)> = None;
        for hop_id in &chain.hop_ids {
            let Some(hop) = self.db.get_item::<Hop>(hop_id).await? else {
                warn!(%hop_id, "Evidence chain references missing hop");
                continue;
            };

            let documents = HopDocument::for_hop(hop_id, &self.db).await?;
            let avg_score = if documents.is_empty() {
                0.0
            } else {
                documents
                    .iter()
                    .map(|d| d.dense_score + d.sparse_score)
                    .sum::<f64>()
                    / documents.len() as f64
            };

            let candidate = (avg_score, hop.hop_order, hop.id);
            let replace = match &weakest {
                None => true,
                Some(current) => {
                    match candidate.0.partial_cmp(&current.0).unwrap_or(Ordering::Equal) {
                        Ordering::Less => true,
                        Ordering::Greater => false,
                        Ordering::Equal => (candidate.1, &candidate.2) < (current.1, &current.2),
                    }
                }
            };
            if replace {
                weakest = Some(candidate);
            }
        }

        let Some((avg_score, hop_order, hop_id)) = weakest else {
            return Ok(None);
        };

        debug!(%hop_id, hop_order, avg_score, "Marking weakest hop as failed");
        Hop::mark_failed(&hop_id, &self.db).await?;

        Ok(Some(hop_id))
    }

    /// Time-decayed aggregate of all feedback transitively linked to a
    /// document through query -> hop -> hop_document. Zero when the document
    /// has never been part of a judged response.
    pub async fn document_global_score(&self, document_id: &str) -> Result<f64, AppError> {
        let mut hop_ids: Vec<String> = self
            .db
            .client
            .query("SELECT VALUE hop_id FROM hop_document WHERE document_id = $document_id")
            .bind(("document_id", document_id.to_string()))
            .await?
            .take(0)?;
        hop_ids.sort();
        hop_ids.dedup();

        if hop_ids.is_empty() {
            return Ok(0.0);
        }

        let hops = join_all(hop_ids.iter().map(|id| self.db.get_item::<Hop>(id))).await;
        let mut query_ids: Vec<String> = hops
            .into_iter()
            .filter_map(|hop| hop.ok().flatten())
            .map(|hop| hop.query_id)
            .collect();
        query_ids.sort();
        query_ids.dedup();

        let responses = ResponseRecord::for_queries(query_ids, &self.db).await?;
        let judged: Vec<&ResponseRecord> = responses
            .iter()
            .filter(|r| r.user_feedback != 0)
            .collect();

        let Some(last_time) = judged.iter().map(|r| r.created_at).max() else {
            return Ok(0.0);
        };

        let raw: i64 = judged.iter().map(|r| i64::from(r.user_feedback)).sum();
        Ok(decayed_score(raw, last_time, Utc::now()))
    }

    /// Hop breakdown of any prior identical query whose response earned
    /// positive feedback, ascending by hop order. Empty when none exists.
    pub async fn successful_template(
        &self,
        query_text: &str,
    ) -> Result<Vec<TemplateStep>, AppError> {
        let queries: Vec<QueryRecord> = self
            .db
            .client
            .query("SELECT * FROM type::table($table) WHERE text = $text")
            .bind(("table", QueryRecord::table_name()))
            .bind(("text", query_text.to_string()))
            .await?
            .take(0)?;

        if queries.is_empty() {
            return Ok(Vec::new());
        }

        let query_ids: Vec<String> = queries.into_iter().map(|q| q.id).collect();
        let responses = ResponseRecord::for_queries(query_ids, &self.db).await?;
        let Some(winner) = responses
            .into_iter()
            .filter(|r| r.user_feedback == 1)
            .max_by_key(|r| r.created_at)
        else {
            return Ok(Vec::new());
        };

        let hops = Hop::for_query(&winner.query_id, &self.db).await?;
        Ok(hops
            .into_iter()
            .map(|hop| TemplateStep {
                hop_order: hop.hop_order,
                sub_query: hop.sub_query,
                reasoning: hop.reasoning,
            })
            .collect())
    }

    /// Aggregate counters for the debug endpoint.
    pub async fn metrics_snapshot(&self) -> Result<LedgerMetrics, AppError> {
        let responses: Vec<ResponseRecord> = self.db.client.select("response").await?;
        let positive_feedback = responses.iter().filter(|r| r.user_feedback == 1).count() as u64;
        let negative_feedback = responses.iter().filter(|r| r.user_feedback == -1).count() as u64;

        #[derive(Deserialize)]
        struct SubQueryRow {
            sub_query: String,
        }

        let failed_rows: Vec<SubQueryRow> = self
            .db
            .client
            .query("SELECT sub_query FROM hop WHERE status = 'failed'")
            .await?
            .take(0)?;
        let failed_sub_queries = top_counts(failed_rows.into_iter().map(|r| r.sub_query))
            .into_iter()
            .map(|(sub_query, failures)| FailedSubQuery {
                sub_query,
                failures,
            })
            .collect();

        let negative_query_ids: Vec<String> = responses
            .iter()
            .filter(|r| r.user_feedback == -1)
            .map(|r| r.query_id.clone())
            .collect();

        let negative_documents = if negative_query_ids.is_empty() {
            Vec::new()
        } else {
            #[derive(Deserialize)]
            struct HopIdRow {
                #[serde(deserialize_with = "deserialize_flexible_id")]
                id: String,
            }

            let hop_rows: Vec<HopIdRow> = self
                .db
                .client
                .query("SELECT id FROM hop WHERE query_id IN $query_ids")
                .bind(("query_ids", negative_query_ids))
                .await?
                .take(0)?;
            let hop_ids: Vec<String> = hop_rows.into_iter().map(|r| r.id).collect();

            let document_ids: Vec<String> = self
                .db
                .client
                .query("SELECT VALUE document_id FROM hop_document WHERE hop_id IN $hop_ids")
                .bind(("hop_ids", hop_ids))
                .await?
                .take(0)?;

            top_counts(document_ids.into_iter())
                .into_iter()
                .map(|(document_id, associations)| NegativeDocument {
                    document_id,
                    associations,
                })
                .collect()
        };

        Ok(LedgerMetrics {
            positive_feedback,
            negative_feedback,
            total_feedback: positive_feedback + negative_feedback,
            failed_sub_queries,
            negative_documents,
        })
    }
}

fn decayed_score(raw: i64, last_time: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age_ms = (now - last_time).num_milliseconds().max(0) as f64;
    let age_days = age_ms / MS_PER_DAY;
    (raw as f64 / FEEDBACK_SATURATION).tanh() * (-FEEDBACK_DECAY_LAMBDA * age_days).exp()
}

/// Counts occurrences and keeps the five most frequent, count descending
/// then key ascending for a stable order.
fn top_counts(items: impl Iterator<Item = String>) -> Vec<(String, u64)> {
    let mut counts: HashMap<String, u64> = HashMap::new();
    for item in items {
        *counts.entry(item).or_insert(0) += 1;
    }

    let mut ranked: Vec<(String, u64)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(5);
    ranked
}
