//! Evaluation engine
//!
//! Grades one answer per user per question. The `(userId, itemId)` uniqueness
//! is enforced by the store, so two concurrent submissions of the same question
//! cannot both be accepted. The answer key and explanation are only returned
//! after the evaluation record has been written.

use async_trait::async_trait;
use bson::doc;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};
use uuid::Uuid;

use crate::db::schemas::{EvaluationRecord, EVALUATION_COLLECTION};
use crate::db::{MongoClient, MongoCollection};
use crate::logging::UsageLogger;
use crate::services::progress::{AttemptFilter, ProgressStore};
use crate::services::quota::QuotaLedger;
use crate::services::subscriptions::PlanResolver;
use crate::services::vault::AnswerVault;
use crate::types::{ExamdeskError, Result, UsageLimits};

/// Time spent assumed when a client does not report one
pub const DEFAULT_TIME_SPENT_SECS: i64 = 30;

const DUPLICATE_MESSAGE: &str = "This MCQ has already been submitted";

/// Persistence for evaluation records
#[async_trait]
pub trait EvaluationStore: Send + Sync {
    async fn find(&self, user_id: &str, item_id: &str) -> Result<Option<EvaluationRecord>>;

    /// Insert unless a record for the same (user, item) exists.
    ///
    /// A conflict is reported as `DuplicateSubmission` and writes nothing.
    async fn insert_unique(&self, record: EvaluationRecord) -> Result<()>;

    /// Records sorted by submission time, newest first
    async fn list(
        &self,
        user_id: &str,
        filter: &AttemptFilter,
        skip: u64,
        limit: Option<i64>,
    ) -> Result<Vec<EvaluationRecord>>;

    async fn count(&self, user_id: &str, filter: &AttemptFilter) -> Result<u64>;
}

/// Client-reported context for a submission
#[derive(Debug, Clone, Copy)]
pub struct SubmitMeta {
    pub time_spent: i64,
}

impl Default for SubmitMeta {
    fn default() -> Self {
        Self {
            time_spent: DEFAULT_TIME_SPENT_SECS,
        }
    }
}

/// A graded submission, including what may now be revealed
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationOutcome {
    pub evaluation: EvaluationRecord,
    pub question: String,
    pub options: Vec<String>,
    pub explanation: String,
    /// Evaluation usage including this submission
    pub limits: UsageLimits,
}

impl EvaluationOutcome {
    pub fn verdict(&self) -> &'static str {
        if self.evaluation.is_correct {
            "✅ Correct!"
        } else {
            "❌ Incorrect"
        }
    }
}

pub fn answers_match(user_answer: &str, correct_answer: &str) -> bool {
    user_answer.trim().eq_ignore_ascii_case(correct_answer.trim())
}

pub struct EvaluationEngine {
    plans: PlanResolver,
    quota: Arc<QuotaLedger>,
    vault: Arc<AnswerVault>,
    evaluations: Arc<dyn EvaluationStore>,
    progress: Arc<dyn ProgressStore>,
    usage: UsageLogger,
}

impl EvaluationEngine {
    pub fn new(
        plans: PlanResolver,
        quota: Arc<QuotaLedger>,
        vault: Arc<AnswerVault>,
        evaluations: Arc<dyn EvaluationStore>,
        progress: Arc<dyn ProgressStore>,
    ) -> Self {
        Self {
            plans,
            quota,
            vault,
            evaluations,
            progress,
            usage: UsageLogger::new(),
        }
    }

    pub fn with_usage_logger(mut self, usage: UsageLogger) -> Self {
        self.usage = usage;
        self
    }

    pub async fn submit(
        &self,
        user_id: &str,
        item_id: &str,
        user_answer: &str,
        meta: SubmitMeta,
    ) -> Result<EvaluationOutcome> {
        let item_id = item_id.trim();
        if item_id.is_empty() {
            return Err(ExamdeskError::Validation("Invalid mcqId".into()));
        }
        let user_answer = user_answer.trim();
        if user_answer.is_empty() {
            return Err(ExamdeskError::Validation("Invalid userAnswer".into()));
        }

        let plan = self.plans.active_plan(user_id).await?;

        // Fast path; the unique insert below is what actually closes the race
        if self.evaluations.find(user_id, item_id).await?.is_some() {
            return Err(ExamdeskError::DuplicateSubmission(DUPLICATE_MESSAGE.into()));
        }

        let allowance = self.quota.check_evaluation(user_id, plan).await?;
        let entry = self.vault.lookup(item_id).await?;

        let is_correct = answers_match(user_answer, &entry.item.correct_answer);
        let now = Utc::now();

        let record = EvaluationRecord {
            evaluation_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            item_id: item_id.to_string(),
            level: entry.topic.level.clone(),
            subject: entry.topic.subject.clone(),
            chapter: entry.topic.chapter.clone(),
            unit: entry.topic.unit.clone(),
            question_number: entry.item.question_number,
            user_answer: user_answer.to_uppercase(),
            correct_answer: entry.item.correct_answer.clone(),
            is_correct,
            score: if is_correct { 100 } else { 0 },
            time_spent: meta.time_spent.max(0),
            submitted_at: now,
            ..Default::default()
        };

        self.evaluations.insert_unique(record.clone()).await?;

        // The evaluation is committed; follow-up bookkeeping failures are logged only
        if let Err(e) = self
            .progress
            .record(user_id, &entry.topic, is_correct, now)
            .await
        {
            error!(user_id = %user_id, item_id = %item_id, error = %e, "Failed to update progress");
        }
        if let Err(e) = self.quota.increment_evaluations(user_id, 1).await {
            error!(user_id = %user_id, item_id = %item_id, error = %e, "Failed to count evaluation");
        }

        self.usage
            .log_evaluated(user_id, plan.as_str(), item_id, is_correct)
            .await;

        info!(
            user_id = %user_id,
            item_id = %item_id,
            is_correct = is_correct,
            "Answer evaluated"
        );

        Ok(EvaluationOutcome {
            evaluation: record,
            question: entry.item.question,
            options: entry.item.options,
            explanation: entry.item.explanation,
            limits: allowance.usage_after(1),
        })
    }
}

// =============================================================================
// In-memory implementation
// =============================================================================

#[derive(Default)]
pub struct InMemoryEvaluationStore {
    records: RwLock<HashMap<(String, String), EvaluationRecord>>,
}

impl InMemoryEvaluationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl EvaluationStore for InMemoryEvaluationStore {
    async fn find(&self, user_id: &str, item_id: &str) -> Result<Option<EvaluationRecord>> {
        let key = (user_id.to_string(), item_id.to_string());
        Ok(self.records.read().await.get(&key).cloned())
    }

    async fn insert_unique(&self, record: EvaluationRecord) -> Result<()> {
        let key = (record.user_id.clone(), record.item_id.clone());
        let mut records = self.records.write().await;
        if records.contains_key(&key) {
            return Err(ExamdeskError::DuplicateSubmission(DUPLICATE_MESSAGE.into()));
        }
        records.insert(key, record);
        Ok(())
    }

    async fn list(
        &self,
        user_id: &str,
        filter: &AttemptFilter,
        skip: u64,
        limit: Option<i64>,
    ) -> Result<Vec<EvaluationRecord>> {
        let records = self.records.read().await;
        let mut rows: Vec<EvaluationRecord> = records
            .values()
            .filter(|r| r.user_id == user_id && filter.matches_evaluation(r))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));

        let rows = rows.into_iter().skip(skip as usize);
        Ok(match limit {
            Some(limit) => rows.take(limit.max(0) as usize).collect(),
            None => rows.collect(),
        })
    }

    async fn count(&self, user_id: &str, filter: &AttemptFilter) -> Result<u64> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.user_id == user_id && filter.matches_evaluation(r))
            .count() as u64)
    }
}

// =============================================================================
// MongoDB implementation
// =============================================================================

pub struct MongoEvaluationStore {
    collection: MongoCollection<EvaluationRecord>,
}

impl MongoEvaluationStore {
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: mongo
                .collection::<EvaluationRecord>(EVALUATION_COLLECTION)
                .await?,
        })
    }
}

#[async_trait]
impl EvaluationStore for MongoEvaluationStore {
    async fn find(&self, user_id: &str, item_id: &str) -> Result<Option<EvaluationRecord>> {
        self.collection
            .find_one(doc! { "userId": user_id, "itemId": item_id })
            .await
    }

    async fn insert_unique(&self, record: EvaluationRecord) -> Result<()> {
        match self.collection.insert_one(record).await {
            Err(e) if e.is_duplicate() => {
                Err(ExamdeskError::DuplicateSubmission(DUPLICATE_MESSAGE.into()))
            }
            other => other,
        }
    }

    async fn list(
        &self,
        user_id: &str,
        filter: &AttemptFilter,
        skip: u64,
        limit: Option<i64>,
    ) -> Result<Vec<EvaluationRecord>> {
        self.collection
            .find_many(
                filter.to_document(user_id),
                doc! { "submittedAt": -1 },
                skip,
                limit,
            )
            .await
    }

    async fn count(&self, user_id: &str, filter: &AttemptFilter) -> Result<u64> {
        self.collection.count(filter.to_document(user_id)).await
    }
}
