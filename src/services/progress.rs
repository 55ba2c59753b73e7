//! Per-topic progress aggregates and the filters shared by report queries.

use async_trait::async_trait;
use bson::{doc, Document};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::db::schemas::{EvaluationRecord, ProgressAggregate, PROGRESS_COLLECTION};
use crate::db::{MongoClient, MongoCollection};
use crate::services::vault::Topic;
use crate::types::Result;

/// Optional subject/chapter/unit restriction for report queries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptFilter {
    pub subject: Option<String>,
    pub chapter: Option<String>,
    pub unit: Option<String>,
}

impl AttemptFilter {
    pub fn is_empty(&self) -> bool {
        self.subject.is_none() && self.chapter.is_none() && self.unit.is_none()
    }

    /// Mongo filter for `user_id` narrowed by the set fields
    pub fn to_document(&self, user_id: &str) -> Document {
        let mut filter = doc! { "userId": user_id };
        if let Some(subject) = &self.subject {
            filter.insert("subject", subject.as_str());
        }
        if let Some(chapter) = &self.chapter {
            filter.insert("chapter", chapter.as_str());
        }
        if let Some(unit) = &self.unit {
            filter.insert("unit", unit.as_str());
        }
        filter
    }

    fn accepts(&self, subject: &str, chapter: &str, unit: &str) -> bool {
        self.subject.as_deref().map_or(true, |s| s == subject)
            && self.chapter.as_deref().map_or(true, |c| c == chapter)
            && self.unit.as_deref().map_or(true, |u| u == unit)
    }

    pub fn matches_evaluation(&self, record: &EvaluationRecord) -> bool {
        self.accepts(&record.subject, &record.chapter, &record.unit)
    }

    pub fn matches_progress(&self, progress: &ProgressAggregate) -> bool {
        self.accepts(&progress.subject, &progress.chapter, &progress.unit)
    }
}

#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Fold one accepted evaluation into the (user, subject, chapter, unit)
    /// aggregate, creating it on first attempt.
    async fn record(
        &self,
        user_id: &str,
        topic: &Topic,
        is_correct: bool,
        at: DateTime<Utc>,
    ) -> Result<()>;

    /// Aggregates sorted by last attempt, newest first
    async fn list(
        &self,
        user_id: &str,
        filter: &AttemptFilter,
        skip: u64,
        limit: Option<i64>,
    ) -> Result<Vec<ProgressAggregate>>;

    async fn count(&self, user_id: &str, filter: &AttemptFilter) -> Result<u64>;
}

type TopicKey = (String, String, String, String);

#[derive(Default)]
pub struct InMemoryProgressStore {
    aggregates: RwLock<HashMap<TopicKey, ProgressAggregate>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn filtered(
        aggregates: &HashMap<TopicKey, ProgressAggregate>,
        user_id: &str,
        filter: &AttemptFilter,
    ) -> Vec<ProgressAggregate> {
        let mut rows: Vec<ProgressAggregate> = aggregates
            .values()
            .filter(|p| p.user_id == user_id && filter.matches_progress(p))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.last_attempted_at.cmp(&a.last_attempted_at));
        rows
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn record(
        &self,
        user_id: &str,
        topic: &Topic,
        is_correct: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let key = (
            user_id.to_string(),
            topic.subject.clone(),
            topic.chapter.clone(),
            topic.unit.clone(),
        );
        let mut aggregates = self.aggregates.write().await;
        let progress = aggregates.entry(key).or_insert_with(|| ProgressAggregate {
            user_id: user_id.to_string(),
            level: topic.level.clone(),
            subject: topic.subject.clone(),
            chapter: topic.chapter.clone(),
            unit: topic.unit.clone(),
            ..Default::default()
        });
        progress.record(is_correct, at);
        Ok(())
    }

    async fn list(
        &self,
        user_id: &str,
        filter: &AttemptFilter,
        skip: u64,
        limit: Option<i64>,
    ) -> Result<Vec<ProgressAggregate>> {
        let aggregates = self.aggregates.read().await;
        let rows = Self::filtered(&aggregates, user_id, filter)
            .into_iter()
            .skip(skip as usize);
        Ok(match limit {
            Some(limit) => rows.take(limit.max(0) as usize).collect(),
            None => rows.collect(),
        })
    }

    async fn count(&self, user_id: &str, filter: &AttemptFilter) -> Result<u64> {
        let aggregates = self.aggregates.read().await;
        Ok(Self::filtered(&aggregates, user_id, filter).len() as u64)
    }
}

/// MongoDB progress store.
///
/// `record` is a single pipeline upsert, so concurrent evaluations on the same
/// topic never lose an increment.
pub struct MongoProgressStore {
    collection: MongoCollection<ProgressAggregate>,
}

impl MongoProgressStore {
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: mongo
                .collection::<ProgressAggregate>(PROGRESS_COLLECTION)
                .await?,
        })
    }
}

#[async_trait]
impl ProgressStore for MongoProgressStore {
    async fn record(
        &self,
        user_id: &str,
        topic: &Topic,
        is_correct: bool,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let at = bson::DateTime::from_chrono(at);
        let correct: i64 = if is_correct { 1 } else { 0 };
        let score: i32 = if is_correct { 100 } else { 0 };

        let pipeline = vec![
            doc! {
                "$set": {
                    "level": { "$ifNull": ["$level", topic.level.as_str()] },
                    "totalAttempted": { "$add": [{ "$ifNull": ["$totalAttempted", 0_i64] }, 1_i64] },
                    "totalCorrect": { "$add": [{ "$ifNull": ["$totalCorrect", 0_i64] }, correct] },
                    "firstAttemptedAt": { "$ifNull": ["$firstAttemptedAt", at] },
                    "lastAttemptedAt": at,
                    "lastScore": score,
                    "metadata.createdAt": { "$ifNull": ["$metadata.createdAt", at] },
                    "metadata.updatedAt": at,
                }
            },
            // Halves round up, matching average_score
            doc! {
                "$set": {
                    "avgScore": {
                        "$toLong": {
                            "$floor": {
                                "$add": [
                                    { "$multiply": [{ "$divide": ["$totalCorrect", "$totalAttempted"] }, 100] },
                                    0.5
                                ]
                            }
                        }
                    }
                }
            },
        ];

        self.collection
            .upsert_one(
                doc! {
                    "userId": user_id,
                    "subject": topic.subject.as_str(),
                    "chapter": topic.chapter.as_str(),
                    "unit": topic.unit.as_str(),
                },
                pipeline,
            )
            .await?;
        Ok(())
    }

    async fn list(
        &self,
        user_id: &str,
        filter: &AttemptFilter,
        skip: u64,
        limit: Option<i64>,
    ) -> Result<Vec<ProgressAggregate>> {
        self.collection
            .find_many(
                filter.to_document(user_id),
                doc! { "lastAttemptedAt": -1 },
                skip,
                limit,
            )
            .await
    }

    async fn count(&self, user_id: &str, filter: &AttemptFilter) -> Result<u64> {
        self.collection.count(filter.to_document(user_id)).await
    }
}
