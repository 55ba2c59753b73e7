//! Progress aggregate per (user, subject, chapter, unit)

use bson::{doc, oid::ObjectId, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{index, unique_index, IntoIndexes};
use crate::db::schemas::Metadata;

/// Collection name for progress aggregates
pub const PROGRESS_COLLECTION: &str = "mcq_progress";

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProgressAggregate {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub user_id: String,
    #[serde(default)]
    pub level: String,
    pub subject: String,
    pub chapter: String,
    #[serde(default)]
    pub unit: String,
    pub total_attempted: i64,
    pub total_correct: i64,
    /// Rounded percentage of correct attempts
    pub avg_score: i64,
    pub last_score: i32,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub first_attempted_at: DateTime<Utc>,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub last_attempted_at: DateTime<Utc>,
}

impl ProgressAggregate {
    /// Fold one accepted evaluation into the aggregate
    pub fn record(&mut self, is_correct: bool, at: DateTime<Utc>) {
        if self.total_attempted == 0 {
            self.first_attempted_at = at;
        }
        self.total_attempted += 1;
        if is_correct {
            self.total_correct += 1;
        }
        self.avg_score = average_score(self.total_correct, self.total_attempted);
        self.last_score = if is_correct { 100 } else { 0 };
        self.last_attempted_at = at;
    }
}

/// `round(correct / attempted * 100)`, with halves rounded up
pub fn average_score(correct: i64, attempted: i64) -> i64 {
    if attempted <= 0 {
        return 0;
    }
    (correct * 200 + attempted) / (attempted * 2)
}

impl IntoIndexes for ProgressAggregate {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            unique_index(
                doc! { "userId": 1, "subject": 1, "chapter": 1, "unit": 1 },
                "user_topic_unique",
            ),
            index(doc! { "userId": 1, "lastAttemptedAt": -1 }, "user_last_attempted_index"),
        ]
    }
}
