//! Evaluation document: one accepted answer per user per question

use bson::{doc, oid::ObjectId, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{index, unique_index, IntoIndexes};
use crate::db::schemas::Metadata;

/// Collection name for evaluations
pub const EVALUATION_COLLECTION: &str = "mcq_evaluations";

/// Immutable record of a graded submission
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub evaluation_id: String,
    pub user_id: String,
    pub item_id: String,
    #[serde(default)]
    pub level: String,
    pub subject: String,
    pub chapter: String,
    #[serde(default)]
    pub unit: String,
    pub question_number: i32,
    pub user_answer: String,
    pub correct_answer: String,
    pub is_correct: bool,
    /// 100 when correct, 0 otherwise
    pub score: i32,
    /// Seconds the user spent on the question
    pub time_spent: i64,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub submitted_at: DateTime<Utc>,
}

impl IntoIndexes for EvaluationRecord {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // At most one evaluation per user per question
            unique_index(doc! { "userId": 1, "itemId": 1 }, "user_item_unique"),
            unique_index(doc! { "evaluationId": 1 }, "evaluation_id_unique"),
            index(doc! { "userId": 1, "submittedAt": -1 }, "user_submitted_at_index"),
        ]
    }
}
