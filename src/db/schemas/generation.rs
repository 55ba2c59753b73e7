//! Generated question set document
//!
//! The answer key lives only here; public views are built in the vault.

use bson::{doc, oid::ObjectId, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{index, unique_index, IntoIndexes};
use crate::db::schemas::Metadata;

/// Collection name for generated question sets
pub const GENERATION_COLLECTION: &str = "mcq_generations";

/// A single generated multiple-choice question
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedItem {
    /// Opaque id, unique across every set
    pub item_id: String,
    pub question_number: i32,
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub difficulty: String,
}

/// One generation call's worth of questions
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedSet {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub set_id: String,
    pub user_id: String,
    pub level: String,
    pub subject: String,
    pub chapter: String,
    /// Empty when the unit step was skipped
    #[serde(default)]
    pub unit: String,
    pub difficulty: String,
    pub items: Vec<GeneratedItem>,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub generated_at: DateTime<Utc>,
}

impl GeneratedSet {
    pub fn item(&self, item_id: &str) -> Option<&GeneratedItem> {
        self.items.iter().find(|item| item.item_id == item_id)
    }
}

impl IntoIndexes for GeneratedSet {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Evaluation resolves questions by item id alone
            unique_index(doc! { "items.itemId": 1 }, "item_id_unique"),
            unique_index(doc! { "setId": 1 }, "set_id_unique"),
            index(doc! { "userId": 1, "generatedAt": -1 }, "user_generated_at_index"),
        ]
    }
}
