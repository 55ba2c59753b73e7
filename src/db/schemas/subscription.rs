//! Subscription document, written by the payment flow

use bson::{doc, oid::ObjectId, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{index, IntoIndexes};
use crate::db::schemas::Metadata;

/// Collection name for subscriptions
pub const SUBSCRIPTION_COLLECTION: &str = "subscriptions";

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionDoc {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub user_id: String,
    /// Plan identifier ("free" or "pro")
    pub plan: String,
    /// "active", "expired", "cancelled", ...
    pub status: String,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub end_date: DateTime<Utc>,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub created_at: DateTime<Utc>,
}

impl SubscriptionDoc {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == "active" && self.end_date > now
    }
}

impl IntoIndexes for SubscriptionDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![index(doc! { "userId": 1, "status": 1, "endDate": 1 }, "user_status_end_index")]
    }
}
