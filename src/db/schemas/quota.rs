//! Per-user quota usage document

use bson::{doc, oid::ObjectId, Document};
use chrono::{DateTime, Utc};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{unique_index, IntoIndexes};
use crate::db::schemas::Metadata;
use crate::types::{UsageLimits, WindowUsage};

/// Collection name for quota usage
pub const QUOTA_COLLECTION: &str = "mcq_limit_usage";

/// Daily and monthly counters for one user, with the ceilings in force at the
/// last access.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuotaRecord {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub user_id: String,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub daily_reset_at: DateTime<Utc>,

    #[serde(with = "bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub monthly_reset_at: DateTime<Utc>,

    #[serde(default)]
    pub generated_today: i64,
    #[serde(default)]
    pub evaluations_today: i64,
    #[serde(default)]
    pub generated_this_month: i64,
    #[serde(default)]
    pub evaluations_this_month: i64,

    #[serde(default)]
    pub daily_limit: i64,
    #[serde(default)]
    pub monthly_limit: i64,
    #[serde(default)]
    pub eval_daily_limit: i64,
    #[serde(default)]
    pub eval_monthly_limit: i64,
}

impl QuotaRecord {
    pub fn generation_usage(&self) -> UsageLimits {
        UsageLimits {
            daily: WindowUsage::new(self.daily_limit, self.generated_today),
            monthly: WindowUsage::new(self.monthly_limit, self.generated_this_month),
        }
    }

    pub fn evaluation_usage(&self) -> UsageLimits {
        UsageLimits {
            daily: WindowUsage::new(self.eval_daily_limit, self.evaluations_today),
            monthly: WindowUsage::new(self.eval_monthly_limit, self.evaluations_this_month),
        }
    }
}

impl IntoIndexes for QuotaRecord {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![unique_index(doc! { "userId": 1 }, "user_id_unique")]
    }
}
