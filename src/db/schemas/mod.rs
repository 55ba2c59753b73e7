//! Database schemas for examdesk
//!
//! Document structures for quota usage, generated question sets, evaluations,
//! progress aggregates, subscriptions and chat users.

mod evaluation;
mod generation;
mod metadata;
mod progress;
mod quota;
mod subscription;
mod user;

pub use evaluation::{EvaluationRecord, EVALUATION_COLLECTION};
pub use generation::{GeneratedItem, GeneratedSet, GENERATION_COLLECTION};
pub use metadata::Metadata;
pub use progress::{average_score, ProgressAggregate, PROGRESS_COLLECTION};
pub use quota::{QuotaRecord, QUOTA_COLLECTION};
pub use subscription::{SubscriptionDoc, SUBSCRIPTION_COLLECTION};
pub use user::{UserDoc, USER_COLLECTION};

use crate::db::mongo::MutMetadata;

macro_rules! embeds_metadata {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl MutMetadata for $ty {
                fn mut_metadata(&mut self) -> &mut Metadata {
                    &mut self.metadata
                }
            }
        )+
    };
}

embeds_metadata!(
    EvaluationRecord,
    GeneratedSet,
    ProgressAggregate,
    QuotaRecord,
    SubscriptionDoc,
    UserDoc,
);
