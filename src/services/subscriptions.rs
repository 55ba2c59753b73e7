//! Active plan resolution from subscription records.

use async_trait::async_trait;
use bson::doc;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::db::schemas::{SubscriptionDoc, SUBSCRIPTION_COLLECTION};
use crate::db::{MongoClient, MongoCollection};
use crate::services::plans::Plan;
use crate::types::Result;

/// Read access to subscription records
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Newest subscription that is active and not yet ended at `now`
    async fn active_subscription(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SubscriptionDoc>>;
}

/// Resolves a user's plan at the moment of each check
#[derive(Clone)]
pub struct PlanResolver {
    store: Arc<dyn SubscriptionStore>,
}

impl PlanResolver {
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self { store }
    }

    pub async fn active_plan(&self, user_id: &str) -> Result<Plan> {
        self.active_plan_at(user_id, Utc::now()).await
    }

    pub async fn active_plan_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<Plan> {
        match self.store.active_subscription(user_id, now).await? {
            Some(sub) => {
                let plan = sub.plan.parse::<Plan>()?;
                debug!(user_id = %user_id, plan = %plan, "Active subscription found");
                Ok(plan)
            }
            None => Ok(Plan::Free),
        }
    }
}

/// Subscriptions held in memory (dev mode and tests)
#[derive(Default)]
pub struct InMemorySubscriptionStore {
    subscriptions: RwLock<Vec<SubscriptionDoc>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, subscription: SubscriptionDoc) {
        self.subscriptions.write().await.push(subscription);
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn active_subscription(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SubscriptionDoc>> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions
            .iter()
            .filter(|s| s.user_id == user_id && s.is_active_at(now))
            .max_by_key(|s| s.created_at)
            .cloned())
    }
}

pub struct MongoSubscriptionStore {
    collection: MongoCollection<SubscriptionDoc>,
}

impl MongoSubscriptionStore {
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: mongo
                .collection::<SubscriptionDoc>(SUBSCRIPTION_COLLECTION)
                .await?,
        })
    }
}

#[async_trait]
impl SubscriptionStore for MongoSubscriptionStore {
    async fn active_subscription(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<SubscriptionDoc>> {
        self.collection
            .find_first(
                doc! {
                    "userId": user_id,
                    "status": "active",
                    "endDate": { "$gt": bson::DateTime::from_chrono(now) },
                },
                Some(doc! { "createdAt": -1 }),
            )
            .await
    }
}
