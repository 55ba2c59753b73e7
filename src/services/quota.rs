//! Quota ledger
//!
//! Tracks per-user daily and monthly counters for generation and evaluation,
//! rolls them over on wall-clock boundaries and enforces plan ceilings.
//!
//! Checks never consume quota. Callers increment only after the guarded action
//! has succeeded, so a failed generation or evaluation leaves counters untouched.

use async_trait::async_trait;
use bson::doc;
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::db::schemas::{QuotaRecord, QUOTA_COLLECTION};
use crate::db::{MongoClient, MongoCollection};
use crate::logging::UsageLogger;
use crate::services::plans::{Plan, PlanCatalog, PlanLimits};
use crate::types::{ExamdeskError, Result, UsageLimits};

/// Which pair of counters an increment applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageKind {
    Generation,
    Evaluation,
}

/// Persistence for [`QuotaRecord`]s
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Load or lazily create the user's record, reset any window whose reset
    /// instant has passed and overwrite the ceilings with `limits`.
    async fn sync(&self, user_id: &str, limits: &PlanLimits, now: DateTime<Utc>)
        -> Result<QuotaRecord>;

    /// Add `count` to both the daily and monthly counter of `kind`
    async fn increment(&self, user_id: &str, kind: UsageKind, count: i64) -> Result<()>;
}

/// Daily windows are rolling: the next reset is 24 hours after the one observed.
pub fn next_daily_reset(now: DateTime<Utc>) -> DateTime<Utc> {
    now + Duration::hours(24)
}

/// Monthly windows reset at 00:00 UTC on the first day of the next month.
pub fn next_monthly_reset(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(|| now + Duration::days(31))
}

/// A fresh record for a user seen for the first time
pub fn new_record(user_id: &str, limits: &PlanLimits, now: DateTime<Utc>) -> QuotaRecord {
    let mut record = QuotaRecord {
        user_id: user_id.to_string(),
        daily_reset_at: next_daily_reset(now),
        monthly_reset_at: next_monthly_reset(now),
        ..Default::default()
    };
    apply_limits(&mut record, limits);
    record
}

/// Zero the counters of every window whose reset instant is at or before `now`.
pub fn roll_windows(record: &mut QuotaRecord, now: DateTime<Utc>) {
    if now >= record.daily_reset_at {
        record.generated_today = 0;
        record.evaluations_today = 0;
        record.daily_reset_at = next_daily_reset(now);
    }
    if now >= record.monthly_reset_at {
        record.generated_this_month = 0;
        record.evaluations_this_month = 0;
        record.monthly_reset_at = next_monthly_reset(now);
    }
}

pub fn apply_limits(record: &mut QuotaRecord, limits: &PlanLimits) {
    record.daily_limit = limits.daily_limit;
    record.monthly_limit = limits.monthly_limit;
    record.eval_daily_limit = limits.eval_daily_limit;
    record.eval_monthly_limit = limits.eval_monthly_limit;
}

/// Outcome of a successful generation check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    /// How many questions may be generated now, at most the requested count
    pub to_generate: i64,
    pub remaining_daily: i64,
    pub remaining_monthly: i64,
}

impl Reservation {
    pub fn adjusted(&self, requested: i64) -> bool {
        self.to_generate < requested
    }
}

/// Evaluation counters observed by a successful evaluation check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationAllowance {
    pub eval_daily_limit: i64,
    pub evaluations_today: i64,
    pub eval_monthly_limit: i64,
    pub evaluations_this_month: i64,
}

impl EvaluationAllowance {
    /// Usage once `consumed` more evaluations are counted
    pub fn usage_after(&self, consumed: i64) -> UsageLimits {
        QuotaRecord {
            eval_daily_limit: self.eval_daily_limit,
            evaluations_today: self.evaluations_today + consumed,
            eval_monthly_limit: self.eval_monthly_limit,
            evaluations_this_month: self.evaluations_this_month + consumed,
            ..Default::default()
        }
        .evaluation_usage()
    }
}

/// Current usage for both kinds of action
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaSnapshot {
    pub plan: Plan,
    pub generation: UsageLimits,
    pub evaluation: UsageLimits,
    pub daily_reset_at: DateTime<Utc>,
    pub monthly_reset_at: DateTime<Utc>,
}

/// Enforces plan ceilings on top of a [`QuotaStore`]
pub struct QuotaLedger {
    store: Arc<dyn QuotaStore>,
    plans: PlanCatalog,
    usage: UsageLogger,
}

impl QuotaLedger {
    pub fn new(store: Arc<dyn QuotaStore>, plans: PlanCatalog) -> Self {
        Self {
            store,
            plans,
            usage: UsageLogger::new(),
        }
    }

    pub fn with_usage_logger(mut self, usage: UsageLogger) -> Self {
        self.usage = usage;
        self
    }

    pub fn plans(&self) -> &PlanCatalog {
        &self.plans
    }

    pub async fn check_and_reserve_generation(
        &self,
        user_id: &str,
        plan: Plan,
        requested: i64,
    ) -> Result<Reservation> {
        self.check_and_reserve_generation_at(user_id, plan, requested, Utc::now())
            .await
    }

    /// Shrink `requested` to what the windows still allow.
    ///
    /// Fails with `LimitExceeded` only when a window has nothing left.
    pub async fn check_and_reserve_generation_at(
        &self,
        user_id: &str,
        plan: Plan,
        requested: i64,
        now: DateTime<Utc>,
    ) -> Result<Reservation> {
        if requested < 1 {
            return Err(ExamdeskError::Validation(
                "numQuestions must be between 1 and 100".into(),
            ));
        }

        let record = self
            .store
            .sync(user_id, &self.plans.limits(plan), now)
            .await?;
        let usage = record.generation_usage();

        if usage.daily.remaining <= 0 {
            return Err(self
                .reject(user_id, plan, "Daily generation limit reached", usage)
                .await);
        }
        if usage.monthly.remaining <= 0 {
            return Err(self
                .reject(user_id, plan, "Monthly generation limit reached", usage)
                .await);
        }

        let to_generate = requested
            .min(usage.daily.remaining)
            .min(usage.monthly.remaining);

        debug!(
            user_id = %user_id,
            requested = requested,
            to_generate = to_generate,
            "Generation quota reserved"
        );

        Ok(Reservation {
            to_generate,
            remaining_daily: usage.daily.remaining,
            remaining_monthly: usage.monthly.remaining,
        })
    }

    pub async fn check_evaluation(&self, user_id: &str, plan: Plan) -> Result<EvaluationAllowance> {
        self.check_evaluation_at(user_id, plan, Utc::now()).await
    }

    pub async fn check_evaluation_at(
        &self,
        user_id: &str,
        plan: Plan,
        now: DateTime<Utc>,
    ) -> Result<EvaluationAllowance> {
        let record = self
            .store
            .sync(user_id, &self.plans.limits(plan), now)
            .await?;
        let usage = record.evaluation_usage();

        if usage.daily.remaining <= 0 {
            return Err(self
                .reject(user_id, plan, "Daily evaluation limit reached", usage)
                .await);
        }
        if usage.monthly.remaining <= 0 {
            return Err(self
                .reject(user_id, plan, "Monthly evaluation limit reached", usage)
                .await);
        }

        Ok(EvaluationAllowance {
            eval_daily_limit: record.eval_daily_limit,
            evaluations_today: record.evaluations_today,
            eval_monthly_limit: record.eval_monthly_limit,
            evaluations_this_month: record.evaluations_this_month,
        })
    }

    pub async fn increment_generated(&self, user_id: &str, count: i64) -> Result<()> {
        if count <= 0 {
            return Ok(());
        }
        self.store
            .increment(user_id, UsageKind::Generation, count)
            .await
    }

    pub async fn increment_evaluations(&self, user_id: &str, count: i64) -> Result<()> {
        if count <= 0 {
            return Ok(());
        }
        self.store
            .increment(user_id, UsageKind::Evaluation, count)
            .await
    }

    pub async fn snapshot(&self, user_id: &str, plan: Plan) -> Result<QuotaSnapshot> {
        self.snapshot_at(user_id, plan, Utc::now()).await
    }

    pub async fn snapshot_at(
        &self,
        user_id: &str,
        plan: Plan,
        now: DateTime<Utc>,
    ) -> Result<QuotaSnapshot> {
        let record = self
            .store
            .sync(user_id, &self.plans.limits(plan), now)
            .await?;
        Ok(QuotaSnapshot {
            plan,
            generation: record.generation_usage(),
            evaluation: record.evaluation_usage(),
            daily_reset_at: record.daily_reset_at,
            monthly_reset_at: record.monthly_reset_at,
        })
    }

    async fn reject(
        &self,
        user_id: &str,
        plan: Plan,
        message: &str,
        usage: UsageLimits,
    ) -> ExamdeskError {
        warn!(user_id = %user_id, plan = %plan, "{}", message);
        self.usage
            .log_limit_reached(user_id, plan.as_str(), message)
            .await;
        ExamdeskError::limit_exceeded(message, usage)
    }
}

// =============================================================================
// In-memory implementation
// =============================================================================

/// Quota store held in process memory (dev mode and tests)
#[derive(Default)]
pub struct InMemoryQuotaStore {
    records: RwLock<HashMap<String, QuotaRecord>>,
}

impl InMemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, user_id: &str) -> Option<QuotaRecord> {
        self.records.read().await.get(user_id).cloned()
    }
}

#[async_trait]
impl QuotaStore for InMemoryQuotaStore {
    async fn sync(
        &self,
        user_id: &str,
        limits: &PlanLimits,
        now: DateTime<Utc>,
    ) -> Result<QuotaRecord> {
        let mut records = self.records.write().await;
        let record = records
            .entry(user_id.to_string())
            .or_insert_with(|| new_record(user_id, limits, now));
        roll_windows(record, now);
        apply_limits(record, limits);
        Ok(record.clone())
    }

    async fn increment(&self, user_id: &str, kind: UsageKind, count: i64) -> Result<()> {
        let mut records = self.records.write().await;
        match records.get_mut(user_id) {
            Some(record) => {
                match kind {
                    UsageKind::Generation => {
                        record.generated_today += count;
                        record.generated_this_month += count;
                    }
                    UsageKind::Evaluation => {
                        record.evaluations_today += count;
                        record.evaluations_this_month += count;
                    }
                }
                Ok(())
            }
            None => {
                warn!(user_id = %user_id, "Increment for user without quota record");
                Ok(())
            }
        }
    }
}

// =============================================================================
// MongoDB implementation
// =============================================================================

/// MongoDB-backed quota store.
///
/// Window resets are conditional updates (`resetAt <= now`), so concurrent
/// checks that observe the same boundary reset the counters once.
pub struct MongoQuotaStore {
    collection: MongoCollection<QuotaRecord>,
}

impl MongoQuotaStore {
    pub async fn new(mongo: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: mongo.collection::<QuotaRecord>(QUOTA_COLLECTION).await?,
        })
    }
}

#[async_trait]
impl QuotaStore for MongoQuotaStore {
    async fn sync(
        &self,
        user_id: &str,
        limits: &PlanLimits,
        now: DateTime<Utc>,
    ) -> Result<QuotaRecord> {
        let now_bson = bson::DateTime::from_chrono(now);
        let next_day = bson::DateTime::from_chrono(next_daily_reset(now));
        let next_month = bson::DateTime::from_chrono(next_monthly_reset(now));

        let created = self
            .collection
            .upsert_one(
                doc! { "userId": user_id },
                doc! {
                    "$setOnInsert": {
                        "dailyResetAt": next_day,
                        "monthlyResetAt": next_month,
                        "generatedToday": 0_i64,
                        "evaluationsToday": 0_i64,
                        "generatedThisMonth": 0_i64,
                        "evaluationsThisMonth": 0_i64,
                        "metadata": { "createdAt": now_bson },
                    }
                },
            )
            .await;
        match created {
            // A concurrent first check inserted the record
            Ok(_) | Err(ExamdeskError::DuplicateSubmission(_)) => {}
            Err(e) => return Err(e),
        }

        self.collection
            .update_one(
                doc! { "userId": user_id, "dailyResetAt": { "$lte": now_bson } },
                doc! {
                    "$set": {
                        "generatedToday": 0_i64,
                        "evaluationsToday": 0_i64,
                        "dailyResetAt": next_day,
                    }
                },
            )
            .await?;

        self.collection
            .update_one(
                doc! { "userId": user_id, "monthlyResetAt": { "$lte": now_bson } },
                doc! {
                    "$set": {
                        "generatedThisMonth": 0_i64,
                        "evaluationsThisMonth": 0_i64,
                        "monthlyResetAt": next_month,
                    }
                },
            )
            .await?;

        self.collection
            .find_one_and_update(
                doc! { "userId": user_id },
                doc! {
                    "$set": {
                        "dailyLimit": limits.daily_limit,
                        "monthlyLimit": limits.monthly_limit,
                        "evalDailyLimit": limits.eval_daily_limit,
                        "evalMonthlyLimit": limits.eval_monthly_limit,
                        "metadata.updatedAt": now_bson,
                    }
                },
            )
            .await?
            .ok_or_else(|| ExamdeskError::Database(format!("Quota record missing for {}", user_id)))
    }

    async fn increment(&self, user_id: &str, kind: UsageKind, count: i64) -> Result<()> {
        let inc = match kind {
            UsageKind::Generation => doc! {
                "generatedToday": count,
                "generatedThisMonth": count,
            },
            UsageKind::Evaluation => doc! {
                "evaluationsToday": count,
                "evaluationsThisMonth": count,
            },
        };

        let result = self
            .collection
            .update_one(
                doc! { "userId": user_id },
                doc! {
                    "$inc": inc,
                    "$set": { "metadata.updatedAt": bson::DateTime::now() },
                },
            )
            .await?;

        if result.matched_count == 0 {
            warn!(user_id = %user_id, "Increment for user without quota record");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn small_plans(daily: i64, monthly: i64) -> PlanCatalog {
        let free = PlanLimits {
            daily_limit: daily,
            monthly_limit: monthly,
            eval_daily_limit: 2,
            eval_monthly_limit: 3,
        };
        let pro = PlanLimits {
            daily_limit: 50,
            monthly_limit: 1000,
            eval_daily_limit: 100,
            eval_monthly_limit: 2000,
        };
        PlanCatalog::new(free, pro)
    }

    fn ledger(plans: PlanCatalog) -> (QuotaLedger, Arc<InMemoryQuotaStore>) {
        let store = Arc::new(InMemoryQuotaStore::new());
        (QuotaLedger::new(store.clone(), plans), store)
    }

    #[test]
    fn test_next_monthly_reset() {
        assert_eq!(next_monthly_reset(at(2026, 3, 15, 10)), at(2026, 4, 1, 0));
        assert_eq!(next_monthly_reset(at(2026, 12, 31, 23)), at(2027, 1, 1, 0));
        assert_eq!(next_monthly_reset(at(2026, 1, 1, 0)), at(2026, 2, 1, 0));
    }

    #[test]
    fn test_roll_windows_independently() {
        let created = at(2026, 3, 30, 12);
        let mut record = new_record("u", &PlanCatalog::default().limits(Plan::Free), created);
        record.generated_today = 4;
        record.generated_this_month = 40;

        // Just before the daily boundary nothing changes
        roll_windows(&mut record, at(2026, 3, 31, 11));
        assert_eq!(record.generated_today, 4);

        // Daily boundary crossed, monthly not yet
        roll_windows(&mut record, at(2026, 3, 31, 12));
        assert_eq!(record.generated_today, 0);
        assert_eq!(record.generated_this_month, 40);
        assert_eq!(record.daily_reset_at, at(2026, 4, 1, 12));

        // Monthly boundary crossed before the next daily one
        record.generated_today = 2;
        roll_windows(&mut record, at(2026, 4, 1, 0));
        assert_eq!(record.generated_today, 2);
        assert_eq!(record.generated_this_month, 0);
        assert_eq!(record.monthly_reset_at, at(2026, 5, 1, 0));
    }

    #[tokio::test]
    async fn test_one_item_generations_saturate_daily_limit() {
        let (ledger, store) = ledger(small_plans(5, 100));
        let now = at(2026, 5, 10, 9);

        for _ in 0..8 {
            if let Ok(reservation) = ledger
                .check_and_reserve_generation_at("u1", Plan::Free, 1, now)
                .await
            {
                ledger
                    .increment_generated("u1", reservation.to_generate)
                    .await
                    .unwrap();
            }
        }

        let record = store.record("u1").await.unwrap();
        assert_eq!(record.generated_today, 5);

        let err = ledger
            .check_and_reserve_generation_at("u1", Plan::Free, 1, now)
            .await
            .unwrap_err();
        assert!(matches!(err, ExamdeskError::LimitExceeded { .. }));
        assert_eq!(err.to_string(), "Daily generation limit reached");
    }

    #[tokio::test]
    async fn test_request_auto_adjusted_to_remaining() {
        let (ledger, store) = ledger(small_plans(5, 100));
        let now = at(2026, 5, 10, 9);

        let reservation = ledger
            .check_and_reserve_generation_at("u1", Plan::Free, 10, now)
            .await
            .unwrap();
        assert_eq!(reservation.to_generate, 5);
        assert!(reservation.adjusted(10));

        // Checking does not consume anything
        assert_eq!(store.record("u1").await.unwrap().generated_today, 0);

        ledger.increment_generated("u1", 5).await.unwrap();
        let err = ledger
            .check_and_reserve_generation_at("u1", Plan::Free, 1, now)
            .await
            .unwrap_err();
        let limits = err.limits().copied().unwrap();
        assert_eq!(limits.daily.used, 5);
        assert_eq!(limits.daily.remaining, 0);
        assert_eq!(limits.monthly.remaining, 95);
    }

    #[tokio::test]
    async fn test_monthly_limit_binds_before_daily() {
        let (ledger, _) = ledger(small_plans(5, 7));
        let day1 = at(2026, 5, 10, 9);
        let day2 = day1 + Duration::hours(25);

        ledger
            .check_and_reserve_generation_at("u1", Plan::Free, 5, day1)
            .await
            .unwrap();
        ledger.increment_generated("u1", 5).await.unwrap();

        let reservation = ledger
            .check_and_reserve_generation_at("u1", Plan::Free, 5, day2)
            .await
            .unwrap();
        assert_eq!(reservation.to_generate, 2);
        ledger.increment_generated("u1", 2).await.unwrap();

        let err = ledger
            .check_and_reserve_generation_at("u1", Plan::Free, 1, day2)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Monthly generation limit reached");
    }

    #[tokio::test]
    async fn test_daily_reset_at_boundary() {
        let (ledger, store) = ledger(small_plans(5, 100));
        let start = at(2026, 5, 10, 9);

        ledger
            .check_and_reserve_generation_at("u1", Plan::Free, 5, start)
            .await
            .unwrap();
        ledger.increment_generated("u1", 5).await.unwrap();

        let boundary = store.record("u1").await.unwrap().daily_reset_at;
        assert!(ledger
            .check_and_reserve_generation_at("u1", Plan::Free, 1, boundary - Duration::seconds(1))
            .await
            .is_err());

        let reservation = ledger
            .check_and_reserve_generation_at("u1", Plan::Free, 1, boundary)
            .await
            .unwrap();
        assert_eq!(reservation.to_generate, 1);
        assert_eq!(store.record("u1").await.unwrap().generated_today, 0);
        assert_eq!(store.record("u1").await.unwrap().generated_this_month, 5);
    }

    #[tokio::test]
    async fn test_upgrade_refreshes_ceilings_without_forgiving_usage() {
        let (ledger, store) = ledger(small_plans(5, 100));
        let now = at(2026, 5, 10, 9);

        ledger
            .check_and_reserve_generation_at("u1", Plan::Free, 5, now)
            .await
            .unwrap();
        ledger.increment_generated("u1", 5).await.unwrap();

        let reservation = ledger
            .check_and_reserve_generation_at("u1", Plan::Pro, 10, now)
            .await
            .unwrap();
        assert_eq!(reservation.to_generate, 10);
        assert_eq!(reservation.remaining_daily, 45);

        let record = store.record("u1").await.unwrap();
        assert_eq!(record.daily_limit, 50);
        assert_eq!(record.generated_today, 5);
    }

    #[tokio::test]
    async fn test_evaluation_gate() {
        let (ledger, _) = ledger(small_plans(5, 100));
        let now = at(2026, 5, 10, 9);

        let allowance = ledger.check_evaluation_at("u1", Plan::Free, now).await.unwrap();
        assert_eq!(allowance.eval_daily_limit, 2);
        assert_eq!(allowance.evaluations_today, 0);
        let after = allowance.usage_after(1);
        assert_eq!(after.daily.used, 1);
        assert_eq!(after.daily.remaining, 1);

        ledger.increment_evaluations("u1", 2).await.unwrap();
        let err = ledger
            .check_evaluation_at("u1", Plan::Free, now)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Daily evaluation limit reached");
        let limits = err.limits().copied().unwrap();
        assert_eq!(limits.daily.limit, 2);
        assert_eq!(limits.monthly.used, 2);
        assert_eq!(limits.monthly.remaining, 1);
    }

    #[tokio::test]
    async fn test_snapshot_creates_record_lazily() {
        let (ledger, store) = ledger(PlanCatalog::default());
        let now = at(2026, 5, 10, 9);
        assert!(store.record("fresh").await.is_none());

        let snapshot = ledger.snapshot_at("fresh", Plan::Free, now).await.unwrap();
        assert_eq!(snapshot.generation.daily.limit, 5);
        assert_eq!(snapshot.evaluation.monthly.remaining, 200);
        assert_eq!(snapshot.monthly_reset_at, at(2026, 6, 1, 0));
        assert!(store.record("fresh").await.is_some());
    }

    #[tokio::test]
    async fn test_rejects_non_positive_request() {
        let (ledger, _) = ledger(PlanCatalog::default());
        let err = ledger
            .check_and_reserve_generation("u1", Plan::Free, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, ExamdeskError::Validation(_)));
    }
}
