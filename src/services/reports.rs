//! Read-only reports over evaluations, progress and quota.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::db::schemas::{average_score, EvaluationRecord, ProgressAggregate};
use crate::services::evaluation::EvaluationStore;
use crate::services::progress::{AttemptFilter, ProgressStore};
use crate::services::quota::QuotaLedger;
use crate::services::subscriptions::PlanResolver;
use crate::services::vault::{AnswerVault, VaultEntry};
use crate::services::plans::Plan;
use crate::types::{ExamdeskError, Result, UsageLimits};

pub const DEFAULT_PAGE_LIMIT: i64 = 10;
pub const MAX_PAGE_LIMIT: i64 = 100;
pub const DEFAULT_RECENT: i64 = 5;
pub const MAX_RECENT: i64 = 50;

/// A validated page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: i64,
    pub page: i64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            page: 1,
        }
    }
}

impl Pagination {
    /// Parse optional `limit` and `page` query values
    pub fn from_query(limit: Option<&str>, page: Option<&str>) -> Result<Self> {
        let limit = match limit {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|l| (1..=MAX_PAGE_LIMIT).contains(l))
                .ok_or_else(|| ExamdeskError::Validation("Limit must be 1-100".into()))?,
            None => DEFAULT_PAGE_LIMIT,
        };
        let page = match page {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|p| *p >= 1)
                .ok_or_else(|| ExamdeskError::Validation("Page must be >= 1".into()))?,
            None => 1,
        };
        if (page - 1).checked_mul(limit).is_none() {
            return Err(ExamdeskError::Validation("Page is out of range".into()));
        }
        Ok(Self { limit, page })
    }

    pub fn skip(&self) -> u64 {
        (self.page - 1).saturating_mul(self.limit) as u64
    }

    pub fn pages(&self, total: u64) -> u64 {
        let limit = self.limit as u64;
        total.div_ceil(limit)
    }
}

/// Parse the optional count for recent attempts
pub fn parse_recent_count(raw: Option<&str>) -> Result<i64> {
    match raw {
        Some(raw) => raw
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|n| (1..=MAX_RECENT).contains(n))
            .ok_or_else(|| ExamdeskError::Validation("Count must be 1-50".into())),
        None => Ok(DEFAULT_RECENT),
    }
}

fn display_unit(unit: &str) -> String {
    if unit.is_empty() {
        "N/A".to_string()
    } else {
        unit.to_string()
    }
}

fn percentage(correct: i64, attempted: i64) -> f64 {
    if attempted <= 0 {
        return 0.0;
    }
    (correct as f64 / attempted as f64 * 10_000.0).round() / 100.0
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardUser {
    pub user_id: String,
    pub subscription: Plan,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_evaluations: i64,
    pub correct_answers: i64,
    pub average_score: i64,
    pub accuracy_percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardLimits {
    pub generation: UsageLimits,
    pub evaluation: UsageLimits,
    pub daily_reset_at: DateTime<Utc>,
    pub monthly_reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicProgress {
    pub level: String,
    pub subject: String,
    pub chapter: String,
    pub unit: String,
    pub total_attempted: i64,
    pub total_correct: i64,
    pub avg_score: i64,
    pub success_rate: f64,
    pub last_score: i32,
    pub first_attempted: DateTime<Utc>,
    pub last_attempted: DateTime<Utc>,
}

impl From<ProgressAggregate> for TopicProgress {
    fn from(p: ProgressAggregate) -> Self {
        Self {
            success_rate: percentage(p.total_correct, p.total_attempted),
            unit: display_unit(&p.unit),
            level: p.level,
            subject: p.subject,
            chapter: p.chapter,
            total_attempted: p.total_attempted,
            total_correct: p.total_correct,
            avg_score: p.avg_score,
            last_score: p.last_score,
            first_attempted: p.first_attempted_at,
            last_attempted: p.last_attempted_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub user: DashboardUser,
    pub stats: DashboardStats,
    pub limits: DashboardLimits,
    pub progress: Vec<TopicProgress>,
}

/// One page of rows plus paging totals
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub total: u64,
    pub page: i64,
    pub limit: i64,
    pub pages: u64,
    pub data: Vec<T>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRow {
    #[serde(rename = "mcqId")]
    pub item_id: String,
    pub subject: String,
    pub chapter: String,
    pub unit: String,
    pub user_answer: String,
    pub correct_answer: String,
    pub is_correct: bool,
    pub score: i32,
    pub time_spent: i64,
    pub submitted_at: DateTime<Utc>,
}

impl From<EvaluationRecord> for ResultRow {
    fn from(r: EvaluationRecord) -> Self {
        Self {
            unit: display_unit(&r.unit),
            item_id: r.item_id,
            subject: r.subject,
            chapter: r.chapter,
            user_answer: r.user_answer,
            correct_answer: r.correct_answer,
            is_correct: r.is_correct,
            score: r.score,
            time_spent: r.time_spent,
            submitted_at: r.submitted_at,
        }
    }
}

/// An answered question with the content it was answered against
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptView {
    #[serde(flatten)]
    pub result: ResultRow,
    pub level: String,
    pub question_number: i32,
    pub question: String,
    pub options: Vec<String>,
    pub difficulty: String,
    pub explanation: String,
}

impl AttemptView {
    fn join(record: EvaluationRecord, entry: Option<&VaultEntry>) -> Self {
        let level = record.level.clone();
        let question_number = record.question_number;
        let (question, options, difficulty, explanation) = match entry {
            Some(entry) => (
                entry.item.question.clone(),
                entry.item.options.clone(),
                entry.item.difficulty.clone(),
                entry.item.explanation.clone(),
            ),
            None => Default::default(),
        };
        Self {
            result: ResultRow::from(record),
            level,
            question_number,
            question,
            options,
            difficulty,
            explanation,
        }
    }
}

pub struct ReportService {
    plans: PlanResolver,
    quota: Arc<QuotaLedger>,
    evaluations: Arc<dyn EvaluationStore>,
    progress: Arc<dyn ProgressStore>,
    vault: Arc<AnswerVault>,
}

impl ReportService {
    pub fn new(
        plans: PlanResolver,
        quota: Arc<QuotaLedger>,
        evaluations: Arc<dyn EvaluationStore>,
        progress: Arc<dyn ProgressStore>,
        vault: Arc<AnswerVault>,
    ) -> Self {
        Self {
            plans,
            quota,
            evaluations,
            progress,
            vault,
        }
    }

    pub async fn dashboard(&self, user_id: &str) -> Result<Dashboard> {
        let plan = self.plans.active_plan(user_id).await?;
        let snapshot = self.quota.snapshot(user_id, plan).await?;
        let aggregates = self
            .progress
            .list(user_id, &AttemptFilter::default(), 0, None)
            .await?;

        let total: i64 = aggregates.iter().map(|p| p.total_attempted).sum();
        let correct: i64 = aggregates.iter().map(|p| p.total_correct).sum();

        Ok(Dashboard {
            user: DashboardUser {
                user_id: user_id.to_string(),
                subscription: plan,
            },
            stats: DashboardStats {
                total_evaluations: total,
                correct_answers: correct,
                average_score: average_score(correct, total),
                accuracy_percentage: percentage(correct, total),
            },
            limits: DashboardLimits {
                generation: snapshot.generation,
                evaluation: snapshot.evaluation,
                daily_reset_at: snapshot.daily_reset_at,
                monthly_reset_at: snapshot.monthly_reset_at,
            },
            progress: aggregates.into_iter().map(TopicProgress::from).collect(),
        })
    }

    pub async fn progress(
        &self,
        user_id: &str,
        filter: &AttemptFilter,
        pagination: Pagination,
    ) -> Result<Page<TopicProgress>> {
        let total = self.progress.count(user_id, filter).await?;
        let rows = self
            .progress
            .list(user_id, filter, pagination.skip(), Some(pagination.limit))
            .await?;

        Ok(Page {
            total,
            page: pagination.page,
            limit: pagination.limit,
            pages: pagination.pages(total),
            data: rows.into_iter().map(TopicProgress::from).collect(),
        })
    }

    pub async fn results(
        &self,
        user_id: &str,
        filter: &AttemptFilter,
        pagination: Pagination,
    ) -> Result<Page<ResultRow>> {
        let total = self.evaluations.count(user_id, filter).await?;
        let rows = self
            .evaluations
            .list(user_id, filter, pagination.skip(), Some(pagination.limit))
            .await?;

        Ok(Page {
            total,
            page: pagination.page,
            limit: pagination.limit,
            pages: pagination.pages(total),
            data: rows.into_iter().map(ResultRow::from).collect(),
        })
    }

    pub async fn last_attempted(&self, user_id: &str, filter: &AttemptFilter) -> Result<AttemptView> {
        let record = self
            .evaluations
            .list(user_id, filter, 0, Some(1))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                ExamdeskError::NotFound(if filter.is_empty() {
                    "No MCQ attempted yet".into()
                } else {
                    "No MCQ attempted for the given filter".into()
                })
            })?;

        let entry = match self.vault.lookup(&record.item_id).await {
            Ok(entry) => Some(entry),
            Err(ExamdeskError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        Ok(AttemptView::join(record, entry.as_ref()))
    }

    pub async fn recent_attempts(&self, user_id: &str, count: i64) -> Result<Vec<AttemptView>> {
        let records = self
            .evaluations
            .list(user_id, &AttemptFilter::default(), 0, Some(count.clamp(1, MAX_RECENT)))
            .await?;

        let ids: Vec<String> = records.iter().map(|r| r.item_id.clone()).collect();
        let entries = self.vault.lookup_many(&ids).await?;

        Ok(records
            .into_iter()
            .map(|record| {
                let entry = entries.get(&record.item_id);
                AttemptView::join(record, entry)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::evaluation::{EvaluationEngine, InMemoryEvaluationStore, SubmitMeta};
    use crate::services::generator::{Difficulty, DraftItem};
    use crate::services::plans::PlanCatalog;
    use crate::services::progress::InMemoryProgressStore;
    use crate::services::quota::InMemoryQuotaStore;
    use crate::services::subscriptions::InMemorySubscriptionStore;
    use crate::services::vault::{InMemoryGenerationStore, Topic};

    struct Fixture {
        reports: ReportService,
        engine: EvaluationEngine,
        vault: Arc<AnswerVault>,
    }

    fn fixture() -> Fixture {
        let quota = Arc::new(QuotaLedger::new(
            Arc::new(InMemoryQuotaStore::new()),
            PlanCatalog::default(),
        ));
        let resolver = PlanResolver::new(Arc::new(InMemorySubscriptionStore::new()));
        let vault = Arc::new(AnswerVault::new(Arc::new(InMemoryGenerationStore::new())));
        let evaluations = Arc::new(InMemoryEvaluationStore::new());
        let progress = Arc::new(InMemoryProgressStore::new());

        Fixture {
            reports: ReportService::new(
                resolver.clone(),
                quota.clone(),
                evaluations.clone(),
                progress.clone(),
                vault.clone(),
            ),
            engine: EvaluationEngine::new(resolver, quota, vault.clone(), evaluations, progress),
            vault,
        }
    }

    async fn seed(vault: &AnswerVault, chapter: &str, n: usize) -> Vec<String> {
        let drafts = (0..n)
            .map(|i| DraftItem {
                question_number: i as i32 + 1,
                question: format!("{} Q{}", chapter, i + 1),
                options: vec!["a".into(), "b".into()],
                correct_answer: "A".into(),
                explanation: "First".into(),
                difficulty: "easy".into(),
            })
            .collect();
        let topic = Topic {
            level: "Foundation".into(),
            subject: "accounting".into(),
            chapter: chapter.into(),
            unit: String::new(),
        };
        vault
            .store("u1", &topic, Difficulty::Easy, drafts)
            .await
            .unwrap()
            .items
            .into_iter()
            .map(|i| i.item_id)
            .collect()
    }

    #[test]
    fn test_pagination_parse() {
        assert_eq!(Pagination::from_query(None, None).unwrap(), Pagination::default());
        let p = Pagination::from_query(Some("20"), Some("3")).unwrap();
        assert_eq!(p.skip(), 40);
        assert_eq!(p.pages(41), 3);
        assert_eq!(p.pages(0), 0);

        assert_eq!(
            Pagination::from_query(Some("0"), None).unwrap_err().to_string(),
            "Limit must be 1-100"
        );
        assert_eq!(
            Pagination::from_query(Some("abc"), None).unwrap_err().to_string(),
            "Limit must be 1-100"
        );
        assert_eq!(
            Pagination::from_query(None, Some("0")).unwrap_err().to_string(),
            "Page must be >= 1"
        );
    }

    #[test]
    fn test_pagination_huge_page() {
        let err = Pagination::from_query(Some("100"), Some("9223372036854775807")).unwrap_err();
        assert_eq!(err.to_string(), "Page is out of range");

        // Largest page whose offset still fits
        let last = (i64::MAX / 100 + 1).to_string();
        let p = Pagination::from_query(Some("100"), Some(&last)).unwrap();
        assert_eq!(p.skip(), (i64::MAX / 100 * 100) as u64);

        let p = Pagination { limit: 100, page: i64::MAX };
        assert_eq!(p.skip(), i64::MAX as u64);
    }

    #[test]
    fn test_recent_count() {
        assert_eq!(parse_recent_count(None).unwrap(), 5);
        assert_eq!(parse_recent_count(Some("50")).unwrap(), 50);
        assert!(parse_recent_count(Some("51")).is_err());
    }

    #[tokio::test]
    async fn test_dashboard_totals() {
        let fx = fixture();
        let ledgers = seed(&fx.vault, "Ledgers", 2).await;
        let depreciation = seed(&fx.vault, "Depreciation", 1).await;

        fx.engine.submit("u1", &ledgers[0], "A", SubmitMeta::default()).await.unwrap();
        fx.engine.submit("u1", &ledgers[1], "B", SubmitMeta::default()).await.unwrap();
        fx.engine.submit("u1", &depreciation[0], "A", SubmitMeta::default()).await.unwrap();

        let dashboard = fx.reports.dashboard("u1").await.unwrap();
        assert_eq!(dashboard.user.subscription, Plan::Free);
        assert_eq!(dashboard.stats.total_evaluations, 3);
        assert_eq!(dashboard.stats.correct_answers, 2);
        assert_eq!(dashboard.stats.average_score, 67);
        assert_eq!(dashboard.stats.accuracy_percentage, 66.67);
        assert_eq!(dashboard.limits.evaluation.daily.used, 3);
        assert_eq!(dashboard.limits.generation.daily.limit, 5);
        assert_eq!(dashboard.progress.len(), 2);
        assert_eq!(dashboard.progress[0].unit, "N/A");
    }

    #[tokio::test]
    async fn test_results_and_last_attempted() {
        let fx = fixture();

        let err = fx
            .reports
            .last_attempted("u1", &AttemptFilter::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No MCQ attempted yet");

        let ids = seed(&fx.vault, "Ledgers", 3).await;
        for id in &ids {
            fx.engine.submit("u1", id, "A", SubmitMeta::default()).await.unwrap();
        }

        let page = fx
            .reports
            .results("u1", &AttemptFilter::default(), Pagination::from_query(Some("2"), Some("1")).unwrap())
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.pages, 2);
        assert_eq!(page.data.len(), 2);

        let last = fx
            .reports
            .last_attempted("u1", &AttemptFilter::default())
            .await
            .unwrap();
        assert_eq!(last.question, "Ledgers Q3");
        assert_eq!(last.explanation, "First");
        assert_eq!(last.options.len(), 2);

        let filter = AttemptFilter {
            chapter: Some("Taxes".into()),
            ..Default::default()
        };
        let err = fx.reports.last_attempted("u1", &filter).await.unwrap_err();
        assert_eq!(err.to_string(), "No MCQ attempted for the given filter");

        let recent = fx.reports.recent_attempts("u1", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].question, "Ledgers Q3");
        let json = serde_json::to_value(&recent[0]).unwrap();
        assert!(json.get("mcqId").is_some());
        assert_eq!(json["correctAnswer"], "A");
    }
}
