//! Generation orchestrator
//!
//! Validates a request, applies the premium gate and quota, calls the external
//! generator, stores the result in the vault and only then counts it against
//! the user's quota.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::logging::UsageLogger;
use crate::services::generator::{Difficulty, GenerationRequest, QuestionGenerator};
use crate::services::plans::{Plan, PremiumCatalog};
use crate::services::quota::QuotaLedger;
use crate::services::subscriptions::PlanResolver;
use crate::services::vault::{AnswerVault, PublicItem, Topic};
use crate::types::{ExamdeskError, Result};

pub const MAX_QUESTIONS: i64 = 100;

/// Raw generation parameters as received from a caller
#[derive(Debug, Clone, Default)]
pub struct GenerateParams {
    pub level: String,
    pub subject: String,
    pub chapter: String,
    pub unit: Option<String>,
    pub difficulty: String,
    pub num_questions: i64,
}

/// Parameters that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedParams {
    pub topic: Topic,
    pub difficulty: Difficulty,
    pub num_questions: i64,
}

impl GenerateParams {
    /// Check fields in order and report the first one that fails
    pub fn validate(&self) -> Result<ValidatedParams> {
        let level = self.level.trim();
        let subject = self.subject.trim();
        let chapter = self.chapter.trim();
        if level.is_empty() || subject.is_empty() || chapter.is_empty() {
            return Err(ExamdeskError::Validation(
                "Invalid or missing level/subject/chapter".into(),
            ));
        }

        let difficulty = self.difficulty.parse::<Difficulty>()?;

        if !(1..=MAX_QUESTIONS).contains(&self.num_questions) {
            return Err(ExamdeskError::Validation(
                "numQuestions must be between 1 and 100".into(),
            ));
        }

        Ok(ValidatedParams {
            topic: Topic {
                level: level.to_string(),
                subject: subject.to_string(),
                chapter: chapter.to_string(),
                unit: self
                    .unit
                    .as_deref()
                    .map(str::trim)
                    .unwrap_or_default()
                    .to_string(),
            },
            difficulty,
            num_questions: self.num_questions,
        })
    }
}

/// What a successful generation hands back to the caller
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub set_id: String,
    pub plan: Plan,
    pub requested: i64,
    pub count: i64,
    pub items: Vec<PublicItem>,
}

pub struct GenerationOrchestrator {
    plans: PlanResolver,
    premium: PremiumCatalog,
    quota: Arc<QuotaLedger>,
    generator: Arc<dyn QuestionGenerator>,
    vault: Arc<AnswerVault>,
    usage: UsageLogger,
}

impl GenerationOrchestrator {
    pub fn new(
        plans: PlanResolver,
        premium: PremiumCatalog,
        quota: Arc<QuotaLedger>,
        generator: Arc<dyn QuestionGenerator>,
        vault: Arc<AnswerVault>,
    ) -> Self {
        Self {
            plans,
            premium,
            quota,
            generator,
            vault,
            usage: UsageLogger::new(),
        }
    }

    pub fn with_usage_logger(mut self, usage: UsageLogger) -> Self {
        self.usage = usage;
        self
    }

    pub async fn generate(&self, user_id: &str, params: GenerateParams) -> Result<GenerationResult> {
        let params = params.validate()?;
        let plan = self.plans.active_plan(user_id).await?;

        self.premium
            .ensure_access(plan, &params.topic.subject, &params.topic.chapter)?;

        let reservation = self
            .quota
            .check_and_reserve_generation(user_id, plan, params.num_questions)
            .await?;
        if reservation.adjusted(params.num_questions) {
            info!(
                user_id = %user_id,
                requested = params.num_questions,
                to_generate = reservation.to_generate,
                "Generation request reduced to remaining quota"
            );
        }

        let request = GenerationRequest {
            user_id: user_id.to_string(),
            level: params.topic.level.clone(),
            subject: params.topic.subject.clone(),
            chapter_name: params.topic.chapter.clone(),
            unit_name: params.topic.unit.clone(),
            difficulty: params.difficulty,
            num_questions: reservation.to_generate,
        };

        let mut drafts = match self.generator.generate(&request).await {
            Ok(drafts) => drafts,
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Question generator failed");
                return Err(match e {
                    ExamdeskError::UpstreamGeneration(_) => e,
                    other => ExamdeskError::UpstreamGeneration(other.to_string()),
                });
            }
        };

        if drafts.is_empty() {
            warn!(user_id = %user_id, "Question generator returned no usable items");
            return Err(ExamdeskError::UpstreamGeneration(
                "Generator returned no questions".into(),
            ));
        }
        drafts.truncate(reservation.to_generate as usize);

        let set = self
            .vault
            .store(user_id, &params.topic, params.difficulty, drafts)
            .await?;
        let count = set.items.len() as i64;

        // Persisted items are the user's either way; an uncounted set favours them
        if let Err(e) = self.quota.increment_generated(user_id, count).await {
            error!(user_id = %user_id, set_id = %set.set_id, error = %e, "Failed to count generated questions");
        }

        self.usage
            .log_generated(user_id, plan.as_str(), count, &set.set_id)
            .await;

        info!(
            user_id = %user_id,
            set_id = %set.set_id,
            plan = %plan,
            count = count,
            "Questions generated"
        );

        Ok(GenerationResult {
            set_id: set.set_id.clone(),
            plan,
            requested: params.num_questions,
            count,
            items: set.items.iter().map(PublicItem::from).collect(),
        })
    }
}
