//! Core services: quota, vault, evaluation, generation and reporting.
//!
//! Each persistence seam is an `async_trait` store with a MongoDB and an
//! in-memory implementation.

pub mod catalog;
pub mod evaluation;
pub mod generation;
pub mod generator;
pub mod plans;
pub mod progress;
pub mod quota;
pub mod reports;
pub mod subscriptions;
pub mod vault;

pub use catalog::{CourseCatalog, HttpCatalog};
pub use evaluation::{EvaluationEngine, EvaluationOutcome, EvaluationStore, SubmitMeta};
pub use generation::{GenerateParams, GenerationOrchestrator, GenerationResult};
pub use generator::{Difficulty, DraftItem, GenerationRequest, HttpQuestionGenerator, QuestionGenerator};
pub use plans::{Plan, PlanCatalog, PlanLimits, PremiumCatalog};
pub use progress::{AttemptFilter, ProgressStore};
pub use quota::{QuotaLedger, QuotaStore, Reservation};
pub use reports::{Pagination, ReportService};
pub use subscriptions::{PlanResolver, SubscriptionStore};
pub use vault::{AnswerVault, GenerationStore, PublicItem, Topic};
