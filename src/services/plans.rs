//! Subscription plans, their quota ceilings and premium chapter gating.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::types::{ExamdeskError, Result};

/// Subscription tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Pro,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Pro => "pro",
        }
    }

    pub fn is_paid(&self) -> bool {
        matches!(self, Plan::Pro)
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = ExamdeskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Plan::Free),
            "pro" => Ok(Plan::Pro),
            other => Err(ExamdeskError::Validation(format!("Unknown plan '{}'", other))),
        }
    }
}

/// Quota ceilings for one plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub daily_limit: i64,
    pub monthly_limit: i64,
    pub eval_daily_limit: i64,
    pub eval_monthly_limit: i64,
}

impl PlanLimits {
    pub fn all_positive(&self) -> bool {
        self.daily_limit > 0
            && self.monthly_limit > 0
            && self.eval_daily_limit > 0
            && self.eval_monthly_limit > 0
    }
}

/// Maps every [`Plan`] to its ceilings.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    free: PlanLimits,
    pro: PlanLimits,
}

impl PlanCatalog {
    pub fn new(free: PlanLimits, pro: PlanLimits) -> Self {
        Self { free, pro }
    }

    pub fn limits(&self, plan: Plan) -> PlanLimits {
        match plan {
            Plan::Free => self.free,
            Plan::Pro => self.pro,
        }
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::new(
            PlanLimits {
                daily_limit: 5,
                monthly_limit: 100,
                eval_daily_limit: 10,
                eval_monthly_limit: 200,
            },
            PlanLimits {
                daily_limit: 50,
                monthly_limit: 1000,
                eval_daily_limit: 100,
                eval_monthly_limit: 2000,
            },
        )
    }
}

/// Chapters that require the paid plan, grouped by subject.
///
/// Subjects are keyed case-insensitively with spaces folded to underscores, so
/// "Business Economics" and "business_economics" name the same subject.
#[derive(Debug, Clone)]
pub struct PremiumCatalog {
    chapters: HashMap<String, HashSet<String>>,
}

impl PremiumCatalog {
    pub fn new(entries: HashMap<String, Vec<String>>) -> Self {
        let chapters = entries
            .into_iter()
            .map(|(subject, chapters)| {
                let set = chapters.iter().map(|c| normalize_chapter(c)).collect();
                (normalize_subject(&subject), set)
            })
            .collect();
        Self { chapters }
    }

    /// Load a `{ "subject": ["chapter", ...] }` JSON document
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ExamdeskError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        let entries: HashMap<String, Vec<String>> = serde_json::from_str(&raw).map_err(|e| {
            ExamdeskError::Config(format!("Invalid premium chapter file {}: {}", path.display(), e))
        })?;
        Ok(Self::new(entries))
    }

    pub fn is_premium(&self, subject: &str, chapter: &str) -> bool {
        self.chapters
            .get(&normalize_subject(subject))
            .is_some_and(|set| set.contains(&normalize_chapter(chapter)))
    }

    /// Reject a premium chapter for a plan that does not include it.
    pub fn ensure_access(&self, plan: Plan, subject: &str, chapter: &str) -> Result<()> {
        if !plan.is_paid() && self.is_premium(subject, chapter) {
            return Err(ExamdeskError::Forbidden(
                "Premium subscription required".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PremiumCatalog {
    fn default() -> Self {
        let table: [(&str, &[&str]); 7] = [
            (
                "accounting",
                &[
                    "Consolidation of Financial Statements",
                    "Complex Business Combinations",
                    "Company accounts",
                ],
            ),
            ("business_law", &[]),
            ("auditing", &["Group Audits", "Advanced Audit Risk"]),
            ("taxation", &["Transfer Pricing", "International Taxation"]),
            (
                "business_economics",
                &["Market Equilibrium with Policy", "Welfare Economics"],
            ),
            ("law", &["Corporate Governance", "M&A"]),
            ("cost_accounting", &["Activity Based Costing", "Target Costing"]),
        ];

        Self::new(
            table
                .iter()
                .map(|(subject, chapters)| {
                    (
                        subject.to_string(),
                        chapters.iter().map(|c| c.to_string()).collect(),
                    )
                })
                .collect(),
        )
    }
}

fn normalize_subject(subject: &str) -> String {
    subject
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

fn normalize_chapter(chapter: &str) -> String {
    chapter.trim().to_lowercase()
}
