//! Configuration for examdesk
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::services::plans::{PlanCatalog, PlanLimits};

/// Examdesk - quiz generation and evaluation backend
#[derive(Parser, Debug, Clone)]
#[command(name = "examdesk")]
#[command(about = "Exam-prep quiz backend with quota enforcement and chat sessions")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:5000")]
    pub listen: SocketAddr,

    /// Enable development mode (in-memory stores when MongoDB is unreachable)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "examdesk")]
    pub mongodb_db: String,

    /// JWT secret for bearer tokens (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// JWT token expiry in seconds
    #[arg(long, env = "JWT_EXPIRY_SECONDS", default_value = "604800")]
    pub jwt_expiry_seconds: u64,

    /// External question generator endpoint
    #[arg(long, env = "PYTHON_MCQ_API_URL", default_value = "http://localhost:8000/generate-mcqs")]
    pub generator_url: String,

    /// Generator request timeout in seconds
    #[arg(long, env = "GENERATOR_TIMEOUT_SECS", default_value = "300")]
    pub generator_timeout_secs: u64,

    /// Course catalog base URL (subjects, chapters, units)
    #[arg(long, env = "CATALOG_API_URL", default_value = "http://localhost:8000")]
    pub catalog_url: String,

    /// Catalog request timeout in seconds
    #[arg(long, env = "CATALOG_TIMEOUT_SECS", default_value = "20")]
    pub catalog_timeout_secs: u64,

    /// Chat transport configuration
    #[command(flatten)]
    pub chat: ChatArgs,

    /// Plan ceilings
    #[command(flatten)]
    pub plans: PlanArgs,

    /// Optional JSON file overriding the premium chapter catalog
    #[arg(long, env = "PREMIUM_CHAPTERS_FILE")]
    pub premium_chapters_file: Option<PathBuf>,

    /// Conversation session time-to-live in seconds
    #[arg(long, env = "SESSION_TTL_SECS", default_value = "3600")]
    pub session_ttl_secs: u64,

    /// Inbound message-id dedupe time-to-live in seconds
    #[arg(long, env = "DEDUPE_TTL_SECS", default_value = "86400")]
    pub dedupe_ttl_secs: u64,

    /// Maximum live conversation sessions
    #[arg(long, env = "SESSION_MAX_ENTRIES", default_value = "50000")]
    pub session_max_entries: usize,

    /// Maximum live message-dedupe markers
    #[arg(long, env = "DEDUPE_MAX_ENTRIES", default_value = "200000")]
    pub dedupe_max_entries: usize,

    /// Expired-entry sweep interval in seconds
    #[arg(long, env = "STORE_CLEANUP_INTERVAL_SECS", default_value = "60")]
    pub store_cleanup_interval_secs: u64,

    /// Write billable usage events as JSONL to this path
    #[arg(long, env = "USAGE_LOG_PATH")]
    pub usage_log_path: Option<PathBuf>,
}

/// Chat transport connection configuration
#[derive(Parser, Debug, Clone)]
pub struct ChatArgs {
    /// Chat transport base URL
    #[arg(long, env = "CONVONITE_API_URL", default_value = "https://api.convonite.com")]
    pub chat_api_url: String,

    /// Chat transport API key
    #[arg(long, env = "CONVONITE_API_KEY")]
    pub chat_api_key: Option<String>,

    /// Chat transport channel id
    #[arg(long, env = "CONVONITE_CHANNEL_ID")]
    pub chat_channel_id: Option<String>,

    /// Chat transport request timeout in seconds
    #[arg(long, env = "CHAT_TIMEOUT_SECS", default_value = "20")]
    pub chat_timeout_secs: u64,
}

/// Per-plan quota ceilings
#[derive(Parser, Debug, Clone)]
pub struct PlanArgs {
    #[arg(long, env = "FREE_DAILY_LIMIT", default_value = "5")]
    pub free_daily_limit: i64,

    #[arg(long, env = "FREE_MONTHLY_LIMIT", default_value = "100")]
    pub free_monthly_limit: i64,

    #[arg(long, env = "FREE_EVAL_DAILY", default_value = "10")]
    pub free_eval_daily: i64,

    #[arg(long, env = "FREE_EVAL_MONTHLY", default_value = "200")]
    pub free_eval_monthly: i64,

    #[arg(long, env = "PREMIUM_DAILY_LIMIT", default_value = "50")]
    pub premium_daily_limit: i64,

    #[arg(long, env = "PREMIUM_MONTHLY_LIMIT", default_value = "1000")]
    pub premium_monthly_limit: i64,

    #[arg(long, env = "PREMIUM_EVAL_DAILY", default_value = "100")]
    pub premium_eval_daily: i64,

    #[arg(long, env = "PREMIUM_EVAL_MONTHLY", default_value = "2000")]
    pub premium_eval_monthly: i64,
}

impl PlanArgs {
    fn free(&self) -> PlanLimits {
        PlanLimits {
            daily_limit: self.free_daily_limit,
            monthly_limit: self.free_monthly_limit,
            eval_daily_limit: self.free_eval_daily,
            eval_monthly_limit: self.free_eval_monthly,
        }
    }

    fn pro(&self) -> PlanLimits {
        PlanLimits {
            daily_limit: self.premium_daily_limit,
            monthly_limit: self.premium_monthly_limit,
            eval_daily_limit: self.premium_eval_daily,
            eval_monthly_limit: self.premium_eval_monthly,
        }
    }

    /// Build the plan catalog from the configured ceilings
    pub fn catalog(&self) -> PlanCatalog {
        PlanCatalog::new(self.free(), self.pro())
    }

    fn validate(&self) -> Result<(), String> {
        let (free, pro) = (self.free(), self.pro());
        for (name, limits) in [("free", &free), ("pro", &pro)] {
            if !limits.all_positive() {
                return Err(format!("All {} plan limits must be greater than zero", name));
            }
        }
        if free.daily_limit > pro.daily_limit
            || free.monthly_limit > pro.monthly_limit
            || free.eval_daily_limit > pro.eval_daily_limit
            || free.eval_monthly_limit > pro.eval_monthly_limit
        {
            return Err("Free plan limits must not exceed pro plan limits".to_string());
        }
        Ok(())
    }
}

impl Args {
    /// Get effective JWT secret (uses default in dev mode)
    pub fn jwt_secret(&self) -> Option<String> {
        match &self.jwt_secret {
            Some(secret) => Some(secret.clone()),
            None if self.dev_mode => Some("dev-only-insecure-secret-not-for-production".to_string()),
            None => None,
        }
    }

    /// MongoDB URI with any `user:password@` part masked, for logging
    pub fn redacted_mongodb_uri(&self) -> String {
        redact_userinfo(&self.mongodb_uri)
    }

    pub fn generator_timeout(&self) -> Duration {
        Duration::from_secs(self.generator_timeout_secs)
    }

    pub fn catalog_timeout(&self) -> Duration {
        Duration::from_secs(self.catalog_timeout_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn dedupe_ttl(&self) -> Duration {
        Duration::from_secs(self.dedupe_ttl_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.jwt_secret.is_none() {
            return Err("JWT_SECRET is required in production mode".to_string());
        }

        if self.session_ttl_secs == 0 || self.dedupe_ttl_secs == 0 {
            return Err("SESSION_TTL_SECS and DEDUPE_TTL_SECS must be greater than zero".to_string());
        }

        if self.generator_timeout_secs == 0 {
            return Err("GENERATOR_TIMEOUT_SECS must be greater than zero".to_string());
        }

        self.plans.validate()
    }
}

fn redact_userinfo(uri: &str) -> String {
    let Some((scheme, rest)) = uri.split_once("://") else {
        return uri.to_string();
    };
    let authority_end = rest.find(['/', '?']).unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => format!("{}://***@{}", scheme, &rest[at + 1..]),
        None => uri.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["examdesk"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults_match_plan_table() {
        let args = parse(&["--dev-mode"]);
        let catalog = args.plans.catalog();
        let free = catalog.limits(crate::services::plans::Plan::Free);
        assert_eq!(free.daily_limit, 5);
        assert_eq!(free.monthly_limit, 100);
        assert_eq!(free.eval_daily_limit, 10);
        assert_eq!(free.eval_monthly_limit, 200);
        let pro = catalog.limits(crate::services::plans::Plan::Pro);
        assert_eq!(pro.daily_limit, 50);
        assert_eq!(pro.eval_monthly_limit, 2000);
        assert_eq!(args.generator_timeout(), Duration::from_secs(300));
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_mongodb_uri_redacted() {
        let args = parse(&[
            "--dev-mode",
            "--mongodb-uri",
            "mongodb+srv://admin:s3cr@t@cluster0.example.net/exam?retryWrites=true",
        ]);
        assert_eq!(
            args.redacted_mongodb_uri(),
            "mongodb+srv://***@cluster0.example.net/exam?retryWrites=true"
        );

        assert_eq!(
            redact_userinfo("mongodb://localhost:27017/?appName=a@b"),
            "mongodb://localhost:27017/?appName=a@b"
        );
        assert_eq!(redact_userinfo("not a uri"), "not a uri");
    }

    #[test]
    fn test_production_requires_jwt_secret() {
        let args = parse(&[]);
        assert!(args.validate().is_err());
        assert!(args.jwt_secret().is_none());

        let args = parse(&["--jwt-secret", "a-secret-that-is-long-enough-to-use-here"]);
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_rejects_inverted_plan_limits() {
        let args = parse(&["--dev-mode", "--free-daily-limit", "80"]);
        assert!(args.validate().is_err());

        let args = parse(&["--dev-mode", "--premium-eval-daily", "0"]);
        assert!(args.validate().is_err());
    }
}
