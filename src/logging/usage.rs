//! Usage logging for billable actions
//!
//! Logs usage events in JSONL format, one line per event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Usage event types
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Questions generated and stored
    QuestionsGenerated,
    /// An answer was graded
    AnswerEvaluated,
    /// A quota check rejected an action
    LimitReached,
}

/// Usage event for analytics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: EventType,
    pub user_id: String,
    /// Plan in force when the event happened
    pub plan: Option<String>,
    /// Number of units consumed
    pub count: Option<i64>,
    /// Question the event refers to
    pub item_id: Option<String>,
    pub is_correct: Option<bool>,
    /// Human-readable reason (for rejections)
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl UsageEvent {
    pub fn new(event_type: EventType, user_id: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            user_id: user_id.to_string(),
            plan: None,
            count: None,
            item_id: None,
            is_correct: None,
            reason: None,
            metadata: None,
        }
    }

    pub fn with_plan(mut self, plan: &str) -> Self {
        self.plan = Some(plan.to_string());
        self
    }

    pub fn with_count(mut self, count: i64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_item(mut self, item_id: &str) -> Self {
        self.item_id = Some(item_id.to_string());
        self
    }

    pub fn with_outcome(mut self, is_correct: bool) -> Self {
        self.is_correct = Some(is_correct);
        self
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Convert to JSONL line
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Usage logger that writes events to a JSONL file.
///
/// Without a file it drops events, so callers can log unconditionally.
#[derive(Clone, Default)]
pub struct UsageLogger {
    inner: Arc<Mutex<UsageLoggerInner>>,
}

#[derive(Default)]
struct UsageLoggerInner {
    writer: Option<BufWriter<File>>,
    path: Option<PathBuf>,
}

impl UsageLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize file logging to the specified path
    pub async fn init_file(&self, path: PathBuf) -> std::io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        let writer = BufWriter::new(file);

        let mut inner = self.inner.lock().await;
        inner.writer = Some(writer);
        inner.path = Some(path.clone());

        info!("Usage logging initialized to {}", path.display());
        Ok(())
    }

    /// Log a usage event
    pub async fn log(&self, event: UsageEvent) {
        let jsonl = match event.to_jsonl() {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize usage event: {}", e);
                return;
            }
        };

        let mut inner = self.inner.lock().await;

        if let Some(ref mut writer) = inner.writer {
            if let Err(e) = writeln!(writer, "{}", jsonl) {
                error!("Failed to write usage event: {}", e);
            }
            if let Err(e) = writer.flush() {
                error!("Failed to flush usage log: {}", e);
            }
        }
    }

    pub async fn log_generated(&self, user_id: &str, plan: &str, count: i64, set_id: &str) {
        let event = UsageEvent::new(EventType::QuestionsGenerated, user_id)
            .with_plan(plan)
            .with_count(count)
            .with_metadata(serde_json::json!({ "setId": set_id }));
        self.log(event).await;
    }

    pub async fn log_evaluated(&self, user_id: &str, plan: &str, item_id: &str, is_correct: bool) {
        let event = UsageEvent::new(EventType::AnswerEvaluated, user_id)
            .with_plan(plan)
            .with_count(1)
            .with_item(item_id)
            .with_outcome(is_correct);
        self.log(event).await;
    }

    pub async fn log_limit_reached(&self, user_id: &str, plan: &str, reason: &str) {
        let event = UsageEvent::new(EventType::LimitReached, user_id)
            .with_plan(plan)
            .with_reason(reason);
        self.log(event).await;
    }

    /// Path of the active log file, if any
    pub async fn path(&self) -> Option<PathBuf> {
        self.inner.lock().await.path.clone()
    }
}
