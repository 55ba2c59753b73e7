//! Conversation states
//!
//! One variant per step, each carrying only what that step needs. Sessions are
//! stored as JSON in the expiring store, so anything read back is re-checked
//! with [`ConversationState::is_valid`] before use.

use serde::{Deserialize, Serialize};

use crate::services::generator::Difficulty;

pub const LEVELS: [&str; 3] = ["Foundation", "Intermediate", "Final"];
pub const DIFFICULTIES: [&str; 3] = ["easy", "medium", "hard"];
pub const QUESTION_COUNTS: [&str; 3] = ["1", "5", "10"];
pub const SKIP_UNIT: &str = "Skip";

/// A question as shown during a quiz run; the answer stays in the vault
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizItem {
    pub item_id: String,
    pub question: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizRun {
    pub user_id: String,
    pub items: Vec<QuizItem>,
    pub index: usize,
    pub correct: usize,
    pub total: usize,
}

impl QuizRun {
    pub fn new(user_id: String, items: Vec<QuizItem>) -> Self {
        let total = items.len();
        Self {
            user_id,
            items,
            index: 0,
            correct: 0,
            total,
        }
    }

    pub fn current(&self) -> Option<&QuizItem> {
        self.items.get(self.index)
    }

    pub fn is_finished(&self) -> bool {
        self.index >= self.total
    }

    /// Rounded percentage of correct answers
    pub fn percentage(&self) -> usize {
        if self.total == 0 {
            return 0;
        }
        (self.correct * 200 + self.total) / (self.total * 2)
    }

    fn is_valid(&self) -> bool {
        !self.user_id.is_empty()
            && !self.items.is_empty()
            && self.total == self.items.len()
            && self.index < self.total
            && self.correct <= self.index
            && self
                .items
                .iter()
                .all(|i| !i.item_id.is_empty() && !i.question.is_empty() && i.options.len() >= 2)
    }
}

/// Where a conversation is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConversationState {
    /// Unknown sender gave an email; waiting for their name
    AwaitingName { email: String },
    Level {
        user_id: String,
    },
    Subject {
        user_id: String,
        level: String,
        subjects: Vec<String>,
    },
    Chapter {
        user_id: String,
        level: String,
        subject: String,
        chapters: Vec<String>,
    },
    Unit {
        user_id: String,
        level: String,
        subject: String,
        chapter: String,
        units: Vec<String>,
    },
    Difficulty {
        user_id: String,
        level: String,
        subject: String,
        chapter: String,
        unit: Option<String>,
    },
    Count {
        user_id: String,
        level: String,
        subject: String,
        chapter: String,
        unit: Option<String>,
        difficulty: Difficulty,
    },
    /// The generator call is in flight
    Generating { user_id: String },
    Quiz(QuizRun),
}

fn filled<S: AsRef<str>>(values: &[S]) -> bool {
    values.iter().all(|v| !v.as_ref().trim().is_empty())
}

impl ConversationState {
    pub fn name(&self) -> &'static str {
        match self {
            ConversationState::AwaitingName { .. } => "awaiting_name",
            ConversationState::Level { .. } => "level",
            ConversationState::Subject { .. } => "subject",
            ConversationState::Chapter { .. } => "chapter",
            ConversationState::Unit { .. } => "unit",
            ConversationState::Difficulty { .. } => "difficulty",
            ConversationState::Count { .. } => "count",
            ConversationState::Generating { .. } => "generating",
            ConversationState::Quiz(_) => "quiz",
        }
    }

    /// Structural check for a state read back from storage
    pub fn is_valid(&self) -> bool {
        match self {
            ConversationState::AwaitingName { email } => filled(&[email]),
            ConversationState::Level { user_id } => filled(&[user_id]),
            ConversationState::Subject {
                user_id,
                level,
                subjects,
            } => filled(&[user_id, level]) && !subjects.is_empty(),
            ConversationState::Chapter {
                user_id,
                level,
                subject,
                chapters,
            } => filled(&[user_id, level, subject]) && !chapters.is_empty(),
            ConversationState::Unit {
                user_id,
                level,
                subject,
                chapter,
                units,
            } => filled(&[user_id, level, subject, chapter]) && !units.is_empty(),
            ConversationState::Difficulty {
                user_id,
                level,
                subject,
                chapter,
                ..
            }
            | ConversationState::Count {
                user_id,
                level,
                subject,
                chapter,
                ..
            } => filled(&[user_id, level, subject, chapter]),
            ConversationState::Generating { user_id } => filled(&[user_id]),
            ConversationState::Quiz(run) => run.is_valid(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse a stored session; `None` when it is unreadable or fails the
    /// structural check.
    pub fn from_json(raw: &str) -> Option<Self> {
        serde_json::from_str::<Self>(raw)
            .ok()
            .filter(Self::is_valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(index: usize) -> QuizRun {
        let items = (0..3)
            .map(|i| QuizItem {
                item_id: format!("item-{}", i),
                question: format!("Q{}", i),
                options: vec!["a".into(), "b".into()],
            })
            .collect();
        QuizRun {
            index,
            ..QuizRun::new("u1".into(), items)
        }
    }

    #[test]
    fn test_round_trip_tagged() {
        let state = ConversationState::Count {
            user_id: "u1".into(),
            level: "Final".into(),
            subject: "taxation".into(),
            chapter: "GST".into(),
            unit: None,
            difficulty: Difficulty::Hard,
        };
        let raw = state.to_json().unwrap();
        assert!(raw.contains("\"state\":\"count\""));
        assert_eq!(ConversationState::from_json(&raw), Some(state));

        let quiz = ConversationState::Quiz(run(1));
        let raw = quiz.to_json().unwrap();
        assert!(raw.contains("\"state\":\"quiz\""));
        assert_eq!(ConversationState::from_json(&raw), Some(quiz));
    }

    #[test]
    fn test_corrupt_sessions_rejected() {
        assert!(ConversationState::from_json("{not json").is_none());
        assert!(ConversationState::from_json(r#"{"state":"level"}"#).is_none());
        assert!(ConversationState::from_json(r#"{"state":"level","user_id":""}"#).is_none());
        assert!(ConversationState::from_json(
            r#"{"state":"subject","user_id":"u1","level":"Final","subjects":[]}"#
        )
        .is_none());

        // Index past the end
        assert!(!ConversationState::Quiz(run(3)).is_valid());

        let mut broken = run(0);
        broken.items.clear();
        assert!(!ConversationState::Quiz(broken).is_valid());

        let mut broken = run(1);
        broken.total = 7;
        assert!(!ConversationState::Quiz(broken).is_valid());
    }

    #[test]
    fn test_percentage() {
        let mut r = run(2);
        r.correct = 2;
        assert_eq!(r.percentage(), 67);
        r.correct = 0;
        assert_eq!(r.percentage(), 0);
    }
}
