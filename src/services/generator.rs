//! External question generator client
//!
//! The generator is an HTTP service that turns a topic selection into a list of
//! multiple-choice questions. It is slow (minutes for large requests) and its
//! output is only loosely shaped, so every item is checked before use.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::{ExamdeskError, Result};

/// Requested question difficulty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    VeryHard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
            Difficulty::VeryHard => "very-hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = ExamdeskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            "very-hard" => Ok(Difficulty::VeryHard),
            _ => Err(ExamdeskError::Validation("Invalid difficulty level".into())),
        }
    }
}

/// Body sent to the generator
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GenerationRequest {
    #[serde(rename = "userId")]
    pub user_id: String,
    pub level: String,
    pub subject: String,
    pub chapter_name: String,
    /// Empty when no unit was chosen
    pub unit_name: String,
    pub difficulty: Difficulty,
    pub num_questions: i64,
}

/// A question as returned by the generator, before it gets an id
#[derive(Debug, Clone, PartialEq)]
pub struct DraftItem {
    pub question_number: i32,
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    pub explanation: String,
    pub difficulty: String,
}

/// Source of generated questions
#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<DraftItem>>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum GeneratorResponse {
    List(Vec<serde_json::Value>),
    Wrapped { mcqs: Vec<serde_json::Value> },
}

#[derive(Debug, Deserialize)]
struct RawItem {
    #[serde(default)]
    question: String,
    #[serde(default)]
    options: Vec<String>,
    #[serde(default)]
    correct_answer: String,
    #[serde(default)]
    explanation: Option<String>,
    #[serde(default)]
    difficulty: Option<String>,
    #[serde(default)]
    question_number: Option<i32>,
}

/// Turn a generator response body into usable drafts.
///
/// Malformed items (no question, fewer than two options, no answer) are skipped.
pub fn parse_generator_body(body: &[u8], requested: Difficulty) -> Result<Vec<DraftItem>> {
    let response: GeneratorResponse = serde_json::from_slice(body).map_err(|e| {
        ExamdeskError::UpstreamGeneration(format!("Unrecognized generator response: {}", e))
    })?;

    let raw_items = match response {
        GeneratorResponse::List(items) => items,
        GeneratorResponse::Wrapped { mcqs } => mcqs,
    };

    let mut drafts = Vec::with_capacity(raw_items.len());
    for (idx, value) in raw_items.into_iter().enumerate() {
        let raw: RawItem = match serde_json::from_value(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(index = idx, error = %e, "Skipping unparseable generator item");
                continue;
            }
        };

        let question = raw.question.trim().to_string();
        let options: Vec<String> = raw
            .options
            .iter()
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();
        let correct_answer = raw.correct_answer.trim().to_uppercase();

        if question.is_empty() || options.len() < 2 || correct_answer.is_empty() {
            warn!(index = idx, "Skipping incomplete generator item");
            continue;
        }

        drafts.push(DraftItem {
            question_number: raw.question_number.unwrap_or(idx as i32 + 1),
            question,
            options,
            correct_answer,
            explanation: raw.explanation.unwrap_or_default().trim().to_string(),
            difficulty: raw
                .difficulty
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(|| requested.to_string()),
        });
    }

    Ok(drafts)
}

/// Generator reached over HTTP
pub struct HttpQuestionGenerator {
    client: Client,
    url: String,
}

impl HttpQuestionGenerator {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("examdesk/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl QuestionGenerator for HttpQuestionGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<DraftItem>> {
        debug!(
            user_id = %request.user_id,
            subject = %request.subject,
            chapter = %request.chapter_name,
            num_questions = request.num_questions,
            "Calling question generator"
        );

        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| ExamdeskError::UpstreamGeneration(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExamdeskError::UpstreamGeneration(format!(
                "Generator returned {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ExamdeskError::UpstreamGeneration(e.to_string()))?;

        parse_generator_body(&body, request.difficulty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_difficulty_parse() {
        assert_eq!("very-hard".parse::<Difficulty>().unwrap(), Difficulty::VeryHard);
        assert_eq!(" Easy".parse::<Difficulty>().unwrap(), Difficulty::Easy);
        let err = "extreme".parse::<Difficulty>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid difficulty level");
    }

    #[test]
    fn test_request_wire_shape() {
        let request = GenerationRequest {
            user_id: "u1".into(),
            level: "Foundation".into(),
            subject: "taxation".into(),
            chapter_name: "GST".into(),
            unit_name: String::new(),
            difficulty: Difficulty::VeryHard,
            num_questions: 3,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["userId"], "u1");
        assert_eq!(value["chapter_name"], "GST");
        assert_eq!(value["unit_name"], "");
        assert_eq!(value["difficulty"], "very-hard");
        assert_eq!(value["num_questions"], 3);
    }

    #[test]
    fn test_parse_bare_array() {
        let body = br#"[
            {"question": "2+2?", "options": ["3", "4", "5", "6"], "correct_answer": "b", "explanation": "Sum"},
            {"question": "Capital of France?", "options": ["Paris", "Rome"], "correct_answer": "A", "question_number": 7}
        ]"#;
        let drafts = parse_generator_body(body, Difficulty::Easy).unwrap();
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].question_number, 1);
        assert_eq!(drafts[0].correct_answer, "B");
        assert_eq!(drafts[0].difficulty, "easy");
        assert_eq!(drafts[1].question_number, 7);
        assert_eq!(drafts[1].explanation, "");
    }

    #[test]
    fn test_parse_wrapped_and_drop_incomplete() {
        let body = br#"{"mcqs": [
            {"question": "", "options": ["a", "b"], "correct_answer": "A"},
            {"question": "Only one option", "options": ["a"], "correct_answer": "A"},
            {"question": "No answer", "options": ["a", "b"]},
            {"question": "Fine", "options": ["a", "b", "c"], "correct_answer": "C", "difficulty": "hard"},
            "not an object"
        ]}"#;
        let drafts = parse_generator_body(body, Difficulty::Medium).unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].question, "Fine");
        assert_eq!(drafts[0].question_number, 4);
        assert_eq!(drafts[0].difficulty, "hard");
    }

    #[test]
    fn test_unrecognized_body_is_upstream_error() {
        let err = parse_generator_body(br#"{"error": "busy"}"#, Difficulty::Easy).unwrap_err();
        assert!(matches!(err, ExamdeskError::UpstreamGeneration(_)));
    }
}
