//! Shared fakes for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use clap::Parser;
use std::sync::{Arc, Mutex};

use examdesk::chat::{ChatTransport, InMemoryUserDirectory};
use examdesk::config::Args;
use examdesk::db::schemas::UserDoc;
use examdesk::logging::UsageLogger;
use examdesk::server::{AppState, Stores, Upstreams};
use examdesk::services::catalog::CourseCatalog;
use examdesk::services::generator::{DraftItem, GenerationRequest, QuestionGenerator};
use examdesk::Result;

pub const PHONE: &str = "919812345678";
pub const USER_ID: &str = "user-integration";

/// Generator whose items always have answer B
#[derive(Default)]
pub struct FakeGenerator {
    pub requests: Mutex<Vec<GenerationRequest>>,
}

#[async_trait]
impl QuestionGenerator for FakeGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Vec<DraftItem>> {
        self.requests.lock().unwrap().push(request.clone());
        Ok((0..request.num_questions)
            .map(|i| DraftItem {
                question_number: i as i32 + 1,
                question: format!("{} question {}", request.chapter_name, i + 1),
                options: vec![
                    "Option one".into(),
                    "Option two".into(),
                    "Option three".into(),
                    "Option four".into(),
                ],
                correct_answer: "B".into(),
                explanation: "Option two is right".into(),
                difficulty: request.difficulty.to_string(),
            })
            .collect())
    }
}

pub struct FakeCatalog;

#[async_trait]
impl CourseCatalog for FakeCatalog {
    async fn subjects(&self, _level: &str) -> Result<Vec<String>> {
        Ok(vec!["accounting".into(), "taxation".into()])
    }

    async fn chapters(&self, _level: &str, subject: &str) -> Result<Vec<String>> {
        Ok(match subject {
            "taxation" => vec!["GST".into(), "Transfer Pricing".into()],
            _ => vec!["Ledgers".into()],
        })
    }

    async fn units(&self, chapter: &str) -> Result<Vec<String>> {
        Ok(match chapter {
            "GST" => vec!["Registration".into(), "Returns".into()],
            _ => Vec::new(),
        })
    }
}

#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingTransport {
    /// Messages sent since the last call
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.sent.lock().unwrap())
            .into_iter()
            .map(|(_, text)| text)
            .collect()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_text(&self, to: &str, text: &str) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), text.to_string()));
        Ok(())
    }
}

pub struct TestApp {
    pub state: Arc<AppState>,
    pub generator: Arc<FakeGenerator>,
    pub transport: Arc<RecordingTransport>,
}

/// App state over in-memory stores with one registered chat user
pub async fn build_app() -> TestApp {
    let args = Args::try_parse_from(["examdesk", "--dev-mode"]).unwrap();

    let users = Arc::new(InMemoryUserDirectory::new());
    users
        .insert(UserDoc {
            user_id: USER_ID.into(),
            name: "Ravi".into(),
            email: "ravi@example.com".into(),
            phone_number: Some("9812345678".into()),
            ..Default::default()
        })
        .await;

    let generator = Arc::new(FakeGenerator::default());
    let transport = Arc::new(RecordingTransport::default());
    let upstreams = Upstreams {
        generator: generator.clone(),
        catalog: Arc::new(FakeCatalog),
        transport: transport.clone(),
    };
    let stores = Stores {
        users,
        ..Stores::in_memory()
    };

    let state = AppState::new(args, None, stores, upstreams, UsageLogger::new()).unwrap();
    TestApp {
        state: Arc::new(state),
        generator,
        transport,
    }
}
