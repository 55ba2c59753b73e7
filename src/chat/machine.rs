//! Conversation session machine
//!
//! Drives one chat conversation from level selection through a quiz run. Each
//! inbound message loads the sender's session from the expiring store, applies
//! one transition and writes the result back. Session expiry is the only
//! timeout; a vanished session restarts the flow on the next message.

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::cache::ExpiringStore;
use crate::chat::dedupe::MessageDeduplicator;
use crate::chat::identity::UserDirectory;
use crate::chat::input::{
    is_valid_email, option_letter, parse_answer, parse_inbound, phone_key, pick_option,
    InboundMessage,
};
use crate::chat::state::{
    ConversationState, QuizItem, QuizRun, DIFFICULTIES, LEVELS, QUESTION_COUNTS, SKIP_UNIT,
};
use crate::chat::transport::ChatTransport;
use crate::services::catalog::CourseCatalog;
use crate::services::evaluation::{EvaluationEngine, SubmitMeta};
use crate::services::generation::{GenerateParams, GenerationOrchestrator, MAX_QUESTIONS};
use crate::services::generator::Difficulty;
use crate::types::{ExamdeskError, Result};

const START_COMMANDS: [&str; 2] = ["mcq", "/mcq"];
const STOP_COMMANDS: [&str; 2] = ["stop", "cancel"];

const MSG_SIGNUP: &str = "👋 Welcome! Please send your *email* to signup.";
const MSG_EMAIL_RECEIVED: &str = "✅ *Email received.* Now please send your *Name*.";
const MSG_SHORT_NAME: &str = "❌ Please send a valid name (min 2 chars).";
const MSG_EMAIL_TAKEN: &str =
    "❌ This email is already registered. Please send a different *email*.";
const MSG_PHONE_REGISTERED: &str = "✅ This number is already registered. Type *MCQ* to start.";
const MSG_QUIZ_CANCELED: &str = "🛑 MCQ canceled. Type *MCQ* to restart.";
const MSG_SELECTION_CANCELED: &str = "🛑 Selection canceled. Type *MCQ* to restart.";
const MSG_SESSION_RESET: &str = "⚠️ Your session was reset. Type *MCQ* to start again.";
const MSG_NO_QUESTION: &str = "❌ No question found. Type *MCQ* to restart.";
const MSG_BAD_ANSWER: &str = "❌ Please reply with A/B/C/D or 1/2/3/4.";
const MSG_ALREADY_ANSWERED: &str = "⚠️ You already answered this question.";
const MSG_ANSWER_FAILED: &str = "❌ Could not check your answer. Please try again.";
const MSG_NO_SUBJECTS: &str = "❌ No subjects found for this level. Try again.";
const MSG_NO_CHAPTERS: &str = "❌ No chapters found. Pick another subject.";
const MSG_INCOMPLETE: &str = "❌ Session incomplete. Type *MCQ* to restart.";
const MSG_GENERATION_FAILED: &str = "❌ Could not generate questions. Type *MCQ* to try again.";
const MSG_STILL_GENERATING: &str = "⏳ Still generating your questions. Please wait...";

const LABEL_LEVEL: &str = "📘 Select Your Level";
const LABEL_SUBJECT: &str = "📚 Select Subject";
const LABEL_CHAPTER: &str = "📖 Select Chapter";
const LABEL_UNIT: &str = "📂 Select Unit (or reply 'Skip')";
const LABEL_DIFFICULTY: &str = "⚡ Select Difficulty";
const LABEL_COUNT: &str = "🔢 Number of Questions";

fn session_key(from: &str) -> String {
    format!("chat:session:{}", from)
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

/// What was found under a sender's session key
enum StoredSession {
    Empty,
    Corrupt,
    Active(ConversationState),
}

/// Collaborators of the conversation machine
pub struct ChatDeps {
    pub transport: Arc<dyn ChatTransport>,
    pub catalog: Arc<dyn CourseCatalog>,
    pub orchestrator: Arc<GenerationOrchestrator>,
    pub engine: Arc<EvaluationEngine>,
    pub users: Arc<dyn UserDirectory>,
}

pub struct ConversationMachine {
    transport: Arc<dyn ChatTransport>,
    catalog: Arc<dyn CourseCatalog>,
    orchestrator: Arc<GenerationOrchestrator>,
    engine: Arc<EvaluationEngine>,
    users: Arc<dyn UserDirectory>,
    sessions: Arc<dyn ExpiringStore>,
    dedupe: MessageDeduplicator,
    session_ttl: Duration,
}

impl ConversationMachine {
    pub fn new(
        deps: ChatDeps,
        sessions: Arc<dyn ExpiringStore>,
        dedupe: Arc<dyn ExpiringStore>,
        session_ttl: Duration,
        dedupe_ttl: Duration,
    ) -> Self {
        Self {
            transport: deps.transport,
            catalog: deps.catalog,
            orchestrator: deps.orchestrator,
            engine: deps.engine,
            users: deps.users,
            dedupe: MessageDeduplicator::new(dedupe, dedupe_ttl),
            sessions,
            session_ttl,
        }
    }

    /// Handle one webhook delivery. Never fails; problems are logged.
    pub async fn handle_webhook(&self, body: &Value) {
        let Some(message) = parse_inbound(body) else {
            debug!("Ignoring webhook without a user message");
            return;
        };

        match self.dedupe.claim(&message).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(from = %message.from, "Duplicate delivery dropped");
                return;
            }
            Err(e) => {
                error!(from = %message.from, error = %e, "Dedupe check failed");
                return;
            }
        }

        if let Err(e) = self.handle_message(&message).await {
            error!(from = %message.from, error = %e, "Chat message handling failed");
        }
    }

    /// Apply one message to the sender's conversation
    pub async fn handle_message(&self, message: &InboundMessage) -> Result<()> {
        let from = message.from.as_str();
        let command = message.command();
        let stored = self.load_session(from).await?;

        if STOP_COMMANDS.contains(&command.as_str()) {
            match stored {
                StoredSession::Active(ConversationState::Quiz(_)) => {
                    self.clear_session(from).await?;
                    return self.send(from, MSG_QUIZ_CANCELED).await;
                }
                StoredSession::Active(_) | StoredSession::Corrupt => {
                    self.clear_session(from).await?;
                    return self.send(from, MSG_SELECTION_CANCELED).await;
                }
                StoredSession::Empty => {}
            }
        }

        if START_COMMANDS.contains(&command.as_str()) {
            return self.start(from).await;
        }

        let state = match stored {
            StoredSession::Empty => return self.idle(message).await,
            StoredSession::Corrupt => {
                warn!(from = %from, "Discarding corrupt chat session");
                self.clear_session(from).await?;
                return self.send(from, MSG_SESSION_RESET).await;
            }
            StoredSession::Active(state) => state,
        };

        debug!(from = %from, state = state.name(), "Chat transition");
        let text = message.text.as_str();

        match state {
            ConversationState::AwaitingName { email } => self.on_name(from, &email, text).await,
            ConversationState::Level { user_id } => self.on_level(from, user_id, text).await,
            ConversationState::Subject {
                user_id,
                level,
                subjects,
            } => self.on_subject(from, user_id, level, subjects, text).await,
            ConversationState::Chapter {
                user_id,
                level,
                subject,
                chapters,
            } => {
                self.on_chapter(from, user_id, level, subject, chapters, text)
                    .await
            }
            ConversationState::Unit {
                user_id,
                level,
                subject,
                chapter,
                units,
            } => {
                let mut options = units;
                options.push(SKIP_UNIT.to_string());
                let Some(choice) = pick_option(text, &options) else {
                    return self.send_options(from, LABEL_UNIT, &options).await;
                };
                let unit = (choice != SKIP_UNIT).then_some(choice);
                self.ask_difficulty(from, user_id, level, subject, chapter, unit)
                    .await
            }
            ConversationState::Difficulty {
                user_id,
                level,
                subject,
                chapter,
                unit,
            } => {
                let choices = owned(&DIFFICULTIES);
                let Some(difficulty) = pick_option(text, &choices)
                    .and_then(|d| d.parse::<Difficulty>().ok())
                else {
                    return self.send_options(from, LABEL_DIFFICULTY, &choices).await;
                };
                self.save_session(
                    from,
                    &ConversationState::Count {
                        user_id,
                        level,
                        subject,
                        chapter,
                        unit,
                        difficulty,
                    },
                )
                .await?;
                self.send_options(from, LABEL_COUNT, &owned(&QUESTION_COUNTS))
                    .await
            }
            ConversationState::Count {
                user_id,
                level,
                subject,
                chapter,
                unit,
                difficulty,
            } => {
                let Some(count) = parse_count(text) else {
                    return self
                        .send_options(from, LABEL_COUNT, &owned(&QUESTION_COUNTS))
                        .await;
                };
                let params = GenerateParams {
                    level,
                    subject,
                    chapter,
                    unit,
                    difficulty: difficulty.to_string(),
                    num_questions: count,
                };
                self.generate(from, user_id, params).await
            }
            ConversationState::Generating { .. } => self.send(from, MSG_STILL_GENERATING).await,
            ConversationState::Quiz(run) => self.on_answer(from, run, text).await,
        }
    }

    async fn start(&self, from: &str) -> Result<()> {
        match self.users.find_by_phone(&phone_key(from)).await? {
            Some(user) => {
                self.save_session(
                    from,
                    &ConversationState::Level {
                        user_id: user.user_id,
                    },
                )
                .await?;
                self.send_options(from, LABEL_LEVEL, &owned(&LEVELS)).await
            }
            None => {
                self.clear_session(from).await?;
                self.send(from, MSG_SIGNUP).await
            }
        }
    }

    /// No session: greet known users, walk unknown ones into signup
    async fn idle(&self, message: &InboundMessage) -> Result<()> {
        let from = message.from.as_str();
        if let Some(user) = self.users.find_by_phone(&phone_key(from)).await? {
            return self
                .send(from, &format!("👋 Hi {}!\n\nType *MCQ* to start.", user.name))
                .await;
        }

        if is_valid_email(&message.text) {
            self.save_session(
                from,
                &ConversationState::AwaitingName {
                    email: message.text.trim().to_lowercase(),
                },
            )
            .await?;
            return self.send(from, MSG_EMAIL_RECEIVED).await;
        }

        self.send(from, MSG_SIGNUP).await
    }

    async fn on_name(&self, from: &str, email: &str, text: &str) -> Result<()> {
        let name = text.trim();
        if name.chars().count() < 2 {
            return self.send(from, MSG_SHORT_NAME).await;
        }

        match self.users.register(name, email, &phone_key(from)).await {
            Ok(user) => {
                info!(user_id = %user.user_id, "Chat user registered");
                self.clear_session(from).await?;
                self.send(
                    from,
                    &format!("🎉 *Welcome, {}!* \n\nType *MCQ* to start.", user.name),
                )
                .await
            }
            Err(e) if e.is_duplicate() => {
                self.clear_session(from).await?;
                // A concurrent signup from this number may have won
                if self.users.find_by_phone(&phone_key(from)).await?.is_some() {
                    return self.send(from, MSG_PHONE_REGISTERED).await;
                }
                self.send(from, MSG_EMAIL_TAKEN).await
            }
            Err(e) => Err(e),
        }
    }

    async fn on_level(&self, from: &str, user_id: String, text: &str) -> Result<()> {
        let levels = owned(&LEVELS);
        let Some(level) = pick_option(text, &levels) else {
            return self.send_options(from, LABEL_LEVEL, &levels).await;
        };

        let subjects = listing("subjects", self.catalog.subjects(&level).await);
        if subjects.is_empty() {
            self.send(from, MSG_NO_SUBJECTS).await?;
            return self.send_options(from, LABEL_LEVEL, &levels).await;
        }

        self.save_session(
            from,
            &ConversationState::Subject {
                user_id,
                level,
                subjects: subjects.clone(),
            },
        )
        .await?;
        self.send_options(from, LABEL_SUBJECT, &subjects).await
    }

    async fn on_subject(
        &self,
        from: &str,
        user_id: String,
        level: String,
        subjects: Vec<String>,
        text: &str,
    ) -> Result<()> {
        let Some(subject) = pick_option(text, &subjects) else {
            return self.send_options(from, LABEL_SUBJECT, &subjects).await;
        };

        let chapters = listing("chapters", self.catalog.chapters(&level, &subject).await);
        if chapters.is_empty() {
            self.send(from, MSG_NO_CHAPTERS).await?;
            return self.send_options(from, LABEL_SUBJECT, &subjects).await;
        }

        self.save_session(
            from,
            &ConversationState::Chapter {
                user_id,
                level,
                subject,
                chapters: chapters.clone(),
            },
        )
        .await?;
        self.send_options(from, LABEL_CHAPTER, &chapters).await
    }

    async fn on_chapter(
        &self,
        from: &str,
        user_id: String,
        level: String,
        subject: String,
        chapters: Vec<String>,
        text: &str,
    ) -> Result<()> {
        let Some(chapter) = pick_option(text, &chapters) else {
            return self.send_options(from, LABEL_CHAPTER, &chapters).await;
        };

        let units = listing("units", self.catalog.units(&chapter).await);
        if units.is_empty() {
            return self
                .ask_difficulty(from, user_id, level, subject, chapter, None)
                .await;
        }

        let mut options = units.clone();
        options.push(SKIP_UNIT.to_string());
        self.save_session(
            from,
            &ConversationState::Unit {
                user_id,
                level,
                subject,
                chapter,
                units,
            },
        )
        .await?;
        self.send_options(from, LABEL_UNIT, &options).await
    }

    async fn ask_difficulty(
        &self,
        from: &str,
        user_id: String,
        level: String,
        subject: String,
        chapter: String,
        unit: Option<String>,
    ) -> Result<()> {
        self.save_session(
            from,
            &ConversationState::Difficulty {
                user_id,
                level,
                subject,
                chapter,
                unit,
            },
        )
        .await?;
        self.send_options(from, LABEL_DIFFICULTY, &owned(&DIFFICULTIES))
            .await
    }

    async fn generate(&self, from: &str, user_id: String, params: GenerateParams) -> Result<()> {
        if params.validate().is_err() {
            self.clear_session(from).await?;
            return self.send(from, MSG_INCOMPLETE).await;
        }

        let summary = format!(
            "✅ Generating MCQ...\n📘 Level: {}\n📚 Subject: {}\n📖 Chapter: {}\n📂 Unit: {}\n⚡ Difficulty: {}\n🔢 Questions: {}\n\nPlease wait...",
            params.level,
            params.subject,
            params.chapter,
            params.unit.as_deref().unwrap_or("N/A"),
            params.difficulty,
            params.num_questions
        );
        self.save_session(
            from,
            &ConversationState::Generating {
                user_id: user_id.clone(),
            },
        )
        .await?;
        self.send(from, &summary).await?;

        let result = match self.orchestrator.generate(&user_id, params).await {
            Ok(result) if !result.items.is_empty() => result,
            Ok(_) => {
                self.clear_session(from).await?;
                return self.send(from, MSG_GENERATION_FAILED).await;
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Chat generation rejected");
                self.clear_session(from).await?;
                return self.send(from, &generation_failure_text(&e)).await;
            }
        };

        let items = result
            .items
            .into_iter()
            .map(|item| QuizItem {
                item_id: item.item_id,
                question: item.question,
                options: item.options,
            })
            .collect();
        let run = QuizRun::new(user_id, items);
        let state = ConversationState::Quiz(run.clone());
        if !state.is_valid() {
            // Generator items that cannot be shown as a quiz
            self.clear_session(from).await?;
            return self.send(from, MSG_GENERATION_FAILED).await;
        }
        self.save_session(from, &state).await?;

        self.send(
            from,
            &format!(
                "🎯 *Quiz Started!*\n📊 {} Questions\n\nType *STOP* to exit.\n\nLet's go! 🚀",
                run.total
            ),
        )
        .await?;
        self.send_question(from, &run).await
    }

    async fn on_answer(&self, from: &str, mut run: QuizRun, text: &str) -> Result<()> {
        let Some(item) = run.current().cloned() else {
            self.clear_session(from).await?;
            return self.send(from, MSG_NO_QUESTION).await;
        };

        let Some(letter) = parse_answer(text, &item.options) else {
            return self.send(from, MSG_BAD_ANSWER).await;
        };

        match self
            .engine
            .submit(
                &run.user_id,
                &item.item_id,
                &letter.to_string(),
                SubmitMeta::default(),
            )
            .await
        {
            Ok(outcome) => {
                let record = &outcome.evaluation;
                if record.is_correct {
                    run.correct += 1;
                }
                let mut feedback = format!(
                    "{}\nCorrect answer: *{}*\n",
                    if record.is_correct {
                        "✅ *Correct!*"
                    } else {
                        "❌ *Incorrect.*"
                    },
                    record.correct_answer
                );
                if !outcome.explanation.trim().is_empty() {
                    feedback.push_str(&format!("\n📖 {}", outcome.explanation.trim()));
                }
                self.send(from, &feedback).await?;
            }
            Err(e) if e.is_duplicate() => {
                self.send(from, MSG_ALREADY_ANSWERED).await?;
            }
            Err(e @ ExamdeskError::LimitExceeded { .. }) => {
                self.clear_session(from).await?;
                return self
                    .send(from, &format!("⛔ {}\n\nType *MCQ* to try again later.", e))
                    .await;
            }
            Err(e) => {
                error!(user_id = %run.user_id, item_id = %item.item_id, error = %e, "Chat answer submission failed");
                return self.send(from, MSG_ANSWER_FAILED).await;
            }
        }

        run.index += 1;
        if run.is_finished() {
            self.clear_session(from).await?;
            info!(user_id = %run.user_id, correct = run.correct, total = run.total, "Chat quiz completed");
            return self
                .send(
                    from,
                    &format!(
                        "🎉 *Quiz Complete!*\n📊 Score: {}/{}\n🏆 {}%\n\nType *MCQ* to start again.",
                        run.correct,
                        run.total,
                        run.percentage()
                    ),
                )
                .await;
        }

        self.save_session(from, &ConversationState::Quiz(run.clone()))
            .await?;
        self.send_question(from, &run).await
    }

    async fn send_question(&self, from: &str, run: &QuizRun) -> Result<()> {
        let Some(item) = run.current() else {
            return self.send(from, MSG_NO_QUESTION).await;
        };
        self.send(from, &render_question(item, run.index, run.total))
            .await
    }

    async fn load_session(&self, from: &str) -> Result<StoredSession> {
        Ok(match self.sessions.get(&session_key(from)).await? {
            None => StoredSession::Empty,
            Some(raw) => match ConversationState::from_json(&raw) {
                Some(state) => StoredSession::Active(state),
                None => StoredSession::Corrupt,
            },
        })
    }

    async fn save_session(&self, from: &str, state: &ConversationState) -> Result<()> {
        self.sessions
            .set(&session_key(from), state.to_json()?, self.session_ttl)
            .await
    }

    async fn clear_session(&self, from: &str) -> Result<()> {
        self.sessions.remove(&session_key(from)).await
    }

    async fn send(&self, to: &str, text: &str) -> Result<()> {
        self.transport.send_text(to, text).await
    }

    async fn send_options(&self, to: &str, label: &str, options: &[String]) -> Result<()> {
        self.transport.send_options(to, label, options).await
    }
}

/// A catalog listing, treating a failed lookup as an empty one
fn listing(what: &str, result: Result<Vec<String>>) -> Vec<String> {
    match result {
        Ok(values) => values
            .into_iter()
            .filter(|v| !v.trim().is_empty())
            .collect(),
        Err(e) => {
            warn!(listing = what, error = %e, "Catalog lookup failed");
            Vec::new()
        }
    }
}

/// Offered count, or any integer within the generation bounds
fn parse_count(text: &str) -> Option<i64> {
    if let Some(choice) = pick_option(text, &owned(&QUESTION_COUNTS)) {
        return choice.parse().ok();
    }
    text.trim()
        .parse::<i64>()
        .ok()
        .filter(|n| (1..=MAX_QUESTIONS).contains(n))
}

fn generation_failure_text(err: &ExamdeskError) -> String {
    match err {
        ExamdeskError::Forbidden(_) => format!(
            "🔒 {}. This chapter is available on the Pro plan.\n\nType *MCQ* to pick another chapter.",
            err
        ),
        ExamdeskError::LimitExceeded { .. } => {
            format!("⛔ {}\n\nType *MCQ* to try again later.", err)
        }
        _ => MSG_GENERATION_FAILED.to_string(),
    }
}

fn render_question(item: &QuizItem, index: usize, total: usize) -> String {
    let options = item
        .options
        .iter()
        .enumerate()
        .map(|(i, option)| {
            format!(
                "{}. {}",
                option_letter(i).unwrap_or('?'),
                option
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "*Q{}/{}*\n{}\n\n{}\n\nReply with A/B/C/D or 1/2/3/4\nType *STOP* to exit.",
        index + 1,
        total,
        item.question,
        options
    )
}
