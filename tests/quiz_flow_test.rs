//! Chat quiz flow integration tests
//!
//! Drives the conversation machine through webhook payloads over the fully
//! wired application state and checks what reaches the transport and the
//! reporting views.

mod common;

use serde_json::json;
use uuid::Uuid;

use common::{build_app, PHONE, USER_ID};

// ============================================================================
// Helpers
// ============================================================================

/// Deliver `text` as a fresh message. Each delivery gets its own id, since
/// id-less repeats of the same text within seconds are treated as redeliveries.
async fn say(app: &common::TestApp, text: &str) -> Vec<String> {
    app.state
        .chat
        .handle_webhook(&json!({
            "id": Uuid::new_v4().to_string(),
            "waId": PHONE,
            "text": text,
        }))
        .await;
    app.transport.take()
}

// ============================================================================
// Full quiz
// ============================================================================

#[tokio::test]
async fn test_quiz_with_unit_selection() {
    let app = build_app().await;

    let sent = say(&app, "MCQ").await;
    assert!(sent[0].starts_with("*📘 Select Your Level*"));

    let sent = say(&app, "Final").await;
    assert!(sent[0].contains("1. accounting\n2. taxation"));

    let sent = say(&app, "2").await;
    assert!(sent[0].contains("1. GST\n2. Transfer Pricing"));

    let sent = say(&app, "gst").await;
    assert!(sent[0].starts_with("*📂 Select Unit (or reply 'Skip')*"));
    assert!(sent[0].contains("3. Skip"));

    let sent = say(&app, "Returns").await;
    assert!(sent[0].starts_with("*⚡ Select Difficulty*"));

    let sent = say(&app, "medium").await;
    assert!(sent[0].starts_with("*🔢 Number of Questions*"));

    let sent = say(&app, "1").await;
    assert_eq!(sent.len(), 3);
    assert!(sent[0].contains("📂 Unit: Returns"));
    assert!(sent[2].starts_with("*Q1/1*\nGST question 1"));

    {
        let requests = app.generator.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].user_id, USER_ID);
        assert_eq!(requests[0].unit_name, "Returns");
        assert_eq!(requests[0].num_questions, 1);
    }

    let sent = say(&app, "2").await;
    assert_eq!(
        sent[0],
        "✅ *Correct!*\nCorrect answer: *B*\n\n📖 Option two is right"
    );
    assert_eq!(
        sent[1],
        "🎉 *Quiz Complete!*\n📊 Score: 1/1\n🏆 100%\n\nType *MCQ* to start again."
    );

    // Answers given over chat show up in the REST reports
    let dashboard = app.state.reports.dashboard(USER_ID).await.unwrap();
    assert_eq!(dashboard.stats.total_evaluations, 1);
    assert_eq!(dashboard.stats.correct_answers, 1);
}

#[tokio::test]
async fn test_stop_then_restart() {
    let app = build_app().await;

    say(&app, "mcq").await;
    say(&app, "Final").await;
    let sent = say(&app, "cancel").await;
    assert_eq!(sent, vec!["🛑 Selection canceled. Type *MCQ* to restart."]);

    // Without a session a known user gets the greeting hint
    let sent = say(&app, "hello").await;
    assert!(sent[0].starts_with("👋 Hi Ravi!"));

    let sent = say(&app, "/mcq").await;
    assert!(sent[0].starts_with("*📘 Select Your Level*"));
}

// ============================================================================
// Webhook filtering
// ============================================================================

#[tokio::test]
async fn test_owner_and_status_events_ignored() {
    let app = build_app().await;

    app.state
        .chat
        .handle_webhook(&json!({ "waId": PHONE, "text": "mcq", "isOwner": true }))
        .await;
    app.state
        .chat
        .handle_webhook(&json!({ "waId": PHONE, "text": "mcq", "eventType": "sentMessageDELIVERED" }))
        .await;
    app.state.chat.handle_webhook(&json!("not an object")).await;

    assert!(app.transport.take().is_empty());
}

#[tokio::test]
async fn test_redelivered_message_handled_once() {
    let app = build_app().await;
    let payload = json!({ "id": "wamid.42", "waId": PHONE, "text": "mcq" });

    app.state.chat.handle_webhook(&payload).await;
    app.state.chat.handle_webhook(&payload).await;

    assert_eq!(app.transport.take().len(), 1);
}

// ============================================================================
// Signup
// ============================================================================

#[tokio::test]
async fn test_unknown_number_signs_up() {
    let app = build_app().await;
    let stranger = "15550001111";
    let send = |text: &'static str| {
        let state = app.state.clone();
        async move {
            state
                .chat
                .handle_webhook(&json!({
                    "id": Uuid::new_v4().to_string(),
                    "from": stranger,
                    "text": text,
                }))
                .await
        }
    };

    send("mcq").await;
    assert_eq!(
        app.transport.take(),
        vec!["👋 Welcome! Please send your *email* to signup."]
    );

    send("New.Person@Example.com").await;
    assert_eq!(
        app.transport.take(),
        vec!["✅ *Email received.* Now please send your *Name*."]
    );

    send("Priya").await;
    let sent = app.transport.take();
    assert!(sent[0].contains("Priya"));

    send("mcq").await;
    let sent = app.transport.take();
    assert!(sent[0].starts_with("*📘 Select Your Level*"));
}
