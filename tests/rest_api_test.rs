//! REST API integration tests
//!
//! Serves the router on an ephemeral port over in-memory stores and talks
//! to it with a real HTTP client.

mod common;

use reqwest::StatusCode;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use examdesk::auth::TokenInput;
use examdesk::server::{serve, AppState};

use common::{build_app, USER_ID};

// ============================================================================
// Test Server
// ============================================================================

struct TestServer {
    addr: SocketAddr,
    token: String,
    client: reqwest::Client,
    stop: Option<oneshot::Sender<()>>,
}

impl TestServer {
    async fn start(state: Arc<AppState>) -> Self {
        let token = state
            .jwt
            .generate_token(TokenInput {
                user_id: USER_ID.into(),
                email: "ravi@example.com".into(),
            })
            .unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = serve(state, listener, async {
                let _ = stopped.await;
            })
            .await;
        });

        Self {
            addr,
            token,
            client: reqwest::Client::new(),
            stop: Some(stop),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let resp = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status();
        (status, resp.json().await.unwrap())
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

fn generate_body(chapter: &str, count: i64) -> Value {
    json!({
        "level": "Final",
        "subject": "taxation",
        "chapter": chapter,
        "difficulty": "easy",
        "numQuestions": count,
    })
}

// ============================================================================
// Generate and Submit
// ============================================================================

#[tokio::test]
async fn test_generate_then_submit() {
    let app = build_app().await;
    let server = TestServer::start(app.state.clone()).await;

    // Free plan allows five questions a day, so ten is cut down
    let (status, body) = server
        .post("/api/mcq/generate", generate_body("GST", 10))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["plan"], "free");
    assert_eq!(body["requested"], 10);
    assert_eq!(body["count"], 5);

    let items = body["mcqs"].as_array().unwrap();
    assert_eq!(items.len(), 5);
    assert!(items.iter().all(|item| item.get("correctAnswer").is_none()));
    let first_id = items[0]["mcqId"].as_str().unwrap().to_string();

    let (status, body) = server
        .post(
            "/api/mcq/submit",
            json!({ "mcqId": first_id, "userAnswer": "b", "timeSpent": 12 }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isCorrect"], true);
    assert_eq!(body["score"], 100);
    assert_eq!(body["correctAnswer"], "B");
    assert_eq!(body["explanation"], "Option two is right");
    assert_eq!(body["limits"]["evaluations"]["daily"]["used"], 1);

    let (status, body) = server
        .post(
            "/api/mcq/submit",
            json!({ "mcqId": first_id, "userAnswer": "C" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "This MCQ has already been submitted");

    // The day's generation quota is spent
    let (status, body) = server
        .post("/api/mcq/generate", generate_body("GST", 1))
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "Daily generation limit reached");
    assert_eq!(body["limits"]["daily"]["remaining"], 0);
}

#[tokio::test]
async fn test_generate_rejections() {
    let app = build_app().await;
    let server = TestServer::start(app.state.clone()).await;

    let (status, body) = server
        .post("/api/mcq/generate", generate_body("Transfer Pricing", 3))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);

    let (status, _) = server
        .post("/api/mcq/generate", generate_body("GST", 0))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = server
        .post("/api/mcq/submit", json!({ "mcqId": "missing", "userAnswer": "A" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Nothing reached the generator
    assert!(app.generator.requests.lock().unwrap().is_empty());
}

// ============================================================================
// Reports
// ============================================================================

#[tokio::test]
async fn test_reports_after_attempt() {
    let app = build_app().await;
    let server = TestServer::start(app.state.clone()).await;

    let (status, body) = server.get("/api/mcq/last-attempted-list").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "No MCQ attempted yet");

    let (_, body) = server
        .post("/api/mcq/generate", generate_body("GST", 2))
        .await;
    let item_id = body["mcqs"][1]["mcqId"].as_str().unwrap().to_string();
    server
        .post(
            "/api/mcq/submit",
            json!({ "mcqId": item_id, "userAnswer": "A" }),
        )
        .await;

    let (status, body) = server.get("/api/mcq/dashboard").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["subscription"], "free");
    assert_eq!(body["stats"]["totalEvaluations"], 1);
    assert_eq!(body["stats"]["correctAnswers"], 0);
    assert_eq!(body["limits"]["generation"]["daily"]["used"], 2);

    let (status, body) = server.get("/api/mcq/results?subject=taxation").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["data"][0]["mcqId"], item_id);
    assert_eq!(body["data"][0]["isCorrect"], false);

    let (status, body) = server.get("/api/mcq/last-attempted").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].is_object());

    let (status, body) = server.get("/api/mcq/last-attempted-list?limit=5").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);

    let (status, body) = server.get("/api/mcq/last-attempted-list?limit=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Count must be 1-50");

    let (status, body) = server.get("/api/mcq/progress?limit=500").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Limit must be 1-100");
}

// ============================================================================
// Routing and Auth
// ============================================================================

#[tokio::test]
async fn test_missing_token_rejected() {
    let app = build_app().await;
    let server = TestServer::start(app.state.clone()).await;

    let resp = server
        .client
        .get(server.url("/api/mcq/dashboard"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "Missing bearer token");
}

#[tokio::test]
async fn test_health_and_unknown_routes() {
    let app = build_app().await;
    let server = TestServer::start(app.state.clone()).await;

    let (status, body) = server.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["healthy"], true);
    assert_eq!(body["storage"], "memory");

    let (status, body) = server.get("/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);

    let (status, body) = server.get("/api/mcq/nothing-here").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);

    let resp = server
        .client
        .request(reqwest::Method::OPTIONS, server.url("/api/mcq/generate"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()["access-control-allow-origin"].to_str().unwrap(),
        "*"
    );
}

#[tokio::test]
async fn test_webhook_always_acknowledged() {
    let app = build_app().await;
    let server = TestServer::start(app.state.clone()).await;

    let resp = server
        .client
        .post(server.url("/webhook"))
        .body("not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "success": true }));
}
