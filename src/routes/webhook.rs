//! Chat webhook (`POST /webhook`, `POST /wati/webhook`)
//!
//! The provider gets its 200 before the message is processed. Processing runs
//! on its own task so a slow generator call never holds the webhook open and
//! triggers a redelivery.

use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use crate::routes::response::{json_response, read_body, FullBody};
use crate::server::AppState;

pub async fn handle_webhook(req: Request<Incoming>, state: Arc<AppState>) -> Response<FullBody> {
    let body = match read_body(req).await {
        Ok(bytes) => serde_json::from_slice::<Value>(&bytes).ok(),
        Err(e) => {
            warn!(error = %e, "Unreadable webhook body");
            None
        }
    };

    match body {
        Some(payload) => {
            let chat = Arc::clone(&state.chat);
            tokio::spawn(async move {
                chat.handle_webhook(&payload).await;
            });
        }
        None => warn!("Webhook body is not JSON; acknowledged without processing"),
    }

    json_response(StatusCode::OK, &json!({ "success": true }))
}
