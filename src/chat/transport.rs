//! Outbound chat messages.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

use crate::types::{ExamdeskError, Result};

/// Sends messages to a conversation identity
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, to: &str, text: &str) -> Result<()>;

    /// Send a labelled list the user can answer by number or text
    async fn send_options(&self, to: &str, label: &str, options: &[String]) -> Result<()> {
        self.send_text(to, &render_options(label, options)).await
    }
}

pub fn render_options(label: &str, options: &[String]) -> String {
    let lines = options
        .iter()
        .enumerate()
        .map(|(i, option)| format!("{}. {}", i + 1, option))
        .collect::<Vec<_>>()
        .join("\n");
    format!("*{}*\n\n{}\n\nReply with option number or text.", label, lines)
}

#[derive(Debug, Serialize)]
struct ScriptMessage<'a> {
    to: &'a str,
    content_type: &'static str,
    text: &'a str,
}

/// Convonite script-message API
pub struct ConvoniteTransport {
    client: Client,
    base_url: String,
    api_key: String,
    channel_id: String,
}

impl ConvoniteTransport {
    pub fn new(base_url: impl Into<String>, api_key: String, channel_id: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("examdesk/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            channel_id,
        }
    }
}

#[async_trait]
impl ChatTransport for ConvoniteTransport {
    async fn send_text(&self, to: &str, text: &str) -> Result<()> {
        let url = format!("{}/v1/script_messages", self.base_url);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("x-channel-id", &self.channel_id)
            .json(&ScriptMessage {
                to,
                content_type: "text",
                text,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(to = %to, status = %status, body = %body, "Chat send failed");
            return Err(ExamdeskError::Transport(format!("Chat send returned {}", status)));
        }

        debug!(to = %to, "Chat message sent");
        Ok(())
    }
}

/// Transport that only logs, used when no chat credentials are configured
pub struct LogTransport;

#[async_trait]
impl ChatTransport for LogTransport {
    async fn send_text(&self, to: &str, text: &str) -> Result<()> {
        tracing::info!(to = %to, text = %text, "Chat message (not sent)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_options() {
        let rendered = render_options(
            "📘 Select Your Level",
            &["Foundation".to_string(), "Final".to_string()],
        );
        assert_eq!(
            rendered,
            "*📘 Select Your Level*\n\n1. Foundation\n2. Final\n\nReply with option number or text."
        );
    }

    #[test]
    fn test_payload_shape() {
        let payload = serde_json::to_value(ScriptMessage {
            to: "919876543210",
            content_type: "text",
            text: "hi",
        })
        .unwrap();
        assert_eq!(payload["content_type"], "text");
        assert_eq!(payload["to"], "919876543210");
    }
}
