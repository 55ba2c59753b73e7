//! Course catalog client (levels → subjects → chapters → units).

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::types::{ExamdeskError, Result};

#[async_trait]
pub trait CourseCatalog: Send + Sync {
    async fn subjects(&self, level: &str) -> Result<Vec<String>>;

    async fn chapters(&self, level: &str, subject: &str) -> Result<Vec<String>>;

    async fn units(&self, chapter: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Deserialize)]
struct UnitRow {
    #[serde(default)]
    unit_name: String,
}

/// Catalog served by the content API under `/api/data`
pub struct HttpCatalog {
    client: Client,
    base_url: String,
}

impl HttpCatalog {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("examdesk/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn fetch<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>> {
        let query = serde_urlencoded::to_string(query)
            .map_err(|e| ExamdeskError::Internal(format!("Bad catalog query: {}", e)))?;
        let url = format!("{}/api/data/{}?{}", self.base_url, path, query);
        debug!(url = %url, "Fetching catalog");

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ExamdeskError::Transport(format!(
                "Catalog {} returned {}",
                path,
                response.status()
            )));
        }
        Ok(response.json::<Vec<T>>().await?)
    }
}

fn clean(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

#[async_trait]
impl CourseCatalog for HttpCatalog {
    async fn subjects(&self, level: &str) -> Result<Vec<String>> {
        let subjects = self.fetch::<String>("subjects", &[("level", level)]).await?;
        Ok(clean(subjects))
    }

    async fn chapters(&self, level: &str, subject: &str) -> Result<Vec<String>> {
        let chapters = self
            .fetch::<String>("chapters", &[("level", level), ("subject", subject)])
            .await?;
        Ok(clean(chapters))
    }

    async fn units(&self, chapter: &str) -> Result<Vec<String>> {
        let rows = self
            .fetch::<UnitRow>("units", &[("chapter_name", chapter)])
            .await?;
        Ok(clean(rows.into_iter().map(|r| r.unit_name).collect()))
    }
}
