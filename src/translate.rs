//! Relay to LibreTranslate-compatible translation servers.
//!
//! Each text is posted to `<server>/translate` on a randomly chosen upstream.
//! Results come back in input order, one per text.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::TranslateConfig;

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("no translation servers configured")]
    NoServers,

    #[error("translation request to {server} failed: {source}")]
    Request {
        server: String,
        source: reqwest::Error,
    },
}

#[derive(Debug, Serialize)]
struct UpstreamRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpstreamResponse {
    translated_text: String,
}

#[derive(Clone)]
pub struct TranslationRelay {
    client: reqwest::Client,
    servers: Vec<String>,
    source: String,
    target: String,
}

impl TranslationRelay {
    pub fn new(config: &TranslateConfig) -> Result<Self, TranslateError> {
        if config.servers.is_empty() {
            return Err(TranslateError::NoServers);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|source| TranslateError::Request {
                server: String::new(),
                source,
            })?;

        Ok(Self {
            client,
            servers: config
                .servers
                .iter()
                .map(|s| s.trim_end_matches('/').to_string())
                .collect(),
            source: config.source.clone(),
            target: config.target.clone(),
        })
    }

    /// Translate every text. Fails as a whole if any request fails.
    pub async fn translate_all(&self, texts: &[String]) -> Result<Vec<String>, TranslateError> {
        let mut translated = Vec::with_capacity(texts.len());
        for text in texts {
            translated.push(self.translate(text).await?);
        }
        Ok(translated)
    }

    pub async fn translate(&self, text: &str) -> Result<String, TranslateError> {
        let server = self.pick_server();
        let request_err = |source| TranslateError::Request {
            server: server.to_string(),
            source,
        };

        let response: UpstreamResponse = self
            .client
            .post(format!("{server}/translate"))
            .json(&UpstreamRequest {
                q: text,
                source: &self.source,
                target: &self.target,
                format: "text",
            })
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(request_err)?
            .json()
            .await
            .map_err(request_err)?;

        Ok(response.translated_text)
    }

    fn pick_server(&self) -> &str {
        let idx = rand::rng().random_range(0..self.servers.len());
        &self.servers[idx]
    }
}
