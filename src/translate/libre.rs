//! LibreTranslate-compatible HTTP backend.
//! `POST {base}/translate` with `{q, source, target, format, api_key?}`,
//! answered by `{translatedText}`. One request per call, no retries: the
//! gate and the per-call timeout own backpressure and time bounds.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{TextTranslator, TranslateError};
use crate::config::TranslateConfig;

pub struct LibreTranslateClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    target_lang: String,
}

#[derive(Serialize)]
struct TranslateBody<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Deserialize)]
struct TranslateReply {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

impl LibreTranslateClient {
    pub fn new(
        base_url: &str,
        target_lang: &str,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, TranslateError> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(request_timeout)
            .build()
            .map_err(|e| TranslateError::Api(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            target_lang: target_lang.to_string(),
        })
    }

    /// Build from config; `None` when no backend URL is configured.
    pub fn from_config(config: &TranslateConfig) -> Option<Result<Self, TranslateError>> {
        let url = config.backend_url.as_deref()?;
        // The pipeline enforces the real per-call deadline; this only keeps
        // abandoned sockets from lingering.
        let request_timeout = config.per_call_timeout.max(Duration::from_secs(1)) * 2;
        Some(Self::new(
            url,
            &config.target_lang,
            config.backend_api_key.clone(),
            request_timeout,
        ))
    }

    fn endpoint(&self) -> String {
        format!("{}/translate", self.base_url)
    }
}

#[async_trait]
impl TextTranslator for LibreTranslateClient {
    async fn translate(&self, text: &str) -> Result<String, TranslateError> {
        if text.is_empty() {
            return Err(TranslateError::InvalidInput("empty text".into()));
        }
        let body = TranslateBody {
            q: text,
            source: "auto",
            target: &self.target_lang,
            format: "text",
            api_key: self.api_key.as_deref(),
        };

        let resp = self
            .http
            .post(self.endpoint())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TranslateError::Timeout
                } else {
                    TranslateError::Api(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "translation backend rejected request");
            return Err(TranslateError::Status {
                status: status.as_u16(),
                body: body_text.chars().take(200).collect(),
            });
        }

        let reply: TranslateReply = resp
            .json()
            .await
            .map_err(|e| TranslateError::Api(format!("malformed reply: {e}")))?;
        Ok(reply.translated_text)
    }

    fn name(&self) -> &str {
        "libretranslate"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_shape() {
        let body = TranslateBody {
            q: "Привет",
            source: "auto",
            target: "en",
            format: "text",
            api_key: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"q": "Привет", "source": "auto", "target": "en", "format": "text"})
        );
    }

    #[test]
    fn reply_parsing() {
        let reply: TranslateReply =
            serde_json::from_str(r#"{"translatedText":"Hello","detectedLanguage":{"language":"ru"}}"#)
                .unwrap();
        assert_eq!(reply.translated_text, "Hello");
    }

    #[test]
    fn from_config_requires_url() {
        assert!(LibreTranslateClient::from_config(&TranslateConfig::default()).is_none());
        let cfg = TranslateConfig {
            backend_url: Some("http://localhost:5000/".into()),
            ..TranslateConfig::default()
        };
        let client = LibreTranslateClient::from_config(&cfg).unwrap().unwrap();
        assert_eq!(client.endpoint(), "http://localhost:5000/translate");
        assert_eq!(client.name(), "libretranslate");
    }
}
