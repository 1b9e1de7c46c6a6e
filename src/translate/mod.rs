//! Translation pipeline: backend adapter trait, failure taxonomy, and the
//! process-wide service that owns the cache, gate, and worker pool.

pub mod batch;
pub mod cache;
pub mod libre;
pub mod normalize;
pub mod single;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::config::{ConfigError, TranslateConfig};
use crate::gate::ConcurrencyGate;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::worker::WorkerPool;
use cache::TranslationCache;
use normalize::ScriptDetector;

pub use batch::BatchOutcome;
pub use single::FieldOutcome;

/// External text-translation capability. Latency is unbounded and calls may
/// fail; the pipeline only invokes it while holding a gate permit.
#[async_trait]
pub trait TextTranslator: Send + Sync {
    async fn translate(&self, text: &str) -> Result<String, TranslateError>;

    fn name(&self) -> &str {
        "backend"
    }
}

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("API error: {0}")]
    Api(String),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("translation timeout")]
    Timeout,
    #[error("translation cancelled")]
    Cancelled,
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl TranslateError {
    /// Short category used in user-facing notices; never includes payloads.
    pub fn category(&self) -> &'static str {
        match self {
            TranslateError::Api(_) => "ApiError",
            TranslateError::Status { .. } => "HttpStatus",
            TranslateError::Timeout => "Timeout",
            TranslateError::Cancelled => "Cancelled",
            TranslateError::InvalidInput(_) => "InvalidInput",
        }
    }
}

/// Why a field kept its original text. None of these are fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FallbackReason {
    LengthExceeded { chars: usize, limit: usize },
    GateSaturated,
    Timeout,
    EmptyResult,
    ServiceFailure(&'static str),
    Unavailable,
    Disabled,
    NotNeeded,
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FallbackReason::LengthExceeded { chars, limit } => {
                write!(f, "too long ({chars} characters, limit {limit})")
            }
            FallbackReason::GateSaturated => f.write_str("translator overloaded"),
            FallbackReason::Timeout => f.write_str("timed out"),
            FallbackReason::EmptyResult => f.write_str("empty response"),
            FallbackReason::ServiceFailure(category) => write!(f, "service failure: {category}"),
            FallbackReason::Unavailable => f.write_str("translator unavailable"),
            FallbackReason::Disabled => f.write_str("translation disabled"),
            FallbackReason::NotNeeded => f.write_str("no translation needed"),
        }
    }
}

impl FallbackReason {
    /// Human-readable notice for `field`, or `None` for silent pass-through.
    pub fn notice(&self, field: &str) -> Option<String> {
        let msg = match self {
            FallbackReason::LengthExceeded { chars, limit } => format!(
                "Translation skipped: field '{field}' is too long ({chars} characters, limit {limit})."
            ),
            FallbackReason::GateSaturated => {
                format!("Translation skipped: translator overloaded (field '{field}').")
            }
            FallbackReason::Timeout => format!(
                "Translation timed out for field '{field}'. Using the original text."
            ),
            FallbackReason::EmptyResult => {
                format!("Translation failed: empty response (field '{field}').")
            }
            FallbackReason::ServiceFailure(category) => format!(
                "Translation failed for field '{field}': {category}. Using the original text."
            ),
            FallbackReason::Unavailable => {
                format!("Translation skipped: translator unavailable (field '{field}').")
            }
            FallbackReason::Disabled | FallbackReason::NotNeeded => return None,
        };
        Some(msg)
    }
}

/// Process-lifetime owner of the shared pipeline state. Build once at
/// startup and hand out `Arc` clones; concurrent runs compete for the same
/// gate and pool.
pub struct TranslationService {
    config: TranslateConfig,
    detector: ScriptDetector,
    cache: Arc<TranslationCache>,
    gate: Arc<ConcurrencyGate>,
    pool: Arc<WorkerPool>,
    backend: Option<Arc<dyn TextTranslator>>,
    metrics: Arc<MetricsRegistry>,
}

impl TranslationService {
    pub fn new(
        config: TranslateConfig,
        backend: Option<Arc<dyn TextTranslator>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let detector = ScriptDetector::new(&config.source_script)
            .map_err(|_| ConfigError::InvalidScript(config.source_script.clone()))?;
        let cache = Arc::new(TranslationCache::new(
            config.cache_max_entries,
            config.cache_max_bytes,
            config.cache_ttl,
        ));
        let gate = Arc::new(ConcurrencyGate::new(config.max_concurrency));
        let pool = Arc::new(WorkerPool::new(config.max_concurrency));

        info!(
            max_concurrency = config.max_concurrency,
            per_call_timeout_ms = config.per_call_timeout.as_millis() as u64,
            global_budget_ms = config.global_budget.as_millis() as u64,
            backend = backend.as_ref().map(|b| b.name()).unwrap_or("none"),
            "translation service ready"
        );

        Ok(Self {
            config,
            detector,
            cache,
            gate,
            pool,
            backend,
            metrics: Arc::new(MetricsRegistry::new()),
        })
    }

    pub fn config(&self) -> &TranslateConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<TranslationCache> {
        &self.cache
    }

    pub fn gate(&self) -> &Arc<ConcurrencyGate> {
        &self.gate
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn usage(&self) -> UsageCounters {
        UsageCounters {
            translate_calls: self.metrics.counter(metric_names::TRANSLATE_CALLS),
            translate_chars: self.metrics.counter(metric_names::TRANSLATE_CHARS),
            cache_hits: self.metrics.counter(metric_names::CACHE_HITS),
            cache_misses: self.metrics.counter(metric_names::CACHE_MISSES),
        }
    }

    /// Cancel every call still running on the pool.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    /// Pass-through check shared by the single and batch paths.
    /// Returns the text that would be sent for translation, or the reason it
    /// is left alone.
    fn screen<'a>(&self, raw: &'a str) -> Result<&'a str, FallbackReason> {
        let text = normalize::unwrap_choice_label(raw);
        if text.trim().is_empty()
            || normalize::is_url_like(text)
            || !self.detector.has_source_script(text)
        {
            return Err(FallbackReason::NotNeeded);
        }
        if !self.config.translation_enabled {
            return Err(FallbackReason::Disabled);
        }
        let chars = text.chars().count();
        if chars > self.config.max_chars {
            return Err(FallbackReason::LengthExceeded {
                chars,
                limit: self.config.max_chars,
            });
        }
        Ok(text)
    }

    fn record_call(&self, text: &str) {
        self.metrics.incr(metric_names::TRANSLATE_CALLS, 1);
        self.metrics
            .incr(metric_names::TRANSLATE_CHARS, text.chars().count() as u64);
    }
}

/// Metadata-only usage snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageCounters {
    pub translate_calls: u64,
    pub translate_chars: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_reasons_have_no_notice() {
        assert!(FallbackReason::Disabled.notice("a").is_none());
        assert!(FallbackReason::NotNeeded.notice("a").is_none());
    }

    #[test]
    fn notices_name_the_field() {
        let n = FallbackReason::ServiceFailure(TranslateError::Timeout.category())
            .notice("style")
            .unwrap();
        assert!(n.contains("'style'"));
        assert!(n.contains("Timeout"));
        let n = FallbackReason::LengthExceeded { chars: 10, limit: 5 }
            .notice("x")
            .unwrap();
        assert!(n.contains("10 characters, limit 5"));
    }

    #[test]
    fn display_is_the_short_reason() {
        assert_eq!(FallbackReason::Timeout.to_string(), "timed out");
        assert_eq!(
            FallbackReason::ServiceFailure("HttpStatus").to_string(),
            "service failure: HttpStatus"
        );
        assert_eq!(
            FallbackReason::LengthExceeded { chars: 9, limit: 4 }.to_string(),
            "too long (9 characters, limit 4)"
        );
    }

    #[test]
    fn screening() {
        let svc = TranslationService::new(TranslateConfig::default(), None).unwrap();
        assert_eq!(svc.screen("   "), Err(FallbackReason::NotNeeded));
        assert_eq!(svc.screen("http://пример.рф"), Err(FallbackReason::NotNeeded));
        assert_eq!(svc.screen("plain english"), Err(FallbackReason::NotNeeded));
        assert_eq!(svc.screen("Optional: Закат (тёплый)"), Ok("Закат"));

        let cfg = TranslateConfig {
            max_chars: 3,
            ..TranslateConfig::default()
        };
        let svc = TranslationService::new(cfg, None).unwrap();
        assert_eq!(
            svc.screen("Привет"),
            Err(FallbackReason::LengthExceeded { chars: 6, limit: 3 })
        );

        let cfg = TranslateConfig {
            translation_enabled: false,
            ..TranslateConfig::default()
        };
        let svc = TranslationService::new(cfg, None).unwrap();
        assert_eq!(svc.screen("Привет"), Err(FallbackReason::Disabled));
    }
}
