//! One-off translation of a single field outside a batch.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use super::cache::TranslationKey;
use super::{FallbackReason, TranslationService};
use crate::metrics::metric_names;
use crate::notices::RunNotices;

/// Result of translating one field. `ok == false` means the original text
/// was kept and a notice explains why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldOutcome {
    pub text: String,
    pub ok: bool,
}

impl FieldOutcome {
    fn translated(text: String) -> Self {
        Self { text, ok: true }
    }

    fn unchanged(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ok: true,
        }
    }

    fn fallback(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ok: false,
        }
    }
}

impl TranslationService {
    /// Translate one field value, bounded by the gate acquire timeout plus
    /// the per-call timeout. Never fails: on any problem the original text
    /// comes back with `ok == false` and a notice is recorded.
    pub async fn translate_field(
        &self,
        text: &str,
        field: &str,
        notices: &RunNotices,
    ) -> FieldOutcome {
        let started = Instant::now();
        let outcome = self.translate_field_inner(text, field, notices).await;
        self.metrics
            .record(metric_names::FIELD_DONE, started.elapsed().as_micros() as f64);
        outcome
    }

    async fn translate_field_inner(
        &self,
        text: &str,
        field: &str,
        notices: &RunNotices,
    ) -> FieldOutcome {
        let source = match self.screen(text) {
            Ok(source) => source,
            Err(FallbackReason::NotNeeded | FallbackReason::Disabled) => {
                return FieldOutcome::unchanged(text);
            }
            Err(reason) => return self.fall_back(text, field, reason, notices),
        };

        let Some(backend) = self.backend.clone() else {
            return self.fall_back(text, field, FallbackReason::Unavailable, notices);
        };

        let key = TranslationKey::from_raw(source);
        if let Some(cached) = self.cache.get(&key) {
            self.metrics.incr(metric_names::CACHE_HITS, 1);
            debug!(field, "translation cache hit");
            return FieldOutcome::translated(cached);
        }
        self.metrics.incr(metric_names::CACHE_MISSES, 1);

        let wait = Instant::now();
        let Some(permit) = self.gate.try_acquire(self.config.gate_acquire_timeout).await else {
            return self.fall_back(text, field, FallbackReason::GateSaturated, notices);
        };
        self.metrics
            .record(metric_names::GATE_WAIT, wait.elapsed().as_micros() as f64);

        self.record_call(key.as_str());
        let handle = self.pool.submit(
            backend,
            key.as_str().to_string(),
            Arc::new(permit),
            Arc::clone(&self.metrics),
        );
        let cancel = handle.cancel_token();

        match tokio::time::timeout(self.config.per_call_timeout, handle.join()).await {
            Err(_elapsed) => {
                // Best effort: the worker drops the call and releases the permit.
                cancel.cancel();
                self.fall_back(text, field, FallbackReason::Timeout, notices)
            }
            Ok(Ok(translated)) if !translated.trim().is_empty() => {
                self.cache.put(&key, translated.clone());
                FieldOutcome::translated(translated)
            }
            Ok(Ok(_)) => self.fall_back(text, field, FallbackReason::EmptyResult, notices),
            Ok(Err(e)) => {
                warn!(field, error = %e, "translation call failed");
                self.fall_back(
                    text,
                    field,
                    FallbackReason::ServiceFailure(e.category()),
                    notices,
                )
            }
        }
    }

    fn fall_back(
        &self,
        text: &str,
        field: &str,
        reason: FallbackReason,
        notices: &RunNotices,
    ) -> FieldOutcome {
        debug!(field, %reason, "field falls back");
        self.metrics.incr(metric_names::FALLBACKS, 1);
        if let Some(msg) = reason.notice(field) {
            notices.push(msg);
        }
        FieldOutcome::fallback(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslateConfig;
    use crate::translate::{TextTranslator, TranslateError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Scripted {
        reply: Result<&'static str, ()>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextTranslator for Scripted {
        async fn translate(&self, _text: &str) -> Result<String, TranslateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply
                .map(String::from)
                .map_err(|_| TranslateError::Api("boom".into()))
        }
    }

    fn service(reply: Result<&'static str, ()>) -> (TranslationService, Arc<Scripted>) {
        let backend = Arc::new(Scripted {
            reply,
            calls: AtomicUsize::new(0),
        });
        let svc = TranslationService::new(
            TranslateConfig::default(),
            Some(backend.clone() as Arc<dyn TextTranslator>),
        )
        .unwrap();
        (svc, backend)
    }

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let (svc, backend) = service(Ok("Good morning"));
        let notices = RunNotices::new();
        let first = svc.translate_field("Доброе  утро", "greeting", &notices).await;
        let second = svc.translate_field(" Доброе утро ", "greeting", &notices).await;
        assert_eq!(first, FieldOutcome::translated("Good morning".into()));
        assert_eq!(second, first);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert_eq!(svc.usage().cache_hits, 1);
        assert!(notices.is_empty());
    }

    #[tokio::test]
    async fn text_without_source_script_is_untouched() {
        let (svc, backend) = service(Ok("unused"));
        let notices = RunNotices::new();
        let out = svc.translate_field("already english", "f", &notices).await;
        assert_eq!(out, FieldOutcome::unchanged("already english"));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn blank_reply_falls_back() {
        let (svc, _) = service(Ok("   "));
        let notices = RunNotices::new();
        let out = svc.translate_field("Привет", "f", &notices).await;
        assert_eq!(out, FieldOutcome::fallback("Привет"));
        assert!(notices.snapshot()[0].contains("empty response"));
        assert!(svc.cache().is_empty());
    }

    #[tokio::test]
    async fn backend_error_falls_back_with_category() {
        let (svc, _) = service(Err(()));
        let notices = RunNotices::new();
        let out = svc.translate_field("Привет", "title", &notices).await;
        assert!(!out.ok);
        assert!(notices.snapshot()[0].contains("ApiError"));
        assert_eq!(svc.gate().in_flight(), 0);
    }

    #[tokio::test]
    async fn missing_backend_falls_back() {
        let svc = TranslationService::new(TranslateConfig::default(), None).unwrap();
        let notices = RunNotices::new();
        let out = svc.translate_field("Привет", "title", &notices).await;
        assert_eq!(out, FieldOutcome::fallback("Привет"));
        assert!(notices.snapshot()[0].contains("unavailable"));
    }

    #[tokio::test]
    async fn over_limit_is_reported() {
        let backend: Arc<dyn TextTranslator> = Arc::new(Scripted {
            reply: Ok("x"),
            calls: AtomicUsize::new(0),
        });
        let cfg = TranslateConfig {
            max_chars: 4,
            ..TranslateConfig::default()
        };
        let svc = TranslationService::new(cfg, Some(backend)).unwrap();
        let notices = RunNotices::new();
        let out = svc.translate_field("Длинный", "f", &notices).await;
        assert!(!out.ok);
        assert!(notices.snapshot()[0].contains("too long"));
    }

    struct Slow;

    #[async_trait]
    impl TextTranslator for Slow {
        async fn translate(&self, _text: &str) -> Result<String, TranslateError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("late".into())
        }
    }

    #[tokio::test]
    async fn timeout_cancels_and_frees_the_gate() {
        let cfg = TranslateConfig {
            per_call_timeout: Duration::from_millis(50),
            ..TranslateConfig::default()
        };
        let svc = TranslationService::new(cfg, Some(Arc::new(Slow))).unwrap();
        let notices = RunNotices::new();
        let started = Instant::now();
        let out = svc.translate_field("Привет", "f", &notices).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(out, FieldOutcome::fallback("Привет"));
        assert!(notices.snapshot()[0].contains("timed out"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(svc.gate().in_flight(), 0);
        assert!(svc.cache().is_empty());
    }

    #[tokio::test]
    async fn saturated_gate_refuses() {
        let (svc, backend) = service(Ok("x"));
        let held = svc.gate().try_acquire(Duration::from_millis(10)).await.unwrap();
        let notices = RunNotices::new();
        let out = svc.translate_field("Привет", "f", &notices).await;
        assert!(!out.ok);
        assert!(notices.snapshot()[0].contains("overloaded"));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        drop(held);
    }
}
