//! Batch translation of a whole form under one shared deadline.
//!
//! Identical texts are deduplicated into one task, tasks are admitted through
//! the gate in input order up to the concurrency ceiling, and completions are
//! fanned in as they arrive. Whatever has not resolved by the deadline is
//! cancelled and keeps its original text.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use super::cache::TranslationKey;
use super::normalize::is_file_placeholder;
use super::{FallbackReason, TranslationService};
use crate::metrics::metric_names;
use crate::notices::RunNotices;
use crate::worker::CallResult;

/// Longest budget honored; larger ones are clamped so the deadline stays
/// representable.
const MAX_BUDGET: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Output of [`TranslationService::translate_all`], in input field order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub fields: Vec<(String, String)>,
    /// Fields that kept their original text although it needed translation.
    pub fallback: Vec<String>,
}

impl BatchOutcome {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_str())
    }

    pub fn to_map(&self) -> HashMap<String, String> {
        self.fields.iter().cloned().collect()
    }
}

/// One unique normalized text and every field that carries it.
struct TranslationTask {
    key: TranslationKey,
    fields: Vec<usize>,
    label: String,
}

enum Resolution {
    Translated(String),
    Fallback,
}

enum Slot {
    PassThrough,
    Fallback,
    Cached(String),
    Task(usize),
}

impl TranslationService {
    /// Translate every eligible field within `budget`.
    ///
    /// Suspends only while waiting for gate admission (bounded by the gate
    /// acquire timeout) and while fanning in completions (bounded by the
    /// remaining budget). Never fails.
    pub async fn translate_all<I, K, V>(
        &self,
        fields: I,
        budget: Duration,
        notices: &RunNotices,
    ) -> BatchOutcome
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let inputs: Vec<(String, String)> = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let run_id = uuid::Uuid::new_v4();
        let span = info_span!("translate_run", %run_id, fields = inputs.len());
        let timing = self.metrics.span(metric_names::BATCH_DONE);
        let outcome = self.run_batch(inputs, budget, notices).instrument(span).await;
        timing.finish();
        outcome
    }

    async fn run_batch(
        &self,
        inputs: Vec<(String, String)>,
        budget: Duration,
        notices: &RunNotices,
    ) -> BatchOutcome {
        let started = Instant::now();
        let mut tasks: Vec<TranslationTask> = Vec::new();
        let mut by_key: HashMap<TranslationKey, usize> = HashMap::new();
        let mut hits: HashMap<TranslationKey, String> = HashMap::new();

        let slots: Vec<Slot> = inputs
            .iter()
            .enumerate()
            .map(|(idx, (name, value))| {
                if self.config.is_skipped_field(name) || is_file_placeholder(value) {
                    return Slot::PassThrough;
                }
                let source = match self.screen(value) {
                    Ok(source) => source,
                    Err(FallbackReason::NotNeeded | FallbackReason::Disabled) => {
                        return Slot::PassThrough;
                    }
                    Err(reason) => {
                        self.report(name, reason, notices);
                        return Slot::Fallback;
                    }
                };
                // Each key hits the shared cache at most once per run, so
                // every field carrying it resolves the same way.
                let key = TranslationKey::from_raw(source);
                if let Some(&task) = by_key.get(&key) {
                    tasks[task].fields.push(idx);
                    return Slot::Task(task);
                }
                if let Some(cached) = hits.get(&key) {
                    return Slot::Cached(cached.clone());
                }
                if let Some(cached) = self.cache.get(&key) {
                    self.metrics.incr(metric_names::CACHE_HITS, 1);
                    hits.insert(key, cached.clone());
                    return Slot::Cached(cached);
                }
                self.metrics.incr(metric_names::CACHE_MISSES, 1);
                by_key.insert(key.clone(), tasks.len());
                tasks.push(TranslationTask {
                    key,
                    fields: vec![idx],
                    label: String::new(),
                });
                Slot::Task(tasks.len() - 1)
            })
            .collect();

        for task in &mut tasks {
            task.label = task
                .fields
                .iter()
                .map(|&i| inputs[i].0.as_str())
                .collect::<Vec<_>>()
                .join(", ");
        }

        let resolutions = if tasks.is_empty() {
            Vec::new()
        } else {
            self.schedule(&tasks, started + budget.min(MAX_BUDGET), notices).await
        };

        let mut outcome = BatchOutcome::default();
        for ((name, original), slot) in inputs.into_iter().zip(slots) {
            let value = match slot {
                Slot::PassThrough => original,
                Slot::Cached(text) => text,
                Slot::Task(t) => match &resolutions[t] {
                    Resolution::Translated(text) => text.clone(),
                    Resolution::Fallback => {
                        outcome.fallback.push(name.clone());
                        original
                    }
                },
                Slot::Fallback => {
                    outcome.fallback.push(name.clone());
                    original
                }
            };
            outcome.fields.push((name, value));
        }

        info!(
            tasks = tasks.len(),
            fallback = outcome.fallback.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "translation run finished"
        );
        outcome
    }

    /// Admission and fan-in loop. Returns one resolution per task.
    async fn schedule(
        &self,
        tasks: &[TranslationTask],
        deadline: Instant,
        notices: &RunNotices,
    ) -> Vec<Resolution> {
        let mut resolutions: Vec<Option<Resolution>> = tasks.iter().map(|_| None).collect();

        let Some(backend) = self.backend.clone() else {
            for task in tasks {
                self.report(&task.label, FallbackReason::Unavailable, notices);
            }
            return tasks.iter().map(|_| Resolution::Fallback).collect();
        };

        let max_inflight = self.gate.max_concurrency();
        let mut queue: VecDeque<usize> = (0..tasks.len()).collect();
        let mut cancels: HashMap<usize, CancellationToken> = HashMap::new();
        let mut inflight = FuturesUnordered::new();

        while Instant::now() < deadline && (!queue.is_empty() || !inflight.is_empty()) {
            while cancels.len() < max_inflight {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let Some(t) = queue.pop_front() else { break };
                let task = &tasks[t];
                let wait = self.config.gate_acquire_timeout.min(deadline - now);
                let Some(permit) = self.gate.try_acquire(wait).await else {
                    // Refused tasks are not retried within this run.
                    self.report(&task.label, FallbackReason::GateSaturated, notices);
                    resolutions[t] = Some(Resolution::Fallback);
                    continue;
                };
                debug!(task = t, fields = %task.label, "task admitted");
                self.record_call(task.key.as_str());
                let handle = self.pool.submit(
                    Arc::clone(&backend),
                    task.key.as_str().to_string(),
                    Arc::new(permit),
                    Arc::clone(&self.metrics),
                );
                cancels.insert(t, handle.cancel_token());
                inflight.push(async move { (t, handle.join().await) });
            }

            if inflight.is_empty() {
                break;
            }

            // Remaining time is measured against the absolute deadline.
            let (t, result) = match timeout_at(deadline, inflight.next()).await {
                Ok(Some(done)) => done,
                Ok(None) | Err(_) => break,
            };
            cancels.remove(&t);
            resolutions[t] = Some(self.complete(&tasks[t], result, notices));
        }

        // Deadline reached: cancel what is still running; late results are
        // dropped together with the fan-in set.
        for (t, cancel) in cancels {
            cancel.cancel();
            self.report(&tasks[t].label, FallbackReason::Timeout, notices);
            resolutions[t] = Some(Resolution::Fallback);
        }
        drop(inflight);

        resolutions
            .into_iter()
            .zip(tasks)
            .map(|(resolution, task)| {
                resolution.unwrap_or_else(|| {
                    // Never admitted before the deadline.
                    self.report(&task.label, FallbackReason::Timeout, notices);
                    Resolution::Fallback
                })
            })
            .collect()
    }

    fn complete(
        &self,
        task: &TranslationTask,
        result: CallResult,
        notices: &RunNotices,
    ) -> Resolution {
        match result {
            Ok(text) if !text.trim().is_empty() => {
                self.cache.put(&task.key, text.clone());
                Resolution::Translated(text)
            }
            Ok(_) => {
                self.report(&task.label, FallbackReason::EmptyResult, notices);
                Resolution::Fallback
            }
            Err(e) => {
                debug!(fields = %task.label, error = %e, "translation call failed");
                self.report(&task.label, FallbackReason::ServiceFailure(e.category()), notices);
                Resolution::Fallback
            }
        }
    }

    fn report(&self, field: &str, reason: FallbackReason, notices: &RunNotices) {
        debug!(fields = %field, %reason, "field falls back");
        self.metrics.incr(metric_names::FALLBACKS, 1);
        if let Some(msg) = reason.notice(field) {
            notices.push(msg);
        }
    }
}
