//! Worker pool for backend calls.
//! Calls run as Tokio tasks off the caller's path, bounded by a slot
//! semaphore sized to the gate's ceiling. Every call gets a child of the
//! pool's root cancellation token, so one call or the whole pool can be
//! cancelled. The gate permit travels with the call and is released by the
//! worker once the call has finished or has been confirmed cancelled.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::{oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::gate::PermitToken;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::translate::{TextTranslator, TranslateError};

pub type CallResult = Result<String, TranslateError>;

pub struct WorkerPool {
    slots: Arc<Semaphore>,
    size: usize,
    root: RwLock<CancellationToken>,
    generation: AtomicU64,
    active: Arc<AtomicUsize>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            slots: Arc::new(Semaphore::new(size)),
            size,
            root: RwLock::new(CancellationToken::new()),
            generation: AtomicU64::new(0),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Run `translator.translate(text)` on the pool. Must be called from
    /// within a Tokio runtime.
    pub fn submit(
        &self,
        translator: Arc<dyn TextTranslator>,
        text: String,
        permit: Arc<PermitToken>,
        metrics: Arc<MetricsRegistry>,
    ) -> CallHandle {
        let cancel = self.root.read().child_token();
        let (tx, rx) = oneshot::channel();
        let slots = Arc::clone(&self.slots);
        let active = Arc::clone(&self.active);
        let token = cancel.clone();
        let worker_permit = Arc::clone(&permit);

        tokio::spawn(async move {
            let slot = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                slot = slots.acquire_owned() => slot.ok(),
            };
            let result = match slot {
                None => Err(TranslateError::Cancelled),
                Some(_slot) => {
                    active.fetch_add(1, Ordering::SeqCst);
                    let started = Instant::now();
                    let result = tokio::select! {
                        biased;
                        _ = token.cancelled() => Err(TranslateError::Cancelled),
                        r = translator.translate(&text) => r,
                    };
                    active.fetch_sub(1, Ordering::SeqCst);
                    metrics.record(
                        metric_names::TRANSLATE_CALL,
                        started.elapsed().as_micros() as f64,
                    );
                    result
                }
            };
            // Completion hook: fires once on success, failure or cancellation.
            worker_permit.release();
            if tx.send(result).is_err() {
                debug!(permit_id = worker_permit.id(), "call result discarded");
            }
        });

        CallHandle { rx, cancel, permit }
    }

    /// Cancel every call on the pool and start a fresh generation.
    pub fn shutdown(&self) {
        let mut root = self.root.write();
        root.cancel();
        *root = CancellationToken::new();
        let gen = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(generation = gen, "worker pool cancelled all calls");
    }

    /// Calls currently executing against the backend.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// Caller's side of a submitted call.
pub struct CallHandle {
    rx: oneshot::Receiver<CallResult>,
    cancel: CancellationToken,
    permit: Arc<PermitToken>,
}

impl CallHandle {
    /// Wait for the outcome. A worker that disappeared counts as cancelled.
    pub async fn join(self) -> CallResult {
        self.rx.await.unwrap_or(Err(TranslateError::Cancelled))
    }

    /// Token that cancels this call only.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn permit(&self) -> &Arc<PermitToken> {
        &self.permit
    }
}
