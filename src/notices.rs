//! Per-run diagnostics: an ordered, de-duplicated list of user-facing notices.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

/// Cheap to clone; clones share the same list so completions observed on
/// different tasks can all report into one run.
#[derive(Debug, Clone, Default)]
pub struct RunNotices {
    inner: Arc<Mutex<Vec<String>>>,
}

impl RunNotices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `msg` unless it is empty or already present.
    /// Returns whether it was added.
    pub fn push(&self, msg: impl Into<String>) -> bool {
        let msg = msg.into();
        if msg.is_empty() {
            return false;
        }
        let mut list = self.inner.lock();
        if list.iter().any(|m| *m == msg) {
            return false;
        }
        warn!(notice = %msg, "run notice");
        list.push(msg);
        true
    }

    /// Start of a new run.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Surface the notices once: returns them and leaves the list empty.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.inner.lock())
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.inner.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedups_and_keeps_order() {
        let notices = RunNotices::new();
        assert!(notices.push("b"));
        assert!(notices.push("a"));
        assert!(!notices.push("b"));
        assert!(!notices.push(""));
        assert_eq!(notices.snapshot(), vec!["b", "a"]);
    }

    #[test]
    fn take_drains() {
        let notices = RunNotices::new();
        let shared = notices.clone();
        shared.push("x");
        assert_eq!(notices.take(), vec!["x"]);
        assert!(notices.is_empty());
        shared.push("y");
        notices.clear();
        assert_eq!(shared.len(), 0);
    }
}
