//! In-flight run registry
//!
//! Maps the run id returned in the `x-run-id` response header to the
//! cancellation signal of its turn task. Entries are removed by the turn
//! task itself on every exit path.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    inner: Arc<DashMap<String, watch::Sender<bool>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run and hand back its cancellation receiver.
    pub fn register(&self, run_id: &str) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        self.inner.insert(run_id.to_string(), tx);
        rx
    }

    /// Request a graceful stop. Returns false for unknown runs.
    pub fn stop(&self, run_id: &str) -> bool {
        match self.inner.get(run_id) {
            Some(entry) => entry.send(true).is_ok(),
            None => false,
        }
    }

    pub fn remove(&self, run_id: &str) {
        self.inner.remove(run_id);
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_flips_the_signal_for_registered_runs() {
        let runs = RunRegistry::new();
        let rx = runs.register("r1");
        assert!(!*rx.borrow());

        assert!(runs.stop("r1"));
        assert!(*rx.borrow());

        assert!(!runs.stop("unknown"));

        runs.remove("r1");
        assert!(runs.is_empty());
    }
}
