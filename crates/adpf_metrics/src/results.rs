//! String-keyed result map shared by every thread of a run

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Key that accumulates failure messages.
pub const FAILURE_KEY: &str = "failure";

/// Cloneable handle to the run's results. Writes from the stage loops, the
/// draw loop and the driver thread are serialized by one lock.
#[derive(Debug, Clone, Default)]
pub struct ResultSink {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl ResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or overwrite one entry.
    pub fn add(&self, name: impl Into<String>, value: impl Into<String>) {
        self.lock().insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.lock().get(name).cloned()
    }

    /// Mark the run failed. Messages accumulate rather than overwrite.
    pub fn set_failure(&self, message: &str) {
        tracing::error!(message, "test failure");
        let mut entries = self.lock();
        entries
            .entry(FAILURE_KEY.to_string())
            .and_modify(|existing| {
                existing.push_str("; ");
                existing.push_str(message);
            })
            .or_insert_with(|| message.to_string());
    }

    pub fn has_failure(&self) -> bool {
        self.lock().contains_key(FAILURE_KEY)
    }

    /// Copy of every entry, ordered by key.
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn failures_accumulate() {
        let sink = ResultSink::new();
        assert!(!sink.has_failure());
        sink.set_failure("first");
        sink.set_failure("second");
        assert_eq!(sink.get(FAILURE_KEY).as_deref(), Some("first; second"));
    }

    #[test]
    fn concurrent_writers_all_land() {
        let sink = ResultSink::new();
        let writers: Vec<_> = (0..8)
            .map(|t| {
                let sink = sink.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        sink.add(format!("w{t}_{i}"), i.to_string());
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        assert_eq!(sink.len(), 800);
        assert_eq!(sink.snapshot().get("w3_42").map(String::as_str), Some("42"));
    }
}
