//! Shared helpers for the integration tests.

use std::sync::{Arc, Mutex};

/// An append-only event log shared between kernel threads. Exactly one
/// kernel thread runs at a time, so the recorded order is the schedule.
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Journal {
        Journal::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}
