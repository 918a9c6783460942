//! In-flight registry: the set of submissions currently executing.
//!
//! Its cardinality is both the concurrency gate and the shutdown drain
//! condition. Injected into the consumer rather than ambient, so admit and
//! complete sequences are testable without a broker.

use std::collections::HashSet;
use std::sync::Mutex;

pub struct InFlightRegistry {
    capacity: usize,
    executing: Mutex<HashSet<String>>,
}

impl InFlightRegistry {
    pub fn new(capacity: usize) -> Self {
        InFlightRegistry {
            capacity,
            executing: Mutex::new(HashSet::new()),
        }
    }

    /// Admit a submission if a slot is free and it is not already executing.
    pub fn try_admit(&self, submission_id: &str) -> bool {
        let mut executing = self.executing.lock().unwrap();
        if executing.len() >= self.capacity || executing.contains(submission_id) {
            return false;
        }
        executing.insert(submission_id.to_string());
        true
    }

    /// Release a submission's slot. Returns false if it was not registered.
    pub fn complete(&self, submission_id: &str) -> bool {
        self.executing.lock().unwrap().remove(submission_id)
    }

    pub fn len(&self) -> usize {
        self.executing.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free slots right now; zero means consumption should pause.
    pub fn available(&self) -> usize {
        self.capacity.saturating_sub(self.len())
    }
}
