use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct ErrorRecoveryPolicy {
    failed: BTreeSet<usize>,
    queue_len: usize,
    progressed: bool,
}

impl ErrorRecoveryPolicy {
    pub fn new(queue_len: usize) -> Self {
        Self {
            failed: BTreeSet::new(),
            queue_len,
            progressed: false,
        }
    }

    /// Blacklists `index` for the rest of the cycle. Returns true once every
    /// item in the queue has failed, meaning nothing left can play.
    pub fn record_failure(&mut self, index: usize) -> bool {
        if index < self.queue_len {
            self.failed.insert(index);
        }
        self.is_exhausted()
    }

    pub fn clear_failure(&mut self, index: usize) {
        self.failed.remove(&index);
        self.progressed = true;
    }

    pub fn reset(&mut self) {
        self.failed.clear();
        self.progressed = false;
    }

    // Some item prepared since the last reset.
    pub fn has_progressed(&self) -> bool {
        self.progressed
    }

    pub fn is_blacklisted(&self, index: usize) -> bool {
        self.failed.contains(&index)
    }

    pub fn is_exhausted(&self) -> bool {
        self.queue_len == 0 || self.failed.len() >= self.queue_len
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }
}
