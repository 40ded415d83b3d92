//! Write-completion tracking for the final upgrade command.

/// Counts written bytes until a pending frame has fully left the host.
#[derive(Debug, Default, Clone)]
pub struct CompletionMonitor {
    pending: usize,
    written: usize,
    armed: bool,
}

impl CompletionMonitor {
    /// Create a disarmed monitor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start waiting for `pending` bytes to be written.
    pub fn arm(&mut self, pending: usize) {
        self.pending = pending;
        self.written = 0;
        self.armed = true;
    }

    /// Whether the monitor is waiting.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Bytes counted since arming.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Record a write completion. Returns `true` exactly once, when the
    /// pending frame has been written in full.
    ///
    /// Bytes still in flight from earlier frames can be counted here, so
    /// reaching or passing the pending length completes.
    pub fn record(&mut self, bytes: usize) -> bool {
        if !self.armed {
            return false;
        }

        self.written += bytes;
        if self.written >= self.pending {
            self.armed = false;
            return true;
        }
        false
    }
}
