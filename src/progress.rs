use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Counters shared by every engine of a run: how many clients are currently connected, and
/// how many requests were answered in the current round.
#[derive(Debug, Default)]
pub struct Progress {
    connected: AtomicI64,
    completed: AtomicU64,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connected.fetch_add(1, Ordering::SeqCst);
    }

    pub fn connection_lost(&self) {
        self.connected.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn connected(&self) -> i64 {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn request_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn reset_completed(&self) {
        self.completed.store(0, Ordering::Relaxed);
    }
}
