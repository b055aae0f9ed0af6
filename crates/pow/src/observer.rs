//! Mining progress events, reported to the hosting process. Formatting and
//! logging happen at the edge; the mining loop only emits typed events.

pub trait MiningObserver: Send + Sync {
    fn mining_started(&self, tx_count: usize) {
        let _ = tx_count;
    }

    fn mining_progress(&self, attempts: u64) {
        let _ = attempts;
    }

    fn mining_solved(&self, hash: &str, attempts: u64) {
        let _ = (hash, attempts);
    }

    fn mining_cancelled(&self) {}
}

/// Observer that discards every event.
pub struct NullObserver;

impl MiningObserver for NullObserver {}
