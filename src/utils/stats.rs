//! stats.rs
//! Contention-free dispatch counters.
//! Pool threads and the receive thread bump atomics; per-ID transmit counts live in a DashMap
//! so concurrent senders for different IDs never share a lock.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct DispatchStats {
    frames_sent: AtomicU64,
    send_errors: AtomicU64,
    frames_received: AtomicU64,
    receive_errors: AtomicU64,
    batches_completed: AtomicU64,
    batches_cancelled: AtomicU64,
    batches_failed: AtomicU64,
    preemptions: AtomicU64,
    per_id_tx: DashMap<u32, AtomicU64>,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub frames_sent: u64,
    pub send_errors: u64,
    pub frames_received: u64,
    pub receive_errors: u64,
    pub batches_completed: u64,
    pub batches_cancelled: u64,
    pub batches_failed: u64,
    pub preemptions: u64,
    /// (arbitration ID, frames sent), sorted by ID.
    pub per_id_tx: Vec<(u32, u64)>,
}

impl DispatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self, id: u32) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.per_id_tx
            .entry(id)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_received(&self, frames: u64) {
        self.frames_received.fetch_add(frames, Ordering::Relaxed);
    }

    pub fn record_receive_error(&self) {
        self.receive_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.batches_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.batches_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_preemption(&self) {
        self.preemptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sent_for(&self, id: u32) -> u64 {
        self.per_id_tx
            .get(&id)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let mut per_id_tx: Vec<(u32, u64)> = self
            .per_id_tx
            .iter()
            .map(|r| (*r.key(), r.value().load(Ordering::Relaxed)))
            .collect();
        per_id_tx.sort_unstable_by_key(|(id, _)| *id);

        StatsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            batches_completed: self.batches_completed.load(Ordering::Relaxed),
            batches_cancelled: self.batches_cancelled.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            preemptions: self.preemptions.load(Ordering::Relaxed),
            per_id_tx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn per_id_counts_under_contention() {
        let stats = Arc::new(DispatchStats::new());
        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let s = stats.clone();
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        s.record_sent(0x100 + (t % 2));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let snap = stats.snapshot();
        assert_eq!(snap.frames_sent, 4_000);
        assert_eq!(snap.per_id_tx, vec![(0x100, 2_000), (0x101, 2_000)]);
        assert_eq!(stats.sent_for(0x999), 0);
    }
}
