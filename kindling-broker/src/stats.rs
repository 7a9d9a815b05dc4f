//! Process-wide counters exposed to an external stats sink.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Stats {
    messages_recv: AtomicU64,
    messages_sent: AtomicU64,
}

impl Stats {
    pub fn record_recv(&self) {
        self.messages_recv.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages_recv(&self) -> u64 {
        self.messages_recv.load(Ordering::Relaxed)
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment() {
        let stats = Stats::default();
        assert_eq!(stats.messages_recv(), 0);
        assert_eq!(stats.messages_sent(), 0);

        stats.record_recv();
        stats.record_recv();
        stats.record_sent();

        assert_eq!(stats.messages_recv(), 2);
        assert_eq!(stats.messages_sent(), 1);
    }
}
