//! In-process delivery counters, exposed through `/metrics` and `/health`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct DeliveryMetrics {
    direct_sent: AtomicU64,
    direct_failed: AtomicU64,
    fallback_enqueued: AtomicU64,
    enqueue_failed: AtomicU64,
    reprocessed: AtomicU64,
    reprocess_failed: AtomicU64,
    retries: AtomicU64,
    committed: AtomicU64,
    dead_lettered: AtomicU64,
    released: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub direct_sent: u64,
    pub direct_failed: u64,
    pub fallback_enqueued: u64,
    pub enqueue_failed: u64,
    pub reprocessed: u64,
    pub reprocess_failed: u64,
    pub retries: u64,
    pub committed: u64,
    pub dead_lettered: u64,
    pub released: u64,
}

macro_rules! counters {
    ($($field:ident => $method:ident),* $(,)?) => {
        impl DeliveryMetrics {
            $(
                pub fn $method(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*

            pub fn snapshot(&self) -> MetricsSnapshot {
                MetricsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters! {
    direct_sent => record_direct_sent,
    direct_failed => record_direct_failed,
    fallback_enqueued => record_fallback_enqueued,
    enqueue_failed => record_enqueue_failed,
    reprocessed => record_reprocessed,
    reprocess_failed => record_reprocess_failed,
    retries => record_retry,
    committed => record_committed,
    dead_lettered => record_dead_lettered,
    released => record_released,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_events() {
        let metrics = DeliveryMetrics::default();
        metrics.record_direct_failed();
        metrics.record_fallback_enqueued();
        metrics.record_retry();
        metrics.record_retry();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.direct_failed, 1);
        assert_eq!(snapshot.fallback_enqueued, 1);
        assert_eq!(snapshot.retries, 2);
        assert_eq!(snapshot.committed, 0);
    }
}
