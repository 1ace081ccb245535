//! Cumulative watcher counters. Monotonic for the life of the process.

pub mod stats;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::alert::DropReason;
use stats::Histo;

#[derive(Debug, Default)]
pub struct WatcherMetrics {
    alerts_fired: AtomicU64,
    dropped_global_cap: AtomicU64,
    dropped_spam_guard: AtomicU64,
    transport_failures: AtomicU64,
    cooldown_suppressed: AtomicU64,
    evaluation_errors: AtomicU64,
    data_unavailable: AtomicU64,
    schema_fallbacks: AtomicU64,
    persist_failures: AtomicU64,
    ticks: AtomicU64,
    queue_depth: AtomicU64,
    tick_latency_us: Mutex<Histo>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub alerts_fired: u64,
    /// Rate-limit drops plus transport failures.
    pub alerts_dropped: u64,
    pub dropped_global_cap: u64,
    pub dropped_spam_guard: u64,
    pub transport_failures: u64,
    pub cooldown_suppressed: u64,
    /// Invalid snapshots, unavailable data and scoring failures.
    pub evaluation_errors: u64,
    pub data_unavailable: u64,
    pub schema_fallbacks: u64,
    pub persist_failures: u64,
    pub ticks: u64,
    /// Candidates awaiting dispatch in the current tick.
    pub queue_depth: u64,
    pub tick_latency_p50_us: u64,
    pub tick_latency_p95_us: u64,
    pub tick_latency_max_us: u64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl WatcherMetrics {
    pub fn alert_fired(&self) {
        bump(&self.alerts_fired);
    }

    pub fn alert_dropped(&self, reason: DropReason) {
        match reason {
            DropReason::GlobalCap => bump(&self.dropped_global_cap),
            DropReason::SpamGuard => bump(&self.dropped_spam_guard),
        }
    }

    pub fn transport_failed(&self) {
        bump(&self.transport_failures);
    }

    pub fn cooldown_suppressed(&self) {
        bump(&self.cooldown_suppressed);
    }

    pub fn evaluation_error(&self) {
        bump(&self.evaluation_errors);
    }

    pub fn data_unavailable(&self) {
        bump(&self.data_unavailable);
        bump(&self.evaluation_errors);
    }

    pub fn schema_fallback(&self) {
        bump(&self.schema_fallbacks);
    }

    pub fn persist_failed(&self) {
        bump(&self.persist_failures);
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.store(depth as u64, Ordering::Relaxed);
    }

    pub fn tick_completed(&self, latency: Duration) {
        bump(&self.ticks);
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.tick_latency_us.lock().record(micros);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let histo = self.tick_latency_us.lock();
        let global_cap = load(&self.dropped_global_cap);
        let spam_guard = load(&self.dropped_spam_guard);
        let transport = load(&self.transport_failures);
        MetricsSnapshot {
            alerts_fired: load(&self.alerts_fired),
            alerts_dropped: global_cap + spam_guard + transport,
            dropped_global_cap: global_cap,
            dropped_spam_guard: spam_guard,
            transport_failures: transport,
            cooldown_suppressed: load(&self.cooldown_suppressed),
            evaluation_errors: load(&self.evaluation_errors),
            data_unavailable: load(&self.data_unavailable),
            schema_fallbacks: load(&self.schema_fallbacks),
            persist_failures: load(&self.persist_failures),
            ticks: load(&self.ticks),
            queue_depth: load(&self.queue_depth),
            tick_latency_p50_us: if histo.count() == 0 { 0 } else { histo.p50() },
            tick_latency_p95_us: if histo.count() == 0 { 0 } else { histo.p95() },
            tick_latency_max_us: histo.max(),
        }
    }
}
