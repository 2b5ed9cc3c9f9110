//! Metrics collection for the detection pipeline
//!
//! Thread-safe counters and gauges, a bounded window of recent anomalies,
//! and a per-type distribution. Counters are lock-free atomics; the FIFO and
//! the trailing-minute rate window sit behind short mutexes.

use chrono::NaiveDateTime;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::clock::Clock;
use crate::model::AnomalyResult;

/// Recent anomalies retained for the dashboard feed.
const RECENT_ANOMALY_CAPACITY: usize = 100;

/// Staleness bound for the health check.
const HEALTH_FRESHNESS_MINUTES: i64 = 5;

/// System-load ceiling for the health check.
const HEALTH_LOAD_LIMIT: f64 = 0.9;

/// One entry of the recent-anomaly feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalySummary {
    pub transaction_id: String,
    pub score: f64,
    #[serde(rename = "type")]
    pub anomaly_type: String,
    pub timestamp: NaiveDateTime,
}

/// Snapshot served on `/api/metrics`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_transactions: u64,
    pub total_anomalies: u64,
    pub total_alerts: u64,
    pub dropped_records: u64,
    pub publish_failures: u64,
    pub anomaly_rate: f64,
    pub average_processing_time: f64,
    pub active_detectors: u64,
    pub system_load: f64,
    pub memory_used_bytes: u64,
    pub last_update: NaiveDateTime,
}

pub struct MetricsCollector {
    total_transactions: AtomicU64,
    total_anomalies: AtomicU64,
    total_alerts: AtomicU64,
    dropped_records: AtomicU64,
    publish_failures: AtomicU64,
    sum_processing_time_ms: AtomicU64,
    active_detectors: AtomicU64,
    memory_used_bytes: AtomicU64,
    system_load_bits: AtomicU64,
    last_update: Mutex<NaiveDateTime>,
    recent_anomalies: Mutex<VecDeque<AnomalySummary>>,
    type_counts: DashMap<String, u64>,
    minute_window: Mutex<VecDeque<NaiveDateTime>>,
    clock: Arc<dyn Clock>,
}

impl MetricsCollector {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            total_transactions: AtomicU64::new(0),
            total_anomalies: AtomicU64::new(0),
            total_alerts: AtomicU64::new(0),
            dropped_records: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            sum_processing_time_ms: AtomicU64::new(0),
            active_detectors: AtomicU64::new(0),
            memory_used_bytes: AtomicU64::new(0),
            system_load_bits: AtomicU64::new(0.0f64.to_bits()),
            last_update: Mutex::new(now),
            recent_anomalies: Mutex::new(VecDeque::with_capacity(RECENT_ANOMALY_CAPACITY)),
            type_counts: DashMap::new(),
            minute_window: Mutex::new(VecDeque::new()),
            clock,
        }
    }

    /// Records one processed transaction and its processing time.
    pub fn record_transaction(&self, processing_time_ms: u64) {
        self.total_transactions.fetch_add(1, Ordering::Relaxed);
        self.sum_processing_time_ms
            .fetch_add(processing_time_ms, Ordering::Relaxed);

        let now = self.clock.now();
        {
            let mut window = self.minute_window.lock();
            window.push_back(now);
            Self::prune_minute_window(&mut window, now);
        }
        *self.last_update.lock() = now;
    }

    /// Records a flagged transaction: distribution bump plus the recent feed.
    pub fn record_anomaly(&self, result: &AnomalyResult) {
        self.total_anomalies.fetch_add(1, Ordering::Relaxed);
        *self
            .type_counts
            .entry(result.anomaly_type.as_str().to_string())
            .or_insert(0) += 1;

        let summary = AnomalySummary {
            transaction_id: result.transaction_id.clone(),
            score: result.anomaly_score,
            anomaly_type: result.anomaly_type.as_str().to_string(),
            timestamp: self.clock.now(),
        };

        let mut recent = self.recent_anomalies.lock();
        recent.push_back(summary);
        while recent.len() > RECENT_ANOMALY_CAPACITY {
            recent.pop_front();
        }

        debug!(
            transaction_id = %result.transaction_id,
            score = result.anomaly_score,
            "Recorded anomaly"
        );
    }

    /// Records an emission to the alerts sink.
    pub fn record_alert(&self, result: &AnomalyResult) {
        self.total_alerts.fetch_add(1, Ordering::Relaxed);
        debug!(transaction_id = %result.transaction_id, "Recorded alert");
    }

    /// Records an undecodable or invalid input record.
    pub fn record_dropped(&self) {
        self.dropped_records.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed sink publish.
    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_active_detectors(&self, count: u64) {
        self.active_detectors.store(count, Ordering::Relaxed);
    }

    /// Current time from the injected clock, for health reporting.
    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// Samples process memory and derives the load gauge.
    pub fn update_system_health(&self) {
        let (memory, load) = sample_process_memory();
        self.memory_used_bytes.store(memory, Ordering::Relaxed);
        self.system_load_bits
            .store(load.to_bits(), Ordering::Relaxed);
        *self.last_update.lock() = self.clock.now();
    }

    pub fn total_transactions(&self) -> u64 {
        self.total_transactions.load(Ordering::Relaxed)
    }

    pub fn total_anomalies(&self) -> u64 {
        self.total_anomalies.load(Ordering::Relaxed)
    }

    pub fn total_alerts(&self) -> u64 {
        self.total_alerts.load(Ordering::Relaxed)
    }

    pub fn anomaly_rate(&self) -> f64 {
        let transactions = self.total_transactions();
        if transactions == 0 {
            return 0.0;
        }
        self.total_anomalies() as f64 / transactions as f64
    }

    pub fn average_processing_time_ms(&self) -> f64 {
        let transactions = self.total_transactions();
        if transactions == 0 {
            return 0.0;
        }
        self.sum_processing_time_ms.load(Ordering::Relaxed) as f64 / transactions as f64
    }

    /// Transactions observed in the trailing minute, per second.
    pub fn processing_rate(&self) -> f64 {
        let now = self.clock.now();
        let mut window = self.minute_window.lock();
        Self::prune_minute_window(&mut window, now);
        window.len() as f64 / 60.0
    }

    pub fn system_load(&self) -> f64 {
        f64::from_bits(self.system_load_bits.load(Ordering::Relaxed))
    }

    /// Fresh within five minutes and load under 0.9.
    pub fn is_healthy(&self) -> bool {
        let last = *self.last_update.lock();
        let age = self.clock.now() - last;
        age < chrono::Duration::minutes(HEALTH_FRESHNESS_MINUTES)
            && self.system_load() < HEALTH_LOAD_LIMIT
    }

    /// Recent anomalies, newest first.
    pub fn recent_anomalies(&self) -> Vec<AnomalySummary> {
        self.recent_anomalies.lock().iter().rev().cloned().collect()
    }

    /// Anomaly-type name to count.
    pub fn distribution(&self) -> HashMap<String, u64> {
        self.type_counts
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_transactions: self.total_transactions(),
            total_anomalies: self.total_anomalies(),
            total_alerts: self.total_alerts(),
            dropped_records: self.dropped_records.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            anomaly_rate: self.anomaly_rate(),
            average_processing_time: self.average_processing_time_ms(),
            active_detectors: self.active_detectors.load(Ordering::Relaxed),
            system_load: self.system_load(),
            memory_used_bytes: self.memory_used_bytes.load(Ordering::Relaxed),
            last_update: *self.last_update.lock(),
        }
    }

    fn prune_minute_window(window: &mut VecDeque<NaiveDateTime>, now: NaiveDateTime) {
        let cutoff = now - chrono::Duration::seconds(60);
        while window.front().is_some_and(|ts| *ts < cutoff) {
            window.pop_front();
        }
    }
}

/// Process RSS and its share of total system memory. Zeros on platforms
/// without procfs.
fn sample_process_memory() -> (u64, f64) {
    #[cfg(target_os = "linux")]
    {
        let page_size = 4096u64;
        let rss = std::fs::read_to_string("/proc/self/statm")
            .ok()
            .and_then(|s| s.split_whitespace().nth(1).map(str::to_owned))
            .and_then(|pages| pages.parse::<u64>().ok())
            .map(|pages| pages * page_size)
            .unwrap_or(0);

        let total = std::fs::read_to_string("/proc/meminfo")
            .ok()
            .and_then(|s| {
                s.lines()
                    .find(|line| line.starts_with("MemTotal:"))
                    .and_then(|line| line.split_whitespace().nth(1).map(str::to_owned))
            })
            .and_then(|kb| kb.parse::<u64>().ok())
            .map(|kb| kb * 1024)
            .unwrap_or(0);

        let load = if total > 0 {
            (rss as f64 / total as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };
        (rss, load)
    }
    #[cfg(not(target_os = "linux"))]
    {
        (0, 0.0)
    }
}
