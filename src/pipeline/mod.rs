//! Stream Pipeline
//!
//! Per-record topology: decode, score, observe, encode, publish to the
//! all-results sink, and to the alerts sink when flagged. Every step is
//! error-isolated so one bad record never halts a worker. Per-user ordering
//! relies on the transport delivering a user's records on one partition; the
//! default single worker preserves that order end to end.

pub mod transport;

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::detector::{AnomalyDetector, Detector};
use crate::metrics::MetricsCollector;
use crate::model::Transaction;
use transport::{Record, RecordSink, RecordSource};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Parallel workers pulling from the source.
    pub num_workers: usize,
    /// Source commit cadence for at-least-once delivery.
    pub commit_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_workers: 1,
            commit_interval_ms: 30_000,
        }
    }
}

pub struct Pipeline {
    detector: Arc<Detector>,
    metrics: Arc<MetricsCollector>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        detector: Arc<Detector>,
        metrics: Arc<MetricsCollector>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            detector,
            metrics,
            config,
        }
    }

    /// Spawns the worker tasks. They run until the source closes or the
    /// shutdown flag flips; in-flight records finish before a worker exits.
    pub fn spawn<S, A, L>(
        &self,
        source: S,
        all_results: A,
        alerts: L,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>>
    where
        S: RecordSource + 'static,
        A: RecordSink + 'static,
        L: RecordSink + 'static,
    {
        let source: Arc<Mutex<dyn RecordSource>> = Arc::new(Mutex::new(source));
        let all_results: Arc<dyn RecordSink> = Arc::new(all_results);
        let alerts: Arc<dyn RecordSink> = Arc::new(alerts);

        info!(
            workers = self.config.num_workers,
            detector = self.detector.name(),
            "Starting pipeline"
        );
        self.metrics.set_active_detectors(1);

        (0..self.config.num_workers.max(1))
            .map(|worker_id| {
                let detector = self.detector.clone();
                let metrics = self.metrics.clone();
                let source = source.clone();
                let all_results = all_results.clone();
                let alerts = alerts.clone();
                let shutdown = shutdown.clone();
                let commit_interval = Duration::from_millis(self.config.commit_interval_ms);

                tokio::spawn(async move {
                    worker_loop(
                        worker_id,
                        detector,
                        metrics,
                        source,
                        all_results,
                        alerts,
                        shutdown,
                        commit_interval,
                    )
                    .await;
                })
            })
            .collect()
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    worker_id: usize,
    detector: Arc<Detector>,
    metrics: Arc<MetricsCollector>,
    source: Arc<Mutex<dyn RecordSource>>,
    all_results: Arc<dyn RecordSink>,
    alerts: Arc<dyn RecordSink>,
    mut shutdown: watch::Receiver<bool>,
    commit_interval: Duration,
) {
    let mut last_commit = Instant::now();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let record = {
            let mut guard = source.lock().await;
            tokio::select! {
                record = guard.poll() => record,
                _ = shutdown.changed() => None,
            }
        };

        let Some(record) = record else {
            break;
        };

        process_record(&detector, &metrics, &all_results, &alerts, record).await;

        if last_commit.elapsed() >= commit_interval {
            source.lock().await.commit().await;
            last_commit = Instant::now();
        }
    }

    // Acknowledge everything processed before leaving.
    source.lock().await.commit().await;
    info!(worker_id, "Pipeline worker stopped");
}

/// One record through the full topology. Every failure path returns instead
/// of propagating, so the worker survives malformed input, encoding trouble,
/// and sink refusal alike.
async fn process_record(
    detector: &Detector,
    metrics: &MetricsCollector,
    all_results: &Arc<dyn RecordSink>,
    alerts: &Arc<dyn RecordSink>,
    record: Record,
) {
    let tx: Transaction = match serde_json::from_slice(&record.payload) {
        Ok(tx) => tx,
        Err(e) => {
            warn!(key = %record.key, error = %e, "Dropping undecodable record");
            metrics.record_dropped();
            return;
        }
    };
    if let Err(reason) = tx.validate() {
        warn!(key = %record.key, reason = %reason, "Dropping invalid record");
        metrics.record_dropped();
        return;
    }

    let started = Instant::now();
    let result = detector.score(&tx);
    // Observed regardless of the verdict, so the model learns from the
    // stream it judges.
    detector.observe(&tx);
    metrics.record_transaction(started.elapsed().as_millis() as u64);

    if result.is_anomaly {
        metrics.record_anomaly(&result);
        warn!(
            transaction_id = %result.transaction_id,
            score = result.anomaly_score,
            anomaly_type = %result.anomaly_type,
            "Anomaly detected"
        );
    } else {
        debug!(transaction_id = %result.transaction_id, "Normal transaction");
    }

    let payload = match serde_json::to_vec(&result) {
        Ok(payload) => payload,
        Err(e) => {
            error!(transaction_id = %result.transaction_id, error = %e, "Failed to encode result");
            return;
        }
    };

    if let Err(e) = all_results
        .publish(Record::new(record.key.clone(), payload.clone()))
        .await
    {
        warn!(key = %record.key, error = %e, "Failed to publish result");
        metrics.record_publish_failure();
    }

    if result.is_anomaly {
        match alerts.publish(Record::new(record.key, payload)).await {
            Ok(()) => metrics.record_alert(&result),
            Err(e) => {
                warn!(transaction_id = %result.transaction_id, error = %e, "Failed to publish alert");
                metrics.record_publish_failure();
            }
        }
    }
}
