//! Pipeline topology tests over the in-memory transport

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

use streamguard::clock::FixedClock;
use streamguard::detector::{Detector, DetectorConfig};
use streamguard::metrics::MetricsCollector;
use streamguard::model::{AnomalyResult, Transaction};
use streamguard::pipeline::transport::{channel_sink, channel_source, Record};
use streamguard::pipeline::{Pipeline, PipelineConfig};

fn base_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 15)
        .unwrap()
        .and_hms_opt(14, 30, 0)
        .unwrap()
}

fn transaction(id: &str, user: &str, amount: f64, offset_days: i64) -> Transaction {
    Transaction {
        transaction_id: id.to_string(),
        user_id: user.to_string(),
        merchant_id: "merchant_1".to_string(),
        amount,
        currency: "USD".to_string(),
        // One day apart, so neither the late-night rule nor the velocity
        // window sees these as anomalous.
        timestamp: base_time() + chrono::Duration::days(offset_days),
        location: None,
        payment_method: "credit_card".to_string(),
        merchant_category: "grocery".to_string(),
        metadata: HashMap::new(),
    }
}

fn record_for(tx: &Transaction) -> Record {
    Record::new(tx.user_id.clone(), serde_json::to_vec(tx).unwrap())
}

struct Harness {
    detector: Arc<Detector>,
    metrics: Arc<MetricsCollector>,
    pipeline: Pipeline,
}

fn harness(num_workers: usize) -> Harness {
    let clock = Arc::new(FixedClock::new(base_time()));
    let detector = Arc::new(Detector::statistical_with_clock(
        DetectorConfig::default(),
        clock.clone(),
    ));
    let metrics = Arc::new(MetricsCollector::new(clock));
    let pipeline = Pipeline::new(
        detector.clone(),
        metrics.clone(),
        PipelineConfig {
            num_workers,
            commit_interval_ms: 1_000,
        },
    );
    Harness {
        detector,
        metrics,
        pipeline,
    }
}

/// 100 records, 5 of which trip the large-amount rule: counters, routing and
/// rates all line up.
#[tokio::test]
async fn hundred_records_five_alerts() {
    let h = harness(1);
    let (input, source) = channel_source(256);
    let (all_sink, mut all_rx) = channel_sink(256);
    let (alerts_sink, mut alerts_rx) = channel_sink(256);
    let (_stop, shutdown) = watch::channel(false);

    let handles = h.pipeline.spawn(source, all_sink, alerts_sink, shutdown);

    for i in 0..100 {
        // Every 20th record carries a rule-tripping amount.
        let amount = if i % 20 == 19 { 9_000.0 } else { 50.0 };
        let user = format!("user_{}", i % 10);
        let tx = Transaction {
            user_id: user.clone(),
            ..transaction(&format!("tx_{i}"), "placeholder", amount, i)
        };
        input.send(record_for(&tx)).await.unwrap();
    }
    drop(input);

    for handle in handles {
        handle.await.unwrap();
    }

    let mut all_results = Vec::new();
    while let Some(record) = all_rx.recv().await {
        all_results.push(record);
    }
    let mut alerts = Vec::new();
    while let Some(record) = alerts_rx.recv().await {
        alerts.push(record);
    }

    assert_eq!(all_results.len(), 100);
    assert_eq!(alerts.len(), 5);
    assert_eq!(h.metrics.total_transactions(), 100);
    assert_eq!(h.metrics.total_anomalies(), 5);
    assert_eq!(h.metrics.total_alerts(), 5);
    assert!((h.metrics.anomaly_rate() - 0.05).abs() < 1e-12);

    // Every alert also appears on the all-results sink.
    for alert in &alerts {
        assert!(all_results.iter().any(|r| r.payload == alert.payload));
    }
}

/// With a single worker the all-results stream preserves per-key input order.
#[tokio::test]
async fn per_key_order_preserved() {
    let h = harness(1);
    let (input, source) = channel_source(256);
    let (all_sink, mut all_rx) = channel_sink(256);
    let (alerts_sink, _alerts_rx) = channel_sink(256);
    let (_stop, shutdown) = watch::channel(false);

    let handles = h.pipeline.spawn(source, all_sink, alerts_sink, shutdown);

    for i in 0..30 {
        let user = format!("user_{}", i % 3);
        let tx = Transaction {
            user_id: user.clone(),
            ..transaction(&format!("tx_{i:03}"), "placeholder", 50.0, i)
        };
        input.send(record_for(&tx)).await.unwrap();
    }
    drop(input);

    for handle in handles {
        handle.await.unwrap();
    }

    let mut seen: HashMap<String, Vec<String>> = HashMap::new();
    while let Some(record) = all_rx.recv().await {
        let result: AnomalyResult = serde_json::from_slice(&record.payload).unwrap();
        seen.entry(record.key).or_default().push(result.transaction_id);
    }

    for (user, ids) in seen {
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted, "order broken for {user}");
    }
}

/// A stretch of garbage records never halts the topology.
#[tokio::test]
async fn malformed_burst_does_not_halt() {
    let h = harness(1);
    let (input, source) = channel_source(256);
    let (all_sink, mut all_rx) = channel_sink(256);
    let (alerts_sink, _alerts_rx) = channel_sink(256);
    let (_stop, shutdown) = watch::channel(false);

    let handles = h.pipeline.spawn(source, all_sink, alerts_sink, shutdown);

    for i in 0..50 {
        input
            .send(Record::new("user_x", format!("garbage {i}").into_bytes()))
            .await
            .unwrap();
    }
    let tx = transaction("tx_survivor", "user_x", 50.0, 0);
    input.send(record_for(&tx)).await.unwrap();
    drop(input);

    for handle in handles {
        handle.await.unwrap();
    }

    let out = all_rx.recv().await.expect("pipeline still emits");
    let result: AnomalyResult = serde_json::from_slice(&out.payload).unwrap();
    assert_eq!(result.transaction_id, "tx_survivor");
    assert_eq!(h.metrics.snapshot().dropped_records, 50);
}

/// Several workers over many users: every record processed exactly once.
#[tokio::test]
async fn concurrent_workers_process_every_record_once() {
    let h = harness(4);
    let (input, source) = channel_source(1024);
    let (all_sink, mut all_rx) = channel_sink(1024);
    let (alerts_sink, _alerts_rx) = channel_sink(1024);
    let (_stop, shutdown) = watch::channel(false);

    let handles = h.pipeline.spawn(source, all_sink, alerts_sink, shutdown);

    let per_user = 25;
    let users = 8;
    for i in 0..(per_user * users) {
        let user = format!("user_{}", i % users);
        let tx = Transaction {
            user_id: user.clone(),
            ..transaction(&format!("tx_{i}"), "placeholder", 50.0, i as i64)
        };
        input.send(record_for(&tx)).await.unwrap();
    }
    drop(input);

    for handle in handles {
        handle.await.unwrap();
    }

    let mut count = 0;
    while all_rx.recv().await.is_some() {
        count += 1;
    }
    assert_eq!(count, per_user * users);
    assert_eq!(h.metrics.total_transactions(), (per_user * users) as u64);

    let engine = h.detector.engine();
    assert_eq!(engine.observed_count(), (per_user * users) as u64);
    for u in 0..users {
        let observed = engine
            .with_user_profile(&format!("user_{u}"), |p| p.transaction_count())
            .expect("profile exists");
        assert_eq!(observed, per_user as u64);
    }
}
