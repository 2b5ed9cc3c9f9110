//! End-to-end detection scenarios against the engine
//!
//! Trains detectors through the public observe/score interface only, the way
//! the pipeline drives them.

use chrono::{NaiveDate, NaiveDateTime};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;

use streamguard::clock::FixedClock;
use streamguard::detector::{AnomalyDetector, Detector, DetectorConfig};
use streamguard::model::{AnomalyResult, AnomalyType, Location, Transaction};

fn base_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(14, 30, 0)
        .unwrap()
}

fn new_york() -> Location {
    Location {
        latitude: 40.7128,
        longitude: -74.0060,
        country: "USA".to_string(),
        city: "New York".to_string(),
    }
}

fn moscow() -> Location {
    Location {
        latitude: 55.7558,
        longitude: 37.6173,
        country: "RUS".to_string(),
        city: "Moscow".to_string(),
    }
}

#[derive(Clone)]
struct TxSpec {
    user: &'static str,
    amount: f64,
    timestamp: NaiveDateTime,
    category: &'static str,
    payment: &'static str,
    location: Option<Location>,
}

impl TxSpec {
    fn new(user: &'static str, amount: f64, timestamp: NaiveDateTime) -> Self {
        Self {
            user,
            amount,
            timestamp,
            category: "grocery",
            payment: "credit_card",
            location: None,
        }
    }

    fn category(mut self, category: &'static str) -> Self {
        self.category = category;
        self
    }

    fn payment(mut self, payment: &'static str) -> Self {
        self.payment = payment;
        self
    }

    fn location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    fn build(self, id: &str) -> Transaction {
        Transaction {
            transaction_id: id.to_string(),
            user_id: self.user.to_string(),
            merchant_id: "merchant_grocery".to_string(),
            amount: self.amount,
            currency: "USD".to_string(),
            timestamp: self.timestamp,
            location: self.location,
            payment_method: self.payment.to_string(),
            merchant_category: self.category.to_string(),
            metadata: HashMap::new(),
        }
    }
}

fn detector_with_threshold(variant: &str, threshold: f64) -> Detector {
    let config = DetectorConfig {
        anomaly_threshold: threshold,
        ..DetectorConfig::default()
    };
    let clock = Arc::new(FixedClock::new(base_time()));
    match variant {
        "ensemble" => Detector::ensemble_with_clock(config, clock),
        _ => Detector::statistical_with_clock(config, clock),
    }
}

/// Scenario: a user trained on small daytime amounts hits a 15k transaction.
#[test]
fn large_amount_flags_for_trained_user() {
    let detector = detector_with_threshold("statistical", 0.75);

    for i in 0..60i64 {
        // One transaction a day, always hour 14, amounts in [40, 60].
        let ts = base_time() + chrono::Duration::days(i);
        let amount = 40.0 + (i % 21) as f64;
        detector.observe(&TxSpec::new("user_a", amount, ts).build(&format!("train_{i}")));
    }

    let probe = TxSpec::new("user_a", 15_000.0, base_time() + chrono::Duration::days(61))
        .build("probe");
    let result = detector.score(&probe);

    assert!(result.is_anomaly, "expected anomaly, got {result:?}");
    assert!(
        matches!(
            result.anomaly_type,
            AnomalyType::UnusualAmount | AnomalyType::Fraud
        ),
        "unexpected type {:?}",
        result.anomaly_type
    );
    assert!(result.anomaly_score >= 0.6);
}

/// Scenario: the rule path flags a late-night transaction before training.
#[test]
fn late_night_flags_on_rule_path() {
    let detector = detector_with_threshold("statistical", 0.75);

    for i in 0..10i64 {
        let ts = base_time() + chrono::Duration::days(i);
        detector.observe(&TxSpec::new("user_a", 50.0, ts).build(&format!("train_{i}")));
    }

    let late = NaiveDate::from_ymd_opt(2024, 2, 1)
        .unwrap()
        .and_hms_opt(3, 0, 0)
        .unwrap();
    let result = detector.score(&TxSpec::new("user_a", 150.0, late).build("probe"));

    assert!(result.is_anomaly);
    assert_eq!(result.anomaly_type, AnomalyType::TimePattern);
    assert!(result.anomaly_score >= 0.7);
    assert_eq!(result.confidence, 0.6);
}

/// Scenario: a burst of five transactions inside five minutes.
#[test]
fn velocity_burst_flags() {
    let detector = detector_with_threshold("ensemble", 0.4);

    for i in 0..60i64 {
        let ts = base_time() + chrono::Duration::days(i);
        let amount = 45.0 + (i % 11) as f64;
        detector.observe(&TxSpec::new("user_b", amount, ts).build(&format!("train_{i}")));
    }

    // Four transactions at minutes 0..3 of the same hour.
    let burst_start = NaiveDate::from_ymd_opt(2024, 3, 4)
        .unwrap()
        .and_hms_opt(14, 0, 0)
        .unwrap();
    for i in 0..4i64 {
        let ts = burst_start + chrono::Duration::minutes(i);
        detector.observe(&TxSpec::new("user_b", 50.0, ts).build(&format!("burst_{i}")));
    }

    // The fifth arrives at minute 4 and departs from every learned habit.
    let probe = TxSpec::new("user_b", 15_000.0, burst_start + chrono::Duration::minutes(4))
        .category("jewelry")
        .payment("crypto")
        .build("probe");
    let result = detector.score(&probe);

    assert_eq!(result.features_used.get("velocity_score"), Some(&1.0));
    assert_eq!(result.anomaly_type, AnomalyType::Velocity);
    assert!(result.is_anomaly, "expected anomaly, got {result:?}");
}

/// Scenario: a user trained in New York transacts from Moscow.
#[test]
fn location_drift_flags() {
    let detector = detector_with_threshold("ensemble", 0.1);

    for i in 0..60i64 {
        let ts = base_time() + chrono::Duration::days(i);
        detector.observe(
            &TxSpec::new("user_c", 50.0, ts)
                .location(new_york())
                .build(&format!("train_{i}")),
        );
    }

    let probe = TxSpec::new("user_c", 50.0, base_time() + chrono::Duration::days(61))
        .location(moscow())
        .build("probe");
    let result = detector.score(&probe);

    assert_eq!(result.features_used.get("location_score"), Some(&1.0));
    assert!(result.is_anomaly, "expected anomaly, got {result:?}");
    assert!(
        matches!(
            result.anomaly_type,
            AnomalyType::StatisticalOutlier | AnomalyType::Location
        ),
        "unexpected type {:?}",
        result.anomaly_type
    );
}

/// Scenario: an amount near the learned mean at the usual hour and place.
#[test]
fn normal_baseline_stays_quiet() {
    let detector = detector_with_threshold("ensemble", 0.75);

    for i in 0..60i64 {
        let ts = base_time() + chrono::Duration::days(i);
        let amount = 48.0 + (i % 5) as f64;
        detector.observe(
            &TxSpec::new("user_d", amount, ts)
                .location(new_york())
                .build(&format!("train_{i}")),
        );
    }

    let probe = TxSpec::new("user_d", 52.0, base_time() + chrono::Duration::days(61))
        .location(new_york())
        .build("probe");
    let result = detector.score(&probe);

    assert!(!result.is_anomaly);
    assert!(result.anomaly_score <= 0.5);
    assert!(result.confidence >= 0.5);
}

/// Scenario: the ensemble variant stays silent before training.
#[test]
fn model_not_trained_result() {
    let detector = detector_with_threshold("ensemble", 0.75);

    for i in 0..5i64 {
        let ts = base_time() + chrono::Duration::days(i);
        detector.observe(&TxSpec::new("user_e", 50.0, ts).build(&format!("train_{i}")));
    }

    let result = detector.score(&TxSpec::new("user_e", 50_000.0, base_time()).build("probe"));
    assert!(!result.is_anomaly);
    assert_eq!(result.anomaly_score, 0.1);
    assert!(result.reason.starts_with("model-not-trained"));
}

/// After enough observations the "model-not-trained" reason disappears.
#[test]
fn training_transition() {
    let detector = detector_with_threshold("ensemble", 0.75);
    for i in 0..50i64 {
        let ts = base_time() + chrono::Duration::hours(i);
        detector.observe(&TxSpec::new("user_f", 50.0, ts).build(&format!("train_{i}")));
    }
    let result = detector.score(&TxSpec::new("user_f", 50.0, base_time()).build("probe"));
    assert_ne!(result.reason, "model-not-trained");
}

fn random_transaction(rng: &mut impl Rng, i: usize) -> Transaction {
    let users = ["user_1", "user_2", "user_3", "user_4"];
    let categories = ["grocery", "fuel", "restaurant", "jewelry"];
    let payments = ["credit_card", "debit_card", "wallet"];
    let ts = base_time()
        + chrono::Duration::minutes(rng.gen_range(0..100_000))
        + chrono::Duration::seconds(rng.gen_range(0..60));
    let location = if rng.gen_bool(0.5) {
        Some(Location {
            latitude: rng.gen_range(-90.0..90.0),
            longitude: rng.gen_range(-180.0..180.0),
            country: "XX".to_string(),
            city: "Anywhere".to_string(),
        })
    } else {
        None
    };
    Transaction {
        transaction_id: format!("rand_{i}"),
        user_id: users[rng.gen_range(0..users.len())].to_string(),
        merchant_id: "merchant_rand".to_string(),
        amount: rng.gen_range(0.0..100_000.0),
        currency: "USD".to_string(),
        timestamp: ts,
        location,
        payment_method: payments[rng.gen_range(0..payments.len())].to_string(),
        merchant_category: categories[rng.gen_range(0..categories.len())].to_string(),
        metadata: HashMap::new(),
    }
}

/// Universal invariant: scores and confidences stay within [0, 1] for valid
/// random inputs, on both variants, trained or not.
#[test]
fn random_inputs_keep_scores_bounded() {
    let mut rng = rand::thread_rng();
    for variant in ["ensemble", "statistical"] {
        let detector = detector_with_threshold(variant, 0.75);
        for i in 0..300 {
            let tx = random_transaction(&mut rng, i);
            let result = detector.score(&tx);
            assert!(
                (0.0..=1.0).contains(&result.anomaly_score),
                "{variant}: score {} out of range",
                result.anomaly_score
            );
            assert!(
                (0.0..=1.0).contains(&result.confidence),
                "{variant}: confidence {} out of range",
                result.confidence
            );
            detector.observe(&tx);
        }
    }
}

/// Universal invariant: on the trained ensemble path the flag matches the
/// threshold comparison exactly.
#[test]
fn threshold_monotonicity() {
    let mut rng = rand::thread_rng();
    let detector = detector_with_threshold("ensemble", 0.5);
    for i in 0..200 {
        let tx = random_transaction(&mut rng, i);
        detector.observe(&tx);
    }
    for i in 0..200 {
        let tx = random_transaction(&mut rng, 1000 + i);
        let result = detector.score(&tx);
        let threshold = detector.engine().adaptive_threshold(&tx.user_id);
        assert_eq!(
            result.is_anomaly,
            result.anomaly_score > threshold,
            "flag inconsistent with threshold for {tx:?}"
        );
    }
}

/// Universal invariant: identical observe prefix makes scoring pure.
#[test]
fn scoring_is_deterministic_and_type_stable() {
    let detector = detector_with_threshold("ensemble", 0.75);
    for i in 0..80i64 {
        let ts = base_time() + chrono::Duration::hours(i * 3);
        detector.observe(&TxSpec::new("user_g", 40.0 + (i % 30) as f64, ts).build(&format!("t_{i}")));
    }
    let probe = TxSpec::new("user_g", 12_000.0, base_time() + chrono::Duration::days(30))
        .category("jewelry")
        .build("probe");
    let first = detector.score(&probe);
    let second = detector.score(&probe);
    assert_eq!(first, second);
    assert_eq!(first.anomaly_type, second.anomaly_type);
}

/// Universal invariant: every frequency table sums to the transaction count,
/// and bounded state stays bounded.
#[test]
fn profile_invariants_after_load() {
    let detector = detector_with_threshold("ensemble", 0.75);
    for i in 0..300i64 {
        let ts = base_time() + chrono::Duration::minutes(i * 17);
        detector.observe(
            &TxSpec::new("user_h", 10.0 + (i % 90) as f64, ts)
                .location(new_york())
                .build(&format!("t_{i}")),
        );
    }
    let engine = detector.engine();
    let checks = engine
        .with_user_profile("user_h", |p| {
            (
                p.frequency_sums(),
                p.transaction_count(),
                p.location_count(),
                p.recent_transaction_count(),
            )
        })
        .expect("profile exists");
    let ((cat, pay, hour, day), count, locations, recent) = checks;
    assert_eq!(cat, count);
    assert_eq!(pay, count);
    assert_eq!(hour, count);
    assert_eq!(day, count);
    assert!(locations <= 50);
    assert!(recent <= 100);
}

/// Universal invariant: results survive a JSON round trip intact.
#[test]
fn anomaly_result_round_trip() {
    let detector = detector_with_threshold("statistical", 0.75);
    let probe = TxSpec::new("user_i", 9_000.0, base_time())
        .location(new_york())
        .build("probe");
    let result: AnomalyResult = detector.score(&probe);

    let json = serde_json::to_string(&result).unwrap();
    let parsed: AnomalyResult = serde_json::from_str(&json).unwrap();
    assert_eq!(result, parsed);
}

/// Concurrency: observers on distinct users never lose updates.
#[test]
fn concurrent_observes_keep_counts_consistent() {
    let detector = Arc::new(detector_with_threshold("ensemble", 0.75));
    let workers = 4;
    let per_worker = 250;

    let handles: Vec<_> = (0..workers)
        .map(|w| {
            let detector = detector.clone();
            std::thread::spawn(move || {
                for i in 0..per_worker {
                    let ts = base_time() + chrono::Duration::seconds((w * per_worker + i) as i64);
                    let tx = Transaction {
                        transaction_id: format!("w{w}_t{i}"),
                        user_id: format!("user_{w}"),
                        merchant_id: format!("merchant_{}", i % 3),
                        amount: 50.0,
                        currency: "USD".to_string(),
                        timestamp: ts,
                        location: None,
                        payment_method: "credit_card".to_string(),
                        merchant_category: "grocery".to_string(),
                        metadata: HashMap::new(),
                    };
                    detector.score(&tx);
                    detector.observe(&tx);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let engine = detector.engine();
    assert_eq!(engine.observed_count(), (workers * per_worker) as u64);
    for w in 0..workers {
        let count = engine
            .with_user_profile(&format!("user_{w}"), |p| p.transaction_count())
            .expect("profile exists");
        assert_eq!(count, per_worker as u64);
    }
}
