//! Synthetic traffic for demo mode
//!
//! Feeds the in-memory bus with mostly-normal transactions plus occasional
//! large-amount, late-night, and burst outliers, and logs whatever lands on
//! the alerts sink. Only spawned when `DEMO_MODE` is set.

use chrono::NaiveDateTime;
use rand::Rng;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::model::{AnomalyResult, Location, Transaction};
use crate::pipeline::transport::Record;

const USERS: &[&str] = &["user_alice", "user_bob", "user_carol", "user_dave", "user_erin"];
const MERCHANTS: &[(&str, &str)] = &[
    ("merchant_grocer", "grocery"),
    ("merchant_coffee", "restaurant"),
    ("merchant_fuel", "fuel"),
    ("merchant_pharmacy", "pharmacy"),
    ("merchant_streaming", "entertainment"),
];
const PAYMENT_METHODS: &[&str] = &["credit_card", "debit_card", "wallet"];

const HOME_LOCATION: Location = Location {
    latitude: 40.7128,
    longitude: -74.0060,
    country: String::new(),
    city: String::new(),
};

/// Spawns the generator task writing records into the input channel.
pub fn spawn_generator(
    input: mpsc::Sender<Record>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Demo generator started");
        let mut sent: u64 = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }

            let tx = next_transaction();
            let Ok(payload) = serde_json::to_vec(&tx) else {
                continue;
            };
            let record = Record::new(tx.user_id.clone(), payload);

            tokio::select! {
                result = input.send(record) => {
                    if result.is_err() {
                        break;
                    }
                    sent += 1;
                }
                _ = shutdown.changed() => break,
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        info!(sent, "Demo generator stopped");
    })
}

/// Spawns a consumer draining the all-results sink into debug logs, keeping
/// the channel flowing when no broker producer is attached.
pub fn spawn_result_logger(
    mut results: mpsc::Receiver<Record>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let record = tokio::select! {
                record = results.recv() => record,
                _ = shutdown.changed() => None,
            };
            let Some(record) = record else {
                break;
            };
            match serde_json::from_slice::<AnomalyResult>(&record.payload) {
                Ok(result) => tracing::debug!(
                    transaction_id = %result.transaction_id,
                    score = result.anomaly_score,
                    is_anomaly = result.is_anomaly,
                    "Result emitted"
                ),
                Err(e) => warn!(error = %e, "Undecodable result payload"),
            }
        }
        info!("Result consumer stopped");
    })
}

/// Spawns the console consumer draining the alerts sink.
pub fn spawn_alert_consumer(
    mut alerts: mpsc::Receiver<Record>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let record = tokio::select! {
                record = alerts.recv() => record,
                _ = shutdown.changed() => None,
            };
            let Some(record) = record else {
                break;
            };
            match serde_json::from_slice::<AnomalyResult>(&record.payload) {
                Ok(alert) => warn!(
                    transaction_id = %alert.transaction_id,
                    score = alert.anomaly_score,
                    anomaly_type = %alert.anomaly_type,
                    reason = %alert.reason,
                    "ALERT"
                ),
                Err(e) => warn!(error = %e, "Undecodable alert payload"),
            }
        }
        info!("Demo alert consumer stopped");
    })
}

fn next_transaction() -> Transaction {
    let mut rng = rand::thread_rng();
    let roll: f64 = rng.gen();

    if roll < 0.80 {
        normal_transaction(&mut rng)
    } else if roll < 0.90 {
        high_amount_transaction(&mut rng)
    } else if roll < 0.95 {
        late_night_transaction(&mut rng)
    } else {
        distant_location_transaction(&mut rng)
    }
}

fn timestamp_at_hour(hour: u32, rng: &mut impl Rng) -> NaiveDateTime {
    let now = chrono::Local::now().naive_local().date();
    now.and_hms_opt(hour, rng.gen_range(0..60), rng.gen_range(0..60))
        .expect("valid demo time")
}

fn base_transaction(
    amount: f64,
    hour: u32,
    location: Location,
    rng: &mut impl Rng,
) -> Transaction {
    let user = USERS[rng.gen_range(0..USERS.len())];
    let (merchant, category) = MERCHANTS[rng.gen_range(0..MERCHANTS.len())];
    Transaction {
        transaction_id: Uuid::new_v4().to_string(),
        user_id: user.to_string(),
        merchant_id: merchant.to_string(),
        amount,
        currency: "USD".to_string(),
        timestamp: timestamp_at_hour(hour, rng),
        location: Some(location),
        payment_method: PAYMENT_METHODS[rng.gen_range(0..PAYMENT_METHODS.len())].to_string(),
        merchant_category: category.to_string(),
        metadata: HashMap::new(),
    }
}

fn home(rng: &mut impl Rng) -> Location {
    // Jitter within the metro area.
    Location {
        latitude: HOME_LOCATION.latitude + rng.gen_range(-0.05..0.05),
        longitude: HOME_LOCATION.longitude + rng.gen_range(-0.05..0.05),
        country: "USA".to_string(),
        city: "New York".to_string(),
    }
}

fn normal_transaction(rng: &mut impl Rng) -> Transaction {
    let amount = rng.gen_range(5.0..150.0);
    let hour = rng.gen_range(8..21);
    let location = home(rng);
    base_transaction(amount, hour, location, rng)
}

fn high_amount_transaction(rng: &mut impl Rng) -> Transaction {
    let amount = rng.gen_range(6_000.0..25_000.0);
    let hour = rng.gen_range(8..21);
    let location = home(rng);
    base_transaction(amount, hour, location, rng)
}

fn late_night_transaction(rng: &mut impl Rng) -> Transaction {
    let amount = rng.gen_range(20.0..300.0);
    let hour = rng.gen_range(0..5);
    let location = home(rng);
    base_transaction(amount, hour, location, rng)
}

fn distant_location_transaction(rng: &mut impl Rng) -> Transaction {
    let amount = rng.gen_range(50.0..500.0);
    let hour = rng.gen_range(8..21);
    let location = Location {
        latitude: 55.7558,
        longitude: 37.6173,
        country: "RUS".to_string(),
        city: "Moscow".to_string(),
    };
    base_transaction(amount, hour, location, rng)
}
