//! Per-user behavioural baseline
//!
//! Tracks spending distribution, category/payment/time frequencies, location
//! history, and a recent-transaction queue for velocity analysis. Created
//! lazily on first observation and mutated only by `observe`.

use chrono::NaiveDateTime;
use std::collections::{HashMap, VecDeque};

use crate::model::{Location, Transaction};
use crate::stats::StatsWindow;

const AMOUNT_WINDOW_CAPACITY: usize = 100;
const MAX_LOCATIONS: usize = 50;
const MAX_RECENT_TRANSACTIONS: usize = 100;

/// Distances beyond this many kilometres from every known location score 1.0.
const LOCATION_NORMALIZATION_KM: f64 = 100.0;

#[derive(Debug)]
pub struct UserProfile {
    user_id: String,
    amount_stats: StatsWindow,
    category_counts: HashMap<String, u64>,
    payment_counts: HashMap<String, u64>,
    hour_counts: [u64; 24],
    day_counts: [u64; 7],
    locations: Vec<Location>,
    recent_transactions: VecDeque<Transaction>,
    transaction_count: u64,
    variability_score: f64,
    last_seen: Option<NaiveDateTime>,
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            amount_stats: StatsWindow::new(AMOUNT_WINDOW_CAPACITY),
            category_counts: HashMap::new(),
            payment_counts: HashMap::new(),
            hour_counts: [0; 24],
            day_counts: [0; 7],
            locations: Vec::new(),
            recent_transactions: VecDeque::new(),
            transaction_count: 0,
            variability_score: 0.0,
            last_seen: None,
        }
    }

    /// Folds one transaction into the baseline.
    pub fn observe(&mut self, tx: &Transaction) {
        self.amount_stats.add(tx.amount);

        *self
            .category_counts
            .entry(tx.merchant_category.clone())
            .or_insert(0) += 1;
        *self
            .payment_counts
            .entry(tx.payment_method.clone())
            .or_insert(0) += 1;
        self.hour_counts[tx.hour_of_day() as usize % 24] += 1;
        self.day_counts[(tx.day_of_week() as usize - 1) % 7] += 1;

        if let Some(location) = &tx.location {
            self.locations.push(location.clone());
            if self.locations.len() > MAX_LOCATIONS {
                self.locations.remove(0);
            }
        }

        self.recent_transactions.push_back(tx.clone());
        if self.recent_transactions.len() > MAX_RECENT_TRANSACTIONS {
            self.recent_transactions.pop_front();
        }

        self.transaction_count += 1;
        self.last_seen = Some(tx.timestamp);

        if self.amount_stats.len() > 5 {
            let mean = self.amount_stats.mean();
            self.variability_score = if mean <= 0.0 {
                1.0
            } else {
                (self.amount_stats.std_dev() / mean / 2.0).clamp(0.0, 1.0)
            };
        }
    }

    /// Absolute z-score of an amount against the user's window.
    ///
    /// Too few samples (< 3) score 0. A degenerate window (stddev 0) scores
    /// 0 for an exact match and 3 for any deviation.
    pub fn amount_z_score(&self, amount: f64) -> f64 {
        if self.amount_stats.len() < 3 {
            return 0.0;
        }
        let mean = self.amount_stats.mean();
        let std_dev = self.amount_stats.std_dev();
        if std_dev == 0.0 {
            return if amount == mean { 0.0 } else { 3.0 };
        }
        (amount - mean).abs() / std_dev
    }

    /// Low-frequency merchant categories are more anomalous.
    pub fn category_anomaly(&self, category: &str) -> f64 {
        if self.transaction_count < 5 {
            return 0.0;
        }
        let count = self.category_counts.get(category).copied().unwrap_or(0);
        let frequency = count as f64 / self.transaction_count as f64;
        (0.8 - frequency * 4.0).max(0.0)
    }

    /// Unusual payment methods are anomalous.
    pub fn payment_anomaly(&self, payment_method: &str) -> f64 {
        if self.transaction_count < 5 {
            return 0.0;
        }
        let count = self.payment_counts.get(payment_method).copied().unwrap_or(0);
        let frequency = count as f64 / self.transaction_count as f64;
        (0.7 - frequency * 3.0).max(0.0)
    }

    /// Unusual hours are anomalous.
    pub fn hour_anomaly(&self, hour: u32) -> f64 {
        if self.transaction_count < 10 {
            return 0.0;
        }
        let count = self.hour_counts[hour as usize % 24];
        let frequency = count as f64 / self.transaction_count as f64;
        (0.6 - frequency * 10.0).max(0.0)
    }

    /// Unusual weekdays are anomalous. `day` is ISO (Monday = 1 .. Sunday = 7).
    pub fn day_anomaly(&self, day: u32) -> f64 {
        if self.transaction_count < 10 {
            return 0.0;
        }
        let count = self.day_counts[(day as usize - 1) % 7];
        let frequency = count as f64 / self.transaction_count as f64;
        (0.5 - frequency * 7.0).max(0.0)
    }

    /// Minimum Haversine distance to any known location, normalized so that
    /// 100 km or more scores 1.0. No history scores 0.
    pub fn location_anomaly(&self, location: &Location) -> f64 {
        if self.locations.is_empty() {
            return 0.0;
        }
        let min_km = self
            .locations
            .iter()
            .map(|known| location.distance_km(known))
            .fold(f64::MAX, f64::min);
        (min_km / LOCATION_NORMALIZATION_KM).min(1.0)
    }

    /// Number of recent transactions whose timestamp falls within
    /// `window_minutes` before (inclusive of) the given reference time.
    pub fn velocity_count(&self, reference: NaiveDateTime, window_minutes: i64) -> u64 {
        self.recent_transactions
            .iter()
            .filter(|t| {
                let elapsed = reference - t.timestamp;
                elapsed >= chrono::Duration::zero()
                    && elapsed <= chrono::Duration::minutes(window_minutes)
            })
            .count() as u64
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn transaction_count(&self) -> u64 {
        self.transaction_count
    }

    pub fn average_amount(&self) -> f64 {
        self.amount_stats.mean()
    }

    pub fn variability_score(&self) -> f64 {
        self.variability_score
    }

    pub fn last_seen(&self) -> Option<NaiveDateTime> {
        self.last_seen
    }

    pub fn location_count(&self) -> usize {
        self.locations.len()
    }

    pub fn recent_transaction_count(&self) -> usize {
        self.recent_transactions.len()
    }

    /// Sum of every frequency table, used to assert table consistency.
    pub fn frequency_sums(&self) -> (u64, u64, u64, u64) {
        (
            self.category_counts.values().sum(),
            self.payment_counts.values().sum(),
            self.hour_counts.iter().sum(),
            self.day_counts.iter().sum(),
        )
    }
}
