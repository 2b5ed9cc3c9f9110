//! Per-merchant baseline and risk scoring

use chrono::NaiveDateTime;
use std::collections::HashMap;

use crate::model::Transaction;
use crate::stats::StatsWindow;

const AMOUNT_WINDOW_CAPACITY: usize = 100;
const INTERVAL_WINDOW_CAPACITY: usize = 100;

#[derive(Debug)]
pub struct MerchantProfile {
    merchant_id: String,
    amount_stats: StatsWindow,
    payment_counts: HashMap<String, u64>,
    interval_stats: StatsWindow,
    transaction_count: u64,
    risk_score: f64,
    first_seen: Option<NaiveDateTime>,
    last_seen: Option<NaiveDateTime>,
}

impl MerchantProfile {
    pub fn new(merchant_id: impl Into<String>) -> Self {
        Self {
            merchant_id: merchant_id.into(),
            amount_stats: StatsWindow::new(AMOUNT_WINDOW_CAPACITY),
            payment_counts: HashMap::new(),
            interval_stats: StatsWindow::new(INTERVAL_WINDOW_CAPACITY),
            transaction_count: 0,
            risk_score: 0.0,
            first_seen: None,
            last_seen: None,
        }
    }

    /// Folds one transaction into the baseline and refreshes the risk score.
    pub fn observe(&mut self, tx: &Transaction) {
        self.amount_stats.add(tx.amount);
        *self
            .payment_counts
            .entry(tx.payment_method.clone())
            .or_insert(0) += 1;

        match self.last_seen {
            None => self.first_seen = Some(tx.timestamp),
            Some(last) => {
                let interval_minutes = (tx.timestamp - last).num_seconds() as f64 / 60.0;
                if interval_minutes > 0.0 {
                    self.interval_stats.add(interval_minutes);
                }
            }
        }
        self.last_seen = Some(tx.timestamp);
        self.transaction_count += 1;

        self.update_risk_score();
    }

    fn update_risk_score(&mut self) {
        let mut score: f64 = 0.0;

        // Sub-minute average inter-arrival suggests automated traffic.
        if self.interval_stats.len() > 10 && self.interval_stats.mean() < 1.0 {
            score += 0.3;
        }

        // Highly dispersed amounts.
        if self.amount_stats.len() > 10 && self.amount_stats.coefficient_of_variation() > 2.0 {
            score += 0.2;
        }

        // No dominant payment method.
        if !self.payment_counts.is_empty() {
            let max_count = self.payment_counts.values().copied().max().unwrap_or(0);
            if (max_count as f64 / self.transaction_count as f64) < 0.3 {
                score += 0.2;
            }
        }

        // Young merchants carry extra risk.
        if self.transaction_count < 50 {
            score += 0.1;
        }

        self.risk_score = score.min(1.0);
    }

    /// Amount anomaly against this merchant's distribution: z-score capped
    /// at 3 and normalized to [0, 1]. Same degenerate-window rule as the
    /// user profile (exact match 0, any deviation z = 3).
    pub fn amount_anomaly(&self, amount: f64) -> f64 {
        if self.amount_stats.len() < 5 {
            return 0.0;
        }
        let mean = self.amount_stats.mean();
        let std_dev = self.amount_stats.std_dev();
        let z = if std_dev == 0.0 {
            if amount == mean {
                0.0
            } else {
                3.0
            }
        } else {
            (amount - mean).abs() / std_dev
        };
        (z / 3.0).min(1.0)
    }

    pub fn merchant_id(&self) -> &str {
        &self.merchant_id
    }

    pub fn transaction_count(&self) -> u64 {
        self.transaction_count
    }

    pub fn risk_score(&self) -> f64 {
        self.risk_score
    }

    pub fn average_amount(&self) -> f64 {
        self.amount_stats.mean()
    }

    pub fn average_interval_minutes(&self) -> f64 {
        self.interval_stats.mean()
    }

    pub fn first_seen(&self) -> Option<NaiveDateTime> {
        self.first_seen
    }

    pub fn last_seen(&self) -> Option<NaiveDateTime> {
        self.last_seen
    }

    pub fn payment_method_sum(&self) -> u64 {
        self.payment_counts.values().sum()
    }
}
