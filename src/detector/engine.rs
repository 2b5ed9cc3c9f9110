//! Ensemble detection engine
//!
//! Shared learned state for both detector variants: per-user and per-merchant
//! profiles behind a sharded map, process-wide amount/hour windows, and the
//! adaptive per-user threshold cache. Scoring reads concurrently; observing
//! takes the per-key write guard, so a score that starts after an observe
//! returns sees its effects.

use chrono::Timelike;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::detector::merchant_profile::MerchantProfile;
use crate::detector::user_profile::UserProfile;
use crate::detector::DetectorConfig;
use crate::model::{AnomalyResult, AnomalyType, Transaction};
use crate::stats::StatsWindow;

/// Ensemble weights; must sum to 1.
pub const WEIGHT_STATISTICAL: f64 = 0.3;
pub const WEIGHT_BEHAVIOURAL: f64 = 0.4;
pub const WEIGHT_TEMPORAL: f64 = 0.3;

/// Individual sub-scores of one ensemble evaluation.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubScores {
    pub statistical: f64,
    pub behavioural: f64,
    pub temporal: f64,
    /// Normalized amount z-score component, min(|z| / 3, 1).
    pub amount: f64,
    /// Burst component, min(k / burst_count, 1).
    pub velocity: f64,
    /// Normalized minimum distance to known locations, when present.
    pub location: Option<f64>,
}

/// Outcome of the rule path over one transaction.
#[derive(Debug, Clone, Copy)]
struct RuleVerdict {
    flagged: bool,
    score: f64,
    anomaly_type: AnomalyType,
}

pub struct DetectionEngine {
    config: DetectorConfig,
    users: DashMap<String, UserProfile>,
    merchants: DashMap<String, MerchantProfile>,
    global_amounts: Mutex<StatsWindow>,
    global_hours: Mutex<StatsWindow>,
    thresholds: DashMap<String, f64>,
    observed: AtomicU64,
    trained: AtomicBool,
    clock: Arc<dyn Clock>,
}

/// Snapshot of learned-state gauges for periodic logging.
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub observed: u64,
    pub trained: bool,
    pub unique_users: usize,
    pub unique_merchants: usize,
    pub global_mean_amount: f64,
    pub average_threshold: f64,
}

impl DetectionEngine {
    pub fn new(config: DetectorConfig, clock: Arc<dyn Clock>) -> Self {
        let capacity = config.global_window_capacity;
        info!(
            threshold = config.anomaly_threshold,
            min_training_samples = config.min_training_samples,
            "Initializing detection engine"
        );
        Self {
            config,
            users: DashMap::new(),
            merchants: DashMap::new(),
            global_amounts: Mutex::new(StatsWindow::new(capacity)),
            global_hours: Mutex::new(StatsWindow::new(capacity)),
            thresholds: DashMap::new(),
            observed: AtomicU64::new(0),
            trained: AtomicBool::new(false),
            clock,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn is_trained(&self) -> bool {
        self.trained.load(Ordering::Acquire)
    }

    pub fn observed_count(&self) -> u64 {
        self.observed.load(Ordering::Acquire)
    }

    /// Decision threshold for a user: the adapted value when one has been
    /// learned, the configured base otherwise.
    pub fn adaptive_threshold(&self, user_id: &str) -> f64 {
        self.thresholds
            .get(user_id)
            .map(|t| *t)
            .unwrap_or(self.config.anomaly_threshold)
    }

    /// Folds a transaction into every piece of learned state.
    pub fn observe(&self, tx: &Transaction) {
        {
            let mut amounts = self.global_amounts.lock();
            amounts.add(tx.amount);
        }
        {
            let mut hours = self.global_hours.lock();
            hours.add(f64::from(tx.timestamp.hour()));
        }

        let (count, variability) = {
            let mut profile = self
                .users
                .entry(tx.user_id.clone())
                .or_insert_with(|| UserProfile::new(tx.user_id.clone()));
            profile.observe(tx);
            (profile.transaction_count(), profile.variability_score())
        };

        if count >= 10 {
            let adjusted =
                (self.config.anomaly_threshold + variability * 0.2).min(0.95);
            self.thresholds.insert(tx.user_id.clone(), adjusted);
        }

        self.merchants
            .entry(tx.merchant_id.clone())
            .or_insert_with(|| MerchantProfile::new(tx.merchant_id.clone()))
            .observe(tx);

        let total = self.observed.fetch_add(1, Ordering::AcqRel) + 1;
        if total >= self.config.min_training_samples
            && !self.trained.swap(true, Ordering::AcqRel)
        {
            info!(samples = total, "Detection model is now trained");
        }
    }

    /// Full ensemble scoring for a trained model.
    pub fn score_ensemble(&self, tx: &Transaction) -> AnomalyResult {
        let subs = self.sub_scores(tx);

        let score = WEIGHT_STATISTICAL * subs.statistical
            + WEIGHT_BEHAVIOURAL * subs.behavioural
            + WEIGHT_TEMPORAL * subs.temporal;

        if !score.is_finite() {
            return self.safe_result(tx, "scoring error: non-finite ensemble score");
        }
        let score = score.clamp(0.0, 1.0);

        let threshold = self.adaptive_threshold(&tx.user_id);
        let is_anomaly = score > threshold;
        let anomaly_type = self.classify(tx, &subs);
        let confidence = (0.5 + (score - threshold).abs()).min(0.9);

        debug!(
            transaction_id = %tx.transaction_id,
            score,
            threshold,
            is_anomaly,
            "Scored transaction"
        );

        AnomalyResult {
            transaction_id: tx.transaction_id.clone(),
            is_anomaly,
            anomaly_score: score,
            confidence,
            anomaly_type,
            detected_at: self.clock.now(),
            original_transaction: tx.clone(),
            features_used: self.extract_features(tx, Some(&subs)),
            reason: Self::explain(score, is_anomaly, &subs),
        }
    }

    /// First-match anomaly-type classification.
    fn classify(&self, tx: &Transaction, subs: &SubScores) -> AnomalyType {
        if subs.velocity > 0.5 {
            AnomalyType::Velocity
        } else if subs.amount > 0.6 {
            AnomalyType::UnusualAmount
        } else if subs.temporal > 0.5 {
            AnomalyType::TimePattern
        } else if tx.amount > 10_000.0 {
            AnomalyType::Fraud
        } else {
            AnomalyType::StatisticalOutlier
        }
    }

    fn sub_scores(&self, tx: &Transaction) -> SubScores {
        let Some(profile) = self.users.get(&tx.user_id) else {
            // Missing profile: every component contributes zero.
            return SubScores::default();
        };

        let amount = finite_or_zero((profile.amount_z_score(tx.amount).abs() / 3.0).min(1.0));
        // Frequency component reserved; contributes zero but stays in the average.
        let frequency = 0.0;
        let statistical = (amount + frequency) / 2.0;

        let category = finite_or_zero(profile.category_anomaly(&tx.merchant_category));
        let payment = finite_or_zero(profile.payment_anomaly(&tx.payment_method));
        let location = tx
            .location
            .as_ref()
            .map(|loc| finite_or_zero(profile.location_anomaly(loc)));
        let behavioural = match location {
            Some(loc_score) => (category + payment + loc_score) / 3.0,
            None => (category + payment) / 2.0,
        };

        let hour = finite_or_zero(profile.hour_anomaly(tx.hour_of_day()));
        let day = finite_or_zero(profile.day_anomaly(tx.day_of_week()));
        let burst = profile.velocity_count(tx.timestamp, self.config.velocity_window_minutes);
        let velocity =
            (burst as f64 / self.config.velocity_burst_count as f64).min(1.0);
        let temporal = (hour + day + velocity) / 3.0;

        SubScores {
            statistical: finite_or_zero(statistical).clamp(0.0, 1.0),
            behavioural: finite_or_zero(behavioural).clamp(0.0, 1.0),
            temporal: finite_or_zero(temporal).clamp(0.0, 1.0),
            amount,
            velocity,
            location,
        }
    }

    /// Rule evaluation shared by the statistical variant's untrained path
    /// and its trained rule floor.
    fn evaluate_rules(&self, tx: &Transaction) -> RuleVerdict {
        let mut verdict = RuleVerdict {
            flagged: false,
            score: 0.0,
            anomaly_type: AnomalyType::Unknown,
        };

        if tx.amount > 5_000.0 {
            verdict.flagged = true;
            verdict.score = 0.8;
            verdict.anomaly_type = AnomalyType::UnusualAmount;
        }

        let hour = tx.hour_of_day();
        if hour < 6 || hour > 22 {
            verdict.flagged = true;
            verdict.score = verdict.score.max(0.7);
            verdict.anomaly_type = AnomalyType::TimePattern;
        }

        verdict
    }

    /// Untrained scoring for the statistical variant: rules alone, with the
    /// reduced confidence the rule path carries.
    pub fn score_with_rules(&self, tx: &Transaction) -> AnomalyResult {
        let verdict = self.evaluate_rules(tx);

        let reason = if verdict.flagged {
            match verdict.anomaly_type {
                AnomalyType::TimePattern => "rule-based detection: unusual time".to_string(),
                _ => "rule-based detection: large amount".to_string(),
            }
        } else {
            "rule-based detection: normal transaction".to_string()
        };

        AnomalyResult {
            transaction_id: tx.transaction_id.clone(),
            is_anomaly: verdict.flagged,
            anomaly_score: verdict.score,
            confidence: if verdict.flagged { 0.6 } else { 0.9 },
            anomaly_type: verdict.anomaly_type,
            detected_at: self.clock.now(),
            original_transaction: tx.clone(),
            features_used: self.extract_features(tx, None),
            reason,
        }
    }

    /// Trained scoring for the statistical variant: the ensemble score
    /// floored by the rule score, so the hard rules stay active after
    /// training.
    pub fn score_ensemble_with_rule_floor(&self, tx: &Transaction) -> AnomalyResult {
        let mut result = self.score_ensemble(tx);
        let verdict = self.evaluate_rules(tx);

        if verdict.flagged && verdict.score > result.anomaly_score {
            let threshold = self.adaptive_threshold(&tx.user_id);
            result.anomaly_score = verdict.score;
            result.is_anomaly = verdict.score > threshold;
            result.anomaly_type = verdict.anomaly_type;
            result.confidence = (0.5 + (verdict.score - threshold).abs()).min(0.9);
            result.reason = match verdict.anomaly_type {
                AnomalyType::TimePattern => {
                    format!("rule floor: unusual time (score {:.3})", verdict.score)
                }
                _ => format!("rule floor: large amount (score {:.3})", verdict.score),
            };
        }

        result
    }

    /// Normal result used before the model has trained and when scoring
    /// degrades defensively.
    pub fn untrained_result(&self, tx: &Transaction) -> AnomalyResult {
        AnomalyResult {
            transaction_id: tx.transaction_id.clone(),
            is_anomaly: false,
            anomaly_score: 0.1,
            confidence: 0.8,
            anomaly_type: AnomalyType::Unknown,
            detected_at: self.clock.now(),
            original_transaction: tx.clone(),
            features_used: self.extract_features(tx, None),
            reason: "model-not-trained".to_string(),
        }
    }

    fn safe_result(&self, tx: &Transaction, reason: &str) -> AnomalyResult {
        AnomalyResult {
            transaction_id: tx.transaction_id.clone(),
            is_anomaly: false,
            anomaly_score: 0.0,
            confidence: 0.1,
            anomaly_type: AnomalyType::Unknown,
            detected_at: self.clock.now(),
            original_transaction: tx.clone(),
            features_used: self.extract_features(tx, None),
            reason: reason.to_string(),
        }
    }

    fn extract_features(
        &self,
        tx: &Transaction,
        subs: Option<&SubScores>,
    ) -> HashMap<String, f64> {
        let mut features = HashMap::new();
        features.insert("amount".to_string(), tx.amount);
        features.insert("hour_of_day".to_string(), f64::from(tx.hour_of_day()));
        features.insert("day_of_week".to_string(), f64::from(tx.day_of_week()));

        if let Some(profile) = self.users.get(&tx.user_id) {
            features.insert("user_avg_amount".to_string(), profile.average_amount());
            features.insert(
                "user_transaction_count".to_string(),
                profile.transaction_count() as f64,
            );
        }

        if let Some(subs) = subs {
            features.insert("statistical_score".to_string(), subs.statistical);
            features.insert("behavioural_score".to_string(), subs.behavioural);
            features.insert("temporal_score".to_string(), subs.temporal);
            features.insert("velocity_score".to_string(), subs.velocity);
            if let Some(location) = subs.location {
                features.insert("location_score".to_string(), location);
            }
        }

        features
    }

    fn explain(score: f64, is_anomaly: bool, subs: &SubScores) -> String {
        if !is_anomaly {
            return "normal transaction pattern".to_string();
        }
        // Name the dominating sub-score.
        if subs.temporal >= subs.statistical && subs.temporal >= subs.behavioural {
            if subs.velocity > 0.5 {
                format!("burst of transactions in a short window (score {score:.3})")
            } else {
                format!("unusual timing for this user (score {score:.3})")
            }
        } else if subs.behavioural >= subs.statistical {
            format!(
                "transaction departs from the user's merchant and payment habits (score {score:.3})"
            )
        } else {
            format!("amount deviates sharply from the user's baseline (score {score:.3})")
        }
    }

    /// Learned-state gauges for the periodic metrics log line.
    pub fn stats(&self) -> EngineStats {
        let threshold_sum: f64 = self.thresholds.iter().map(|t| *t).sum();
        let threshold_count = self.thresholds.len();
        EngineStats {
            observed: self.observed_count(),
            trained: self.is_trained(),
            unique_users: self.users.len(),
            unique_merchants: self.merchants.len(),
            global_mean_amount: self.global_amounts.lock().mean(),
            average_threshold: if threshold_count == 0 {
                self.config.anomaly_threshold
            } else {
                threshold_sum / threshold_count as f64
            },
        }
    }

    /// Read access to a user profile for assertions and diagnostics.
    pub fn with_user_profile<R>(
        &self,
        user_id: &str,
        f: impl FnOnce(&UserProfile) -> R,
    ) -> Option<R> {
        self.users.get(user_id).map(|p| f(&p))
    }

    /// Read access to a merchant profile for assertions and diagnostics.
    pub fn with_merchant_profile<R>(
        &self,
        merchant_id: &str,
        f: impl FnOnce(&MerchantProfile) -> R,
    ) -> Option<R> {
        self.merchants.get(merchant_id).map(|p| f(&p))
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}
