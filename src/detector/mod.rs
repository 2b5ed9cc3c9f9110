//! Detection Engine
//!
//! Two detector variants share one engine implementation and differ only in
//! behaviour before the model has trained:
//! - the ensemble variant returns a fixed "model-not-trained" normal result;
//! - the statistical variant falls back to hard rules, and keeps those rules
//!   as a score floor once trained.
//! The variant is chosen at construction and never changes.

pub mod engine;
pub mod merchant_profile;
pub mod user_profile;

pub use engine::{DetectionEngine, EngineStats, SubScores};
pub use merchant_profile::MerchantProfile;
pub use user_profile::UserProfile;

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::model::{AnomalyResult, Transaction};

/// Recognized engine options with their defaults.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Base decision threshold before per-user adaptation.
    pub anomaly_threshold: f64,
    /// Observations required system-wide before ensemble scoring engages.
    pub min_training_samples: u64,
    /// Window for the temporal velocity sub-score, in minutes.
    pub velocity_window_minutes: i64,
    /// Normalisation divisor for the velocity sub-score.
    pub velocity_burst_count: u32,
    /// Capacity of the process-wide amount and hour windows.
    pub global_window_capacity: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            anomaly_threshold: 0.75,
            min_training_samples: 50,
            velocity_window_minutes: 5,
            velocity_burst_count: 3,
            global_window_capacity: 1000,
        }
    }
}

/// Interface shared by both detector variants.
pub trait AnomalyDetector: Send + Sync {
    /// Detector name for logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Whether `observe` feeds the model while the stream runs.
    fn supports_online_learning(&self) -> bool;

    /// Scores a transaction without mutating learned state.
    fn score(&self, tx: &Transaction) -> AnomalyResult;

    /// Folds a transaction into learned state.
    fn observe(&self, tx: &Transaction);
}

/// Construction-time detector choice.
pub enum Detector {
    Ensemble(EnsembleDetector),
    Statistical(StatisticalDetector),
}

impl Detector {
    pub fn ensemble(config: DetectorConfig) -> Self {
        Self::ensemble_with_clock(config, Arc::new(SystemClock))
    }

    pub fn ensemble_with_clock(config: DetectorConfig, clock: Arc<dyn Clock>) -> Self {
        Detector::Ensemble(EnsembleDetector {
            engine: DetectionEngine::new(config, clock),
        })
    }

    pub fn statistical(config: DetectorConfig) -> Self {
        Self::statistical_with_clock(config, Arc::new(SystemClock))
    }

    pub fn statistical_with_clock(config: DetectorConfig, clock: Arc<dyn Clock>) -> Self {
        Detector::Statistical(StatisticalDetector {
            engine: DetectionEngine::new(config, clock),
        })
    }

    /// Builds the variant selected by name; unknown names get the default.
    pub fn from_variant_name(name: &str, config: DetectorConfig) -> Self {
        match name {
            "ensemble" => Self::ensemble(config),
            "statistical" => Self::statistical(config),
            other => {
                tracing::warn!(variant = other, "Unknown detector variant, using statistical");
                Self::statistical(config)
            }
        }
    }

    pub fn engine(&self) -> &DetectionEngine {
        match self {
            Detector::Ensemble(d) => &d.engine,
            Detector::Statistical(d) => &d.engine,
        }
    }
}

impl AnomalyDetector for Detector {
    fn name(&self) -> &'static str {
        match self {
            Detector::Ensemble(d) => d.name(),
            Detector::Statistical(d) => d.name(),
        }
    }

    fn supports_online_learning(&self) -> bool {
        match self {
            Detector::Ensemble(d) => d.supports_online_learning(),
            Detector::Statistical(d) => d.supports_online_learning(),
        }
    }

    fn score(&self, tx: &Transaction) -> AnomalyResult {
        match self {
            Detector::Ensemble(d) => d.score(tx),
            Detector::Statistical(d) => d.score(tx),
        }
    }

    fn observe(&self, tx: &Transaction) {
        match self {
            Detector::Ensemble(d) => d.observe(tx),
            Detector::Statistical(d) => d.observe(tx),
        }
    }
}

/// Ensemble detector: stays silent until trained.
pub struct EnsembleDetector {
    engine: DetectionEngine,
}

impl AnomalyDetector for EnsembleDetector {
    fn name(&self) -> &'static str {
        "ensemble"
    }

    fn supports_online_learning(&self) -> bool {
        true
    }

    fn score(&self, tx: &Transaction) -> AnomalyResult {
        if !self.engine.is_trained() {
            return self.engine.untrained_result(tx);
        }
        self.engine.score_ensemble(tx)
    }

    fn observe(&self, tx: &Transaction) {
        self.engine.observe(tx);
    }
}

/// Statistical detector: rules before training, rule-floored ensemble after.
pub struct StatisticalDetector {
    engine: DetectionEngine,
}

impl AnomalyDetector for StatisticalDetector {
    fn name(&self) -> &'static str {
        "statistical"
    }

    fn supports_online_learning(&self) -> bool {
        true
    }

    fn score(&self, tx: &Transaction) -> AnomalyResult {
        if !self.engine.is_trained() {
            return self.engine.score_with_rules(tx);
        }
        self.engine.score_ensemble_with_rule_floor(tx)
    }

    fn observe(&self, tx: &Transaction) {
        self.engine.observe(tx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::model::AnomalyType;
    use chrono::NaiveDate;
    use std::collections::HashMap;

    fn base_time() -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap()
    }

    fn tx(id: &str, amount: f64, ts: chrono::NaiveDateTime) -> Transaction {
        Transaction {
            transaction_id: id.to_string(),
            user_id: "user_123".to_string(),
            merchant_id: "merchant_1".to_string(),
            amount,
            currency: "USD".to_string(),
            timestamp: ts,
            location: None,
            payment_method: "credit_card".to_string(),
            merchant_category: "grocery".to_string(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_variant_names() {
        let ensemble = Detector::ensemble(DetectorConfig::default());
        assert_eq!(ensemble.name(), "ensemble");
        assert!(ensemble.supports_online_learning());

        let statistical = Detector::statistical(DetectorConfig::default());
        assert_eq!(statistical.name(), "statistical");
    }

    #[test]
    fn test_from_variant_name_falls_back() {
        let detector = Detector::from_variant_name("nonsense", DetectorConfig::default());
        assert_eq!(detector.name(), "statistical");
    }

    #[test]
    fn test_untrained_behaviours_differ() {
        let clock = Arc::new(FixedClock::new(base_time()));
        let ensemble =
            Detector::ensemble_with_clock(DetectorConfig::default(), clock.clone());
        let statistical =
            Detector::statistical_with_clock(DetectorConfig::default(), clock);

        let suspicious = tx("tx_1", 15_000.0, base_time());

        let quiet = ensemble.score(&suspicious);
        assert!(!quiet.is_anomaly);
        assert_eq!(quiet.reason, "model-not-trained");

        let flagged = statistical.score(&suspicious);
        assert!(flagged.is_anomaly);
        assert_eq!(flagged.anomaly_type, AnomalyType::UnusualAmount);
    }

    #[test]
    fn test_observe_reaches_shared_engine() {
        let detector = Detector::ensemble(DetectorConfig::default());
        for i in 0..12 {
            detector.observe(&tx(&format!("tx_{i}"), 50.0, base_time()));
        }
        assert_eq!(detector.engine().observed_count(), 12);
        assert_eq!(
            detector
                .engine()
                .with_user_profile("user_123", |p| p.transaction_count()),
            Some(12)
        );
    }
}
