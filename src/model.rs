//! Wire data model for the transaction stream
//!
//! Input transactions and output anomaly results, serialized exactly as they
//! travel on the message bus. Unknown input fields are ignored; missing
//! required fields fail deserialization so the pipeline drops the record.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Geographic point attached to a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub country: String,
    pub city: String,
}

impl Location {
    /// Great-circle distance to another point in kilometres (Haversine,
    /// Earth radius 6371 km).
    pub fn distance_km(&self, other: &Location) -> f64 {
        const EARTH_RADIUS_KM: f64 = 6371.0;

        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_KM * c
    }
}

/// One transaction event pulled from the input stream.
///
/// `timestamp` is a civil date-time without a zone; the engine never converts
/// it to an instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub user_id: String,
    pub merchant_id: String,
    pub amount: f64,
    pub currency: String,
    pub timestamp: NaiveDateTime,
    #[serde(default)]
    pub location: Option<Location>,
    pub payment_method: String,
    pub merchant_category: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Transaction {
    /// Hour of day (0..=23) of the transaction's civil timestamp.
    pub fn hour_of_day(&self) -> u32 {
        use chrono::Timelike;
        self.timestamp.hour()
    }

    /// Day of week, ISO numbering (Monday = 1 .. Sunday = 7).
    pub fn day_of_week(&self) -> u32 {
        use chrono::Datelike;
        self.timestamp.weekday().number_from_monday()
    }

    /// Checks the structural constraints the decoder cannot express.
    /// Records failing validation are dropped by the pipeline.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.transaction_id.is_empty() {
            return Err("empty transaction_id".to_string());
        }
        if self.user_id.is_empty() {
            return Err("empty user_id".to_string());
        }
        if !self.amount.is_finite() || self.amount < 0.0 {
            return Err(format!("invalid amount {}", self.amount));
        }
        if let Some(loc) = &self.location {
            if !(-90.0..=90.0).contains(&loc.latitude)
                || !(-180.0..=180.0).contains(&loc.longitude)
            {
                return Err(format!(
                    "coordinates out of range ({}, {})",
                    loc.latitude, loc.longitude
                ));
            }
        }
        Ok(())
    }
}

/// Discrete label attached to a flagged record for downstream routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    Fraud,
    UnusualAmount,
    Velocity,
    Location,
    TimePattern,
    MerchantPattern,
    StatisticalOutlier,
    Unknown,
}

impl AnomalyType {
    /// Wire name, also used as the distribution histogram key.
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyType::Fraud => "fraud",
            AnomalyType::UnusualAmount => "unusual_amount",
            AnomalyType::Velocity => "velocity",
            AnomalyType::Location => "location",
            AnomalyType::TimePattern => "time_pattern",
            AnomalyType::MerchantPattern => "merchant_pattern",
            AnomalyType::StatisticalOutlier => "statistical_outlier",
            AnomalyType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scoring verdict emitted for every well-formed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub transaction_id: String,
    pub is_anomaly: bool,
    pub anomaly_score: f64,
    pub confidence: f64,
    pub anomaly_type: AnomalyType,
    pub detected_at: NaiveDateTime,
    pub original_transaction: Transaction,
    pub features_used: HashMap<String, f64>,
    pub reason: String,
}
