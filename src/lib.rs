//! StreamGuard - Real-Time Transaction Anomaly Detection
//!
//! Consumes a stream of transaction records and emits an annotated judgement
//! for each: whether it looks anomalous, why, and with what confidence.
//! The detector learns per-user and per-merchant baselines from the stream
//! it judges, without pausing ingestion.
//!
//! - `detector`: ensemble scorer, profiles, adaptive thresholds
//! - `pipeline`: decode, score, observe, route topology
//! - `metrics` / `dashboard`: counters and the HTTP monitoring surface
//! - `config`: environment-driven configuration

pub mod clock;
pub mod config;
pub mod dashboard;
pub mod demo;
pub mod detector;
pub mod error;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod stats;

pub use error::{Result, StreamGuardError};
