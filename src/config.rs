//! Service configuration from environment variables
//!
//! Every option has a default; invalid integer values fall back to the
//! default with a warning instead of failing startup.

use std::path::PathBuf;
use tracing::warn;

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Broker endpoints handed to the bus client.
    pub bootstrap_servers: String,
    /// Input topic of raw transactions.
    pub input_topic: String,
    /// All-results sink topic.
    pub output_topic: String,
    /// Alerts-only sink topic.
    pub alerts_topic: String,
    /// Parallel pipeline workers.
    pub num_threads: usize,
    /// Source commit cadence in milliseconds.
    pub commit_interval_ms: u64,
    /// Working directory for stream state.
    pub state_dir: PathBuf,
    /// Dashboard HTTP port.
    pub dashboard_port: u16,
    /// Detector variant: "statistical" or "ensemble".
    pub detector_variant: String,
    /// Feed synthetic traffic through the in-memory bus.
    pub demo_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            input_topic: "transactions".to_string(),
            output_topic: "anomalies".to_string(),
            alerts_topic: "alerts".to_string(),
            num_threads: 1,
            commit_interval_ms: 30_000,
            state_dir: std::env::temp_dir().join("streamguard"),
            dashboard_port: 8080,
            detector_variant: "statistical".to_string(),
            demo_mode: false,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bootstrap_servers: env_string("KAFKA_BOOTSTRAP_SERVERS", &defaults.bootstrap_servers),
            input_topic: env_string("KAFKA_INPUT_TOPIC", &defaults.input_topic),
            output_topic: env_string("KAFKA_OUTPUT_TOPIC", &defaults.output_topic),
            alerts_topic: env_string("KAFKA_ALERTS_TOPIC", &defaults.alerts_topic),
            num_threads: parse_or_default(
                "KAFKA_NUM_THREADS",
                std::env::var("KAFKA_NUM_THREADS").ok(),
                defaults.num_threads,
            ),
            commit_interval_ms: parse_or_default(
                "KAFKA_COMMIT_INTERVAL_MS",
                std::env::var("KAFKA_COMMIT_INTERVAL_MS").ok(),
                defaults.commit_interval_ms,
            ),
            state_dir: std::env::var("KAFKA_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_dir),
            dashboard_port: parse_or_default(
                "DASHBOARD_PORT",
                std::env::var("DASHBOARD_PORT").ok(),
                defaults.dashboard_port,
            ),
            detector_variant: env_string("DETECTOR", &defaults.detector_variant),
            demo_mode: std::env::var("DEMO_MODE")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.demo_mode),
        }
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Parses an integer-typed variable, warning and falling back on garbage.
fn parse_or_default<T>(name: &str, raw: Option<String>, default: T) -> T
where
    T: std::str::FromStr + Copy + std::fmt::Display,
{
    match raw {
        None => default,
        Some(value) => match value.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!(
                    variable = name,
                    value = %value,
                    default = %default,
                    "Invalid integer value, using default"
                );
                default
            }
        },
    }
}
