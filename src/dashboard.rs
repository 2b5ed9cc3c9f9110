//! Monitoring dashboard HTTP server
//!
//! Thin reader over the metrics collector: JSON endpoints for counters, the
//! recent-anomaly feed, the type distribution and health, plus an embedded
//! HTML page that polls them every five seconds.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::error::{Result, StreamGuardError};
use crate::metrics::{AnomalySummary, MetricsCollector, MetricsSnapshot};

/// Configuration for the dashboard server.
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    pub host: String,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl DashboardConfig {
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }
}

#[derive(Clone)]
struct DashboardState {
    metrics: Arc<MetricsCollector>,
}

pub struct DashboardServer {
    config: DashboardConfig,
    metrics: Arc<MetricsCollector>,
}

impl DashboardServer {
    pub fn new(config: DashboardConfig, metrics: Arc<MetricsCollector>) -> Self {
        Self { config, metrics }
    }

    /// Builds the router with all API routes, the static page, and CORS on
    /// every response.
    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/api/metrics", get(metrics_handler))
            .route("/api/anomalies", get(anomalies_handler))
            .route("/api/distribution", get(distribution_handler))
            .route("/api/health", get(health_handler))
            .route("/", get(index_handler))
            .fallback(not_found)
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .with_state(DashboardState {
                metrics: self.metrics.clone(),
            })
    }

    /// Binds the listener. A failure here is a startup error and terminates
    /// bring-up, so callers surface it before spawning the serve task.
    pub async fn bind(self) -> Result<BoundDashboard> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| StreamGuardError::Startup(format!("invalid dashboard address: {e}")))?;

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| StreamGuardError::Startup(format!("failed to bind {addr}: {e}")))?;

        let local_addr = listener.local_addr()?;
        info!("Dashboard listening on http://{local_addr}/");

        let router = self.build_router();
        Ok(BoundDashboard {
            listener,
            router,
            local_addr,
        })
    }

    /// Binds and serves until the shutdown signal completes.
    pub async fn run_with_shutdown<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.bind().await?.serve_with_shutdown(shutdown).await
    }
}

/// A dashboard server with its port already bound.
pub struct BoundDashboard {
    listener: tokio::net::TcpListener,
    router: Router,
    local_addr: SocketAddr,
}

impl BoundDashboard {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("Dashboard stopped");
        Ok(())
    }
}

async fn metrics_handler(State(state): State<DashboardState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn anomalies_handler(State(state): State<DashboardState>) -> Json<Vec<AnomalySummary>> {
    Json(state.metrics.recent_anomalies())
}

async fn distribution_handler(State(state): State<DashboardState>) -> Json<HashMap<String, u64>> {
    Json(state.metrics.distribution())
}

async fn health_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let healthy = state.metrics.is_healthy();
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = serde_json::json!({
        "healthy": healthy,
        "timestamp": state.metrics.now(),
        "processing_rate": state.metrics.processing_rate(),
        "uptime_check": "OK",
    });
    (status, Json(body))
}

async fn index_handler() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}

const DASHBOARD_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>StreamGuard Dashboard</title>
<style>
    body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
           margin: 0; padding: 20px; background: #f5f5f5; }
    .dashboard { max-width: 1100px; margin: 0 auto; }
    .header { background: white; padding: 20px; border-radius: 8px;
              box-shadow: 0 2px 4px rgba(0,0,0,0.1); margin-bottom: 20px; }
    .metrics-grid { display: grid; grid-template-columns: repeat(auto-fit, minmax(220px, 1fr));
                    gap: 20px; margin-bottom: 20px; }
    .metric-card { background: white; padding: 20px; border-radius: 8px;
                   box-shadow: 0 2px 4px rgba(0,0,0,0.1); }
    .metric-value { font-size: 2em; font-weight: bold; color: #2563eb; }
    .metric-label { color: #6b7280; margin-top: 8px; }
    .anomaly-list { background: white; border-radius: 8px;
                    box-shadow: 0 2px 4px rgba(0,0,0,0.1); overflow: hidden; }
    .anomaly-item { padding: 14px 20px; border-bottom: 1px solid #e5e7eb; }
    .anomaly-item:last-child { border-bottom: none; }
    .anomaly-score { float: right; color: #ef4444; }
    .status-dot { display: inline-block; width: 12px; height: 12px;
                  border-radius: 50%; margin-right: 8px; }
    .status-healthy { background: #10b981; }
    .status-error { background: #ef4444; }
    h1 { margin: 0 0 12px 0; color: #1f2937; }
    h2 { margin: 0; padding: 20px 20px 0 20px; color: #374151; }
</style>
</head>
<body>
<div class="dashboard">
    <div class="header">
        <h1>StreamGuard Anomaly Detection</h1>
        <span id="health-dot" class="status-dot"></span>
        <span id="health-text">Checking system health...</span>
    </div>
    <div class="metrics-grid">
        <div class="metric-card"><div class="metric-value" id="total-transactions">-</div>
            <div class="metric-label">Total Transactions</div></div>
        <div class="metric-card"><div class="metric-value" id="total-anomalies">-</div>
            <div class="metric-label">Anomalies Detected</div></div>
        <div class="metric-card"><div class="metric-value" id="anomaly-rate">-</div>
            <div class="metric-label">Anomaly Rate</div></div>
        <div class="metric-card"><div class="metric-value" id="processing-time">-</div>
            <div class="metric-label">Avg Processing Time (ms)</div></div>
    </div>
    <div class="anomaly-list">
        <h2>Recent Anomalies</h2>
        <div id="anomaly-feed"><div class="anomaly-item">Loading...</div></div>
    </div>
</div>
<script>
    async function refresh() {
        try {
            const [metricsRes, healthRes, anomaliesRes] = await Promise.all([
                fetch('/api/metrics'), fetch('/api/health'), fetch('/api/anomalies')
            ]);
            const metrics = await metricsRes.json();
            const health = await healthRes.json();
            const anomalies = await anomaliesRes.json();

            document.getElementById('total-transactions').textContent =
                metrics.totalTransactions.toLocaleString();
            document.getElementById('total-anomalies').textContent =
                metrics.totalAnomalies.toLocaleString();
            document.getElementById('anomaly-rate').textContent =
                (metrics.anomalyRate * 100).toFixed(2) + '%';
            document.getElementById('processing-time').textContent =
                metrics.averageProcessingTime.toFixed(1);

            const dot = document.getElementById('health-dot');
            const text = document.getElementById('health-text');
            dot.className = 'status-dot ' + (health.healthy ? 'status-healthy' : 'status-error');
            text.textContent = health.healthy ? 'System Healthy' : 'System Issues Detected';

            const feed = document.getElementById('anomaly-feed');
            if (anomalies.length === 0) {
                feed.innerHTML = '<div class="anomaly-item">No recent anomalies</div>';
            } else {
                feed.innerHTML = anomalies.slice(0, 10).map(a => `
                    <div class="anomaly-item">
                        <strong>${a.transactionId}</strong>
                        <span class="anomaly-score">Score: ${a.score.toFixed(3)}</span><br>
                        <small>${a.type} &middot; ${a.timestamp}</small>
                    </div>`).join('');
            }
        } catch (err) {
            document.getElementById('health-text').textContent = 'Dashboard unreachable';
        }
    }
    refresh();
    setInterval(refresh, 5000);
</script>
</body>
</html>
"#;
