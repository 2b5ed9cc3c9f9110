//! StreamGuard service bootstrap
//!
//! Wires the detection engine, the stream pipeline, the metrics collector and
//! the dashboard together, then runs until a shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use streamguard::clock::SystemClock;
use streamguard::config::AppConfig;
use streamguard::dashboard::{DashboardConfig, DashboardServer};
use streamguard::demo;
use streamguard::detector::{AnomalyDetector, Detector, DetectorConfig};
use streamguard::metrics::MetricsCollector;
use streamguard::pipeline::transport::{channel_sink, channel_source};
use streamguard::pipeline::{Pipeline, PipelineConfig};
use streamguard::{Result, StreamGuardError};

/// Bounded wait for in-flight records when shutting down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Cadence of the engine-stats log line and health sampling.
const STATS_LOG_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("streamguard=info".parse().unwrap()),
        )
        .init();

    info!("Starting StreamGuard");

    let config = AppConfig::from_env();
    info!(
        bootstrap_servers = %config.bootstrap_servers,
        input_topic = %config.input_topic,
        output_topic = %config.output_topic,
        alerts_topic = %config.alerts_topic,
        num_threads = config.num_threads,
        state_dir = %config.state_dir.display(),
        detector = %config.detector_variant,
        demo_mode = config.demo_mode,
        "Loaded configuration"
    );

    std::fs::create_dir_all(&config.state_dir)
        .map_err(|e| StreamGuardError::Startup(format!("cannot create state dir: {e}")))?;

    let clock = Arc::new(SystemClock);
    let detector = Arc::new(Detector::from_variant_name(
        &config.detector_variant,
        DetectorConfig::default(),
    ));
    let metrics = Arc::new(MetricsCollector::new(clock));
    info!(detector = detector.name(), "Detector ready");

    // The broker client is an external collaborator; the in-memory bus backs
    // the transport seam until one is attached.
    let (input, source) = channel_source(1024);
    let (all_sink, all_results) = channel_sink(1024);
    let (alerts_sink, alerts) = channel_sink(1024);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Dashboard binds before anything is spawned so a bad port fails startup.
    let dashboard = DashboardServer::new(
        DashboardConfig::default().with_port(config.dashboard_port),
        metrics.clone(),
    )
    .bind()
    .await?;

    let pipeline = Pipeline::new(
        detector.clone(),
        metrics.clone(),
        PipelineConfig {
            num_workers: config.num_threads,
            commit_interval_ms: config.commit_interval_ms,
        },
    );
    let workers = pipeline.spawn(source, all_sink, alerts_sink, shutdown_rx.clone());

    let mut dashboard_shutdown = shutdown_rx.clone();
    let dashboard_task = tokio::spawn(async move {
        dashboard
            .serve_with_shutdown(async move {
                let _ = dashboard_shutdown.changed().await;
            })
            .await
    });

    // Console consumers keep the sinks drained and the alerts visible.
    let result_logger = demo::spawn_result_logger(all_results, shutdown_rx.clone());
    let alert_consumer = demo::spawn_alert_consumer(alerts, shutdown_rx.clone());

    // The input sender stays alive until shutdown: dropping it closes the
    // source and the workers would drain out immediately.
    let generator = if config.demo_mode {
        Some(demo::spawn_generator(input.clone(), shutdown_rx.clone()))
    } else {
        info!("No broker client attached; feed records through the transport seam or set DEMO_MODE=1");
        None
    };

    // Periodic stats line, matching the original's 30-second metrics log.
    let stats_detector = detector.clone();
    let stats_metrics = metrics.clone();
    let mut stats_shutdown = shutdown_rx.clone();
    let stats_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATS_LOG_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    stats_metrics.update_system_health();
                    let stats = stats_detector.engine().stats();
                    info!(
                        observed = stats.observed,
                        trained = stats.trained,
                        users = stats.unique_users,
                        merchants = stats.unique_merchants,
                        anomaly_rate = stats_metrics.anomaly_rate(),
                        processing_rate = stats_metrics.processing_rate(),
                        "Engine stats"
                    );
                }
                _ = stats_shutdown.changed() => break,
            }
        }
    });

    wait_for_shutdown().await;
    info!("Shutdown signal received, stopping");

    // Stop accepting new records, finish in-flight ones, then close down.
    let _ = shutdown_tx.send(true);
    drop(input);

    for worker in workers {
        if tokio::time::timeout(SHUTDOWN_GRACE, worker).await.is_err() {
            warn!("Pipeline worker did not stop within the grace period");
        }
    }
    if let Some(generator) = generator {
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, generator).await;
    }
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, result_logger).await;
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, alert_consumer).await;
    let _ = stats_task.await;

    match tokio::time::timeout(SHUTDOWN_GRACE, dashboard_task).await {
        Ok(Ok(result)) => result?,
        Ok(Err(e)) => error!(error = %e, "Dashboard task failed"),
        Err(_) => warn!("Dashboard did not stop within the grace period"),
    }

    info!("StreamGuard stopped");
    Ok(())
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to listen for Ctrl+C");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
