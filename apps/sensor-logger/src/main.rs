use anyhow::{Context, Result};
use sensor_logger::config::Config;
use sensor_logger::lifecycle::{self, LifecycleController};
use sensor_logger::registry;
use sensor_logger::sink::CsvDailySink;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,sensor_logger=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error=%err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error=%err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received");
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    init_tracing()?;

    let registrations = registry::registrations(&config);
    let controller = LifecycleController::new(registrations, config.flush_interval)
        .context("invalid sensor registration")?;
    let sink = CsvDailySink::new(&config.data_dir, controller.metric_order()).map_err(|err| {
        tracing::error!(error=%err, "cannot prepare data directory");
        err
    })?;
    tracing::info!(
        data_dir = %sink.root().display(),
        flush_interval_secs = config.flush_interval.as_secs(),
        columns = ?controller.metric_order(),
        "sensor-logger started"
    );

    // Built by hand so teardown can abandon driver calls stuck on a device.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let report = lifecycle::run_to_completion(
        runtime,
        controller,
        sink,
        shutdown_signal(),
        lifecycle::SHUTDOWN_GRACE,
    );
    if report.failed_tasks > 0 {
        tracing::warn!(failed_tasks = report.failed_tasks, "some tasks ended abnormally");
    }
    Ok(())
}
