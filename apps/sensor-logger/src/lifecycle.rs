use crate::clock::{Clock, SystemClock};
use crate::collector::{Collector, CollectorSummary};
use crate::flusher::{FlushSummary, Flusher};
use crate::registry;
use crate::sink::RowSink;
use crate::source::SensorRegistration;
use crate::window::WindowStore;
use anyhow::{ensure, Result};
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

/// How long teardown waits for driver calls still blocked on a device.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub collectors: Vec<CollectorSummary>,
    pub flush: FlushSummary,
    /// Tasks that panicked instead of returning a summary.
    pub failed_tasks: usize,
    /// Windows still open at shutdown. They are discarded unwritten.
    pub discarded_windows: usize,
}

/// Owns the window store and the cancellation token; runs one collector per
/// registration plus the flusher until `shutdown` resolves.
pub struct LifecycleController {
    registrations: Vec<SensorRegistration>,
    metric_order: Vec<String>,
    flush_interval: Duration,
    clock: Arc<dyn Clock>,
    store: Arc<WindowStore>,
}

impl LifecycleController {
    pub fn new(registrations: Vec<SensorRegistration>, flush_interval: Duration) -> Result<Self> {
        ensure!(!flush_interval.is_zero(), "flush interval must be positive");
        for registration in &registrations {
            ensure!(
                !registration.interval.is_zero(),
                "sensor {} has a zero sampling interval",
                registration.name()
            );
        }
        let metric_order = registry::metric_order(&registrations)?;
        Ok(Self {
            registrations,
            metric_order,
            flush_interval,
            clock: Arc::new(SystemClock),
            store: Arc::new(WindowStore::new()),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metric_order(&self) -> &[String] {
        &self.metric_order
    }

    pub fn store(&self) -> Arc<WindowStore> {
        self.store.clone()
    }

    /// Returns once every task has observed cancellation and exited.
    pub async fn run<S, F>(self, sink: S, shutdown: F) -> ShutdownReport
    where
        S: RowSink + 'static,
        F: Future<Output = ()>,
    {
        let cancel = CancellationToken::new();

        let collectors: Vec<_> = self
            .registrations
            .into_iter()
            .map(|registration| {
                tracing::info!(
                    sensor = registration.name(),
                    interval_secs = registration.interval.as_secs_f64(),
                    metrics = ?registration.metrics,
                    "starting collector"
                );
                Collector::new(registration, self.store.clone(), self.clock.clone())
                    .start(cancel.child_token())
            })
            .collect();

        let flusher = Flusher::new(
            self.store.clone(),
            sink,
            self.metric_order,
            self.clock.clone(),
            self.flush_interval,
        )
        .start(cancel.child_token());

        shutdown.await;
        tracing::info!("shutdown requested; waiting for tasks to stop");
        cancel.cancel();

        let (collector_results, flush_result) = tokio::join!(join_all(collectors), flusher);

        let mut report = ShutdownReport::default();
        for result in collector_results {
            match result {
                Ok(summary) => report.collectors.push(summary),
                Err(err) => {
                    tracing::error!(error = %err, "collector task failed");
                    report.failed_tasks += 1;
                }
            }
        }
        match flush_result {
            Ok(summary) => report.flush = summary,
            Err(err) => {
                tracing::error!(error = %err, "flusher task failed");
                report.failed_tasks += 1;
            }
        }

        report.discarded_windows = self.store.len();
        if report.discarded_windows > 0 {
            tracing::warn!(
                windows = report.discarded_windows,
                "discarding windows still open at shutdown"
            );
        }
        tracing::info!(
            collectors = report.collectors.len(),
            rows_written = report.flush.written,
            rows_dropped = report.flush.dropped,
            "all tasks stopped"
        );
        report
    }
}

/// Runs `controller` on `runtime` until `shutdown` resolves, then shuts the
/// runtime down. Blocking driver calls that outlived their timeout are given
/// `grace` to return and are then abandoned, so a hung device cannot hold the
/// process open.
pub fn run_to_completion<S, F>(
    runtime: Runtime,
    controller: LifecycleController,
    sink: S,
    shutdown: F,
    grace: Duration,
) -> ShutdownReport
where
    S: RowSink + 'static,
    F: Future<Output = ()>,
{
    let report = runtime.block_on(controller.run(sink, shutdown));
    runtime.shutdown_timeout(grace);
    report
}
