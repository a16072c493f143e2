use crate::clock::Clock;
use crate::error::SampleError;
use crate::source::{validate_reading, Reading, SensorRegistration};
use crate::window::{WindowKey, WindowStore};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectorSummary {
    pub sensor: String,
    pub recorded: u64,
    pub failed: u64,
}

/// Samples one registered source on its own interval and folds each reading
/// into the current window.
pub struct Collector {
    registration: SensorRegistration,
    store: Arc<WindowStore>,
    clock: Arc<dyn Clock>,
    /// Driver call that outlived its timeout. At most one call per source is
    /// outstanding; ticks are skipped until it returns.
    in_flight: Option<JoinHandle<anyhow::Result<Reading>>>,
}

impl Collector {
    pub fn new(
        registration: SensorRegistration,
        store: Arc<WindowStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registration,
            store,
            clock,
            in_flight: None,
        }
    }

    /// One tick: sample, then record under the store lock. On error nothing
    /// is written.
    pub async fn tick(&mut self) -> Result<WindowKey, SampleError> {
        let reading = self.sample().await?;
        let window = WindowKey::containing(self.clock.now());
        let samples = self
            .store
            .record(window, &self.registration.metrics, &reading);
        tracing::trace!(
            sensor = self.registration.name(),
            window = %window,
            samples,
            "recorded sample"
        );
        Ok(window)
    }

    pub fn start(mut self, cancel: CancellationToken) -> JoinHandle<CollectorSummary> {
        tokio::spawn(async move {
            let mut summary = CollectorSummary {
                sensor: self.registration.name().to_string(),
                ..CollectorSummary::default()
            };
            let mut ticker = tokio::time::interval(self.registration.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        // A tick in progress runs to completion; cancellation is
                        // observed at the next boundary.
                        match self.tick().await {
                            Ok(_) => summary.recorded += 1,
                            Err(err) => {
                                tracing::warn!(sensor = %summary.sensor, error = %err, "sample failed; skipping tick");
                                summary.failed += 1;
                            }
                        }
                    }
                }
            }

            tracing::info!(
                sensor = %summary.sensor,
                recorded = summary.recorded,
                failed = summary.failed,
                "collector stopped"
            );
            summary
        })
    }

    /// Runs the driver on the blocking pool, bounded by the registration
    /// timeout. A call that times out is kept rather than detached, and no new
    /// call starts until it has returned.
    async fn sample(&mut self) -> Result<Reading, SampleError> {
        let sensor = self.registration.name().to_string();

        if let Some(stalled) = self.in_flight.take() {
            if !stalled.is_finished() {
                self.in_flight = Some(stalled);
                return Err(SampleError::Busy {
                    sensor,
                    timeout: self.registration.timeout.unwrap_or_default(),
                });
            }
            // Its reading belongs to a tick that already failed.
            tracing::debug!(sensor = %sensor, "stalled sample finished; resuming");
        }

        let source = Arc::clone(&self.registration.source);
        let mut task = tokio::task::spawn_blocking(move || source.sample());

        let joined = match self.registration.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    self.in_flight = Some(task);
                    return Err(SampleError::Timeout {
                        sensor,
                        timeout: limit,
                    });
                }
            },
            None => task.await,
        };
        let reading = joined
            .map_err(|err| SampleError::Aborted {
                sensor: sensor.clone(),
                message: err.to_string(),
            })?
            .map_err(|source| SampleError::Driver {
                sensor: sensor.clone(),
                source,
            })?;

        validate_reading(&sensor, &self.registration.metrics, reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SensorSource;
    use crate::test_support::{at, reading, FixedSource, ManualClock, ScriptedSource, SlowSource};
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    fn collector(
        source: Arc<dyn SensorSource>,
        metrics: &[&str],
        store: &Arc<WindowStore>,
        clock: &Arc<ManualClock>,
    ) -> Collector {
        let registration =
            SensorRegistration::new(source, metrics.iter().copied(), Duration::from_secs(10));
        Collector::new(registration, store.clone(), clock.clone())
    }

    #[tokio::test]
    async fn tick_records_into_the_current_minute() {
        let store = Arc::new(WindowStore::new());
        let clock = Arc::new(ManualClock::new(at(2024, 5, 1, 12, 0, 45)));
        let source = Arc::new(FixedSource::new("climate", &[("temperature", 21.5), ("humidity", 40.0)]));
        let mut collector = collector(source, &["temperature", "humidity"], &store, &clock);

        let window = collector.tick().await.unwrap();
        assert_eq!(window.to_string(), "2024-05-01 12:00");

        clock.advance(ChronoDuration::seconds(20));
        let next = collector.tick().await.unwrap();
        assert_eq!(next.to_string(), "2024-05-01 12:01");

        assert_eq!(store.get(window).unwrap().average("temperature"), Some(21.5));
        assert_eq!(store.get(next).unwrap().samples(), 1);
    }

    #[tokio::test]
    async fn failed_sample_leaves_store_untouched() {
        let store = Arc::new(WindowStore::new());
        let clock = Arc::new(ManualClock::new(at(2024, 5, 1, 12, 0, 0)));
        let source = Arc::new(ScriptedSource::new("barometer", vec![None]));
        let mut collector = collector(source, &["pressure"], &store, &clock);

        let err = collector.tick().await.unwrap_err();
        assert!(matches!(err, SampleError::Driver { .. }));
        assert!(err.to_string().contains("device did not respond"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn incomplete_reading_is_rejected_whole() {
        let store = Arc::new(WindowStore::new());
        let clock = Arc::new(ManualClock::new(at(2024, 5, 1, 12, 0, 0)));
        let source = Arc::new(ScriptedSource::new(
            "climate",
            vec![Some(reading(&[("temperature", 20.0)]))],
        ));
        let mut collector = collector(source, &["temperature", "humidity"], &store, &clock);

        let err = collector.tick().await.unwrap_err();
        assert!(matches!(err, SampleError::MissingMetric { .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn stalled_source_times_out() {
        let store = Arc::new(WindowStore::new());
        let clock = Arc::new(ManualClock::new(at(2024, 5, 1, 12, 0, 0)));
        let registration = SensorRegistration::new(
            Arc::new(SlowSource::new("climate", Duration::from_millis(500))),
            ["temperature"],
            Duration::from_secs(10),
        )
        .with_timeout(Some(Duration::from_millis(20)));
        let mut collector = Collector::new(registration, store.clone(), clock);

        let err = collector.tick().await.unwrap_err();
        assert!(matches!(err, SampleError::Timeout { .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn stalled_source_is_never_called_twice_at_once() {
        let store = Arc::new(WindowStore::new());
        let clock = Arc::new(ManualClock::new(at(2024, 5, 1, 12, 0, 0)));
        let source = Arc::new(SlowSource::new("climate", Duration::from_millis(300)));
        let registration = SensorRegistration::new(source.clone(), ["temperature"], Duration::from_secs(1))
            .with_timeout(Some(Duration::from_millis(20)));
        let mut collector = Collector::new(registration, store.clone(), clock);

        let err = collector.tick().await.unwrap_err();
        assert!(matches!(err, SampleError::Timeout { .. }));
        for _ in 0..4 {
            let err = collector.tick().await.unwrap_err();
            assert!(matches!(err, SampleError::Busy { .. }));
        }
        assert_eq!(source.calls(), 1);

        // Once the stalled call returns, the next tick samples again.
        tokio::time::sleep(Duration::from_millis(400)).await;
        let err = collector.tick().await.unwrap_err();
        assert!(matches!(err, SampleError::Timeout { .. }));
        assert_eq!(source.calls(), 2);
        assert_eq!(source.max_active(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_collectors_share_one_window() {
        let store = Arc::new(WindowStore::new());
        let clock = Arc::new(ManualClock::new(at(2024, 5, 1, 12, 0, 0)));
        let source: Arc<dyn SensorSource> = Arc::new(FixedSource::new("climate", &[("temperature", 2.5)]));
        let collectors = 8;
        let ticks_each = 25;

        let mut handles = Vec::new();
        for _ in 0..collectors {
            let mut collector = collector(source.clone(), &["temperature"], &store, &clock);
            handles.push(tokio::spawn(async move {
                for _ in 0..ticks_each {
                    collector.tick().await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let total = (collectors * ticks_each) as u64;
        let acc = store.take(WindowKey::containing(clock.now())).unwrap();
        assert_eq!(acc.samples(), total);
        let metric = acc.metric("temperature").unwrap();
        assert_eq!(metric.count, total);
        assert!((metric.sum - 2.5 * total as f64).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn running_collector_ticks_until_cancelled() {
        let store = Arc::new(WindowStore::new());
        let clock = Arc::new(ManualClock::new(at(2024, 5, 1, 12, 0, 0)));
        let source = Arc::new(FixedSource::new("gas", &[("co", 0.8)]));
        let cancel = CancellationToken::new();
        let handle = collector(source.clone(), &["co"], &store, &clock).start(cancel.clone());

        // Ticks fire at 0s, 10s, 20s and 30s.
        tokio::time::sleep(Duration::from_secs(35)).await;
        cancel.cancel();
        let summary = handle.await.unwrap();

        assert_eq!(summary.sensor, "gas");
        assert_eq!(summary.recorded, 4);
        assert_eq!(summary.failed, 0);
        assert_eq!(source.calls(), 4);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.calls(), 4);
    }
}
