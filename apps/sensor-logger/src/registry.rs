use crate::config::{Config, SourceKind};
use crate::source::{SensorRegistration, SensorSource};
use crate::sources::{Barometer, ClimateSensor, GasAnalyzer};
use anyhow::{bail, Result};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// The static sensor list for this process, in configured order.
pub fn registrations(config: &Config) -> Vec<SensorRegistration> {
    config
        .sources
        .iter()
        .map(|kind| {
            let interval = config.interval_for(*kind);
            let registration = match kind {
                SourceKind::Climate => register(ClimateSensor, &ClimateSensor::METRICS, interval),
                SourceKind::Barometer => register(Barometer, &Barometer::METRICS, interval),
                SourceKind::Gas => register(GasAnalyzer, &GasAnalyzer::METRICS, interval),
            };
            registration.with_timeout(config.sample_timeout)
        })
        .collect()
}

fn register<S>(source: S, metrics: &[&str], interval: Duration) -> SensorRegistration
where
    S: SensorSource + 'static,
{
    SensorRegistration::new(Arc::new(source), metrics.iter().copied(), interval)
}

/// CSV column order: every registration's metrics, in registration order.
/// A metric produced by two sources would mix their readings, so it is
/// rejected.
pub fn metric_order(registrations: &[SensorRegistration]) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    for registration in registrations {
        if registration.metrics.is_empty() {
            bail!("sensor {} declares no metrics", registration.name());
        }
        for metric in &registration.metrics {
            if !seen.insert(metric.as_str()) {
                bail!(
                    "metric {metric:?} is produced by more than one sensor (again by {})",
                    registration.name()
                );
            }
            order.push(metric.clone());
        }
    }
    Ok(order)
}
