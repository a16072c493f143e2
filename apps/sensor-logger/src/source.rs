use crate::error::SampleError;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Metric name to decoded scalar value, as returned by one driver call.
pub type Reading = BTreeMap<String, f64>;

/// A sensor driver. `sample` may block on device I/O; collectors call it from
/// the blocking pool.
pub trait SensorSource: Send + Sync {
    fn name(&self) -> &str;

    fn sample(&self) -> anyhow::Result<Reading>;
}

/// One entry of the static sensor list built at startup.
#[derive(Clone)]
pub struct SensorRegistration {
    pub source: Arc<dyn SensorSource>,
    pub metrics: Vec<String>,
    pub interval: Duration,
    pub timeout: Option<Duration>,
}

impl SensorRegistration {
    pub fn new<I, S>(source: Arc<dyn SensorSource>, metrics: I, interval: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            source,
            metrics: metrics.into_iter().map(Into::into).collect(),
            interval,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }
}

impl fmt::Debug for SensorRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorRegistration")
            .field("source", &self.source.name())
            .field("metrics", &self.metrics)
            .field("interval", &self.interval)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Checks that every declared metric is present and finite.
///
/// Undeclared metrics are left in place; the store ignores them.
pub fn validate_reading(
    sensor: &str,
    metrics: &[String],
    reading: Reading,
) -> Result<Reading, SampleError> {
    for metric in metrics {
        match reading.get(metric) {
            None => {
                return Err(SampleError::MissingMetric {
                    sensor: sensor.to_string(),
                    metric: metric.clone(),
                })
            }
            Some(value) if !value.is_finite() => {
                return Err(SampleError::NonFinite {
                    sensor: sensor.to_string(),
                    metric: metric.clone(),
                    value: *value,
                })
            }
            Some(_) => {}
        }
    }
    Ok(reading)
}
