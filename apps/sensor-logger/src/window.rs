use crate::source::Reading;
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime, Timelike};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One calendar minute of local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowKey(NaiveDateTime);

impl WindowKey {
    pub const FORMAT: &'static str = "%Y-%m-%d %H:%M";

    pub fn containing(ts: NaiveDateTime) -> Self {
        let start = ts
            .date()
            .and_hms_opt(ts.hour(), ts.minute(), 0)
            .unwrap_or(ts);
        Self(start)
    }

    pub fn start(&self) -> NaiveDateTime {
        self.0
    }

    pub fn date(&self) -> NaiveDate {
        self.0.date()
    }

    pub fn previous(&self) -> Self {
        Self(self.0 - ChronoDuration::minutes(1))
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(Self::FORMAT))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricSum {
    pub sum: f64,
    pub count: u64,
}

/// Running sums for one open window.
///
/// `samples` counts collector invocations that landed in the window; each
/// metric also keeps its own count so that sensors sampled at different rates
/// average independently.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Accumulator {
    metrics: BTreeMap<String, MetricSum>,
    samples: u64,
}

impl Accumulator {
    fn add(&mut self, metrics: &[String], reading: &Reading) {
        for name in metrics {
            let Some(value) = reading.get(name) else {
                continue;
            };
            let entry = self.metrics.entry(name.clone()).or_default();
            entry.sum += value;
            entry.count += 1;
        }
        self.samples += 1;
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn metric(&self, name: &str) -> Option<MetricSum> {
        self.metrics.get(name).copied()
    }

    pub fn average(&self, name: &str) -> Option<f64> {
        let metric = self.metrics.get(name)?;
        if metric.count == 0 {
            return None;
        }
        Some(metric.sum / metric.count as f64)
    }
}

/// Open windows shared by every collector and the flusher.
///
/// All access goes through one mutex; a window is created by the first
/// `record` for its key and destroyed by the `take*` call that reads it.
#[derive(Debug, Default)]
pub struct WindowStore {
    windows: Mutex<BTreeMap<WindowKey, Accumulator>>,
}

impl WindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<WindowKey, Accumulator>> {
        // Critical sections never leave a half-applied update, so a poisoned
        // map is still consistent.
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds one reading to `key` and returns the window's sample count.
    pub fn record(&self, key: WindowKey, metrics: &[String], reading: &Reading) -> u64 {
        let mut windows = self.lock();
        let acc = windows.entry(key).or_default();
        acc.add(metrics, reading);
        acc.samples
    }

    #[cfg(test)]
    pub(crate) fn take(&self, key: WindowKey) -> Option<Accumulator> {
        self.lock().remove(&key)
    }

    /// Removes every window at or before `cutoff`, oldest first.
    pub fn take_through(&self, cutoff: WindowKey) -> Vec<(WindowKey, Accumulator)> {
        let mut windows = self.lock();
        let due: Vec<WindowKey> = windows.range(..=cutoff).map(|(key, _)| *key).collect();
        due.into_iter()
            .filter_map(|key| windows.remove(&key).map(|acc| (key, acc)))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn get(&self, key: WindowKey) -> Option<Accumulator> {
        self.lock().get(&key).cloned()
    }

    #[cfg(test)]
    pub(crate) fn keys(&self) -> Vec<WindowKey> {
        self.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[cfg(test)]
    pub(crate) fn insert_raw(&self, key: WindowKey, acc: Accumulator) {
        self.lock().insert(key, acc);
    }
}
