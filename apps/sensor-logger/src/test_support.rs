use crate::clock::Clock;
use crate::error::SinkError;
use crate::flusher::Row;
use crate::sink::RowSink;
use crate::source::{Reading, SensorSource};
use anyhow::anyhow;
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(hour, minute, second))
        .expect("valid test timestamp")
}

pub fn reading(values: &[(&str, f64)]) -> Reading {
    values
        .iter()
        .map(|(name, value)| (name.to_string(), *value))
        .collect()
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }

    pub fn advance(&self, by: ChronoDuration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns the same reading on every call.
pub struct FixedSource {
    name: String,
    reading: Reading,
    calls: AtomicUsize,
}

impl FixedSource {
    pub fn new(name: &str, values: &[(&str, f64)]) -> Self {
        Self {
            name: name.to_string(),
            reading: reading(values),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SensorSource for FixedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample(&self) -> anyhow::Result<Reading> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reading.clone())
    }
}

/// Plays back a fixed sequence of results, then fails.
pub struct ScriptedSource {
    name: String,
    script: Mutex<VecDeque<Option<Reading>>>,
}

impl ScriptedSource {
    pub fn new(name: &str, script: Vec<Option<Reading>>) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(script.into()),
        }
    }
}

impl SensorSource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample(&self) -> anyhow::Result<Reading> {
        let next = self.script.lock().expect("script lock").pop_front();
        match next {
            Some(Some(reading)) => Ok(reading),
            Some(None) => Err(anyhow!("device did not respond")),
            None => Err(anyhow!("script exhausted")),
        }
    }
}

/// Sleeps on the blocking pool before answering. Tracks how many calls
/// overlap.
pub struct SlowSource {
    name: String,
    delay: std::time::Duration,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl SlowSource {
    pub fn new(name: &str, delay: std::time::Duration) -> Self {
        Self {
            name: name.to_string(),
            delay,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

impl SensorSource for SlowSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample(&self) -> anyhow::Result<Reading> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(reading(&[("temperature", 20.0)]))
    }
}

/// Collects rows in memory; clones share the same buffer.
#[derive(Clone, Default)]
pub struct MemorySink {
    rows: Arc<Mutex<Vec<Row>>>,
}

impl MemorySink {
    pub fn rows(&self) -> Vec<Row> {
        self.rows.lock().expect("rows lock").clone()
    }
}

impl RowSink for MemorySink {
    fn append(&mut self, row: &Row) -> Result<(), SinkError> {
        self.rows.lock().expect("rows lock").push(row.clone());
        Ok(())
    }
}

/// Rejects every row.
#[derive(Clone, Default)]
pub struct FailingSink {
    attempts: Arc<AtomicUsize>,
}

impl FailingSink {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl RowSink for FailingSink {
    fn append(&mut self, _row: &Row) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SinkError::Open {
            path: PathBuf::from("/unwritable/data.csv"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        })
    }
}
