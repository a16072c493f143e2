use crate::clock::Clock;
use crate::error::FlushError;
use crate::sink::RowSink;
use crate::window::{Accumulator, WindowKey, WindowStore};
use chrono::{Duration as ChronoDuration, NaiveDateTime};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A finalized window: the window timestamp followed by one 2-decimal average
/// per metric, in header order. Metrics with no samples in the window are
/// left empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    window: WindowKey,
    fields: Vec<String>,
}

impl Row {
    pub fn from_window(
        window: WindowKey,
        acc: &Accumulator,
        metric_order: &[String],
    ) -> Result<Self, FlushError> {
        if acc.samples() == 0 {
            return Err(FlushError::EmptyWindow { window });
        }
        let mut fields = Vec::with_capacity(metric_order.len() + 1);
        fields.push(window.to_string());
        for metric in metric_order {
            let cell = acc
                .average(metric)
                .map(|avg| format!("{avg:.2}"))
                .unwrap_or_default();
            fields.push(cell);
        }
        Ok(Self { window, fields })
    }

    pub fn window(&self) -> WindowKey {
        self.window
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub written: u64,
    pub dropped: u64,
}

impl FlushSummary {
    fn absorb(&mut self, other: FlushSummary) {
        self.written += other.written;
        self.dropped += other.dropped;
    }
}

pub struct Flusher<S> {
    store: Arc<WindowStore>,
    sink: S,
    metric_order: Vec<String>,
    clock: Arc<dyn Clock>,
    period: Duration,
}

impl<S: RowSink + 'static> Flusher<S> {
    pub fn new(
        store: Arc<WindowStore>,
        sink: S,
        metric_order: Vec<String>,
        clock: Arc<dyn Clock>,
        period: Duration,
    ) -> Self {
        Self {
            store,
            sink,
            metric_order,
            clock,
            period,
        }
    }

    /// Newest window that may be flushed at `now`: the window one period ago,
    /// but never the window `now` falls in.
    pub fn cutoff(&self, now: NaiveDateTime) -> WindowKey {
        let newest_closed = WindowKey::containing(now).previous();
        ChronoDuration::from_std(self.period)
            .ok()
            .and_then(|lag| now.checked_sub_signed(lag))
            .map(|then| WindowKey::containing(then).min(newest_closed))
            .unwrap_or(newest_closed)
    }

    pub fn flush_due(&mut self) -> FlushSummary {
        let now = self.clock.now();
        self.flush_due_at(now)
    }

    /// Drains every window up to the cutoff into the sink. Failures drop the
    /// affected row only.
    pub fn flush_due_at(&mut self, now: NaiveDateTime) -> FlushSummary {
        let cutoff = self.cutoff(now);
        let mut summary = FlushSummary::default();

        for (window, acc) in self.store.take_through(cutoff) {
            let row = match Row::from_window(window, &acc, &self.metric_order) {
                Ok(row) => row,
                Err(err) => {
                    tracing::error!(window = %window, error = %err, "internal consistency error; dropping window");
                    summary.dropped += 1;
                    continue;
                }
            };
            match self.sink.append(&row) {
                Ok(()) => {
                    tracing::debug!(window = %window, samples = acc.samples(), "wrote averaged row");
                    summary.written += 1;
                }
                Err(err) => {
                    tracing::error!(window = %window, error = %err, "failed to write row; dropping it");
                    summary.dropped += 1;
                }
            }
        }

        summary
    }

    /// Each pass runs on the blocking pool since the sink does file I/O.
    pub fn start(self, cancel: CancellationToken) -> JoinHandle<FlushSummary> {
        tokio::spawn(async move {
            let mut flusher = self;
            let mut totals = FlushSummary::default();
            let mut ticker = tokio::time::interval(flusher.period);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let pass = tokio::task::spawn_blocking(move || {
                            let summary = flusher.flush_due();
                            (flusher, summary)
                        });
                        match pass.await {
                            Ok((returned, summary)) => {
                                flusher = returned;
                                totals.absorb(summary);
                            }
                            Err(err) => {
                                tracing::error!(error = %err, "flush pass failed; stopping flusher");
                                break;
                            }
                        }
                    }
                }
            }
            tracing::info!(
                written = totals.written,
                dropped = totals.dropped,
                "flusher stopped"
            );
            totals
        })
    }
}
