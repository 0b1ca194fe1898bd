//! Telemetry: counter samples and streaming latency histograms
//!
//! Samples accumulate in a buffer drained in batches by the exporter.
//! Latency uses power-of-two bucket histograms: constant memory, no
//! allocation on the record path.

use parking_lot::Mutex;
use std::time::Duration;

const NUM_BUCKETS: usize = 64;
const MAX_METRIC_ID: usize = 64;

/// One counter observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub id: u64,
    pub value: i64,
}

/// Histogram over `[2^i, 2^(i+1))` nanosecond buckets.
#[derive(Debug, Clone)]
pub struct StreamingHistogram {
    buckets: [u64; NUM_BUCKETS],
    count: u64,
    sum: i64,
    min: i64,
    max: i64,
}

impl Default for StreamingHistogram {
    fn default() -> Self {
        Self {
            buckets: [0; NUM_BUCKETS],
            count: 0,
            sum: 0,
            min: i64::MAX,
            max: 0,
        }
    }
}

impl StreamingHistogram {
    fn bucket_index(value_ns: i64) -> usize {
        if value_ns <= 0 {
            return 0;
        }
        let bits = 64 - (value_ns as u64).leading_zeros() as usize;
        bits.min(NUM_BUCKETS - 1)
    }

    fn bucket_midpoint(index: usize) -> i64 {
        if index == 0 {
            return 1;
        }
        // Midpoint of [2^(i-1), 2^i) ≈ 3 * 2^(i-2)
        3i64 << (index.saturating_sub(2))
    }

    pub fn record(&mut self, value_ns: i64) {
        self.buckets[Self::bucket_index(value_ns)] += 1;
        self.count += 1;
        self.sum += value_ns;
        self.min = self.min.min(value_ns);
        self.max = self.max.max(value_ns);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum as f64 / self.count as f64
    }

    pub fn percentile(&self, p: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let target = (self.count as f64 * p) as u64;
        let mut cumulative = 0u64;
        for (index, &bucket) in self.buckets.iter().enumerate() {
            cumulative += bucket;
            if cumulative >= target {
                return Self::bucket_midpoint(index) as f64;
            }
        }
        self.max as f64
    }
}

/// Per-metric latency summary produced by `drain_latency`.
#[derive(Debug, Clone, Copy)]
pub struct Summary {
    pub id: u64,
    pub count: u64,
    pub mean_ns: f64,
    pub p99_ns: f64,
}

#[derive(Default)]
struct SinkInner {
    buffer: Vec<Sample>,
    histograms: Vec<StreamingHistogram>,
}

/// Shared telemetry collection point.
pub struct TelemetrySink {
    inner: Mutex<SinkInner>,
}

impl Default for TelemetrySink {
    fn default() -> Self {
        Self {
            inner: Mutex::new(SinkInner {
                buffer: Vec::new(),
                histograms: vec![StreamingHistogram::default(); MAX_METRIC_ID],
            }),
        }
    }
}

impl TelemetrySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, sample: Sample) {
        self.inner.lock().buffer.push(sample);
    }

    pub fn increment(&self, id: u64, delta: i64) {
        self.push(Sample { id, value: delta });
    }

    pub fn record_latency(&self, id: u64, latency: Duration) {
        let mut inner = self.inner.lock();
        let index = (id as usize) % MAX_METRIC_ID;
        inner.histograms[index].record(latency.as_nanos() as i64);
    }

    /// Take all buffered samples.
    pub fn drain(&self) -> Vec<Sample> {
        std::mem::take(&mut self.inner.lock().buffer)
    }

    /// Summarize and reset every histogram with observations.
    pub fn drain_latency(&self) -> Vec<Summary> {
        let mut inner = self.inner.lock();
        let mut summaries = Vec::new();
        for (index, histogram) in inner.histograms.iter_mut().enumerate() {
            if histogram.count() == 0 {
                continue;
            }
            summaries.push(Summary {
                id: index as u64,
                count: histogram.count(),
                mean_ns: histogram.mean(),
                p99_ns: histogram.percentile(0.99),
            });
            histogram.reset();
        }
        summaries
    }
}
