//! DashMap Metrics Sink
//!
//! Implements MetricsSink in memory using DashMap for concurrent access.

use crate::domain::entities::{MetricGroup, MetricKind};
use crate::domain::ports::{MetricsSink, SinkError};
use async_trait::async_trait;
use dashmap::DashMap;
use hdrhistogram::Histogram;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};

/// Raw samples kept per histogram for inspection
const MAX_RECENT_SAMPLES: usize = 1024;

/// HdrHistogram range: 1 us -> 1 h, 3 significant figures
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 3_600_000_000;
const HIST_SIGFIG: u8 = 3;

/// Bounded-memory latency distribution.
///
/// Quantiles come from a fixed-size HdrHistogram; count, sum, min and max
/// are exact. Only the most recent raw samples are retained.
pub struct LatencyHistogram {
    hist: Histogram<u64>,
    count: u64,
    sum: i64,
    min: i64,
    max: i64,
    recent: VecDeque<i64>,
}

impl LatencyHistogram {
    fn new() -> Result<Self, SinkError> {
        let hist = Histogram::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG)
            .map_err(|e| SinkError::Rejected(format!("histogram: {}", e)))?;
        Ok(Self {
            hist,
            count: 0,
            sum: 0,
            min: i64::MAX,
            max: i64::MIN,
            recent: VecDeque::with_capacity(MAX_RECENT_SAMPLES + 1),
        })
    }

    fn record(&mut self, value: i64) {
        // Out-of-range values clamp to the histogram's bounds.
        self.hist
            .saturating_record(u64::try_from(value).unwrap_or(0));
        self.count += 1;
        self.sum = self.sum.saturating_add(value);
        self.min = self.min.min(value);
        self.max = self.max.max(value);

        self.recent.push_back(value);
        if self.recent.len() > MAX_RECENT_SAMPLES {
            self.recent.pop_front();
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> i64 {
        self.sum
    }

    /// Value at quantile `q` (0.0..=1.0), 0 when empty.
    pub fn value_at_quantile(&self, q: f64) -> u64 {
        if self.count == 0 {
            return 0;
        }
        self.hist.value_at_quantile(q)
    }

    /// Most recent raw samples, oldest first.
    pub fn recent(&self) -> Vec<i64> {
        self.recent.iter().copied().collect()
    }

    pub fn summary(&self) -> HistogramSummary {
        if self.count == 0 {
            return HistogramSummary {
                count: 0,
                min: 0,
                max: 0,
                mean: 0.0,
                sum: 0,
            };
        }
        HistogramSummary {
            count: self.count,
            min: self.min,
            max: self.max,
            mean: self.sum as f64 / self.count as f64,
            sum: self.sum,
        }
    }
}

impl std::fmt::Debug for LatencyHistogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatencyHistogram")
            .field("count", &self.count)
            .field("sum", &self.sum)
            .field("min", &self.min)
            .field("max", &self.max)
            .finish()
    }
}

/// Storage for one registered series.
#[derive(Debug)]
pub enum SeriesData {
    Counter(AtomicI64),
    Histogram(Mutex<LatencyHistogram>),
}

/// A registered series and the group it was registered under.
#[derive(Debug)]
pub struct Series {
    pub group: String,
    pub unit: String,
    pub data: SeriesData,
}

impl Series {
    fn new(group: &str, unit: &str, kind: MetricKind) -> Result<Self, SinkError> {
        let data = match kind {
            MetricKind::Counter => SeriesData::Counter(AtomicI64::new(0)),
            MetricKind::Histogram => SeriesData::Histogram(Mutex::new(LatencyHistogram::new()?)),
        };
        Ok(Self {
            group: group.to_string(),
            unit: unit.to_string(),
            data,
        })
    }

    pub fn kind(&self) -> MetricKind {
        match self.data {
            SeriesData::Counter(_) => MetricKind::Counter,
            SeriesData::Histogram(_) => MetricKind::Histogram,
        }
    }
}

/// Summary of a histogram series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub min: i64,
    pub max: i64,
    pub mean: f64,
    pub sum: i64,
}

/// Point-in-time view of everything the sink holds.
#[derive(Debug, Clone, Serialize)]
pub struct SinkSnapshot {
    pub groups: Vec<MetricGroup>,
    pub counters: BTreeMap<String, i64>,
    pub histograms: BTreeMap<String, HistogramSummary>,
    /// Samples for titles that were never registered
    pub dropped: u64,
}

/// DashMap-backed metrics sink.
///
/// Keeps registered groups, counter totals and latency histograms.
/// Samples for titles that were never registered are counted and dropped.
///
/// Series are keyed by title alone, as samples arrive by title. A sink
/// therefore serves connections to a single target: when a second group
/// registers a title that already exists, the series keeps its first group
/// and a warning is logged.
pub struct DashMapMetricsSink {
    groups: Mutex<Vec<MetricGroup>>,
    series: DashMap<String, Series>,
    setup_calls: AtomicUsize,
    dropped: AtomicU64,
    reject_with: Option<SinkError>,
}

impl DashMapMetricsSink {
    /// Create a new, empty sink.
    pub fn new() -> Self {
        Self {
            groups: Mutex::new(Vec::new()),
            series: DashMap::new(),
            setup_calls: AtomicUsize::new(0),
            dropped: AtomicU64::new(0),
            reject_with: None,
        }
    }

    /// A sink whose every `setup` fails with `err`.
    pub fn rejecting(err: SinkError) -> Self {
        Self {
            reject_with: Some(err),
            ..Self::new()
        }
    }

    /// Number of `setup` calls received, accepted or not.
    pub fn setup_calls(&self) -> usize {
        self.setup_calls.load(Ordering::Relaxed)
    }

    /// All groups accepted so far, in registration order.
    pub fn groups(&self) -> Vec<MetricGroup> {
        self.groups.lock().clone()
    }

    pub fn is_registered(&self, title: &str) -> bool {
        self.series.contains_key(title)
    }

    /// Group a series was registered under.
    pub fn group_of(&self, title: &str) -> Option<String> {
        self.series.get(title).map(|s| s.group.clone())
    }

    /// Current total of a counter series.
    pub fn counter(&self, title: &str) -> Option<i64> {
        self.series.get(title).and_then(|s| match &s.data {
            SeriesData::Counter(c) => Some(c.load(Ordering::Relaxed)),
            SeriesData::Histogram(_) => None,
        })
    }

    /// Most recent raw samples of a histogram series.
    pub fn samples(&self, title: &str) -> Option<Vec<i64>> {
        self.series.get(title).and_then(|s| match &s.data {
            SeriesData::Histogram(h) => Some(h.lock().recent()),
            SeriesData::Counter(_) => None,
        })
    }

    /// Summary of a histogram series.
    pub fn histogram(&self, title: &str) -> Option<HistogramSummary> {
        self.series.get(title).and_then(|s| match &s.data {
            SeriesData::Histogram(h) => Some(h.lock().summary()),
            SeriesData::Counter(_) => None,
        })
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Visit every registered series.
    pub fn for_each_series(&self, mut f: impl FnMut(&str, &Series)) {
        for entry in self.series.iter() {
            f(entry.key(), entry.value());
        }
    }

    pub fn snapshot(&self) -> SinkSnapshot {
        let mut counters = BTreeMap::new();
        let mut histograms = BTreeMap::new();

        for entry in self.series.iter() {
            match &entry.value().data {
                SeriesData::Counter(c) => {
                    counters.insert(entry.key().clone(), c.load(Ordering::Relaxed));
                }
                SeriesData::Histogram(h) => {
                    histograms.insert(entry.key().clone(), h.lock().summary());
                }
            }
        }

        SinkSnapshot {
            groups: self.groups(),
            counters,
            histograms,
            dropped: self.dropped(),
        }
    }
}

impl Default for DashMapMetricsSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricsSink for DashMapMetricsSink {
    async fn setup(&self, groups: &[MetricGroup]) -> Result<(), SinkError> {
        self.setup_calls.fetch_add(1, Ordering::Relaxed);

        if let Some(err) = &self.reject_with {
            return Err(err.clone());
        }

        for group in groups {
            for graph in &group.graphs {
                for metric in &graph.metrics {
                    if let Some(existing) = self.series.get(&metric.title) {
                        if existing.group != group.name {
                            tracing::warn!(
                                "series {} already registered under {}, ignoring {}",
                                metric.title,
                                existing.group,
                                group.name
                            );
                        }
                        continue;
                    }
                    let series = Series::new(&group.name, &graph.unit, metric.kind)?;
                    self.series.entry(metric.title.clone()).or_insert(series);
                }
            }
        }
        self.groups.lock().extend_from_slice(groups);

        Ok(())
    }

    fn notify(&self, title: &str, value: i64) {
        match self.series.get(title) {
            Some(series) => match &series.data {
                SeriesData::Counter(c) => {
                    c.fetch_add(value, Ordering::Relaxed);
                }
                SeriesData::Histogram(h) => h.lock().record(value),
            },
            None => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("dropping sample for unregistered series {}", title);
            }
        }
    }
}
