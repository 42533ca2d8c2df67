use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::model::{Reading, SensorChipGroup, SensorData};

pub const DEFAULT_HISTORY_SIZE: usize = 300;

/// One historical point: epoch milliseconds and value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub t: i64,
    pub v: f64,
}

/// Session statistics for one series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub count: usize,
}

/// Rolling buffer for a single series
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    capacity: usize,
    samples: VecDeque<Sample>,
}

impl HistoryBuffer {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, t: i64, v: f64) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(Sample { t, v });
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.samples.iter().copied().collect()
    }

    pub fn stats(&self) -> Option<SeriesStats> {
        if self.samples.is_empty() {
            return None;
        }

        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for sample in &self.samples {
            min = min.min(sample.v);
            max = max.max(sample.v);
            sum += sample.v;
        }

        Some(SeriesStats {
            min,
            max,
            avg: sum / self.samples.len() as f64,
            count: self.samples.len(),
        })
    }

    /// Values scaled for a sparkline widget (0..=1000 across the window).
    pub fn as_sparkline(&self) -> Vec<u64> {
        let Some(stats) = self.stats() else {
            return Vec::new();
        };
        let span = stats.max - stats.min;
        self.samples
            .iter()
            .map(|s| {
                if span <= f64::EPSILON {
                    500
                } else {
                    (((s.v - stats.min) / span) * 1000.0) as u64
                }
            })
            .collect()
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Stable key identifying one table row across refreshes.
pub fn row_key(group: &SensorChipGroup, reading: &Reading) -> String {
    format!("{}/{}", group.id, reading.label)
}

/// Per-row history for the whole sensor table
#[derive(Debug, Clone)]
pub struct HistoryStore {
    capacity: usize,
    series: HashMap<String, HistoryBuffer>,
    last_recorded: Option<i64>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            series: HashMap::new(),
            last_recorded: None,
        }
    }

    pub fn push(&mut self, key: &str, t: i64, v: f64) {
        let capacity = self.capacity;
        self.series
            .entry(key.to_string())
            .or_insert_with(|| HistoryBuffer::with_capacity(capacity))
            .push(t, v);
    }

    /// Append every reading of a snapshot. Snapshots without a timestamp
    /// are stamped with `fallback_t`.
    pub fn record(&mut self, data: &SensorData, fallback_t: i64) {
        let t = data.timestamp.unwrap_or(fallback_t);
        for group in &data.groups {
            for reading in &group.readings {
                self.push(&row_key(group, reading), t, reading.input);
            }
        }
    }

    /// Record a published snapshot and drop rows that left the table.
    ///
    /// A snapshot whose timestamp matches the last one recorded here is the
    /// same publication seen again and is skipped. Returns whether it was
    /// recorded.
    pub fn record_update(&mut self, data: &SensorData, fallback_t: i64) -> bool {
        if data.timestamp == self.last_recorded {
            return false;
        }
        self.last_recorded = data.timestamp;
        self.record(data, fallback_t);

        let live: Vec<String> = data
            .groups
            .iter()
            .flat_map(|g| g.readings.iter().map(move |r| row_key(g, r)))
            .collect();
        self.prune(live.iter().map(String::as_str));
        true
    }

    /// Drop series whose rows are no longer present.
    pub fn prune<'a, I>(&mut self, live_keys: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let live: HashSet<&str> = live_keys.into_iter().collect();
        self.series.retain(|key, _| live.contains(key.as_str()));
    }

    pub fn get(&self, key: &str) -> Option<&HistoryBuffer> {
        self.series.get(key)
    }

    pub fn samples(&self, key: &str) -> Vec<Sample> {
        self.series.get(key).map(HistoryBuffer::samples).unwrap_or_default()
    }

    pub fn stats(&self, key: &str) -> Option<SeriesStats> {
        self.series.get(key).and_then(HistoryBuffer::stats)
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}
