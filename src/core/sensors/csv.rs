//! CSV export of sensor history.

use chrono::{DateTime, SecondsFormat};

use super::history::Sample;

/// A labelled series to export.
#[derive(Debug, Clone)]
pub struct HistorySeries {
    pub label: String,
    pub samples: Vec<Sample>,
}

impl HistorySeries {
    pub fn new<S: Into<String>>(label: S, samples: Vec<Sample>) -> Self {
        Self {
            label: label.into(),
            samples,
        }
    }
}

/// Build a CSV document from several series.
///
/// Rows are aligned by sample index, not by timestamp. Each row takes its
/// timestamp from the first series holding a sample at that index.
pub fn build_history_csv(series: &[HistorySeries]) -> String {
    let mut header = vec!["timestamp".to_string()];
    header.extend(series.iter().map(|s| escape_cell(&s.label)));

    let mut lines = vec![header.join(",")];
    let rows = series.iter().map(|s| s.samples.len()).max().unwrap_or(0);

    for index in 0..rows {
        let timestamp = series
            .iter()
            .find_map(|s| s.samples.get(index))
            .map(|sample| format_timestamp(sample.t))
            .unwrap_or_default();

        let mut cells = vec![escape_cell(&timestamp)];
        for s in series {
            cells.push(
                s.samples
                    .get(index)
                    .map(|sample| escape_cell(&sample.v.to_string()))
                    .unwrap_or_default(),
            );
        }
        lines.push(cells.join(","));
    }

    lines.join("\n")
}

/// Render epoch milliseconds as an ISO-8601 UTC string.
pub fn format_timestamp(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| millis.to_string())
}

fn escape_cell(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}
