//! Terminal rendering of the aggregated sensor view.

use colored::*;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::core::sensors::engine::EngineSnapshot;
use crate::core::sensors::history::{row_key, HistoryStore};
use crate::core::sensors::model::{Reading, SensorCategory, SensorData};
use crate::core::sensors::status::Status;
use crate::core::sensors::units::{classify_reading, format_value, Severity, TemperatureUnit};

const LABEL_WIDTH: usize = 28;
const VALUE_WIDTH: usize = 12;
const TREND_WIDTH: usize = 16;

/// Shown when no backend is installed.
pub const REMEDIATION_COMMAND: &str = "sudo apt install lm-sensors";

const SPARK_BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Truncate or pad `text` to exactly `width` display columns.
pub fn fit(text: &str, width: usize) -> String {
    if text.width() <= width {
        return format!("{}{}", text, " ".repeat(width - text.width()));
    }

    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w > width.saturating_sub(1) {
            break;
        }
        out.push(ch);
        used += w;
    }
    out.push('…');
    used += 1;
    out.push_str(&" ".repeat(width.saturating_sub(used)));
    out
}

fn paint(text: String, severity: Severity) -> ColoredString {
    match severity {
        Severity::Normal => text.green(),
        Severity::Warning => text.yellow().bold(),
        Severity::Danger => text.red().bold(),
    }
}

fn sparkline(values: &[u64], width: usize) -> String {
    let start = values.len().saturating_sub(width);
    values[start..]
        .iter()
        .map(|v| SPARK_BARS[((*v as usize) * (SPARK_BARS.len() - 1)) / 1000])
        .collect()
}

fn limit_text(reading: &Reading, unit: TemperatureUnit) -> String {
    match (reading.max, reading.critical) {
        (Some(max), _) => format!("max {}", format_value(max, reading.unit.as_deref(), unit)),
        (None, Some(crit)) => format!("crit {}", format_value(crit, reading.unit.as_deref(), unit)),
        (None, None) => String::new(),
    }
}

fn category_title(category: SensorCategory) -> &'static str {
    match category {
        SensorCategory::Temperature => "Temperature",
        SensorCategory::Fan => "Fans",
        SensorCategory::Voltage => "Voltage",
        SensorCategory::Power => "Power",
        SensorCategory::Drive => "Drives",
        SensorCategory::Other => "Other",
    }
}

/// Render every group as a block of aligned rows.
pub fn render_table(data: &SensorData, history: &HistoryStore, unit: TemperatureUnit) -> String {
    let mut out = String::new();

    for group in &data.groups {
        out.push_str(&format!(
            "{} {}\n",
            group.label.bold().bright_cyan(),
            format!("[{}]", category_title(group.category)).dimmed()
        ));

        for reading in &group.readings {
            let key = row_key(group, reading);
            let severity = classify_reading(reading, group.category);
            let value = format_value(reading.input, reading.unit.as_deref(), unit);

            let (low, high) = match history.stats(&key) {
                Some(stats) => (
                    format_value(stats.min, reading.unit.as_deref(), unit),
                    format_value(stats.max, reading.unit.as_deref(), unit),
                ),
                None => (String::new(), String::new()),
            };
            let trend = history
                .get(&key)
                .map(|buffer| sparkline(&buffer.as_sparkline(), TREND_WIDTH))
                .unwrap_or_default();

            out.push_str(&format!(
                "  {} {} {} {} {} {}\n",
                fit(&reading.label, LABEL_WIDTH),
                paint(fit(&value, VALUE_WIDTH), severity),
                fit(&low, VALUE_WIDTH).dimmed(),
                fit(&high, VALUE_WIDTH).dimmed(),
                fit(&trend, TREND_WIDTH).bright_blue(),
                limit_text(reading, unit).dimmed()
            ));
        }
        out.push('\n');
    }

    out
}

/// Header line for the column layout used by [`render_table`].
pub fn table_header() -> String {
    format!(
        "  {} {} {} {} {}",
        fit("Sensor", LABEL_WIDTH),
        fit("Value", VALUE_WIDTH),
        fit("Low", VALUE_WIDTH),
        fit("High", VALUE_WIDTH),
        fit("Trend", TREND_WIDTH)
    )
    .bold()
    .to_string()
}

/// User-facing explanation for every status other than ready/loading.
pub fn status_banner(snapshot: &EngineSnapshot) -> Option<String> {
    match snapshot.status {
        Status::Loading | Status::Ready => None,
        Status::NoSources => Some(format!(
            "{}\nInstall lm-sensors to enable hardware monitoring:\n  {}",
            "No compatible sensor backend found.".yellow().bold(),
            REMEDIATION_COMMAND.bright_white()
        )),
        Status::NeedsPrivileges => Some(format!(
            "{}\nSome readings need elevated privileges. Run again with {} to retry as root.",
            "Elevated privileges required.".yellow().bold(),
            "--sudo".bright_white()
        )),
        Status::NoData => Some(format!(
            "{}\nThe {} backend is running but reported no readings. This is common on virtual machines.",
            "No sensors reported.".yellow().bold(),
            snapshot.active_provider.as_deref().unwrap_or("sensor")
        )),
        Status::Error => Some(format!(
            "{}\n{}",
            "Unexpected failure while collecting sensor data.".red().bold(),
            snapshot
                .last_error
                .as_deref()
                .unwrap_or("No further details available.")
                .dimmed()
        )),
    }
}
