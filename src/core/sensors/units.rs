//! Unit conversion, value formatting and threshold classification.

use serde::{Deserialize, Serialize};

use super::model::{Reading, SensorCategory};

/// Readings this close below `max` (°C) are flagged as a warning.
pub const WARNING_MARGIN_CELSIUS: f64 = 5.0;

const CELSIUS_UNIT: &str = "°C";

/// Temperature display unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub fn symbol(&self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "°C",
            TemperatureUnit::Fahrenheit => "°F",
        }
    }

    /// Convert a Celsius value into this unit.
    pub fn from_celsius(&self, celsius: f64) -> f64 {
        match self {
            TemperatureUnit::Celsius => celsius,
            TemperatureUnit::Fahrenheit => celsius_to_fahrenheit(celsius),
        }
    }
}

impl std::str::FromStr for TemperatureUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "c" | "celsius" => Ok(TemperatureUnit::Celsius),
            "f" | "fahrenheit" => Ok(TemperatureUnit::Fahrenheit),
            other => Err(format!("unknown temperature unit '{}'", other)),
        }
    }
}

pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

pub fn fahrenheit_to_celsius(fahrenheit: f64) -> f64 {
    (fahrenheit - 32.0) * 5.0 / 9.0
}

/// Format a value for display, converting Celsius readings to `temp_unit`.
pub fn format_value(value: f64, unit: Option<&str>, temp_unit: TemperatureUnit) -> String {
    match unit {
        Some(CELSIUS_UNIT) => format!("{:.1} {}", temp_unit.from_celsius(value), temp_unit.symbol()),
        Some("RPM") => format!("{:.0} RPM", value),
        Some("V") => format!("{:.3} V", value),
        Some("W") => format!("{:.1} W", value),
        Some("A") => format!("{:.2} A", value),
        Some(other) => format!("{:.2} {}", value, other),
        None => format!("{:.2}", value),
    }
}

/// Threshold severity of a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Normal,
    Warning,
    Danger,
}

/// Classify a Celsius temperature against its thresholds.
///
/// Danger at or above `max`, or above `critical`. Warning within
/// [`WARNING_MARGIN_CELSIUS`] below `max` (or below `critical` when no
/// `max` is known).
pub fn classify_temperature(input: f64, max: Option<f64>, critical: Option<f64>) -> Severity {
    if max.is_some_and(|max| input >= max) || critical.is_some_and(|crit| input > crit) {
        return Severity::Danger;
    }

    match max.or(critical) {
        Some(limit) if input >= limit - WARNING_MARGIN_CELSIUS => Severity::Warning,
        _ => Severity::Normal,
    }
}

/// Classify a reading of any category.
///
/// Only temperatures get a warning band; other readings are either inside
/// their limits or in danger.
pub fn classify_reading(reading: &Reading, category: SensorCategory) -> Severity {
    let is_temperature = matches!(category, SensorCategory::Temperature | SensorCategory::Drive)
        && reading.unit.as_deref().map_or(true, |u| u == CELSIUS_UNIT);

    if is_temperature {
        return classify_temperature(reading.input, reading.max, reading.critical);
    }

    let over_max = reading.max.is_some_and(|max| reading.input >= max);
    let over_crit = reading.critical.is_some_and(|crit| reading.input > crit);
    let under_min = reading.min.is_some_and(|min| reading.input < min);
    if over_max || over_crit || under_min {
        Severity::Danger
    } else {
        Severity::Normal
    }
}
