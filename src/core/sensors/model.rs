use serde::{Deserialize, Serialize};

/// What a sample measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Temperature,
    Fan,
    Voltage,
    Power,
    Other,
}

impl SensorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Fan => "fan",
            SensorKind::Voltage => "voltage",
            SensorKind::Power => "power",
            SensorKind::Other => "other",
        }
    }

    /// Display unit used when the backend does not provide one.
    pub fn default_unit(&self) -> Option<&'static str> {
        match self {
            SensorKind::Temperature => Some("°C"),
            SensorKind::Fan => Some("RPM"),
            SensorKind::Voltage => Some("V"),
            SensorKind::Power => Some("W"),
            SensorKind::Other => None,
        }
    }
}

/// Display category a chip group belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorCategory {
    Temperature,
    Fan,
    Voltage,
    Power,
    Drive,
    Other,
}

impl SensorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorCategory::Temperature => "temperature",
            SensorCategory::Fan => "fan",
            SensorCategory::Voltage => "voltage",
            SensorCategory::Power => "power",
            SensorCategory::Drive => "drive",
            SensorCategory::Other => "other",
        }
    }
}

impl From<SensorKind> for SensorCategory {
    fn from(kind: SensorKind) -> Self {
        match kind {
            SensorKind::Temperature => SensorCategory::Temperature,
            SensorKind::Fan => SensorCategory::Fan,
            SensorKind::Voltage => SensorCategory::Voltage,
            SensorKind::Power => SensorCategory::Power,
            SensorKind::Other => SensorCategory::Other,
        }
    }
}

/// One normalized reading from one backend at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub kind: SensorKind,
    pub id: String,
    pub label: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chip_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chip_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chip_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<SensorCategory>,
}

impl SensorSample {
    pub fn new<I: Into<String>, L: Into<String>>(kind: SensorKind, id: I, label: L, value: f64) -> Self {
        Self {
            kind,
            id: id.into(),
            label: label.into(),
            value,
            min: None,
            max: None,
            critical: None,
            unit: None,
            chip_id: None,
            chip_label: None,
            chip_name: None,
            category: None,
        }
    }

    /// The category this sample is displayed under.
    pub fn effective_category(&self) -> SensorCategory {
        self.category.unwrap_or_else(|| self.kind.into())
    }
}

/// A sample tagged with the provider that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleWithProvider {
    pub provider: &'static str,
    pub sample: SensorSample,
}

/// A display-normalized value inside a chip group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub label: String,
    pub input: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub critical: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// One chip crossed with one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorChipGroup {
    pub id: String,
    pub name: String,
    pub label: String,
    pub category: SensorCategory,
    pub readings: Vec<Reading>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Top-level payload handed to the presentation layer.
///
/// `timestamp` is epoch milliseconds; `Some(0)` is a valid value and is kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorData {
    #[serde(default)]
    pub groups: Vec<SensorChipGroup>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl SensorData {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn reading_count(&self) -> usize {
        self.groups.iter().map(|g| g.readings.len()).sum()
    }
}
