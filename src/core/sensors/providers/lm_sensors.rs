//! lm-sensors provider (`sensors -j`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use super::{
    attribute_info, json_number, probe_result, run_json, split_attribute, start_polling, Poller,
    ProviderContext, ProviderError, SampleCallback, SensorProvider, Subscription,
};
use crate::core::sensors::model::SensorSample;
use crate::platform::host::HostShell;

pub const NAME: &str = "lm-sensors";

const COMMAND: &[&str] = &["sensors", "-j"];
const DEFAULT_INTERVAL: Duration = Duration::from_secs(3);

static PACKAGE_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Package id (\d+)$").expect("valid label pattern"));
static CORE_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Core (\d+)$").expect("valid label pattern"));

/// Turn technical lm-sensors labels into display labels.
pub fn prettify_label(label: &str) -> String {
    if let Some(caps) = PACKAGE_LABEL.captures(label) {
        return format!("CPU Package {}", &caps[1]);
    }
    if let Some(caps) = CORE_LABEL.captures(label) {
        return format!("CPU Core {}", &caps[1]);
    }
    match label {
        "Tctl" => "CPU (Tctl)".to_string(),
        "Tdie" => "CPU (Tdie)".to_string(),
        "Tccd1" => "CPU CCD 1".to_string(),
        "Tccd2" => "CPU CCD 2".to_string(),
        other => other.to_string(),
    }
}

/// Flatten `sensors -j` output into samples.
///
/// The tree is chip → feature group → field. Every `<attr>_input` field
/// becomes a sample, with `<attr>_min`, `_max`, `_crit` and `_label` taken
/// from the same group. Groups carrying a bare `input` field are treated
/// as a single sensor named after the group.
pub fn parse_sensors_json(root: &Value) -> Vec<SensorSample> {
    let mut samples = Vec::new();
    let Some(chips) = root.as_object() else {
        return samples;
    };

    for (chip, chip_value) in chips {
        let Some(features) = chip_value.as_object() else {
            continue;
        };
        let driver = chip.split('-').next().unwrap_or(chip).to_string();

        for (feature, fields) in features {
            let Some(fields) = fields.as_object() else {
                continue;
            };

            for (key, value) in fields {
                let attribute = if key == "input" {
                    feature.as_str()
                } else if let Some(attribute) = key.strip_suffix("_input") {
                    attribute
                } else {
                    continue;
                };
                let Some(input) = json_number(value) else {
                    continue;
                };

                let bare = key == "input";
                let field = |suffix: &str| {
                    let name = if bare {
                        suffix.to_string()
                    } else {
                        format!("{}_{}", attribute, suffix)
                    };
                    fields.get(&name)
                };

                let (prefix, _) = split_attribute(attribute);
                let (kind, unit, _) = attribute_info(&prefix.to_ascii_lowercase());
                let label = field("label")
                    .and_then(Value::as_str)
                    .unwrap_or(feature.as_str());

                let mut sample = SensorSample::new(
                    kind,
                    format!("{}:{}", chip, attribute),
                    prettify_label(label),
                    input,
                );
                sample.min = field("min").and_then(json_number);
                sample.max = field("max").and_then(json_number);
                sample.critical = field("crit").and_then(json_number);
                sample.unit = unit.map(str::to_string);
                sample.chip_id = Some(chip.clone());
                sample.chip_name = Some(chip.clone());
                sample.chip_label = Some(driver.clone());
                samples.push(sample);
            }
        }
    }

    samples
}

/// Remove a top-level `timestamp` key from a payload object.
pub(crate) fn take_timestamp(map: &mut Map<String, Value>) -> Option<i64> {
    map.remove("timestamp").and_then(|v| v.as_i64())
}

pub struct LmSensorsProvider {
    host: Arc<dyn HostShell>,
}

impl LmSensorsProvider {
    pub fn new(host: Arc<dyn HostShell>) -> Self {
        Self { host }
    }

    async fn collect(&self) -> Result<Vec<SensorSample>, ProviderError> {
        let output = run_json(self.host.as_ref(), COMMAND, false).await?;
        Ok(parse_sensors_json(&output))
    }
}

struct LmSensorsPoller {
    provider: Arc<LmSensorsProvider>,
}

#[async_trait]
impl Poller for LmSensorsPoller {
    async fn poll(&mut self, ctx: &ProviderContext) -> Option<Vec<SensorSample>> {
        match self.provider.collect().await {
            Ok(samples) => Some(samples),
            Err(e) => {
                ctx.report(NAME, e);
                None
            }
        }
    }
}

#[async_trait]
impl SensorProvider for LmSensorsProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn is_available(&self) -> Result<bool, ProviderError> {
        match self.collect().await {
            Ok(samples) => Ok(!samples.is_empty()),
            Err(e) => probe_result(e),
        }
    }

    fn start(self: Arc<Self>, on_change: SampleCallback, ctx: ProviderContext) -> Subscription {
        start_polling(
            NAME,
            LmSensorsPoller { provider: self },
            DEFAULT_INTERVAL,
            on_change,
            ctx,
        )
    }
}
