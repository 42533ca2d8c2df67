//! smartctl provider (`smartctl --scan -j`, `smartctl -i -A -j`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::nvme::drive_id;
use super::{
    json_number, probe_result, start_polling, Poller, ProviderContext, ProviderError,
    SampleCallback, SensorProvider, Subscription,
};
use crate::core::sensors::model::{SensorCategory, SensorKind, SensorSample};
use crate::platform::host::{CommandError, CommandRunner, HostShell};

pub const NAME: &str = "smartctl";

const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// SMART attribute IDs carrying the drive temperature, in preference order.
const TEMPERATURE_ATTRIBUTES: [u64; 2] = [194, 190];

/// smartctl exit status bits 0 and 1: bad command line, device open failed.
/// The higher bits only describe the drive's health and still come with
/// complete JSON output.
const FATAL_EXIT_BITS: i32 = 0b11;

#[derive(Debug, Clone, PartialEq)]
pub struct SmartDevice {
    pub name: String,
    pub device_type: Option<String>,
    pub model: Option<String>,
}

impl SmartDevice {
    fn argv(&self) -> Vec<&str> {
        let mut argv = vec!["smartctl", "-i", "-A", "-j"];
        if let Some(device_type) = &self.device_type {
            argv.push("-d");
            argv.push(device_type);
        }
        argv.push(&self.name);
        argv
    }

    /// Fill in the model the first time a response carries it.
    fn learn_identity(&mut self, info: &Value) {
        if self.model.is_none() {
            self.model = info
                .get("model_name")
                .or_else(|| info.get("scsi_model_name"))
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string());
        }
    }

    fn label(&self) -> String {
        let drive = drive_id(&self.name);
        match &self.model {
            Some(model) => format!("{} ({})", model, drive),
            None => drive,
        }
    }
}

/// Parse `smartctl --scan -j`.
pub fn parse_scan(root: &Value) -> Vec<SmartDevice> {
    root.get("devices")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|entry| {
            let name = entry.get("name")?.as_str()?.to_string();
            Some(SmartDevice {
                name,
                device_type: entry.get("type").and_then(Value::as_str).map(str::to_string),
                model: None,
            })
        })
        .collect()
}

/// Drive temperature in °C: `temperature.current`, else attribute 194,
/// else attribute 190.
pub fn extract_temperature(info: &Value) -> Option<f64> {
    if let Some(current) = info.pointer("/temperature/current").and_then(json_number) {
        return Some(current);
    }
    TEMPERATURE_ATTRIBUTES
        .iter()
        .find_map(|id| attribute_raw(info, *id))
}

fn attribute_raw(info: &Value, id: u64) -> Option<f64> {
    let table = info.pointer("/ata_smart_attributes/table")?.as_array()?;
    let attribute = table
        .iter()
        .find(|a| a.get("id").and_then(Value::as_u64) == Some(id))?;
    let raw = attribute.pointer("/raw/value")?.as_u64()?;
    // The raw field packs min/max into the upper bytes on many drives.
    let celsius = if raw > 0xFF { raw & 0xFF } else { raw };
    Some(celsius as f64)
}

/// Collect the human-readable messages smartctl embeds in its JSON output.
fn smartctl_messages(output: &Value) -> Option<String> {
    let messages: Vec<&str> = output
        .pointer("/smartctl/messages")?
        .as_array()?
        .iter()
        .filter_map(|m| m.get("string").and_then(Value::as_str))
        .collect();
    (!messages.is_empty()).then(|| messages.join("; "))
}

/// Run a smartctl command, accepting non-fatal exit statuses that still
/// carry valid JSON.
async fn run_smartctl(host: &dyn HostShell, argv: &[&str]) -> Result<Value, ProviderError> {
    let context = argv.join(" ");
    match host.run(argv, true).await {
        Ok(output) => serde_json::from_str(&output).map_err(|e| ProviderError::parse(&context, e)),
        Err(err) => {
            let parsed: Option<Value> = serde_json::from_str(&err.stdout).ok();
            let fatal = err.exit_status.map_or(true, |status| status & FATAL_EXIT_BITS != 0);

            match parsed {
                Some(output) if !fatal => Ok(output),
                Some(output) => {
                    let message = smartctl_messages(&output).unwrap_or_else(|| err.message.clone());
                    let err = CommandError {
                        message,
                        ..err
                    };
                    Err(ProviderError::from_command(&context, err))
                }
                None => Err(ProviderError::from_command(&context, err)),
            }
        }
    }
}

pub struct SmartctlProvider {
    host: Arc<dyn HostShell>,
}

impl SmartctlProvider {
    pub fn new(host: Arc<dyn HostShell>) -> Self {
        Self { host }
    }

    async fn scan(&self) -> Result<Vec<SmartDevice>, ProviderError> {
        let output = run_smartctl(self.host.as_ref(), &["smartctl", "--scan", "-j"]).await?;
        Ok(parse_scan(&output))
    }
}

struct SmartctlPoller {
    provider: Arc<SmartctlProvider>,
    devices: Option<Vec<SmartDevice>>,
}

#[async_trait]
impl Poller for SmartctlPoller {
    async fn poll(&mut self, ctx: &ProviderContext) -> Option<Vec<SensorSample>> {
        if self.devices.is_none() {
            match self.provider.scan().await {
                Ok(devices) => self.devices = Some(devices),
                Err(e) => {
                    ctx.report(NAME, e);
                    return Some(Vec::new());
                }
            }
        }

        let host = Arc::clone(&self.provider.host);
        let mut samples = Vec::new();
        for device in self.devices.iter_mut().flatten() {
            let info = match run_smartctl(host.as_ref(), &device.argv()).await {
                Ok(info) => info,
                Err(e) => {
                    ctx.report(NAME, e);
                    continue;
                }
            };

            device.learn_identity(&info);
            let Some(celsius) = extract_temperature(&info) else {
                log::debug!("{} reports no temperature", device.name);
                continue;
            };

            let drive = drive_id(&device.name);
            let mut sample = SensorSample::new(
                SensorKind::Temperature,
                format!("{}:temperature", drive),
                "Temperature",
                celsius,
            );
            sample.unit = Some("°C".to_string());
            sample.chip_id = Some(drive.clone());
            sample.chip_name = Some(device.model.clone().unwrap_or(drive));
            sample.chip_label = Some(device.label());
            sample.category = Some(SensorCategory::Drive);
            samples.push(sample);
        }
        Some(samples)
    }
}

#[async_trait]
impl SensorProvider for SmartctlProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn is_available(&self) -> Result<bool, ProviderError> {
        match self.scan().await {
            Ok(devices) => Ok(!devices.is_empty()),
            Err(e) => probe_result(e),
        }
    }

    fn start(self: Arc<Self>, on_change: SampleCallback, ctx: ProviderContext) -> Subscription {
        start_polling(
            NAME,
            SmartctlPoller {
                provider: self,
                devices: None,
            },
            DEFAULT_INTERVAL,
            on_change,
            ctx,
        )
    }
}
