//! NVMe provider (`nvme list`, `nvme smart-log`).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{
    json_number, probe_result, run_json, start_polling, Poller, ProviderContext, ProviderError,
    SampleCallback, SensorProvider, Subscription,
};
use crate::core::sensors::model::{SensorCategory, SensorKind, SensorSample};
use crate::platform::host::HostShell;

pub const NAME: &str = "nvme";

const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Above this a raw temperature is taken to be Kelvin.
pub const KELVIN_THRESHOLD: f64 = 200.0;

/// nvme-cli reports Kelvin, some firmware reports Celsius.
pub fn kelvin_or_celsius(raw: f64) -> f64 {
    if raw > KELVIN_THRESHOLD {
        raw - 273.0
    } else {
        raw
    }
}

/// Stable drive identifier shared by the drive providers: the device file
/// name with any NVMe namespace suffix removed (`/dev/nvme0n1` → `nvme0`).
pub fn drive_id(device_path: &str) -> String {
    let name = device_path.rsplit('/').next().unwrap_or(device_path);
    if let Some(rest) = name.strip_prefix("nvme") {
        if let Some(pos) = rest.find('n') {
            let (controller, namespace) = rest.split_at(pos);
            let is_namespace = namespace.len() > 1 && namespace[1..].chars().all(|c| c.is_ascii_digit());
            if !controller.is_empty() && is_namespace {
                return format!("nvme{}", controller);
            }
        }
    }
    name.to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct NvmeDevice {
    pub path: String,
    pub model: Option<String>,
}

impl NvmeDevice {
    fn label(&self) -> String {
        match &self.model {
            Some(model) => format!("{} ({})", model, drive_id(&self.path)),
            None => drive_id(&self.path),
        }
    }
}

fn text(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Parse `nvme list -o json`.
///
/// Handles both the flat `Devices[].DevicePath` layout and the nested
/// `Devices[].Subsystems[].Controllers[].Namespaces[]` layout of newer
/// nvme-cli releases.
pub fn parse_device_list(root: &Value) -> Vec<NvmeDevice> {
    let mut devices = Vec::new();
    let Some(entries) = root.get("Devices").and_then(Value::as_array) else {
        return devices;
    };

    for entry in entries {
        if let Some(path) = text(entry, "DevicePath") {
            devices.push(NvmeDevice {
                path,
                model: text(entry, "ModelNumber"),
            });
            continue;
        }

        let subsystems = entry.get("Subsystems").and_then(Value::as_array);
        for subsystem in subsystems.into_iter().flatten() {
            let controllers = subsystem.get("Controllers").and_then(Value::as_array);
            for controller in controllers.into_iter().flatten() {
                let namespaces = controller.get("Namespaces").and_then(Value::as_array);
                for namespace in namespaces.into_iter().flatten() {
                    if let Some(name) = text(namespace, "NameSpace") {
                        devices.push(NvmeDevice {
                            path: format!("/dev/{}", name),
                            model: text(controller, "ModelNumber"),
                        });
                    }
                }
            }
        }
    }

    devices
}

/// Parse `nvme smart-log -o json` for one device.
pub fn parse_smart_log(device: &NvmeDevice, log: &Value) -> Vec<SensorSample> {
    let drive = drive_id(&device.path);
    let mut readings: Vec<(String, String, f64)> = Vec::new();

    if let Some(raw) = log.get("temperature").and_then(json_number) {
        readings.push(("temperature".to_string(), "Composite".to_string(), raw));
    }

    if let Some(fields) = log.as_object() {
        let mut sensors: Vec<(u32, f64)> = fields
            .iter()
            .filter_map(|(key, value)| {
                let index = key.strip_prefix("temperature_sensor_")?.parse::<u32>().ok()?;
                Some((index, json_number(value)?))
            })
            .collect();
        sensors.sort_by_key(|(index, _)| *index);
        for (index, raw) in sensors {
            // Unused sensor slots read as zero.
            if raw > 0.0 {
                readings.push((format!("sensor{}", index), format!("Sensor {}", index), raw));
            }
        }
    }

    readings
        .into_iter()
        .map(|(suffix, label, raw)| {
            let mut sample = SensorSample::new(
                SensorKind::Temperature,
                format!("{}:{}", drive, suffix),
                label,
                kelvin_or_celsius(raw),
            );
            sample.unit = Some("°C".to_string());
            sample.chip_id = Some(drive.clone());
            sample.chip_name = Some(device.model.clone().unwrap_or_else(|| drive.clone()));
            sample.chip_label = Some(device.label());
            sample.category = Some(SensorCategory::Drive);
            sample
        })
        .collect()
}

pub struct NvmeProvider {
    host: Arc<dyn HostShell>,
}

impl NvmeProvider {
    pub fn new(host: Arc<dyn HostShell>) -> Self {
        Self { host }
    }

    async fn devices(&self) -> Result<Vec<NvmeDevice>, ProviderError> {
        let output = run_json(self.host.as_ref(), &["nvme", "list", "-o", "json"], false).await?;
        Ok(parse_device_list(&output))
    }
}

struct NvmePoller {
    provider: Arc<NvmeProvider>,
    devices: Option<Vec<NvmeDevice>>,
}

#[async_trait]
impl Poller for NvmePoller {
    async fn poll(&mut self, ctx: &ProviderContext) -> Option<Vec<SensorSample>> {
        if self.devices.is_none() {
            match self.provider.devices().await {
                Ok(devices) => self.devices = Some(devices),
                Err(e) => {
                    ctx.report(NAME, e);
                    return Some(Vec::new());
                }
            }
        }
        let devices = self.devices.as_deref().unwrap_or_default();

        let mut samples = Vec::new();
        for device in devices {
            let argv = ["nvme", "smart-log", device.path.as_str(), "-o", "json"];
            match run_json(self.provider.host.as_ref(), &argv, true).await {
                Ok(log) => samples.extend(parse_smart_log(device, &log)),
                Err(e) if e.is_permission_denied() => {
                    // Every other device would fail the same way this tick.
                    ctx.report(NAME, e);
                    break;
                }
                Err(e) => ctx.report(NAME, e),
            }
        }
        Some(samples)
    }
}

#[async_trait]
impl SensorProvider for NvmeProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn is_available(&self) -> Result<bool, ProviderError> {
        match self.devices().await {
            Ok(devices) => Ok(!devices.is_empty()),
            Err(e) => probe_result(e),
        }
    }

    fn start(self: Arc<Self>, on_change: SampleCallback, ctx: ProviderContext) -> Subscription {
        start_polling(
            NAME,
            NvmePoller {
                provider: self,
                devices: None,
            },
            DEFAULT_INTERVAL,
            on_change,
            ctx,
        )
    }
}
