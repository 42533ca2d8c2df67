//! Kernel hwmon provider.
//!
//! Walks `/sys/class/hwmon/hwmon*/`, turns every `<kind><n>_input`
//! attribute into a sample and watches those files for changes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use super::{
    attribute_info, list_dir, parse_number, probe_result, ProviderContext, ProviderError,
    SampleCallback, SensorProvider, Subscription,
};
use crate::core::sensors::model::SensorSample;
use crate::platform::host::{FileAccess, FileWatch, HostShell};

pub const NAME: &str = "hwmon";
pub const HWMON_ROOT: &str = "/sys/class/hwmon";

/// Rapid successive watch events within this window produce one emission.
pub const DEBOUNCE: Duration = Duration::from_millis(500);

const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_secs(1);

static INPUT_FILE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(temp|fan|in|power|curr|humidity)(\d+)_input$").expect("valid hwmon pattern")
});

/// A discovered input attribute and the sample metadata around it.
#[derive(Debug, Clone)]
struct InputDescriptor {
    path: String,
    divisor: f64,
    template: SensorSample,
}

impl InputDescriptor {
    fn sample(&self, raw: f64) -> SensorSample {
        SensorSample {
            value: raw / self.divisor,
            ..self.template.clone()
        }
    }
}

/// Current raw value of every watched input.
struct SensorSet {
    inputs: Vec<InputDescriptor>,
    values: Vec<Option<f64>>,
}

impl SensorSet {
    fn apply(&mut self, index: usize, contents: Option<String>) {
        if let Some(slot) = self.values.get_mut(index) {
            *slot = contents.as_deref().and_then(parse_number);
        }
    }

    fn snapshot(&self) -> Vec<SensorSample> {
        self.inputs
            .iter()
            .zip(&self.values)
            .filter_map(|(input, value)| value.map(|raw| input.sample(raw)))
            .collect()
    }
}

pub struct HwmonProvider {
    host: Arc<dyn HostShell>,
    root: String,
}

impl HwmonProvider {
    pub fn new(host: Arc<dyn HostShell>) -> Self {
        Self::with_root(host, HWMON_ROOT)
    }

    pub fn with_root<S: Into<String>>(host: Arc<dyn HostShell>, root: S) -> Self {
        Self {
            host,
            root: root.into(),
        }
    }

    /// List chips and their files. Chips that cannot be listed are skipped;
    /// permission problems among them are returned alongside the rest.
    async fn chips(&self) -> Result<(Vec<(String, Vec<String>)>, Vec<ProviderError>), ProviderError> {
        let mut chips = Vec::new();
        let mut denied = Vec::new();
        for chip in list_dir(self.host.as_ref(), &self.root).await? {
            let chip_path = format!("{}/{}", self.root, chip);
            match list_dir(self.host.as_ref(), &chip_path).await {
                Ok(files) => chips.push((chip, files)),
                Err(e) if e.is_permission_denied() => denied.push(e),
                Err(e) => log::debug!("Skipping hwmon chip {}: {}", chip, e),
            }
        }
        Ok((chips, denied))
    }

    /// Read one attribute. Permission problems are collected in `denied`,
    /// anything else just leaves the attribute out.
    async fn read_attribute(&self, path: &str, denied: &mut Vec<ProviderError>) -> Option<String> {
        match self.host.read(path, false).await {
            Ok(contents) => contents,
            Err(e) => {
                let err = ProviderError::from_command(path, e);
                if err.is_permission_denied() {
                    denied.push(err);
                } else {
                    log::debug!("Could not read {}: {}", path, err);
                }
                None
            }
        }
    }

    async fn read_value(&self, path: &str, denied: &mut Vec<ProviderError>) -> Option<f64> {
        self.read_attribute(path, denied)
            .await
            .as_deref()
            .and_then(parse_number)
    }

    async fn read_text(&self, path: &str, denied: &mut Vec<ProviderError>) -> Option<String> {
        self.read_attribute(path, denied)
            .await
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// Build descriptors and initial values for every readable input.
    ///
    /// Only a failure to list the hwmon root is fatal. Denied chips and
    /// attributes come back in [`Discovery::denied`].
    async fn discover(&self) -> Result<Discovery, ProviderError> {
        let mut inputs = Vec::new();
        let mut values = Vec::new();
        let (chips, mut denied) = self.chips().await?;

        for (chip, files) in chips {
            let chip_path = format!("{}/{}", self.root, chip);
            let chip_name = match files.iter().any(|f| f == "name") {
                true => self.read_text(&format!("{}/name", chip_path), &mut denied).await,
                false => None,
            }
            .unwrap_or_else(|| chip.clone());

            for file in &files {
                let Some(caps) = INPUT_FILE.captures(file) else {
                    continue;
                };
                let prefix = &caps[1];
                let attribute = format!("{}{}", prefix, &caps[2]);
                let (kind, unit, divisor) = attribute_info(prefix);

                let sibling = |suffix: &str| {
                    let name = format!("{}_{}", attribute, suffix);
                    files
                        .iter()
                        .any(|f| *f == name)
                        .then(|| format!("{}/{}", chip_path, name))
                };

                let label = match sibling("label") {
                    Some(path) => self.read_text(&path, &mut denied).await,
                    None => None,
                }
                .unwrap_or_else(|| attribute.clone());

                let mut template = SensorSample::new(kind, format!("{}:{}", chip, attribute), label, 0.0);
                template.unit = unit.map(str::to_string);
                template.chip_id = Some(chip.clone());
                template.chip_name = Some(chip_name.clone());
                template.chip_label = Some(chip_name.clone());
                for (suffix, slot) in [
                    ("min", &mut template.min),
                    ("max", &mut template.max),
                    ("crit", &mut template.critical),
                ] {
                    if let Some(path) = sibling(suffix) {
                        *slot = self.read_value(&path, &mut denied).await.map(|raw| raw / divisor);
                    }
                }

                let path = format!("{}/{}", chip_path, file);
                values.push(self.read_value(&path, &mut denied).await);
                inputs.push(InputDescriptor {
                    path,
                    divisor,
                    template,
                });
            }
        }

        log::debug!(
            "hwmon discovered {} inputs ({} denied reads)",
            inputs.len(),
            denied.len()
        );
        Ok(Discovery {
            sensors: SensorSet { inputs, values },
            denied,
        })
    }
}

struct Discovery {
    sensors: SensorSet,
    denied: Vec<ProviderError>,
}

impl Discovery {
    /// Report the first permission problem; the rest share its cause.
    fn report_denied(&mut self, ctx: &ProviderContext) {
        let mut denied = self.denied.drain(..);
        if let Some(first) = denied.next() {
            let more = denied.count();
            if more > 0 {
                log::debug!("{} more hwmon paths denied", more);
            }
            ctx.report(NAME, first);
        }
    }
}

#[async_trait]
impl SensorProvider for HwmonProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    /// Available when any readable chip has an input. Denied chips only
    /// matter when nothing else is usable.
    async fn is_available(&self) -> Result<bool, ProviderError> {
        let (chips, mut denied) = match self.chips().await {
            Ok(found) => found,
            Err(e) => return probe_result(e),
        };
        let has_inputs = chips
            .iter()
            .any(|(_, files)| files.iter().any(|f| INPUT_FILE.is_match(f)));
        match denied.pop() {
            Some(err) if !has_inputs => Err(err),
            _ => Ok(has_inputs),
        }
    }

    fn start(self: Arc<Self>, on_change: SampleCallback, ctx: ProviderContext) -> Subscription {
        let subscription = Subscription::new();
        let on_change = subscription.gate(on_change);
        let ctx = subscription.gate_context(ctx);
        let period = ctx.interval_or(DEFAULT_WATCH_INTERVAL);

        let handle = tokio::spawn(async move {
            let mut discovery = match self.discover().await {
                Ok(discovery) => discovery,
                Err(e) => {
                    ctx.report(NAME, e);
                    on_change(Vec::new());
                    return;
                }
            };
            discovery.report_denied(&ctx);
            let mut sensors = discovery.sensors;

            let (tx, mut rx) = mpsc::unbounded_channel::<(usize, Option<String>)>();
            // Dropped together with this task, which closes every watch.
            let _watches: Vec<FileWatch> = sensors
                .inputs
                .iter()
                .enumerate()
                .map(|(index, input)| {
                    let tx = tx.clone();
                    self.host.watch(
                        &input.path,
                        period,
                        Arc::new(move |contents| {
                            let _ = tx.send((index, contents));
                        }),
                    )
                })
                .collect();

            on_change(sensors.snapshot());

            while let Some((index, contents)) = rx.recv().await {
                sensors.apply(index, contents);

                let mut deadline = Instant::now() + DEBOUNCE;
                loop {
                    tokio::select! {
                        _ = sleep_until(deadline) => break,
                        next = rx.recv() => match next {
                            Some((index, contents)) => {
                                sensors.apply(index, contents);
                                deadline = Instant::now() + DEBOUNCE;
                            }
                            None => break,
                        },
                    }
                }

                on_change(sensors.snapshot());
            }
        });
        subscription.attach(handle);
        subscription
    }
}
