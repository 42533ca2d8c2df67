//! Powercap/RAPL provider.
//!
//! Reads `power_uw` where the platform exposes it, otherwise derives
//! watts from successive `energy_uj` counter readings.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::time::Instant;

use super::{
    list_dir, parse_number, probe_result, start_polling, Poller, ProviderContext, ProviderError,
    SampleCallback, SensorProvider, Subscription,
};
use crate::core::sensors::aggregate::natural_cmp;
use crate::core::sensors::model::{SensorCategory, SensorKind, SensorSample};
use crate::platform::host::{FileAccess, HostShell};

pub const NAME: &str = "powercap";
pub const POWERCAP_ROOT: &str = "/sys/class/powercap";

const DEFAULT_INTERVAL: Duration = Duration::from_secs(3);

static ZONE_DIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9-]*rapl[a-z-]*(:\d+)+$").expect("valid zone pattern"));

/// Turns a monotonically increasing energy counter into average power.
#[derive(Debug, Clone, Default)]
pub struct EnergyTracker {
    last: Option<(f64, f64)>,
}

impl EnergyTracker {
    /// Feed a counter reading (µJ) taken at `at_secs`.
    ///
    /// Returns watts once two readings exist. A counter that went backwards
    /// is corrected by `max_range_uj`; without a declared range the interval
    /// is discarded.
    pub fn update(&mut self, energy_uj: f64, at_secs: f64, max_range_uj: Option<f64>) -> Option<f64> {
        let previous = self.last.replace((energy_uj, at_secs));
        let (last_energy, last_at) = previous?;

        let elapsed = at_secs - last_at;
        if elapsed <= 0.0 {
            return None;
        }

        let mut delta = energy_uj - last_energy;
        if delta < 0.0 {
            delta += max_range_uj?;
        }
        Some(delta / elapsed / 1_000_000.0)
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Display label for a zone `name` attribute (`package-0` → `Package 0`).
pub fn prettify_zone_name(name: &str) -> String {
    match name {
        "dram" => "DRAM".to_string(),
        "psys" => "Platform".to_string(),
        _ => {
            let spaced = name.replace(['-', '_'], " ");
            let mut chars = spaced.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => spaced,
            }
        }
    }
}

#[derive(Debug)]
struct RaplDomain {
    zone: String,
    label: String,
    power_path: Option<String>,
    energy_path: Option<String>,
    max_range_uj: Option<f64>,
    tracker: EnergyTracker,
}

pub struct PowercapProvider {
    host: Arc<dyn HostShell>,
    root: String,
}

impl PowercapProvider {
    pub fn new(host: Arc<dyn HostShell>) -> Self {
        Self::with_root(host, POWERCAP_ROOT)
    }

    pub fn with_root<S: Into<String>>(host: Arc<dyn HostShell>, root: S) -> Self {
        Self {
            host,
            root: root.into(),
        }
    }

    async fn zones(&self) -> Result<Vec<String>, ProviderError> {
        let mut zones: Vec<String> = list_dir(self.host.as_ref(), &self.root)
            .await?
            .into_iter()
            .filter(|entry| ZONE_DIR.is_match(entry))
            .collect();
        zones.sort_by(|a, b| natural_cmp(a, b));
        Ok(zones)
    }

    async fn read_text(&self, path: &str, denied: &mut Vec<ProviderError>) -> Option<String> {
        match self.host.read(path, false).await {
            Ok(contents) => contents
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
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

    /// Build a domain per readable zone. Zones and attributes the host
    /// refuses are returned as errors next to the domains that did work.
    async fn discover(&self) -> Result<(Vec<RaplDomain>, Vec<ProviderError>), ProviderError> {
        let mut domains: Vec<RaplDomain> = Vec::new();
        let mut denied = Vec::new();

        for zone in self.zones().await? {
            let zone_path = format!("{}/{}", self.root, zone);
            let files = match list_dir(self.host.as_ref(), &zone_path).await {
                Ok(files) => files,
                Err(e) if e.is_permission_denied() => {
                    denied.push(e);
                    continue;
                }
                Err(e) => {
                    log::debug!("Skipping powercap zone {}: {}", zone, e);
                    continue;
                }
            };
            let has = |file: &str| files.iter().any(|f| f == file);
            let path = |file: &str| format!("{}/{}", zone_path, file);

            let name = self
                .read_text(&path("name"), &mut denied)
                .await
                .unwrap_or_else(|| zone.clone());
            let mut label = prettify_zone_name(&name);

            // intel-rapl:0:1 is a subzone of intel-rapl:0
            if let Some((parent, _)) = zone.rsplit_once(':') {
                if let Some(parent) = domains.iter().find(|d| d.zone == parent) {
                    label = format!("{} {}", parent.label, label);
                }
            }

            let max_range_uj = match has("max_energy_range_uj") {
                true => self
                    .read_text(&path("max_energy_range_uj"), &mut denied)
                    .await
                    .as_deref()
                    .and_then(parse_number)
                    .filter(|v| *v > 0.0),
                false => None,
            };

            domains.push(RaplDomain {
                zone: zone.clone(),
                label,
                power_path: has("power_uw").then(|| path("power_uw")),
                energy_path: has("energy_uj").then(|| path("energy_uj")),
                max_range_uj,
                tracker: EnergyTracker::default(),
            });
        }

        Ok((domains, denied))
    }
}

struct PowercapPoller {
    provider: Arc<PowercapProvider>,
    domains: Option<Vec<RaplDomain>>,
    started: Instant,
    reported_denied: bool,
}

impl PowercapPoller {
    /// Read one domain. `Ok(None)` means no value yet (first energy sample).
    async fn read_watts(
        host: &dyn HostShell,
        domain: &mut RaplDomain,
        at_secs: f64,
    ) -> Result<Option<f64>, ProviderError> {
        if let Some(path) = &domain.power_path {
            let contents = host
                .read(path, true)
                .await
                .map_err(|e| ProviderError::from_command(path, e))?;
            return Ok(contents
                .as_deref()
                .and_then(parse_number)
                .map(|uw| uw / 1_000_000.0));
        }

        let Some(path) = &domain.energy_path else {
            return Ok(None);
        };
        let contents = host
            .read(path, true)
            .await
            .map_err(|e| ProviderError::from_command(path, e))?;
        let Some(energy) = contents.as_deref().and_then(parse_number) else {
            domain.tracker.reset();
            return Ok(None);
        };
        Ok(domain.tracker.update(energy, at_secs, domain.max_range_uj))
    }
}

#[async_trait]
impl Poller for PowercapPoller {
    async fn poll(&mut self, ctx: &ProviderContext) -> Option<Vec<SensorSample>> {
        if self.domains.is_none() {
            match self.provider.discover().await {
                Ok((domains, denied)) => {
                    self.domains = Some(domains);
                    if let Some(first) = denied.into_iter().next() {
                        self.reported_denied = true;
                        ctx.report(NAME, first);
                    }
                }
                Err(e) => {
                    ctx.report(NAME, e);
                    return Some(Vec::new());
                }
            }
        }

        let host = Arc::clone(&self.provider.host);
        let at_secs = self.started.elapsed().as_secs_f64();
        let mut samples = Vec::new();

        for domain in self.domains.iter_mut().flatten() {
            match Self::read_watts(host.as_ref(), domain, at_secs).await {
                Ok(Some(watts)) => {
                    let mut sample = SensorSample::new(
                        SensorKind::Power,
                        format!("{}:power", domain.zone),
                        domain.label.clone(),
                        watts,
                    );
                    sample.unit = Some("W".to_string());
                    sample.chip_id = Some("rapl".to_string());
                    sample.chip_name = Some("powercap".to_string());
                    sample.chip_label = Some("RAPL".to_string());
                    sample.category = Some(SensorCategory::Power);
                    samples.push(sample);
                }
                Ok(None) => {}
                Err(e) if e.is_permission_denied() => {
                    if !self.reported_denied {
                        self.reported_denied = true;
                        ctx.report(NAME, e);
                    }
                }
                Err(e) => ctx.report(NAME, e),
            }
        }
        Some(samples)
    }
}

#[async_trait]
impl SensorProvider for PowercapProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn is_available(&self) -> Result<bool, ProviderError> {
        match self.zones().await {
            Ok(zones) => Ok(!zones.is_empty()),
            Err(e) => probe_result(e),
        }
    }

    fn start(self: Arc<Self>, on_change: SampleCallback, ctx: ProviderContext) -> Subscription {
        start_polling(
            NAME,
            PowercapPoller {
                provider: self,
                domains: None,
                started: Instant::now(),
                reported_denied: false,
            },
            DEFAULT_INTERVAL,
            on_change,
            ctx,
        )
    }
}
