//! Data-source providers.
//!
//! Every backend implements [`SensorProvider`]. Whether it is driven by file
//! watches or by a timer, a provider always reports the complete current
//! sample set through its `on_change` callback.

pub mod error;
pub mod hwmon;
pub mod lm_sensors;
pub mod nvme;
pub mod powercap;
pub mod smartctl;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use super::model::{SensorKind, SensorSample};
use crate::platform::host::{CommandRunner, HostShell};

pub use error::{classify_command_error, ErrorCode, ProviderError};
pub use hwmon::HwmonProvider;
pub use lm_sensors::LmSensorsProvider;
pub use nvme::NvmeProvider;
pub use powercap::PowercapProvider;
pub use smartctl::SmartctlProvider;

/// No provider polls or watches faster than this.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(500);

/// Receives the full sample set every time a provider has new data.
pub type SampleCallback = Arc<dyn Fn(Vec<SensorSample>) + Send + Sync>;

/// Receives non-fatal provider errors.
pub type ErrorCallback = Arc<dyn Fn(ProviderError) + Send + Sync>;

/// Options passed to [`SensorProvider::start`].
#[derive(Clone, Default)]
pub struct ProviderContext {
    pub refresh_interval: Option<Duration>,
    pub on_error: Option<ErrorCallback>,
}

impl ProviderContext {
    pub fn with_interval(refresh_interval: Duration) -> Self {
        Self {
            refresh_interval: Some(refresh_interval),
            on_error: None,
        }
    }

    /// The refresh period to use, falling back to a backend default and
    /// never going below [`MIN_REFRESH_INTERVAL`].
    pub fn interval_or(&self, default: Duration) -> Duration {
        self.refresh_interval.unwrap_or(default).max(MIN_REFRESH_INTERVAL)
    }

    pub fn report(&self, provider: &str, err: ProviderError) {
        log::warn!("{}: {}", provider, err);
        if let Some(on_error) = &self.on_error {
            on_error(err);
        }
    }
}

/// Handle returned by [`SensorProvider::start`].
///
/// `unsubscribe` aborts every task the provider spawned and suppresses any
/// callback still in flight. It may be called any number of times;
/// dropping the handle has the same effect.
pub struct Subscription {
    stopped: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Subscription {
    pub fn new() -> Self {
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Wrap a sample callback so it is silenced once unsubscribed.
    pub fn gate(&self, on_change: SampleCallback) -> SampleCallback {
        let stopped = Arc::clone(&self.stopped);
        Arc::new(move |samples| {
            if !stopped.load(Ordering::SeqCst) {
                on_change(samples);
            }
        })
    }

    /// Same as [`Subscription::gate`] for the context's error callback.
    pub fn gate_context(&self, ctx: ProviderContext) -> ProviderContext {
        let stopped = Arc::clone(&self.stopped);
        let on_error = ctx.on_error.map(|on_error| {
            Arc::new(move |err: ProviderError| {
                if !stopped.load(Ordering::SeqCst) {
                    on_error(err);
                }
            }) as ErrorCallback
        });
        ProviderContext {
            refresh_interval: ctx.refresh_interval,
            on_error,
        }
    }

    pub fn attach(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        if self.stopped.load(Ordering::SeqCst) {
            handle.abort();
        } else {
            tasks.push(handle);
        }
    }

    pub fn unsubscribe(&self) {
        let mut tasks = self.tasks.lock();
        self.stopped.store(true, Ordering::SeqCst);
        for handle in tasks.drain(..) {
            handle.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }
}

impl Default for Subscription {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Contract every data-source backend implements.
#[async_trait]
pub trait SensorProvider: Send + Sync {
    /// Stable provider name, also used as the precedence key.
    fn name(&self) -> &'static str;

    /// Cheap probe deciding whether this backend applies to the host.
    ///
    /// A missing tool resolves to `Ok(false)`. Permission problems are
    /// returned as errors so the caller can ask for elevated rights.
    async fn is_available(&self) -> Result<bool, ProviderError>;

    /// Begin delivering full snapshots to `on_change`.
    fn start(self: Arc<Self>, on_change: SampleCallback, ctx: ProviderContext) -> Subscription;
}

/// One round of a timer-driven provider.
#[async_trait]
pub(crate) trait Poller: Send + 'static {
    /// Collect the current samples. `None` skips this tick's emission.
    async fn poll(&mut self, ctx: &ProviderContext) -> Option<Vec<SensorSample>>;
}

/// Start a timer-driven provider: poll immediately, then on every tick.
pub(crate) fn start_polling<P: Poller>(
    name: &'static str,
    poller: P,
    default_interval: Duration,
    on_change: SampleCallback,
    ctx: ProviderContext,
) -> Subscription {
    let subscription = Subscription::new();
    let on_change = subscription.gate(on_change);
    let ctx = subscription.gate_context(ctx);
    let period = ctx.interval_or(default_interval);

    let handle = tokio::spawn(async move {
        let mut poller = poller;
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        log::debug!("{} polling every {:?}", name, period);

        loop {
            ticker.tick().await;
            if let Some(samples) = poller.poll(&ctx).await {
                log::trace!("{} produced {} samples", name, samples.len());
                on_change(samples);
            }
        }
    });
    subscription.attach(handle);
    subscription
}

/// Ordered provider tiers.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    pub primary: Vec<Arc<dyn SensorProvider>>,
    pub auxiliary: Vec<Arc<dyn SensorProvider>>,
}

impl ProviderRegistry {
    pub fn new(primary: Vec<Arc<dyn SensorProvider>>, auxiliary: Vec<Arc<dyn SensorProvider>>) -> Self {
        Self { primary, auxiliary }
    }

    /// The standard Linux backends: kernel hwmon ahead of lm-sensors, then
    /// the power and drive tools.
    pub fn linux_defaults(host: Arc<dyn HostShell>) -> Self {
        let primary: Vec<Arc<dyn SensorProvider>> = vec![
            Arc::new(HwmonProvider::new(Arc::clone(&host))),
            Arc::new(LmSensorsProvider::new(Arc::clone(&host))),
        ];
        let auxiliary: Vec<Arc<dyn SensorProvider>> = vec![
            Arc::new(PowercapProvider::new(Arc::clone(&host))),
            Arc::new(NvmeProvider::new(Arc::clone(&host))),
            Arc::new(SmartctlProvider::new(host)),
        ];
        Self::new(primary, auxiliary)
    }

    /// Remove providers by name.
    pub fn without(mut self, disabled: &[String]) -> Self {
        self.primary.retain(|p| !disabled.iter().any(|d| d == p.name()));
        self.auxiliary.retain(|p| !disabled.iter().any(|d| d == p.name()));
        self
    }

    /// Provider names in dedupe precedence order.
    pub fn precedence(&self) -> Vec<&'static str> {
        self.primary
            .iter()
            .chain(self.auxiliary.iter())
            .map(|p| p.name())
            .collect()
    }
}

/// Map a hwmon/lm-sensors attribute prefix to a kind, display unit and the
/// divisor that turns the sysfs integer into that unit.
pub(crate) fn attribute_info(prefix: &str) -> (SensorKind, Option<&'static str>, f64) {
    match prefix {
        "temp" => (SensorKind::Temperature, Some("°C"), 1000.0),
        "fan" => (SensorKind::Fan, Some("RPM"), 1.0),
        "in" => (SensorKind::Voltage, Some("V"), 1000.0),
        "power" => (SensorKind::Power, Some("W"), 1_000_000.0),
        "curr" => (SensorKind::Other, Some("A"), 1000.0),
        "humidity" => (SensorKind::Other, Some("%"), 1000.0),
        "energy" => (SensorKind::Other, Some("J"), 1_000_000.0),
        _ => (SensorKind::Other, None, 1.0),
    }
}

/// Split `temp1` into (`temp`, `1`).
pub(crate) fn split_attribute(name: &str) -> (&str, &str) {
    let idx = name
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(name.len());
    name.split_at(idx)
}

/// List a directory through the host (`ls -1`).
pub(crate) async fn list_dir(host: &dyn HostShell, path: &str) -> Result<Vec<String>, ProviderError> {
    let output = host
        .run(&["ls", "-1", path], false)
        .await
        .map_err(|e| ProviderError::from_command(&format!("ls {}", path), e))?;

    Ok(output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Run a JSON-emitting command and parse its output.
pub(crate) async fn run_json(
    host: &dyn HostShell,
    argv: &[&str],
    superuser: bool,
) -> Result<Value, ProviderError> {
    let context = argv.join(" ");
    let output = host
        .run(argv, superuser)
        .await
        .map_err(|e| ProviderError::from_command(&context, e))?;
    serde_json::from_str(&output).map_err(|e| ProviderError::parse(&context, e))
}

/// Resolve an availability probe error: missing tools mean "not here",
/// everything else goes back to the caller.
pub(crate) fn probe_result(err: ProviderError) -> Result<bool, ProviderError> {
    if err.is_unavailable() {
        log::debug!("{}", err);
        Ok(false)
    } else {
        Err(err)
    }
}

/// Parse a trimmed number, rejecting NaN and infinities.
pub(crate) fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

pub(crate) fn json_number(value: &Value) -> Option<f64> {
    value.as_f64().filter(|v| v.is_finite())
}
