//! Scripted host and hand-driven providers shared by the integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use hwsense::core::sensors::engine::EngineSnapshot;
use hwsense::core::sensors::model::{SensorKind, SensorSample};
use hwsense::core::sensors::providers::{
    ErrorCallback, ProviderContext, ProviderError, SampleCallback, SensorProvider, Subscription,
};
use hwsense::platform::{CommandError, CommandRunner, FileAccess, FileWatch, WatchCallback};

/// Host whose command output and file contents are set by the test.
#[derive(Default)]
pub struct FakeHost {
    commands: Mutex<HashMap<String, Result<String, CommandError>>>,
    files: Mutex<HashMap<String, String>>,
    read_errors: Mutex<HashMap<String, CommandError>>,
    watches: Mutex<HashMap<String, Vec<WatchCallback>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn command(&self, argv: &str, result: Result<String, CommandError>) {
        self.commands.lock().insert(argv.to_string(), result);
    }

    pub fn file(&self, path: &str, contents: &str) {
        self.files.lock().insert(path.to_string(), contents.to_string());
    }

    /// Make every read of `path` fail with `err`.
    pub fn fail_read(&self, path: &str, err: CommandError) {
        self.read_errors.lock().insert(path.to_string(), err);
    }

    /// Simulate a watched file changing.
    pub fn fire(&self, path: &str, contents: Option<&str>) {
        if let Some(contents) = contents {
            self.file(path, contents);
        }
        let callbacks = self.watches.lock().get(path).cloned().unwrap_or_default();
        for callback in callbacks {
            callback(contents.map(str::to_string));
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn was_called(&self, argv: &str) -> bool {
        self.calls.lock().iter().any(|c| c == argv)
    }
}

#[async_trait]
impl CommandRunner for FakeHost {
    async fn run(&self, argv: &[&str], _superuser: bool) -> Result<String, CommandError> {
        let key = argv.join(" ");
        self.calls.lock().push(key.clone());
        self.commands
            .lock()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Err(CommandError::not_found(format!("{}: command not found", argv[0]))))
    }
}

#[async_trait]
impl FileAccess for FakeHost {
    async fn read(&self, path: &str, _superuser: bool) -> Result<Option<String>, CommandError> {
        if let Some(err) = self.read_errors.lock().get(path) {
            return Err(err.clone());
        }
        Ok(self.files.lock().get(path).cloned())
    }

    fn watch(&self, path: &str, _interval: Duration, callback: WatchCallback) -> FileWatch {
        let watch = FileWatch::new();
        self.watches
            .lock()
            .entry(path.to_string())
            .or_default()
            .push(watch.gate(callback));
        watch
    }
}

/// Collects every `on_change` emission into a channel.
pub fn sample_sink() -> (SampleCallback, mpsc::UnboundedReceiver<Vec<SensorSample>>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: SampleCallback = Arc::new(move |samples: Vec<SensorSample>| {
        let _ = tx.send(samples);
    });
    (callback, rx)
}

/// Collects every reported error into a channel.
pub fn error_sink() -> (ErrorCallback, mpsc::UnboundedReceiver<ProviderError>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: ErrorCallback = Arc::new(move |err: ProviderError| {
        let _ = tx.send(err);
    });
    (callback, rx)
}

pub async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(30), rx.recv())
        .await
        .expect("timed out waiting for emission")
        .expect("channel closed")
}

pub fn temperature(id: &str, value: f64) -> SensorSample {
    let mut sample = SensorSample::new(SensorKind::Temperature, id, id, value);
    sample.chip_id = Some("chip0".to_string());
    sample.unit = Some("°C".to_string());
    sample
}

/// How a [`ManualProvider`] answers its availability probe.
#[derive(Clone)]
pub enum Probe {
    Available,
    Missing,
    Fails(fn() -> ProviderError),
}

struct Started {
    on_change: SampleCallback,
    on_error: Option<ErrorCallback>,
}

/// Provider driven entirely by the test.
pub struct ManualProvider {
    name: &'static str,
    probe: Probe,
    starts: AtomicUsize,
    current: Mutex<Option<Started>>,
}

impl ManualProvider {
    pub fn new(name: &'static str, probe: Probe) -> Arc<Self> {
        Arc::new(Self {
            name,
            probe,
            starts: AtomicUsize::new(0),
            current: Mutex::new(None),
        })
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Wait until `start` has been called `count` times.
    pub async fn wait_started(&self, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while self.starts() < count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "{} was never started",
                self.name
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// The callback of the current subscription, for replaying it later.
    pub fn on_change(&self) -> SampleCallback {
        let current = self.current.lock();
        Arc::clone(&current.as_ref().expect("provider not started").on_change)
    }

    pub fn emit(&self, samples: Vec<SensorSample>) {
        (self.on_change())(samples);
    }

    pub fn fail(&self, err: ProviderError) {
        let on_error = self
            .current
            .lock()
            .as_ref()
            .and_then(|started| started.on_error.clone())
            .expect("provider started without an error callback");
        on_error(err);
    }
}

#[async_trait]
impl SensorProvider for ManualProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn is_available(&self) -> Result<bool, ProviderError> {
        match &self.probe {
            Probe::Available => Ok(true),
            Probe::Missing => Ok(false),
            Probe::Fails(make) => Err(make()),
        }
    }

    fn start(self: Arc<Self>, on_change: SampleCallback, ctx: ProviderContext) -> Subscription {
        let subscription = Subscription::new();
        let ctx = subscription.gate_context(ctx);
        *self.current.lock() = Some(Started {
            on_change: subscription.gate(on_change),
            on_error: ctx.on_error,
        });
        self.starts.fetch_add(1, Ordering::SeqCst);
        subscription
    }
}

/// Wait for a snapshot matching `predicate`.
pub async fn wait_for<F>(rx: &mut watch::Receiver<Arc<EngineSnapshot>>, predicate: F) -> Arc<EngineSnapshot>
where
    F: FnMut(&Arc<EngineSnapshot>) -> bool,
{
    let snapshot = tokio::time::timeout(Duration::from_secs(10), rx.wait_for(predicate))
        .await
        .expect("timed out waiting for snapshot")
        .expect("engine stopped");
    Arc::clone(&snapshot)
}
