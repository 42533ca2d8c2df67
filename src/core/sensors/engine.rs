//! Aggregation engine.
//!
//! Providers run as independent tasks and report through callbacks that
//! forward into one channel. A single orchestrator task owns the merged
//! state, applies every event in arrival order and publishes an
//! [`EngineSnapshot`] on a watch channel after each one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::aggregate::aggregate;
use super::model::{SensorData, SensorSample};
use super::providers::{
    ErrorCallback, ErrorCode, ProviderContext, ProviderError, ProviderRegistry, SampleCallback,
    SensorProvider, Subscription,
};
use super::status::{PrimaryPhase, Status, StatusEvent};

/// Engine settings.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Overrides every provider's own polling period when set.
    pub refresh_interval: Option<Duration>,
}

/// Everything the presentation layer needs after an update.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineSnapshot {
    pub data: SensorData,
    pub status: Status,
    pub active_provider: Option<String>,
    pub available_providers: Vec<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Primary,
    Auxiliary,
}

#[derive(Debug)]
enum ProviderEvent {
    Samples {
        provider: &'static str,
        samples: Vec<SensorSample>,
    },
    Failure {
        provider: &'static str,
        tier: Tier,
        during_probe: bool,
        error: ProviderError,
    },
    Available(&'static str),
    PrimaryStarted(&'static str),
    PrimaryExhausted,
}

/// An event stamped with the session that produced it.
#[derive(Debug)]
struct Envelope {
    generation: u64,
    event: ProviderEvent,
}

#[derive(Debug)]
enum Control {
    Retry,
    Shutdown,
}

/// Sends events for one session; goes quiet once the session is cancelled.
#[derive(Clone)]
struct Emitter {
    generation: u64,
    tx: mpsc::UnboundedSender<Envelope>,
    cancelled: Arc<AtomicBool>,
}

impl Emitter {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn emit(&self, event: ProviderEvent) {
        if self.is_cancelled() {
            return;
        }
        let _ = self.tx.send(Envelope {
            generation: self.generation,
            event,
        });
    }
}

/// Provider subscriptions and probe tasks belonging to one session.
struct Session {
    emitter: Emitter,
    refresh_interval: Option<Duration>,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
    probes: Vec<JoinHandle<()>>,
}

impl Session {
    fn start(registry: &ProviderRegistry, emitter: Emitter, refresh_interval: Option<Duration>) -> Self {
        let mut session = Self {
            emitter,
            refresh_interval,
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            probes: Vec::new(),
        };

        let primary = registry.primary.clone();
        let starter = session.starter();
        session
            .probes
            .push(tokio::spawn(async move { starter.run_primary_chain(primary).await }));

        for provider in &registry.auxiliary {
            let provider = Arc::clone(provider);
            let starter = session.starter();
            session
                .probes
                .push(tokio::spawn(async move { starter.run_auxiliary(provider).await }));
        }

        session
    }

    fn starter(&self) -> Starter {
        Starter {
            emitter: self.emitter.clone(),
            refresh_interval: self.refresh_interval,
            subscriptions: Arc::clone(&self.subscriptions),
        }
    }

    fn teardown(self) {
        self.emitter.cancelled.store(true, Ordering::SeqCst);
        for probe in &self.probes {
            probe.abort();
        }
        let subscriptions: Vec<Subscription> = self.subscriptions.lock().drain(..).collect();
        for subscription in &subscriptions {
            subscription.unsubscribe();
        }
        log::debug!(
            "Session {} torn down ({} subscriptions)",
            self.emitter.generation,
            subscriptions.len()
        );
    }
}

/// Probes providers and starts the ones that apply.
struct Starter {
    emitter: Emitter,
    refresh_interval: Option<Duration>,
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
}

impl Starter {
    /// Commit to the first available primary provider.
    async fn run_primary_chain(self, candidates: Vec<Arc<dyn SensorProvider>>) {
        for provider in candidates {
            if self.emitter.is_cancelled() {
                return;
            }
            let name = provider.name();
            match provider.is_available().await {
                Ok(true) => {
                    self.emitter.emit(ProviderEvent::Available(name));
                    self.emitter.emit(ProviderEvent::PrimaryStarted(name));
                    self.launch(provider, Tier::Primary);
                    return;
                }
                Ok(false) => log::debug!("Primary provider {} is not available", name),
                Err(error) => {
                    let denied = error.is_permission_denied();
                    self.emitter.emit(ProviderEvent::Failure {
                        provider: name,
                        tier: Tier::Primary,
                        during_probe: true,
                        error,
                    });
                    if denied {
                        return;
                    }
                }
            }
        }
        self.emitter.emit(ProviderEvent::PrimaryExhausted);
    }

    async fn run_auxiliary(self, provider: Arc<dyn SensorProvider>) {
        let name = provider.name();
        match provider.is_available().await {
            Ok(true) => {
                self.emitter.emit(ProviderEvent::Available(name));
                self.launch(provider, Tier::Auxiliary);
            }
            Ok(false) => log::debug!("Auxiliary provider {} is not available", name),
            Err(error) => self.emitter.emit(ProviderEvent::Failure {
                provider: name,
                tier: Tier::Auxiliary,
                during_probe: true,
                error,
            }),
        }
    }

    fn launch(&self, provider: Arc<dyn SensorProvider>, tier: Tier) {
        let name = provider.name();

        let emitter = self.emitter.clone();
        let on_change: SampleCallback = Arc::new(move |samples| {
            emitter.emit(ProviderEvent::Samples {
                provider: name,
                samples,
            })
        });

        let emitter = self.emitter.clone();
        let on_error: ErrorCallback = Arc::new(move |error| {
            emitter.emit(ProviderEvent::Failure {
                provider: name,
                tier,
                during_probe: false,
                error,
            })
        });

        let ctx = ProviderContext {
            refresh_interval: self.refresh_interval,
            on_error: Some(on_error),
        };
        let subscription = provider.start(on_change, ctx);

        let mut subscriptions = self.subscriptions.lock();
        if self.emitter.is_cancelled() {
            subscription.unsubscribe();
        } else {
            log::debug!("Started provider {}", name);
            subscriptions.push(subscription);
        }
    }
}

/// Merged state of one session. Replaced wholesale on retry.
#[derive(Default)]
struct SessionState {
    samples: HashMap<&'static str, Vec<SensorSample>>,
    data: SensorData,
    status: Status,
    primary: Option<PrimaryPhase>,
    active_provider: Option<&'static str>,
    available: Vec<&'static str>,
    last_error: Option<String>,
}

impl SessionState {
    fn primary_phase(&self) -> PrimaryPhase {
        self.primary.unwrap_or(PrimaryPhase::Pending)
    }

    fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            data: self.data.clone(),
            status: self.status,
            active_provider: self.active_provider.map(str::to_string),
            available_providers: self.available.iter().map(|s| s.to_string()).collect(),
            last_error: self.last_error.clone(),
        }
    }
}

struct Orchestrator {
    registry: ProviderRegistry,
    precedence: Vec<&'static str>,
    config: EngineConfig,
    events_tx: mpsc::UnboundedSender<Envelope>,
    snapshot_tx: watch::Sender<Arc<EngineSnapshot>>,
    generation: u64,
    session: Option<Session>,
    state: SessionState,
}

impl Orchestrator {
    fn begin_session(&mut self) {
        self.generation += 1;
        let emitter = Emitter {
            generation: self.generation,
            tx: self.events_tx.clone(),
            cancelled: Arc::new(AtomicBool::new(false)),
        };
        log::debug!("Starting sensor session {}", self.generation);
        self.session = Some(Session::start(
            &self.registry,
            emitter,
            self.config.refresh_interval,
        ));
    }

    fn end_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.teardown();
        }
    }

    fn retry(&mut self) {
        log::info!("Restarting sensor collection");
        self.end_session();
        let status = self.state.status.next(StatusEvent::Retry);
        self.state = SessionState {
            status,
            ..SessionState::default()
        };
        self.publish();
        self.begin_session();
    }

    fn set_status(&mut self, event: StatusEvent) {
        let next = self.state.status.next(event);
        if next != self.state.status {
            log::info!("Sensor status {} -> {}", self.state.status, next);
            self.state.status = next;
        }
    }

    fn rebuild(&mut self) {
        let timestamp = chrono::Utc::now().timestamp_millis();
        self.state.data = aggregate(&self.state.samples, &self.precedence, Some(timestamp));
    }

    fn apply(&mut self, envelope: Envelope) {
        if envelope.generation != self.generation {
            log::trace!("Dropping event from stale session {}", envelope.generation);
            return;
        }

        match envelope.event {
            ProviderEvent::Samples { provider, samples } => {
                log::trace!("{} delivered {} samples", provider, samples.len());
                self.state.samples.insert(provider, samples);
                self.rebuild();
                let total = self.state.data.reading_count();
                self.set_status(StatusEvent::Samples {
                    total,
                    primary: self.state.primary_phase(),
                });
            }
            ProviderEvent::Failure {
                provider,
                tier,
                during_probe,
                error,
            } => {
                match error.code {
                    ErrorCode::Unavailable => {
                        log::debug!("{} unavailable: {}", provider, error.message);
                        return;
                    }
                    ErrorCode::PermissionDenied => {
                        log::warn!("{} needs elevated privileges: {}", provider, error.message);
                        self.set_status(StatusEvent::PermissionDenied);
                    }
                    ErrorCode::Unexpected => {
                        log::warn!("{} failed: {}", provider, error);
                        // Probe failures fall through to the next candidate.
                        if tier == Tier::Primary && !during_probe {
                            self.set_status(StatusEvent::PrimaryUnexpected);
                        }
                    }
                }
                self.state.last_error = Some(format!("{}: {}", provider, error.message));
            }
            ProviderEvent::Available(provider) => {
                if !self.state.available.contains(&provider) {
                    self.state.available.push(provider);
                }
            }
            ProviderEvent::PrimaryStarted(provider) => {
                log::info!("Using {} as primary sensor source", provider);
                self.state.active_provider = Some(provider);
                self.state.primary = Some(PrimaryPhase::Active);
            }
            ProviderEvent::PrimaryExhausted => {
                log::info!("No primary sensor source available");
                self.state.primary = Some(PrimaryPhase::Missing);
                let total = self.state.data.reading_count();
                self.set_status(StatusEvent::NoPrimary { total });
            }
        }

        self.publish();
    }

    fn publish(&self) {
        // Only fails without receivers.
        let _ = self.snapshot_tx.send(Arc::new(self.state.snapshot()));
    }

    async fn run(
        mut self,
        mut events_rx: mpsc::UnboundedReceiver<Envelope>,
        mut control_rx: mpsc::UnboundedReceiver<Control>,
    ) {
        self.publish();
        self.begin_session();

        loop {
            tokio::select! {
                control = control_rx.recv() => match control {
                    Some(Control::Retry) => self.retry(),
                    Some(Control::Shutdown) | None => break,
                },
                Some(envelope) = events_rx.recv() => self.apply(envelope),
            }
        }

        self.end_session();
        log::debug!("Sensor orchestrator stopped");
    }
}

/// Builder for a running engine.
pub struct SensorEngine {
    registry: ProviderRegistry,
    config: EngineConfig,
}

impl SensorEngine {
    pub fn new(registry: ProviderRegistry, config: EngineConfig) -> Self {
        Self { registry, config }
    }

    /// Spawn the orchestrator on the current tokio runtime.
    pub fn spawn(self) -> EngineHandle {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(EngineSnapshot::default()));

        let orchestrator = Orchestrator {
            precedence: self.registry.precedence(),
            registry: self.registry,
            config: self.config,
            events_tx,
            snapshot_tx,
            generation: 0,
            session: None,
            state: SessionState::default(),
        };
        let task = tokio::spawn(orchestrator.run(events_rx, control_rx));

        EngineHandle {
            snapshot_rx,
            control_tx,
            task,
        }
    }
}

/// Control surface of a running engine.
pub struct EngineHandle {
    snapshot_rx: watch::Receiver<Arc<EngineSnapshot>>,
    control_tx: mpsc::UnboundedSender<Control>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    pub fn subscribe(&self) -> watch::Receiver<Arc<EngineSnapshot>> {
        self.snapshot_rx.clone()
    }

    pub fn snapshot(&self) -> Arc<EngineSnapshot> {
        Arc::clone(&self.snapshot_rx.borrow())
    }

    /// Tear down every provider and start collection from scratch.
    pub fn retry(&self) {
        let _ = self.control_tx.send(Control::Retry);
    }

    /// Stop every provider and wait for the orchestrator to exit.
    pub async fn shutdown(self) {
        let _ = self.control_tx.send(Control::Shutdown);
        if let Err(e) = self.task.await {
            log::warn!("Sensor orchestrator ended abnormally: {}", e);
        }
    }
}
