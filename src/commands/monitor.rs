//! Live sensor monitor.

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ArgMatches;
use colored::Colorize;
use crossterm::{cursor, execute, terminal};

use crate::core::config::{Config, REFRESH_INTERVAL_CHOICES};
use crate::core::sensors::engine::{EngineConfig, EngineSnapshot};
use crate::core::sensors::history::HistoryStore;
use crate::core::sensors::providers::ProviderRegistry;
use crate::core::sensors::runtime::SensorRuntime;
use crate::core::sensors::status::Status;
use crate::core::sensors::units::TemperatureUnit;
use crate::platform::{elevate_and_rerun, is_elevated, HostShell, LocalHost};
use crate::ui::table::{render_table, status_banner, table_header};

/// How long `--once` waits for the first settled snapshot.
const ONCE_TIMEOUT: Duration = Duration::from_secs(20);
/// Extra time given to slower providers after the first result.
const SETTLE_DELAY: Duration = Duration::from_millis(1500);

pub struct MonitorOptions {
    pub refresh_interval: Duration,
    pub unit: TemperatureUnit,
    pub json: bool,
    pub once: bool,
    pub history_capacity: usize,
}

/// Build the provider registry and engine settings from the user config.
pub fn build_runtime(config: &Config, refresh_interval: Duration) -> Result<SensorRuntime> {
    let host: Arc<dyn HostShell> = Arc::new(LocalHost::new(config.command_timeout()));
    let registry = ProviderRegistry::linux_defaults(host).without(&config.disabled_providers);
    let engine_config = EngineConfig {
        refresh_interval: Some(refresh_interval),
    };
    SensorRuntime::new(registry, engine_config).context("Failed to start sensor engine")
}

pub fn execute(matches: &ArgMatches) -> Result<()> {
    if matches.get_flag("sudo") && !is_elevated() {
        if !elevate_and_rerun()? {
            anyhow::bail!("The elevated monitor did not complete successfully");
        }
        return Ok(());
    }

    let config = Config::load()?;

    let refresh_interval = match matches.get_one::<u64>("interval") {
        Some(secs) if REFRESH_INTERVAL_CHOICES.contains(secs) => Duration::from_secs(*secs),
        Some(secs) => anyhow::bail!(
            "Interval must be one of {:?} seconds, got {}",
            REFRESH_INTERVAL_CHOICES,
            secs
        ),
        None => config.refresh_interval(),
    };

    let unit = if matches.get_flag("fahrenheit") {
        TemperatureUnit::Fahrenheit
    } else {
        config.temperature_unit
    };

    let options = MonitorOptions {
        refresh_interval,
        unit,
        json: matches.get_flag("json"),
        once: matches.get_flag("once"),
        history_capacity: config.history_capacity,
    };

    let runtime = build_runtime(&config, refresh_interval)?;
    let result = if options.once {
        runtime.block_on(print_once(&runtime, &options))
    } else {
        runtime.block_on(run_live(&runtime, &options))
    };
    runtime.shutdown();
    result
}

/// Wait until the engine leaves `Loading`, give the other providers a
/// moment, then return the latest snapshot.
pub async fn settled_snapshot(runtime: &SensorRuntime, timeout: Duration) -> Arc<EngineSnapshot> {
    let mut rx = runtime.snapshot_rx.clone();
    let settled = tokio::time::timeout(timeout, rx.wait_for(|s| s.status != Status::Loading))
        .await
        .is_ok();
    if settled {
        tokio::time::sleep(SETTLE_DELAY).await;
    }
    runtime.snapshot()
}

async fn print_once(runtime: &SensorRuntime, options: &MonitorOptions) -> Result<()> {
    let snapshot = settled_snapshot(runtime, ONCE_TIMEOUT).await;

    if options.json {
        println!("{}", serde_json::to_string_pretty(snapshot.as_ref())?);
    } else {
        let mut history = HistoryStore::with_capacity(options.history_capacity);
        history.record(&snapshot.data, chrono::Utc::now().timestamp_millis());
        print_snapshot(&snapshot, &history, options);
    }

    if snapshot.status.is_terminal_failure() && snapshot.data.is_empty() {
        anyhow::bail!("No sensor data ({})", snapshot.status);
    }
    Ok(())
}

async fn run_live(runtime: &SensorRuntime, options: &MonitorOptions) -> Result<()> {
    let mut history = HistoryStore::with_capacity(options.history_capacity);
    let mut ticker = tokio::time::interval(options.refresh_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut hangup = Hangup::new().context("Failed to install SIGHUP handler")?;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = hangup.recv() => {
                log::info!("SIGHUP received, rescanning sensors");
                runtime.retry();
                continue;
            }
            _ = tokio::signal::ctrl_c() => break,
        }

        let snapshot = runtime.snapshot();
        history.record_update(&snapshot.data, chrono::Utc::now().timestamp_millis());

        if options.json {
            println!("{}", serde_json::to_string(snapshot.as_ref())?);
            continue;
        }

        let mut stdout = io::stdout();
        execute!(stdout, terminal::Clear(terminal::ClearType::All), cursor::MoveTo(0, 0))?;
        print_snapshot(&snapshot, &history, options);
        println!("{}", "Press Ctrl-C to exit, send SIGHUP to rescan".dimmed());
        stdout.flush()?;
    }

    Ok(())
}

/// SIGHUP restarts sensor discovery.
#[cfg(unix)]
struct Hangup(tokio::signal::unix::Signal);

#[cfg(unix)]
impl Hangup {
    fn new() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self(signal(SignalKind::hangup())?))
    }

    async fn recv(&mut self) {
        if self.0.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
struct Hangup;

#[cfg(not(unix))]
impl Hangup {
    fn new() -> io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) {
        std::future::pending::<()>().await;
    }
}

fn print_snapshot(snapshot: &EngineSnapshot, history: &HistoryStore, options: &MonitorOptions) {
    let source = snapshot.active_provider.as_deref().unwrap_or("none");
    println!(
        "{} {}  {} {}  {} {}",
        "Status:".bold(),
        snapshot.status.to_string().bright_white(),
        "Source:".bold(),
        source.bright_white(),
        "Providers:".bold(),
        snapshot.available_providers.join(", ").dimmed()
    );
    if let Some(banner) = status_banner(snapshot) {
        println!("\n{}", banner);
    }
    if snapshot.data.is_empty() {
        return;
    }

    println!("\n{}", table_header());
    print!("{}", render_table(&snapshot.data, history, options.unit));
}
