//! `hwsense export`: collect a short history and write it as CSV.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ArgMatches;
use colored::Colorize;

use super::monitor::{build_runtime, settled_snapshot};
use crate::core::config::Config;
use crate::core::sensors::csv::{build_history_csv, HistorySeries};
use crate::core::sensors::history::{row_key, HistoryStore};
use crate::core::sensors::model::SensorData;
use crate::core::sensors::runtime::SensorRuntime;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(20);

/// One series per table row of `data`, labelled `<chip> <reading>`.
pub fn history_series(data: &SensorData, history: &HistoryStore) -> Vec<HistorySeries> {
    data.groups
        .iter()
        .flat_map(|group| {
            group.readings.iter().map(move |reading| {
                HistorySeries::new(
                    format!("{} {}", group.label, reading.label),
                    history.samples(&row_key(group, reading)),
                )
            })
        })
        .collect()
}

struct Collected {
    data: SensorData,
    history: HistoryStore,
    recorded: usize,
}

async fn collect(runtime: &SensorRuntime, rounds: usize, interval: Duration, capacity: usize) -> Collected {
    let mut history = HistoryStore::with_capacity(capacity.max(rounds));
    let mut latest = settled_snapshot(runtime, STARTUP_TIMEOUT).await;
    let mut recorded = 0;

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    for round in 0..rounds {
        ticker.tick().await;
        latest = runtime.snapshot();
        if history.record_update(&latest.data, chrono::Utc::now().timestamp_millis()) {
            recorded += 1;
            log::debug!("Export round {}/{} recorded", round + 1, rounds);
        } else {
            log::debug!("Export round {}/{} saw no new snapshot", round + 1, rounds);
        }
    }

    Collected {
        data: latest.data.clone(),
        history,
        recorded,
    }
}

pub fn execute(matches: &ArgMatches) -> Result<()> {
    let config = Config::load()?;
    let rounds = matches.get_one::<usize>("samples").copied().unwrap_or(10).max(1);
    let output = matches.get_one::<String>("output").map(PathBuf::from);
    let interval = config.refresh_interval();

    let runtime = build_runtime(&config, interval)?;
    let Collected {
        data,
        history,
        recorded,
    } = runtime.block_on(collect(&runtime, rounds, interval, config.history_capacity));
    let status = runtime.snapshot().status;
    runtime.shutdown();

    if data.is_empty() {
        anyhow::bail!("No sensor readings collected (status: {})", status);
    }

    let csv = build_history_csv(&history_series(&data, &history));
    match output {
        Some(path) => {
            fs::write(&path, csv).with_context(|| format!("Failed to write {:?}", path))?;
            println!(
                "{} {} samples of {} sensors to {}",
                "Exported".green().bold(),
                recorded,
                data.reading_count(),
                path.display()
            );
        }
        None => print!("{}", csv),
    }
    Ok(())
}
