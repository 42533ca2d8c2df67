//! `hwsense providers`: probe every backend and report whether it applies.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::ArgMatches;
use colored::Colorize;
use serde::Serialize;

use crate::core::config::Config;
use crate::core::sensors::providers::{ErrorCode, ProviderRegistry, SensorProvider};
use crate::platform::{HostShell, LocalHost};
use crate::ui::table::fit;

#[derive(Debug, Clone, Serialize)]
pub struct ProviderReport {
    pub name: String,
    pub tier: &'static str,
    pub enabled: bool,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

/// Probe every provider in `registry`, primaries first.
pub async fn probe_all(registry: &ProviderRegistry, disabled: &[String]) -> Vec<ProviderReport> {
    let tiers = registry
        .primary
        .iter()
        .map(|p| ("primary", p))
        .chain(registry.auxiliary.iter().map(|p| ("auxiliary", p)));

    let mut reports = Vec::new();
    for (tier, provider) in tiers {
        reports.push(probe(tier, Arc::clone(provider), disabled).await);
    }
    reports
}

async fn probe(tier: &'static str, provider: Arc<dyn SensorProvider>, disabled: &[String]) -> ProviderReport {
    let name = provider.name().to_string();
    let enabled = !disabled.contains(&name);
    let mut report = ProviderReport {
        name,
        tier,
        enabled,
        available: false,
        error: None,
        error_code: None,
    };
    if !enabled {
        return report;
    }

    match provider.is_available().await {
        Ok(available) => report.available = available,
        Err(e) => {
            report.error_code = Some(e.code.to_string());
            report.error = Some(e.message);
        }
    }
    report
}

pub fn execute(matches: &ArgMatches) -> Result<()> {
    let config = Config::load()?;
    let host: Arc<dyn HostShell> = Arc::new(LocalHost::new(config.command_timeout()));
    let registry = ProviderRegistry::linux_defaults(host);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;
    let reports = runtime.block_on(probe_all(&registry, &config.disabled_providers));

    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    println!("{}", "SENSOR PROVIDERS".bold().bright_cyan());
    println!("{}", "=".repeat(60));
    for report in &reports {
        let state = match (&report.error_code, report.enabled, report.available) {
            (_, false, _) => "disabled".dimmed(),
            (Some(code), _, _) if code == ErrorCode::PermissionDenied.as_str() => {
                "needs root".yellow().bold()
            }
            (Some(_), _, _) => "error".red().bold(),
            (None, _, true) => "available".green().bold(),
            (None, _, false) => "not found".dimmed(),
        };
        println!(
            "  {} {} {}",
            fit(&report.name, 14).bold(),
            fit(report.tier, 10).dimmed(),
            state
        );
        if let Some(error) = &report.error {
            println!("      {}", error.dimmed());
        }
    }

    Ok(())
}
