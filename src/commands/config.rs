use crate::core::config::{Config, REFRESH_INTERVAL_CHOICES};
use crate::core::sensors::units::TemperatureUnit;
use anyhow::{bail, Context, Result};
use colored::Colorize;

const KNOWN_PROVIDERS: [&str; 5] = ["hwmon", "lm-sensors", "powercap", "nvme", "smartctl"];

pub fn handle(matches: &clap::ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("show", _)) => show(),
        Some(("set", sub_matches)) => set(sub_matches),
        Some(("path", _)) => {
            println!("{}", Config::config_path()?.display());
            Ok(())
        }
        _ => {
            println!("Use 'hwsense config --help' for more information.");
            Ok(())
        }
    }
}

fn show() -> Result<()> {
    let config = Config::load()?;

    println!("{}", "Configuration:".bold());
    println!(
        "  {} {}s",
        "Refresh interval:".dimmed(),
        config.refresh_interval().as_secs()
    );
    println!(
        "  {} {}",
        "Temperature unit:".dimmed(),
        config.temperature_unit.symbol()
    );
    println!("  {} {}", "History size:".dimmed(), config.history_capacity);
    println!(
        "  {} {}s",
        "Command timeout:".dimmed(),
        config.command_timeout_secs
    );
    let disabled = if config.disabled_providers.is_empty() {
        "none".to_string()
    } else {
        config.disabled_providers.join(", ")
    };
    println!("  {} {}", "Disabled providers:".dimmed(), disabled);
    Ok(())
}

/// Apply one `key value` pair to `config`.
pub fn apply_setting(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "interval" | "refresh-interval" => {
            let secs: u64 = value
                .parse()
                .with_context(|| format!("Invalid interval '{}'", value))?;
            config.set_refresh_interval(secs)?;
        }
        "unit" | "temperature-unit" => {
            config.temperature_unit = value.parse::<TemperatureUnit>().map_err(anyhow::Error::msg)?;
        }
        "history" | "history-size" => {
            let size: usize = value
                .parse()
                .with_context(|| format!("Invalid history size '{}'", value))?;
            if size == 0 {
                bail!("History size must be at least 1");
            }
            config.history_capacity = size;
        }
        "timeout" | "command-timeout" => {
            let secs: u64 = value
                .parse()
                .with_context(|| format!("Invalid timeout '{}'", value))?;
            if secs == 0 {
                bail!("Command timeout must be at least 1 second");
            }
            config.command_timeout_secs = secs;
        }
        "enable" | "disable" => {
            if !KNOWN_PROVIDERS.contains(&value) {
                bail!(
                    "Unknown provider '{}'. Known providers: {}",
                    value,
                    KNOWN_PROVIDERS.join(", ")
                );
            }
            config.set_provider_enabled(value, key == "enable");
        }
        other => bail!(
            "Unknown setting '{}'. Use one of: interval ({:?}), unit, history, timeout, enable, disable",
            other,
            REFRESH_INTERVAL_CHOICES
        ),
    }
    Ok(())
}

fn set(matches: &clap::ArgMatches) -> Result<()> {
    let key = matches
        .get_one::<String>("key")
        .context("Key argument is required")?;
    let value = matches
        .get_one::<String>("value")
        .context("Value argument is required")?;

    let mut config = Config::load()?;
    apply_setting(&mut config, key, value)?;
    config.save()?;

    println!("{} {} = {}", "✓".green(), key.bold(), value);
    Ok(())
}
