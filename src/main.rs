use anyhow::Result;
use clap::{value_parser, Arg, ArgAction, Command};

use hwsense::commands;

fn build_cli() -> Command {
    Command::new("hwsense")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Aggregated hardware sensor monitor for Linux")
        .subcommand(
            Command::new("monitor")
                .about("Show live sensor readings")
                .arg(
                    Arg::new("interval")
                        .short('i')
                        .long("interval")
                        .value_name("SECONDS")
                        .help("Refresh interval: 1, 2, 5, 10 or 30 seconds")
                        .value_parser(value_parser!(u64)),
                )
                .arg(
                    Arg::new("fahrenheit")
                        .short('f')
                        .long("fahrenheit")
                        .help("Show temperatures in Fahrenheit")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Print snapshots as JSON instead of a table")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("once")
                        .long("once")
                        .help("Print a single snapshot and exit")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("sudo")
                        .long("sudo")
                        .help("Re-run with root privileges through sudo")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("providers")
                .about("Probe every sensor backend and report availability")
                .arg(
                    Arg::new("json")
                        .long("json")
                        .help("Print the report as JSON")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("export")
                .about("Collect a short sensor history and export it as CSV")
                .arg(
                    Arg::new("samples")
                        .short('n')
                        .long("samples")
                        .value_name("COUNT")
                        .help("Number of refresh rounds to record")
                        .default_value("10")
                        .value_parser(value_parser!(usize)),
                )
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("FILE")
                        .help("Write the CSV to FILE instead of stdout"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Show or change settings")
                .subcommand_required(true)
                .arg_required_else_help(true)
                .subcommand(Command::new("show").about("Print the current settings"))
                .subcommand(Command::new("path").about("Print the config file location"))
                .subcommand(
                    Command::new("set")
                        .about("Change a setting (interval, unit, history, timeout, enable, disable)")
                        .arg(Arg::new("key").required(true).index(1))
                        .arg(Arg::new("value").required(true).index(2)),
                ),
        )
}

fn main() -> Result<()> {
    hwsense::init_logging();

    let matches = build_cli().get_matches();

    match matches.subcommand() {
        Some(("monitor", sub_matches)) => commands::monitor(sub_matches)?,
        Some(("providers", sub_matches)) => commands::providers(sub_matches)?,
        Some(("export", sub_matches)) => commands::export(sub_matches)?,
        Some(("config", sub_matches)) => commands::config::handle(sub_matches)?,
        _ => {
            println!("Welcome to hwsense!");
            println!("Use 'hwsense monitor' to watch your sensors or 'hwsense --help' for more.");
        }
    }

    Ok(())
}
