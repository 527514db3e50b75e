use clap::{Arg, ArgAction, ArgMatches, Command};
use crate::operations::reconcile_op::{ReconcileOptions, DEFAULT_CLEANUP_PREFIX};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "./config.yml";

pub fn build_cli() -> Command {
    Command::new("frigate-autodiscovery")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Publishes Home Assistant MQTT discovery entries for Frigate cameras and tracked objects, then exits.")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .env("CONFIG_FILE")
                .default_value(DEFAULT_CONFIG_FILE)
                .help("Frigate configuration file (.yml, .yaml or .json)")
                .action(ArgAction::Set)
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .help("Enable debug logging")
                .action(ArgAction::SetTrue)
        )
        .arg(
            Arg::new("grace-period")
                .long("grace-period")
                .value_name("SECONDS")
                .default_value("2")
                .value_parser(clap::value_parser!(u64))
                .help("How long to listen for stale retained discovery entries before publishing")
                .action(ArgAction::Set)
        )
        .arg(
            Arg::new("cleanup-prefix")
                .long("cleanup-prefix")
                .value_name("PREFIX")
                .default_value(DEFAULT_CLEANUP_PREFIX)
                .help("Topic prefix whose discovery entries are cleared before publishing")
                .action(ArgAction::Set)
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("Log the discovery entries instead of connecting to the broker")
                .action(ArgAction::SetTrue)
        )
}

pub fn config_path(matches: &ArgMatches) -> &str {
    matches
        .get_one::<String>("config")
        .map(|s| s.as_str())
        .unwrap_or(DEFAULT_CONFIG_FILE)
}

pub fn reconcile_options(matches: &ArgMatches) -> ReconcileOptions {
    let defaults = ReconcileOptions::default();
    ReconcileOptions {
        grace_period: matches
            .get_one::<u64>("grace-period")
            .map(|secs| Duration::from_secs(*secs))
            .unwrap_or(defaults.grace_period),
        cleanup_prefix: matches
            .get_one::<String>("cleanup-prefix")
            .cloned()
            .unwrap_or(defaults.cleanup_prefix),
        dry_run: matches.get_flag("dry-run"),
    }
}
