use env_logger::Builder;
use log::LevelFilter;
use crate::config_loader::MasterConfig;
use std::io::Write;

/// Level precedence: `--debug`, then `logger.default` from the config file, then `info`.
pub fn resolve_log_level(config: Option<&MasterConfig>, debug_flag: bool) -> LevelFilter {
    if debug_flag {
        return LevelFilter::Debug;
    }
    let log_level_str = config
        .and_then(|c| c.log_level.clone())
        .unwrap_or_else(|| "info".to_string());

    match log_level_str.to_lowercase().as_str() {
        "critical" | "error" => LevelFilter::Error,
        "warning" | "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        s => {
            eprintln!("Unrecognized log level '{}', defaulting to info.", s);
            LevelFilter::Info
        }
    }
}

pub fn initialize_logging(config: Option<&MasterConfig>, cli_matches: &clap::ArgMatches) {
    let mut builder = Builder::new();
    builder.filter_level(resolve_log_level(config, cli_matches.get_flag("debug")));
    // Chatty at debug level; only surface its problems.
    builder.filter_module("rumqttc", LevelFilter::Warn);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] - {}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    });

    builder.try_init().unwrap_or_else(|e| {
        eprintln!("Failed to initialize logger: {}. Logging might not work as expected.", e);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker_config::BrokerSettings;

    fn config_with_level(level: Option<&str>) -> MasterConfig {
        MasterConfig {
            mqtt: BrokerSettings::new("h"),
            cameras: Vec::new(),
            log_level: level.map(str::to_string),
        }
    }

    #[test]
    fn debug_flag_wins() {
        let cfg = config_with_level(Some("error"));
        assert_eq!(resolve_log_level(Some(&cfg), true), LevelFilter::Debug);
    }

    #[test]
    fn config_level_used_when_present() {
        let cfg = config_with_level(Some("WARNING"));
        assert_eq!(resolve_log_level(Some(&cfg), false), LevelFilter::Warn);
    }

    #[test]
    fn defaults_to_info() {
        assert_eq!(resolve_log_level(None, false), LevelFilter::Info);
        let cfg = config_with_level(Some("loud"));
        assert_eq!(resolve_log_level(Some(&cfg), false), LevelFilter::Info);
    }
}
