//! Top-level CLI definition and dispatch.

use std::path::PathBuf;

use clap::Parser;
use colored::control;
use thiserror::Error;

use disk_churn::core::config::Config;
use disk_churn::core::errors::ChurnError;
use disk_churn::daemon::runner::ChurnService;
use disk_churn::daemon::signals::SignalHandler;

/// disk_churn: keep a directory under sustained create/delete load and
/// publish live telemetry to browser observers.
#[derive(Debug, Parser)]
#[command(
    name = "dchurn",
    author,
    version,
    about = "Filesystem churn stress service with WebSocket telemetry",
    long_about = None
)]
pub struct Cli {
    /// Override config file path.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Directory to churn (created if missing, emptied at start).
    #[arg(short = 'd', long, value_name = "DIR")]
    directory: Option<PathBuf>,
    /// Dashboard root served over HTTP.
    #[arg(short = 'w', long, value_name = "DIR")]
    www_dir: Option<PathBuf>,
    /// Maximum size of each churn file in bytes.
    #[arg(short = 's', long, value_name = "BYTES", value_parser = clap::value_parser!(u64).range(1..))]
    max_file_size: Option<u64>,
    /// Fixed slot count instead of sizing from free space.
    #[arg(short = 'n', long, value_name = "COUNT", value_parser = parse_positive_usize)]
    max_files: Option<usize>,
    /// Activity log (JSONL) path.
    #[arg(short = 'l', long, value_name = "PATH")]
    log_file: Option<PathBuf>,
    /// WebSocket telemetry port.
    #[arg(long, value_name = "PORT", value_parser = clap::value_parser!(u16).range(1..))]
    port: Option<u16>,
    /// Dashboard HTTP port.
    #[arg(long, value_name = "PORT", value_parser = clap::value_parser!(u16).range(1..))]
    http_port: Option<u16>,
    /// Pause between churn ticks in microseconds.
    #[arg(long, value_name = "MICROS", value_parser = clap::value_parser!(u64).range(1..))]
    sleep_micros: Option<u64>,
    /// Seed for slot selection (reproducible runs).
    #[arg(long, value_name = "SEED")]
    seed: Option<u64>,
    /// Do not read console commands from stdin.
    #[arg(long)]
    no_console: bool,
    /// Disable colored output.
    #[arg(long)]
    no_color: bool,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid configuration after overrides.
    #[error("{0}")]
    User(String),
    /// Start-up or runtime failure.
    #[error("{0}")]
    Runtime(#[from] ChurnError),
}

impl CliError {
    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::User(_) => 2,
            Self::Runtime(_) => 1,
        }
    }
}

/// Load config, apply CLI overrides and run the service until shutdown.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    let mut config = Config::load(cli.config.as_deref()).map_err(config_error)?;
    apply_overrides(&mut config, cli);
    config
        .validate()
        .map_err(|e| CliError::User(e.to_string()))?;

    let signal_handler = SignalHandler::new();
    let service = ChurnService::new(config, signal_handler)?;
    service.run(!cli.no_console)?;
    Ok(())
}

/// Bad config files and `DCH_*` values are usage errors, not runtime failures.
fn config_error(err: ChurnError) -> CliError {
    match err {
        ChurnError::InvalidConfig { .. }
        | ChurnError::MissingConfig { .. }
        | ChurnError::ConfigParse { .. } => CliError::User(err.to_string()),
        other => CliError::Runtime(other),
    }
}

fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(directory) = &cli.directory {
        config.churn.directory.clone_from(directory);
    }
    if let Some(www_dir) = &cli.www_dir {
        config.telemetry.www_dir.clone_from(www_dir);
    }
    if let Some(size) = cli.max_file_size {
        config.churn.max_file_size = size;
    }
    if let Some(count) = cli.max_files {
        config.churn.slot_count = Some(count);
    }
    if let Some(log_file) = &cli.log_file {
        config.paths.activity_log.clone_from(log_file);
    }
    if let Some(port) = cli.port {
        config.telemetry.websocket_port = port;
    }
    if let Some(port) = cli.http_port {
        config.telemetry.http_port = port;
    }
    if let Some(micros) = cli.sleep_micros {
        config.churn.sleep_interval_micros = micros;
    }
    if cli.seed.is_some() {
        config.churn.seed = cli.seed;
    }
}

fn parse_positive_usize(raw: &str) -> Result<usize, String> {
    match raw.parse::<usize>() {
        Ok(0) => Err("must be greater than 0".to_string()),
        Ok(value) => Ok(value),
        Err(e) => Err(e.to_string()),
    }
}

// ──────────────────── tests ────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn short_and_long_flags_parse() {
        let cli = Cli::try_parse_from([
            "dchurn", "-d", "/tmp/churn", "-w", "www", "-s", "4096", "-n", "5", "-l",
            "act.jsonl", "--port", "9002", "--http-port", "9001", "--seed", "7",
            "--no-console",
        ])
        .unwrap();
        assert_eq!(cli.directory, Some(PathBuf::from("/tmp/churn")));
        assert_eq!(cli.max_file_size, Some(4096));
        assert_eq!(cli.max_files, Some(5));
        assert_eq!(cli.port, Some(9002));
        assert!(cli.no_console);

        let mut config = Config::default();
        apply_overrides(&mut config, &cli);
        assert_eq!(config.churn.slot_count, Some(5));
        assert_eq!(config.telemetry.websocket_port, 9002);
        assert_eq!(config.telemetry.http_port, 9001);
        assert_eq!(config.paths.activity_log, PathBuf::from("act.jsonl"));
        assert_eq!(config.churn.seed, Some(7));
        config.validate().unwrap();
    }

    #[test]
    fn zero_and_garbage_numbers_are_rejected() {
        assert!(Cli::try_parse_from(["dchurn", "-s", "0"]).is_err());
        assert!(Cli::try_parse_from(["dchurn", "-n", "0"]).is_err());
        assert!(Cli::try_parse_from(["dchurn", "--port", "0"]).is_err());
        assert!(Cli::try_parse_from(["dchurn", "--sleep-micros", "abc"]).is_err());
        assert!(Cli::try_parse_from(["dchurn", "-n", "-3"]).is_err());
    }

    #[test]
    fn colliding_ports_fail_validation() {
        let cli = Cli::try_parse_from(["dchurn", "--port", "9000", "--http-port", "9000"]).unwrap();
        let mut config = Config::default();
        apply_overrides(&mut config, &cli);
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_load_failures_exit_as_usage_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[churn]\nmax_file_size = \"huge\"\n").unwrap();
        let err = config_error(Config::load(Some(&path)).unwrap_err());
        assert_eq!(err.exit_code(), 2);

        let missing = config_error(Config::load(Some(&dir.path().join("absent.toml"))).unwrap_err());
        assert_eq!(missing.exit_code(), 2);

        let io = config_error(ChurnError::io("/churn", std::io::Error::other("disk gone")));
        assert_eq!(io.exit_code(), 1);
    }
}
