//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{ChurnError, Result};

/// Smallest inter-tick delay the engine accepts unless configured otherwise.
pub const DEFAULT_MIN_SLEEP_INTERVAL_MICROS: u64 = 1_000;

/// Full disk_churn configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub churn: ChurnConfig,
    pub telemetry: TelemetryConfig,
    pub paths: PathsConfig,
}

/// Stress loop knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChurnConfig {
    /// Directory under stress; backing files live here.
    pub directory: PathBuf,
    /// Bytes written per fill.
    pub max_file_size: u64,
    /// Explicit slot count. `None` (or 0 in the file) means "size from free space".
    pub slot_count: Option<usize>,
    /// Delay between ticks.
    pub sleep_interval_micros: u64,
    /// Floor for `sleep_interval_micros`.
    pub min_sleep_interval_micros: u64,
    /// Fixed RNG seed for reproducible runs.
    pub seed: Option<u64>,
}

/// Observer-facing listeners.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TelemetryConfig {
    pub bind_address: String,
    pub websocket_port: u16,
    pub http_port: u16,
    pub www_dir: PathBuf,
    /// Push an unsolicited fileinfo snapshot this often; 0 disables.
    pub broadcast_interval_secs: u64,
    /// Accept-loop / read poll period.
    pub poll_interval_ms: u64,
}

/// Filesystem paths used by dchurn itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub activity_log: PathBuf,
}

impl Default for ChurnConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("DiskStressFiles"),
            max_file_size: 1_048_576,
            slot_count: None,
            sleep_interval_micros: 250_000,
            min_sleep_interval_micros: DEFAULT_MIN_SLEEP_INTERVAL_MICROS,
            seed: None,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            websocket_port: 8002,
            http_port: 8001,
            www_dir: PathBuf::from("www"),
            broadcast_interval_secs: 0,
            poll_interval_ms: 20,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!(
                    "[DCH-CONFIG] WARNING: HOME not set, falling back to /tmp for config path"
                );
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        Self {
            config_file: home_dir.join(".config").join("dchurn").join("config.toml"),
            activity_log: PathBuf::from("dchurn-activity.jsonl"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| ChurnError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(ChurnError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        // churn
        if let Some(raw) = lookup("DCH_CHURN_DIRECTORY") {
            self.churn.directory = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("DCH_CHURN_MAX_FILE_SIZE") {
            self.churn.max_file_size = parse_env("DCH_CHURN_MAX_FILE_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("DCH_CHURN_SLOT_COUNT") {
            self.churn.slot_count = Some(parse_env("DCH_CHURN_SLOT_COUNT", &raw)?);
        }
        if let Some(raw) = lookup("DCH_CHURN_SLEEP_INTERVAL_MICROS") {
            self.churn.sleep_interval_micros =
                parse_env("DCH_CHURN_SLEEP_INTERVAL_MICROS", &raw)?;
        }
        if let Some(raw) = lookup("DCH_CHURN_SEED") {
            self.churn.seed = Some(parse_env("DCH_CHURN_SEED", &raw)?);
        }

        // telemetry
        if let Some(raw) = lookup("DCH_TELEMETRY_BIND_ADDRESS") {
            self.telemetry.bind_address = raw;
        }
        if let Some(raw) = lookup("DCH_TELEMETRY_WEBSOCKET_PORT") {
            self.telemetry.websocket_port = parse_env("DCH_TELEMETRY_WEBSOCKET_PORT", &raw)?;
        }
        if let Some(raw) = lookup("DCH_TELEMETRY_HTTP_PORT") {
            self.telemetry.http_port = parse_env("DCH_TELEMETRY_HTTP_PORT", &raw)?;
        }
        if let Some(raw) = lookup("DCH_TELEMETRY_WWW_DIR") {
            self.telemetry.www_dir = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("DCH_TELEMETRY_BROADCAST_INTERVAL_SECS") {
            self.telemetry.broadcast_interval_secs =
                parse_env("DCH_TELEMETRY_BROADCAST_INTERVAL_SECS", &raw)?;
        }

        // paths
        if let Some(raw) = lookup("DCH_PATHS_ACTIVITY_LOG") {
            self.paths.activity_log = PathBuf::from(raw);
        }

        Ok(())
    }

    /// A zero slot count in a config file means "unset, compute from free space".
    fn normalize(&mut self) {
        if self.churn.slot_count == Some(0) {
            self.churn.slot_count = None;
        }
    }

    /// Check cross-field invariants. Called by `load` and again after CLI overrides.
    pub fn validate(&self) -> Result<()> {
        if self.churn.max_file_size == 0 {
            return Err(ChurnError::InvalidConfig {
                details: "churn.max_file_size must be > 0".to_string(),
            });
        }
        if self.churn.slot_count == Some(0) {
            return Err(ChurnError::InvalidConfig {
                details: "churn.slot_count must be > 0 when set".to_string(),
            });
        }
        if self.churn.sleep_interval_micros < self.churn.min_sleep_interval_micros {
            return Err(ChurnError::InvalidConfig {
                details: format!(
                    "churn.sleep_interval_micros ({}) must be >= churn.min_sleep_interval_micros ({})",
                    self.churn.sleep_interval_micros, self.churn.min_sleep_interval_micros
                ),
            });
        }
        if self.telemetry.websocket_port == 0 || self.telemetry.http_port == 0 {
            return Err(ChurnError::InvalidConfig {
                details: "telemetry ports must be > 0".to_string(),
            });
        }
        if self.telemetry.websocket_port == self.telemetry.http_port {
            return Err(ChurnError::InvalidConfig {
                details: format!(
                    "telemetry.websocket_port and telemetry.http_port must differ (both {})",
                    self.telemetry.websocket_port
                ),
            });
        }
        if self.telemetry.poll_interval_ms == 0 {
            return Err(ChurnError::InvalidConfig {
                details: "telemetry.poll_interval_ms must be > 0".to_string(),
            });
        }
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|error| ChurnError::ConfigParse {
            context: "env",
            details: format!("{name}={raw:?}: {error}"),
        })
}

#[cfg(test)]
mod tests {
    use super::{ChurnError, Config};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_max_file_size_rejected() {
        let mut cfg = Config::default();
        cfg.churn.max_file_size = 0;
        let err = cfg.validate().expect_err("expected invalid size");
        match err {
            ChurnError::InvalidConfig { details } => {
                assert!(details.contains("max_file_size"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn sleep_below_minimum_rejected() {
        let mut cfg = Config::default();
        cfg.churn.sleep_interval_micros = cfg.churn.min_sleep_interval_micros - 1;
        let err = cfg.validate().expect_err("expected sleep validation error");
        assert!(err.to_string().contains("sleep_interval_micros"));
    }

    #[test]
    fn identical_ports_rejected() {
        let mut cfg = Config::default();
        cfg.telemetry.http_port = cfg.telemetry.websocket_port;
        let err = cfg.validate().expect_err("expected port clash");
        assert!(err.to_string().contains("must differ"));
    }

    #[test]
    fn zero_slot_count_in_file_means_unset() {
        let mut cfg: Config = toml::from_str("[churn]\nslot_count = 0\n").expect("parse");
        cfg.normalize();
        assert_eq!(cfg.churn.slot_count, None);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn toml_sections_override_defaults() {
        let cfg: Config = toml::from_str(
            "[churn]\nmax_file_size = 4096\ndirectory = \"/tmp/churn\"\n\
             [telemetry]\nwebsocket_port = 9002\n",
        )
        .expect("parse");
        assert_eq!(cfg.churn.max_file_size, 4096);
        assert_eq!(cfg.churn.directory, PathBuf::from("/tmp/churn"));
        assert_eq!(cfg.telemetry.websocket_port, 9002);
        assert_eq!(cfg.telemetry.http_port, 8001);
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = Config::default();
        let overrides = vars(&[
            ("DCH_CHURN_MAX_FILE_SIZE", "500000"),
            ("DCH_CHURN_SLOT_COUNT", "12"),
            ("DCH_CHURN_DIRECTORY", "/tmp/dch"),
            ("DCH_TELEMETRY_WEBSOCKET_PORT", "9100"),
        ]);

        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect("env overrides should parse");

        assert_eq!(cfg.churn.max_file_size, 500_000);
        assert_eq!(cfg.churn.slot_count, Some(12));
        assert_eq!(cfg.churn.directory, PathBuf::from("/tmp/dch"));
        assert_eq!(cfg.telemetry.websocket_port, 9100);
    }

    #[test]
    fn env_invalid_integer_rejected() {
        let mut cfg = Config::default();
        let overrides = vars(&[("DCH_CHURN_MAX_FILE_SIZE", "lots")]);

        let err = cfg
            .apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect_err("invalid integer should fail");
        match err {
            ChurnError::ConfigParse { context, details } => {
                assert_eq!(context, "env");
                assert!(details.contains("DCH_CHURN_MAX_FILE_SIZE"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let result = Config::load(Some(Path::new("/nonexistent/dchurn/config.toml")));
        let err = result.expect_err("missing explicit file");
        assert!(matches!(err, ChurnError::MissingConfig { .. }));
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[churn]\nmax_file_size = 8192\n").unwrap();

        let cfg = Config::load(Some(&path)).expect("load");
        assert_eq!(cfg.churn.max_file_size, 8192);
        assert_eq!(cfg.paths.config_file, path);
    }

    #[test]
    fn stable_hash_changes_when_config_changes() {
        let cfg = Config::default();
        let hash_before = cfg.stable_hash().expect("hash should compute");
        let mut modified = Config::default();
        modified.churn.max_file_size += 1;
        let hash_after = modified.stable_hash().expect("hash should compute");
        assert_ne!(hash_before, hash_after);
        assert_eq!(hash_before, cfg.stable_hash().expect("hash"));
    }
}
