//! Configuration loading from environment variables and TOML files.
//!
//! All values have defaults. Environment values that fail to parse fall
//! back to the default without crashing; out-of-range values are clamped.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `REQSHIELD_CACHE_TTL_SECS` | 300 | Response cache time-to-live |
//! | `REQSHIELD_CACHE_SWEEP_THRESHOLD` | 100 | Entry count that triggers an expiry sweep |
//! | `REQSHIELD_RETRY_MAX_ATTEMPTS` | 3 | Total attempts per execution (1-10) |
//! | `REQSHIELD_RETRY_INITIAL_DELAY_MS` | 500 | First backoff delay |
//! | `REQSHIELD_RETRY_MULTIPLIER` | 2.0 | Backoff growth factor (1.0-10.0) |
//! | `REQSHIELD_RETRY_MAX_DELAY_MS` | unset | Cap on a single backoff delay |
//! | `REQSHIELD_MAX_CONCURRENCY` | 3 | Concurrent queued operations (1-20) |
//! | `REQSHIELD_MAX_WAITING` | unset | Waiting list bound (0 = unbounded) |
//! | `REQSHIELD_SHUTDOWN_TIMEOUT` | 30 | Graceful shutdown timeout (secs) |
//! | `REQSHIELD_LOG_LEVEL` | info | Log filter directive |
//! | `REQSHIELD_LOG_FORMAT` | json | `json` or `pretty` |

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::executor::{ResponseCacheConfig, RetryConfig};
use crate::queue::{ConcurrencyQueueConfig, MAX_CONCURRENCY, MIN_CONCURRENCY};
use crate::telemetry::{LogConfig, LogFormat};
use crate::LayerConfig;

const MAX_ATTEMPTS_CEILING: u32 = 10;
const MAX_INITIAL_DELAY_MS: u64 = 60_000;
const MULTIPLIER_RANGE: (f64, f64) = (1.0, 10.0);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },
    #[error("Invalid config file: {0}")]
    Parse(String),
    #[error("Invalid log format: {0}")]
    LogFormat(String),
}

/// Effective configuration summary (serializable).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EffectiveConfig {
    pub cache_ttl_secs: u64,
    pub cache_sweep_threshold: usize,
    pub retry_max_attempts: u32,
    pub retry_initial_delay_ms: u64,
    pub retry_multiplier: f64,
    pub retry_max_delay_ms: Option<u64>,
    pub max_concurrency: usize,
    pub max_waiting: Option<usize>,
    pub shutdown_timeout_secs: u64,
    pub log_level: String,
    pub log_format: LogFormat,
}

/// All configuration, after defaults, file and environment are applied.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub cache: ResponseCacheConfig,
    pub retry: RetryConfig,
    pub queue: ConcurrencyQueueConfig,
    pub shutdown_timeout: Duration,
    pub log: LogConfig,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            cache: ResponseCacheConfig::default(),
            retry: RetryConfig::default(),
            queue: ConcurrencyQueueConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
            log: LogConfig::default(),
        }
    }
}

/// On-disk layout. Every key is optional; missing keys keep their default.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    #[serde(default)]
    cache: FileCache,
    #[serde(default)]
    retry: FileRetry,
    #[serde(default)]
    queue: FileQueue,
    shutdown_timeout_secs: Option<u64>,
    #[serde(default)]
    log: FileLog,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileCache {
    ttl_secs: Option<u64>,
    sweep_threshold: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileRetry {
    max_attempts: Option<u32>,
    initial_delay_ms: Option<u64>,
    multiplier: Option<f64>,
    max_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileQueue {
    max_concurrency: Option<usize>,
    max_waiting: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileLog {
    level: Option<String>,
    format: Option<String>,
}

/// Parse an env var, returning `current` on missing or invalid.
fn parse_env<T: std::str::FromStr>(key: &str, current: T) -> T {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<T>().unwrap_or(current),
        Err(_) => current,
    }
}

/// Parse an optional env var; missing or invalid leaves `current`.
fn parse_env_opt<T: std::str::FromStr>(key: &str, current: Option<T>) -> Option<T> {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<T>().ok().or(current),
        Err(_) => current,
    }
}

fn clamp_multiplier(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(MULTIPLIER_RANGE.0, MULTIPLIER_RANGE.1)
    } else {
        RetryConfig::default().multiplier
    }
}

/// Bring every value into its accepted range.
fn normalize(cfg: &mut EnvConfig) {
    cfg.cache.ttl = cfg.cache.ttl.max(Duration::from_secs(1));
    cfg.cache.sweep_threshold = cfg.cache.sweep_threshold.max(1);
    cfg.retry.max_attempts = cfg.retry.max_attempts.clamp(1, MAX_ATTEMPTS_CEILING);
    cfg.retry.initial_delay = cfg
        .retry
        .initial_delay
        .min(Duration::from_millis(MAX_INITIAL_DELAY_MS));
    cfg.retry.multiplier = clamp_multiplier(cfg.retry.multiplier);
    cfg.queue.max_concurrency = cfg.queue.max_concurrency.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY);
    // A zero bound would reject everything that has to wait.
    cfg.queue.max_waiting = cfg.queue.max_waiting.filter(|&max| max > 0);
    cfg.shutdown_timeout = cfg.shutdown_timeout.max(Duration::from_secs(1));
}

fn apply_env(cfg: &mut EnvConfig) {
    let ttl = parse_env("REQSHIELD_CACHE_TTL_SECS", cfg.cache.ttl.as_secs());
    cfg.cache.ttl = Duration::from_secs(ttl);
    cfg.cache.sweep_threshold =
        parse_env("REQSHIELD_CACHE_SWEEP_THRESHOLD", cfg.cache.sweep_threshold);

    cfg.retry.max_attempts = parse_env("REQSHIELD_RETRY_MAX_ATTEMPTS", cfg.retry.max_attempts);
    let initial = parse_env(
        "REQSHIELD_RETRY_INITIAL_DELAY_MS",
        cfg.retry.initial_delay.as_millis() as u64,
    );
    cfg.retry.initial_delay = Duration::from_millis(initial);
    cfg.retry.multiplier = parse_env("REQSHIELD_RETRY_MULTIPLIER", cfg.retry.multiplier);
    let max_delay = parse_env_opt(
        "REQSHIELD_RETRY_MAX_DELAY_MS",
        cfg.retry.max_delay.map(|d| d.as_millis() as u64),
    );
    cfg.retry.max_delay = max_delay.map(Duration::from_millis);

    cfg.queue.max_concurrency = parse_env("REQSHIELD_MAX_CONCURRENCY", cfg.queue.max_concurrency);
    cfg.queue.max_waiting = parse_env_opt("REQSHIELD_MAX_WAITING", cfg.queue.max_waiting);

    let shutdown = parse_env("REQSHIELD_SHUTDOWN_TIMEOUT", cfg.shutdown_timeout.as_secs());
    cfg.shutdown_timeout = Duration::from_secs(shutdown);

    if let Ok(level) = std::env::var("REQSHIELD_LOG_LEVEL") {
        if !level.trim().is_empty() {
            cfg.log.level = level.trim().to_string();
        }
    }
    cfg.log.format = parse_env("REQSHIELD_LOG_FORMAT", cfg.log.format);
}

fn apply_file(cfg: &mut EnvConfig, file: FileConfig) -> Result<(), ConfigError> {
    if let Some(ttl) = file.cache.ttl_secs {
        cfg.cache.ttl = Duration::from_secs(ttl);
    }
    if let Some(threshold) = file.cache.sweep_threshold {
        cfg.cache.sweep_threshold = threshold;
    }
    if let Some(attempts) = file.retry.max_attempts {
        cfg.retry.max_attempts = attempts;
    }
    if let Some(ms) = file.retry.initial_delay_ms {
        cfg.retry.initial_delay = Duration::from_millis(ms);
    }
    if let Some(multiplier) = file.retry.multiplier {
        cfg.retry.multiplier = multiplier;
    }
    if let Some(ms) = file.retry.max_delay_ms {
        cfg.retry.max_delay = Some(Duration::from_millis(ms));
    }
    if let Some(limit) = file.queue.max_concurrency {
        cfg.queue.max_concurrency = limit;
    }
    if let Some(max) = file.queue.max_waiting {
        cfg.queue.max_waiting = Some(max);
    }
    if let Some(secs) = file.shutdown_timeout_secs {
        cfg.shutdown_timeout = Duration::from_secs(secs);
    }
    if let Some(level) = file.log.level {
        cfg.log.level = level;
    }
    if let Some(format) = file.log.format {
        cfg.log.format = format
            .parse()
            .map_err(|_| ConfigError::LogFormat(format.clone()))?;
    }
    Ok(())
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EnvConfig {
    let mut cfg = EnvConfig::default();
    apply_env(&mut cfg);
    normalize(&mut cfg);
    cfg
}

/// Parse a TOML document on top of the defaults. Environment is ignored.
pub fn from_toml_str(source: &str) -> Result<EnvConfig, ConfigError> {
    let file: FileConfig = toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let mut cfg = EnvConfig::default();
    apply_file(&mut cfg, file)?;
    normalize(&mut cfg);
    Ok(cfg)
}

/// Load a TOML file, then let environment variables override it.
pub fn load_file(path: &Path) -> Result<EnvConfig, ConfigError> {
    let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let file: FileConfig = toml::from_str(&source).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let mut cfg = EnvConfig::default();
    apply_file(&mut cfg, file)?;
    apply_env(&mut cfg);
    normalize(&mut cfg);
    Ok(cfg)
}

impl EnvConfig {
    /// Configuration for [`crate::NetworkLayer::new`].
    pub fn layer_config(&self) -> LayerConfig {
        LayerConfig {
            executor: crate::executor::RequestExecutorConfig {
                cache: self.cache.clone(),
                retry: self.retry.clone(),
            },
            queue: self.queue.clone(),
            shutdown_timeout: self.shutdown_timeout,
        }
    }

    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            cache_ttl_secs: self.cache.ttl.as_secs(),
            cache_sweep_threshold: self.cache.sweep_threshold,
            retry_max_attempts: self.retry.max_attempts,
            retry_initial_delay_ms: self.retry.initial_delay.as_millis() as u64,
            retry_multiplier: self.retry.multiplier,
            retry_max_delay_ms: self.retry.max_delay.map(|d| d.as_millis() as u64),
            max_concurrency: self.queue.max_concurrency,
            max_waiting: self.queue.max_waiting,
            shutdown_timeout_secs: self.shutdown_timeout.as_secs(),
            log_level: self.log.level.clone(),
            log_format: self.log.format,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    // Serialize env-mutating tests to avoid cross-test pollution.
    pub(crate) static ENV_LOCK: Mutex<()> = Mutex::new(());

    pub(crate) const ENV_KEYS: &[&str] = &[
        "REQSHIELD_CACHE_TTL_SECS",
        "REQSHIELD_CACHE_SWEEP_THRESHOLD",
        "REQSHIELD_RETRY_MAX_ATTEMPTS",
        "REQSHIELD_RETRY_INITIAL_DELAY_MS",
        "REQSHIELD_RETRY_MULTIPLIER",
        "REQSHIELD_RETRY_MAX_DELAY_MS",
        "REQSHIELD_MAX_CONCURRENCY",
        "REQSHIELD_MAX_WAITING",
        "REQSHIELD_SHUTDOWN_TIMEOUT",
        "REQSHIELD_LOG_LEVEL",
        "REQSHIELD_LOG_FORMAT",
    ];

    pub(crate) fn clear_env_vars() {
        for k in ENV_KEYS {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn test_defaults_are_sensible() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let cfg = load();
        assert_eq!(cfg.cache.ttl, Duration::from_secs(300));
        assert_eq!(cfg.cache.sweep_threshold, 100);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.initial_delay, Duration::from_millis(500));
        assert_eq!(cfg.retry.multiplier, 2.0);
        assert_eq!(cfg.retry.max_delay, None);
        assert_eq!(cfg.queue.max_concurrency, 3);
        assert_eq!(cfg.queue.max_waiting, None);
        assert_eq!(cfg.shutdown_timeout.as_secs(), 30);
        assert_eq!(cfg.log.format, LogFormat::Json);
    }

    #[test]
    fn test_env_vars_override_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("REQSHIELD_CACHE_TTL_SECS", "60");
        std::env::set_var("REQSHIELD_RETRY_MAX_ATTEMPTS", "5");
        std::env::set_var("REQSHIELD_RETRY_MAX_DELAY_MS", "4000");
        std::env::set_var("REQSHIELD_MAX_CONCURRENCY", "8");
        std::env::set_var("REQSHIELD_MAX_WAITING", "64");
        std::env::set_var("REQSHIELD_LOG_FORMAT", "pretty");
        let cfg = load();
        assert_eq!(cfg.cache.ttl, Duration::from_secs(60));
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.retry.max_delay, Some(Duration::from_millis(4000)));
        assert_eq!(cfg.queue.max_concurrency, 8);
        assert_eq!(cfg.queue.max_waiting, Some(64));
        assert_eq!(cfg.log.format, LogFormat::Pretty);
        clear_env_vars();
    }

    #[test]
    fn test_invalid_env_falls_back_to_default() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("REQSHIELD_CACHE_TTL_SECS", "five minutes");
        std::env::set_var("REQSHIELD_RETRY_MULTIPLIER", "fast");
        std::env::set_var("REQSHIELD_LOG_FORMAT", "xml");
        let cfg = load();
        assert_eq!(cfg.cache.ttl, Duration::from_secs(300));
        assert_eq!(cfg.retry.multiplier, 2.0);
        assert_eq!(cfg.log.format, LogFormat::Json);
        clear_env_vars();
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("REQSHIELD_MAX_CONCURRENCY", "100");
        std::env::set_var("REQSHIELD_RETRY_MAX_ATTEMPTS", "0");
        std::env::set_var("REQSHIELD_RETRY_MULTIPLIER", "0.5");
        std::env::set_var("REQSHIELD_MAX_WAITING", "0");
        let cfg = load();
        assert_eq!(cfg.queue.max_concurrency, 20);
        assert_eq!(cfg.retry.max_attempts, 1);
        assert_eq!(cfg.retry.multiplier, 1.0);
        assert_eq!(cfg.queue.max_waiting, None);

        std::env::set_var("REQSHIELD_MAX_CONCURRENCY", "0");
        assert_eq!(load().queue.max_concurrency, 1);
        clear_env_vars();
    }

    #[test]
    fn test_toml_document_is_applied() {
        let cfg = from_toml_str(
            r#"
            shutdown_timeout_secs = 5

            [cache]
            ttl_secs = 120

            [retry]
            initial_delay_ms = 250
            max_delay_ms = 2000

            [queue]
            max_concurrency = 4
            max_waiting = 32

            [log]
            format = "pretty"
            level = "reqshield=debug"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.cache.ttl, Duration::from_secs(120));
        assert_eq!(cfg.cache.sweep_threshold, 100);
        assert_eq!(cfg.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(cfg.retry.max_delay, Some(Duration::from_secs(2)));
        assert_eq!(cfg.queue.max_concurrency, 4);
        assert_eq!(cfg.queue.max_waiting, Some(32));
        assert_eq!(cfg.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(cfg.log.level, "reqshield=debug");
        assert_eq!(cfg.log.format, LogFormat::Pretty);
    }

    #[test]
    fn test_toml_rejects_unknown_keys_and_bad_format() {
        assert!(matches!(
            from_toml_str("[cache]\nttl = 5\n"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            from_toml_str("[log]\nformat = \"xml\"\n"),
            Err(ConfigError::LogFormat(_))
        ));
    }

    #[test]
    fn test_env_overrides_file() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[queue]\nmax_concurrency = 4\n\n[cache]\nttl_secs = 90").unwrap();

        std::env::set_var("REQSHIELD_MAX_CONCURRENCY", "6");
        let cfg = load_file(file.path()).unwrap();
        assert_eq!(cfg.queue.max_concurrency, 6);
        assert_eq!(cfg.cache.ttl, Duration::from_secs(90));
        clear_env_vars();
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = load_file(Path::new("/nonexistent/reqshield.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_effective_config_round_trips_layer_config() {
        let cfg = EnvConfig::default();
        let eff = cfg.effective_config();
        assert_eq!(eff.cache_ttl_secs, 300);
        assert_eq!(eff.retry_initial_delay_ms, 500);
        assert_eq!(eff.max_concurrency, 3);

        let layer = cfg.layer_config();
        assert_eq!(layer.queue.max_concurrency, 3);
        assert_eq!(layer.executor.retry.max_attempts, 3);
        assert_eq!(layer.shutdown_timeout, Duration::from_secs(30));
    }
}
