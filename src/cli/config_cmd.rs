//! Config CLI subcommands: show, defaults, validate.
//!
//! These commands read configuration directly from environment variables
//! (and an optional TOML file) without building a layer.

use std::path::Path;

use crate::config::{self, EffectiveConfig, EnvConfig};

/// Load env configuration, layered over `file` when one is given.
fn load(file: Option<&Path>) -> Result<EnvConfig, config::ConfigError> {
    match file {
        Some(path) => config::load_file(path),
        None => Ok(config::load()),
    }
}

/// Print effective config as key-value pairs to stdout.
///
/// Returns exit code: 0 on success, 2 on a configuration error.
pub fn run_show(file: Option<&Path>, json: bool) -> i32 {
    match load(file) {
        Ok(cfg) => {
            let eff = cfg.effective_config();
            if json {
                match serde_json::to_string_pretty(&eff) {
                    Ok(text) => println!("{text}"),
                    Err(e) => {
                        eprintln!("Failed to encode config: {e}");
                        return 2;
                    }
                }
            } else {
                print_config(&eff);
            }
            0
        }
        Err(e) => {
            eprintln!("Configuration error: {e}");
            2
        }
    }
}

/// Print default config values (no env overrides) to stdout.
pub fn run_defaults() {
    print_config(&EnvConfig::default().effective_config());
}

/// Collect warnings for settings that load fine but are likely mistakes.
pub fn validation_warnings(cfg: &EffectiveConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if cfg.retry_max_attempts > 1 && cfg.retry_initial_delay_ms == 0 {
        warnings.push(
            "REQSHIELD_RETRY_INITIAL_DELAY_MS is 0; retries will fire back-to-back".to_string(),
        );
    }
    if let Some(max_delay) = cfg.retry_max_delay_ms {
        if max_delay < cfg.retry_initial_delay_ms {
            warnings.push(format!(
                "REQSHIELD_RETRY_MAX_DELAY_MS ({max_delay}) < REQSHIELD_RETRY_INITIAL_DELAY_MS ({})",
                cfg.retry_initial_delay_ms
            ));
        }
    }
    if cfg.shutdown_timeout_secs < worst_case_retry_secs(cfg) {
        warnings.push(format!(
            "REQSHIELD_SHUTDOWN_TIMEOUT ({}s) is shorter than the full retry backoff",
            cfg.shutdown_timeout_secs
        ));
    }
    warnings
}

/// Sum of every backoff delay one execution can sleep through.
fn worst_case_retry_secs(cfg: &EffectiveConfig) -> u64 {
    let mut delay = cfg.retry_initial_delay_ms as f64;
    let mut total = 0.0;
    for _ in 1..cfg.retry_max_attempts {
        if let Some(max) = cfg.retry_max_delay_ms {
            delay = delay.min(max as f64);
        }
        total += delay;
        delay *= cfg.retry_multiplier;
    }
    (total / 1000.0).ceil() as u64
}

/// Validate configuration for obvious misconfigurations.
///
/// Returns 0 if valid, 1 if any warnings are found, 2 on load errors.
pub fn run_validate(file: Option<&Path>) -> i32 {
    let cfg = match load(file) {
        Ok(cfg) => cfg.effective_config(),
        Err(e) => {
            eprintln!("Configuration error: {e}");
            return 2;
        }
    };

    let warnings = validation_warnings(&cfg);
    if warnings.is_empty() {
        println!("Configuration is valid.");
        0
    } else {
        for warning in &warnings {
            eprintln!("WARNING: {warning}");
        }
        1
    }
}

fn print_config(cfg: &EffectiveConfig) {
    println!("REQSHIELD_CACHE_TTL_SECS={}", cfg.cache_ttl_secs);
    println!("REQSHIELD_CACHE_SWEEP_THRESHOLD={}", cfg.cache_sweep_threshold);
    println!("REQSHIELD_RETRY_MAX_ATTEMPTS={}", cfg.retry_max_attempts);
    println!("REQSHIELD_RETRY_INITIAL_DELAY_MS={}", cfg.retry_initial_delay_ms);
    println!("REQSHIELD_RETRY_MULTIPLIER={}", cfg.retry_multiplier);
    match cfg.retry_max_delay_ms {
        Some(ms) => println!("REQSHIELD_RETRY_MAX_DELAY_MS={ms}"),
        None => println!("REQSHIELD_RETRY_MAX_DELAY_MS="),
    }
    println!("REQSHIELD_MAX_CONCURRENCY={}", cfg.max_concurrency);
    match cfg.max_waiting {
        Some(max) => println!("REQSHIELD_MAX_WAITING={max}"),
        None => println!("REQSHIELD_MAX_WAITING=0"),
    }
    println!("REQSHIELD_SHUTDOWN_TIMEOUT={}", cfg.shutdown_timeout_secs);
    println!("REQSHIELD_LOG_LEVEL={}", cfg.log_level);
    println!(
        "REQSHIELD_LOG_FORMAT={}",
        match cfg.log_format {
            crate::telemetry::LogFormat::Json => "json",
            crate::telemetry::LogFormat::Pretty => "pretty",
        }
    );
}
