//! reqshield CLI entry point.
//!
//! ## Subcommands
//!
//! - `reqshield-cli config show|defaults|validate` - Inspect configuration
//! - `reqshield-cli demo` - Run a simulated workload and print counters

use std::path::Path;
use std::process::ExitCode;

use reqshield::cli::{config_cmd, flag_value, has_flag, run_demo};
use reqshield::config::{self as rs_config, EnvConfig};
use reqshield::telemetry::init_logging;

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");
    let file = flag_value(&args, "--file").map(Path::new);

    match command {
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => {
                    let code = config_cmd::run_show(file, has_flag(&args, "--json"));
                    ExitCode::from(code as u8)
                }
                "defaults" => {
                    config_cmd::run_defaults();
                    ExitCode::SUCCESS
                }
                "validate" => {
                    let code = config_cmd::run_validate(file);
                    ExitCode::from(code as u8)
                }
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_usage();
                    ExitCode::FAILURE
                }
            }
        }
        "demo" => {
            let config = match load_config(file) {
                Ok(config) => config,
                Err(code) => return code,
            };
            if let Err(e) = init_logging(&config.log) {
                eprintln!("Logging disabled: {}", e);
            }
            let code = run_demo(config.layer_config()).await;
            ExitCode::from(code as u8)
        }
        "version" | "--version" | "-V" => {
            println!("reqshield {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        "help" | "--help" | "-h" => {
            print_usage();
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn load_config(file: Option<&Path>) -> Result<EnvConfig, ExitCode> {
    match file {
        Some(path) => rs_config::load_file(path).map_err(|e| {
            eprintln!("Configuration error: {}", e);
            ExitCode::from(2u8)
        }),
        None => Ok(rs_config::load()),
    }
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "reqshield v{}

USAGE:
    reqshield-cli [COMMAND] [OPTIONS]

COMMANDS:
    config show      Print effective configuration (--json for JSON)
    config defaults  Print default configuration
    config validate  Check configuration for likely mistakes
    demo             Run a simulated workload and print counters
    version          Show version information
    help             Show this help message

OPTIONS:
    --file PATH    Load a TOML config file (environment still overrides)
    --json         JSON output for `config show`

ENVIRONMENT:
    REQSHIELD_*    See `reqshield-cli config defaults` for every variable

EXIT CODES:
    0  Success
    1  Failure / validation warnings
    2  Configuration error",
        version
    );
}
