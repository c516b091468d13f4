//! CLI support for the `reqshield-cli` binary.
//!
//! ## Usage
//!
//! ```bash
//! reqshield-cli config show [--json] [--file PATH]
//! reqshield-cli config defaults
//! reqshield-cli config validate [--file PATH]
//! reqshield-cli demo [--file PATH]
//! ```

pub mod config_cmd;
pub mod demo;

pub use demo::{run_demo, run_workload, DemoReport};

/// Value following `flag` in `args`, if present.
pub fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

/// Whether `flag` appears anywhere in `args`.
pub fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}
