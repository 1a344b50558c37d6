//! Config validation CLI tool
//!
//! Validates an ephemerad configuration file and reports any errors.

use ephemera_util::{default_config_path, format_duration};
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates an ephemerad configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            eprintln!("  validate-config config.example.toml");
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match ephemera_config::load_config(&config_path) {
        Ok(policy) => {
            let lifecycle = &policy.lifecycle;
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", ephemera_config::CURRENT_CONFIG_VERSION);
            println!("  Data dir: {}", policy.service.data_dir.display());
            println!(
                "  Lifetime bounds: {} .. {}",
                format_duration(lifecycle.min_duration),
                format_duration(lifecycle.max_duration)
            );
            println!("  Sweep interval: {}", format_duration(lifecycle.sweep_interval));
            println!(
                "  Capability timeout: {}",
                format_duration(lifecycle.capability_timeout)
            );

            let warnings: Vec<String> = lifecycle
                .warnings
                .iter()
                .map(|w| format_duration(*w))
                .collect();
            println!("  Warnings: {}", warnings.join(", "));

            for (name, hook) in [("notify", &policy.hooks.notify), ("destroy", &policy.hooks.destroy)] {
                match hook {
                    Some(argv) => println!("  {} hook: {}", name, argv.join(" ")),
                    None => println!("  {} hook: (none)", name),
                }
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                ephemera_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                ephemera_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                ephemera_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                ephemera_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        ephemera_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
