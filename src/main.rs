//! rprovision - IoT device provisioning tool
//!
//! Fetches the debug-probe tools and board firmware, injects a per-device
//! key and timestamp, and programs the target over a J-Link probe.
//!
//! # Architecture
//!
//! The pipeline lives in `rprovision-core` behind injected collaborator
//! traits; the J-Link subprocess driver is `rprovision-jlink`. This binary
//! only parses arguments, wires the production collaborators together, and
//! renders progress.

mod cli;
mod commands;

use clap::Parser;

use cli::{Cli, Commands};
use rprovision_core::config::ProvisionConfig;

fn main() {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // missing or invalid flags exit 1, like every other failure
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            std::process::exit(if e.use_stderr() { 1 } else { 0 });
        }
    };

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let result = match cli.command {
        Commands::Provision {
            board_id,
            device_id,
            key,
            org_id,
            bearer_token,
            auto_register,
            key_offset,
            utc_offset,
            provision_option,
            base_url,
            cache_dir,
            firmware_file,
        } => {
            let config = ProvisionConfig {
                board_id,
                mode: provision_option,
                device_id,
                key,
                org_id: env_fallback(org_id, "PROVISION_ORG_ID"),
                bearer_token: env_fallback(bearer_token, "PROVISION_API_TOKEN"),
                auto_register,
                key_offset,
                utc_offset,
                base_url,
                cache_dir,
                firmware_file,
            };
            commands::provision::run_provision(&config)
        }
        Commands::Reset { board_id, cache_dir } => commands::reset::run_reset(&board_id, &cache_dir),
        Commands::Devices {
            org_id,
            bearer_token,
            base_url,
        } => commands::devices::run_devices(
            &base_url,
            env_fallback(org_id, "PROVISION_ORG_ID"),
            env_fallback(bearer_token, "PROVISION_API_TOKEN"),
        ),
        Commands::ListBoards => {
            commands::list_boards();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Use the flag value when given, otherwise fall back to the environment
fn env_fallback(value: Option<String>, var: &str) -> Option<String> {
    value.or_else(|| std::env::var(var).ok().filter(|v| !v.is_empty()))
}
