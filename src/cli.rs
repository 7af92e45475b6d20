//! CLI argument parsing

use clap::{Parser, Subcommand};
use rprovision_core::board;
use rprovision_core::config::ProvisionMode;
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Generate dynamic help text for the board argument
fn board_help() -> String {
    format!("Target board [available: {}]", board::board_names_short())
}

#[derive(Parser)]
#[command(name = "rprovision")]
#[command(author, version, about = "Provision IoT devices with a per-device key", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Flash firmware and provision a device key
    Provision {
        /// Target board
        #[arg(short, long, help = board_help())]
        board_id: String,

        /// Device id issued by the backend (not needed with --auto-register)
        #[arg(long)]
        device_id: Option<String>,

        /// Base64 device key issued by the backend (not needed with --auto-register)
        #[arg(long)]
        key: Option<String>,

        /// Organization id (falls back to PROVISION_ORG_ID)
        #[arg(long)]
        org_id: Option<String>,

        /// Backend bearer token (falls back to PROVISION_API_TOKEN)
        #[arg(long)]
        bearer_token: Option<String>,

        /// Register a fresh identity with the backend before flashing
        #[arg(long)]
        auto_register: bool,

        /// Key patch offset, hex or decimal (fetched per board when omitted)
        #[arg(long, value_parser = parse_hex_u32)]
        key_offset: Option<u32>,

        /// UTC patch offset, hex or decimal (fetched per board when omitted)
        #[arg(long, value_parser = parse_hex_u32)]
        utc_offset: Option<u32>,

        /// How the device receives its key (merge or serial)
        #[arg(long, default_value = "merge")]
        provision_option: ProvisionMode,

        /// Content base URL for artifacts and the backend API
        #[arg(long, default_value = "http://localhost:8000")]
        base_url: String,

        /// Directory for cached artifacts and the merged image
        #[arg(long, default_value = ".rprovision")]
        cache_dir: PathBuf,

        /// Local firmware image, skipping the firmware download
        #[arg(long)]
        firmware_file: Option<PathBuf>,
    },

    /// Reset an attached board without reprogramming it
    Reset {
        /// Target board
        #[arg(short, long, help = board_help())]
        board_id: String,

        /// Directory holding the cached probe tools
        #[arg(long, default_value = ".rprovision")]
        cache_dir: PathBuf,
    },

    /// List devices registered with the backend
    Devices {
        /// Organization id (falls back to PROVISION_ORG_ID)
        #[arg(long)]
        org_id: Option<String>,

        /// Backend bearer token (falls back to PROVISION_API_TOKEN)
        #[arg(long)]
        bearer_token: Option<String>,

        /// Backend base URL
        #[arg(long, default_value = "http://localhost:8000")]
        base_url: String,
    },

    /// List supported boards
    ListBoards,
}
