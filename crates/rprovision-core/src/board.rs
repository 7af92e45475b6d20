//! Supported board profiles
//!
//! Static mapping from board ids to the debug-probe device string and the
//! firmware artifact's relative path. Every board id accepted by the pipeline
//! resolves to exactly one profile; anything else fails validation before any
//! network or device I/O happens.

use crate::error::ValidationError;

/// Static description of a supported target board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoardProfile {
    /// Board identifier accepted on the command line
    pub board_id: &'static str,
    /// Device string understood by the debug probe
    pub flash_device_name: &'static str,
    /// Firmware artifact path relative to the content base URL
    pub firmware_source_path: &'static str,
}

/// All boards the pipeline knows how to provision
pub const BOARDS: &[BoardProfile] = &[
    BoardProfile {
        board_id: "nrf52dk",
        flash_device_name: "nRF52832_xxAA",
        firmware_source_path: "nrf52dk.elf",
    },
    BoardProfile {
        board_id: "nrf52840dk",
        flash_device_name: "nRF52840_xxAA",
        firmware_source_path: "nrf52840dk.elf",
    },
    BoardProfile {
        board_id: "nrf21540dk",
        flash_device_name: "nRF52840_xxAA",
        firmware_source_path: "nrf21540dk.elf",
    },
    BoardProfile {
        board_id: "xg24_ek2703a",
        flash_device_name: "EFR32MG24BxxxF1536",
        firmware_source_path: "xg24_ek2703a.elf",
    },
    BoardProfile {
        board_id: "xg22_ek4108a",
        flash_device_name: "EFR32MG22CxxxF512",
        firmware_source_path: "xg22_ek4108a.elf",
    },
    BoardProfile {
        board_id: "lp_em_cc2340r5",
        flash_device_name: "CC2340R5",
        firmware_source_path: "lp_em_cc2340r5.elf",
    },
];

/// Resolve a board id to its profile
///
/// Matching is case-insensitive and tolerates surrounding whitespace.
pub fn resolve(board_id: &str) -> Result<&'static BoardProfile, ValidationError> {
    let id = board_id.trim().to_ascii_lowercase();
    BOARDS
        .iter()
        .find(|b| b.board_id == id)
        .ok_or_else(|| ValidationError::UnsupportedBoard(board_id.to_string()))
}

/// Comma-separated board ids for CLI help text
pub fn board_names_short() -> String {
    let names: Vec<&str> = BOARDS.iter().map(|b| b.board_id).collect();
    names.join(", ")
}
