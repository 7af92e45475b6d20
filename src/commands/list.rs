//! List supported boards

use rprovision_core::board;

/// Print every board the pipeline can provision
pub fn list_boards() {
    println!("Supported boards:");
    println!();
    for profile in board::BOARDS {
        println!(
            "  {:16} {:20} {}",
            profile.board_id, profile.flash_device_name, profile.firmware_source_path
        );
    }
}
