//! Reset command implementation

use std::path::Path;

use rprovision_core::board;
use rprovision_core::flasher::Flasher;
use rprovision_core::pipeline::TOOLS_DIR;
use rprovision_jlink::JLink;

/// Reset an attached board through the debug probe
///
/// Uses the tool from PATH or the tools cached by an earlier provision run;
/// no network access.
pub fn run_reset(board_id: &str, cache_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let profile = board::resolve(board_id)?;
    let flasher = JLink::new(cache_dir.join(TOOLS_DIR));
    flasher.reset(profile)?;
    println!("{} reset", profile.board_id);
    Ok(())
}
