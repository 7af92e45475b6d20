//! Flashing seam
//!
//! The debug-probe tool lives outside the process boundary; the pipeline
//! only sees this trait. The production implementation drives the probe
//! vendor's executable as a subprocess (see the `rprovision-jlink` crate),
//! tests use an in-memory fake.

use std::path::Path;

use crate::board::BoardProfile;
use crate::error::FlashError;

/// Debug interface used for every supported board
pub const INTERFACE: &str = "SWD";

/// Probe clock speed in kHz
pub const SPEED_KHZ: u32 = 4000;

/// Drives the debug probe against one attached target
pub trait Flasher {
    /// Program `image` into the target's flash
    ///
    /// Programming is irreversible within the pipeline; there is no
    /// verify-read-back step. Failure is fatal to the run, remediation is
    /// physical reconnection by the operator.
    fn flash(&self, image: &Path, profile: &BoardProfile) -> Result<(), FlashError>;

    /// Reset the target without reprogramming it
    fn reset(&self, profile: &BoardProfile) -> Result<(), FlashError>;
}
