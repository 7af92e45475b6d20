//! Serial endpoint discovery
//!
//! Finds the freshly connected device by diffing the set of visible serial
//! port names before and after the operator plugs it in.

use std::collections::BTreeSet;
use std::thread;
use std::time::Duration;

use crate::error::DiscoveryError;

/// Settle delay between the connect prompt and the second enumeration
pub const SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Seam over platform serial-port enumeration
pub trait PortEnumerator {
    /// Names of every serial endpoint currently visible
    fn port_names(&self) -> Result<Vec<String>, DiscoveryError>;
}

/// Production enumerator backed by the operating system's port list
pub struct SystemPorts;

impl PortEnumerator for SystemPorts {
    fn port_names(&self) -> Result<Vec<String>, DiscoveryError> {
        let ports = serialport::available_ports()
            .map_err(|e| DiscoveryError::Enumeration(e.to_string()))?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }
}

/// Detect the endpoint of a newly connected device
///
/// Captures the port set, invokes `prompt` so the operator connects the
/// device, waits `settle`, then re-captures. The result is the
/// lexicographically first name present only in the second capture.
///
/// Composite USB devices can expose several endpoints at once; the
/// lowest-sorted name wins, which may pick the wrong sub-interface on such
/// hardware.
pub fn detect_new_port<E: PortEnumerator + ?Sized>(
    ports: &E,
    prompt: &dyn Fn(),
    settle: Duration,
) -> Result<String, DiscoveryError> {
    let before: BTreeSet<String> = ports.port_names()?.into_iter().collect();
    log::debug!("{} port(s) visible before connect", before.len());

    prompt();
    if !settle.is_zero() {
        thread::sleep(settle);
    }

    let after: BTreeSet<String> = ports.port_names()?.into_iter().collect();
    let port = after
        .difference(&before)
        .next()
        .cloned()
        .ok_or(DiscoveryError::NoNewDevice)?;

    log::info!("detected new device on {port}");
    Ok(port)
}
