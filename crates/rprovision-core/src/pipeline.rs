//! Pipeline controller
//!
//! Sequences validation, acquisition, registration, patching, flashing, and
//! discovery into one strictly ordered run. Every stage transition is
//! one-way; the first failure halts the run and is surfaced verbatim. A
//! failed run restarts from validation, with cached artifacts making the
//! restart cheap.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::board::BoardProfile;
use crate::cache::{self, Artifact, ArtifactKind, Fetcher};
use crate::config::{ProvisionConfig, ProvisionMode};
use crate::discovery::{self, PortEnumerator, SETTLE_DELAY};
use crate::error::{ProvisionError, ValidationError};
use crate::flasher::Flasher;
use crate::patch::{self, PatchOffsets};
use crate::registrar::{DeviceBackend, DeviceIdentity};
use crate::serial::KeyExchanger;

/// Tools archive name below the content base URL
pub const TOOLS_ARCHIVE: &str = "jlink.tar.gz";

/// Directory inside the cache the tools archive extracts into
pub const TOOLS_DIR: &str = "jlink";

/// Delay between resetting the target and opening its serial console
pub const RESET_DELAY: Duration = Duration::from_secs(3);

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Parameter and board checks, before any I/O
    Validating,
    /// Fetch-or-reuse of the debug-probe tools archive
    AcquiringTools,
    /// Fetch-or-reuse of the board firmware image
    AcquiringFirmware,
    /// Backend registration of a fresh identity (auto-register only)
    RegisteringDevice,
    /// Patching key and timestamp into a firmware copy (merge mode only)
    PatchingFirmware,
    /// Programming the target through the debug probe
    Flashing,
    /// Before/after diff of serial endpoints (serial mode only)
    DiscoveringPort,
    /// Pushing the key over the discovered port (serial mode only)
    RunningKeyExchange,
    /// Run finished
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Validating => "validating",
            Stage::AcquiringTools => "acquiring-tools",
            Stage::AcquiringFirmware => "acquiring-firmware",
            Stage::RegisteringDevice => "registering-device",
            Stage::PatchingFirmware => "patching-firmware",
            Stage::Flashing => "flashing",
            Stage::DiscoveringPort => "discovering-port",
            Stage::RunningKeyExchange => "running-key-exchange",
            Stage::Done => "done",
        };
        write!(f, "{name}")
    }
}

/// External collaborators injected into one run
pub struct Collaborators<'a> {
    /// Artifact transport
    pub fetcher: &'a dyn Fetcher,
    /// Registration backend; required only with auto-register
    pub backend: Option<&'a dyn DeviceBackend>,
    /// Debug-probe driver
    pub flasher: &'a dyn Flasher,
    /// Serial endpoint enumeration
    pub ports: &'a dyn PortEnumerator,
    /// Key-exchange channel
    pub exchanger: &'a dyn KeyExchanger,
    /// Operator prompt shown before the second port enumeration
    pub prompt: &'a dyn Fn(),
    /// Wall clock, milliseconds since the Unix epoch
    pub now_millis: &'a dyn Fn() -> u64,
}

/// Result of a successful run
#[derive(Debug, Clone)]
pub struct Outcome {
    /// Identity provisioned into the device
    pub identity: DeviceIdentity,
    /// Discovered serial endpoint (serial mode only)
    pub port: Option<String>,
}

/// One provisioning run
pub struct Pipeline<'a> {
    config: &'a ProvisionConfig,
    collab: Collaborators<'a>,
    /// Discovery settle delay
    pub settle_delay: Duration,
    /// Post-reset delay before the key exchange
    pub reset_delay: Duration,
}

/// The tools archive artifact for a given content base
pub fn tools_artifact(base_url: &str, cache_dir: &Path) -> Artifact {
    Artifact {
        name: "probe tools".to_string(),
        url: format!("{}/{}", base_url.trim_end_matches('/'), TOOLS_ARCHIVE),
        local_path: cache_dir.join(TOOLS_DIR),
        kind: ArtifactKind::TarGz,
    }
}

fn firmware_artifact(base_url: &str, cache_dir: &Path, profile: &BoardProfile) -> Artifact {
    Artifact {
        name: format!("{} firmware", profile.board_id),
        url: format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            profile.firmware_source_path
        ),
        local_path: cache_dir.join(profile.firmware_source_path),
        kind: ArtifactKind::File,
    }
}

impl<'a> Pipeline<'a> {
    /// Build a pipeline over `config` with the given collaborators
    pub fn new(config: &'a ProvisionConfig, collab: Collaborators<'a>) -> Self {
        Self {
            config,
            collab,
            settle_delay: SETTLE_DELAY,
            reset_delay: RESET_DELAY,
        }
    }

    /// Execute the run, reporting each stage through `observe`
    ///
    /// Strictly sequential: no stage begins before the previous one
    /// completes, and nothing is retried.
    pub fn run(&self, mut observe: impl FnMut(Stage)) -> Result<Outcome, ProvisionError> {
        let config = self.config;

        observe(Stage::Validating);
        let profile = config.validate()?;
        if let Some(key) = &config.key {
            patch::decode_key(key)?;
        }
        if config.auto_register && self.collab.backend.is_none() {
            return Err(ValidationError::MissingParameter("--org-id").into());
        }

        observe(Stage::AcquiringTools);
        cache::ensure(
            self.collab.fetcher,
            &tools_artifact(&config.base_url, &config.cache_dir),
        )?;

        observe(Stage::AcquiringFirmware);
        let firmware_path = match &config.firmware_file {
            Some(path) => {
                log::info!("using local firmware {}", path.display());
                path.clone()
            }
            None => cache::ensure(
                self.collab.fetcher,
                &firmware_artifact(&config.base_url, &config.cache_dir, profile),
            )?,
        };

        // Registration creates backend state and cannot be undone, so it
        // runs after the idempotent fetches have already succeeded.
        let identity = if config.auto_register {
            observe(Stage::RegisteringDevice);
            self.register_one()?
        } else {
            DeviceIdentity {
                device_id: config
                    .device_id
                    .clone()
                    .ok_or(ValidationError::MissingParameter("--device-id"))?,
                key: config
                    .key
                    .clone()
                    .ok_or(ValidationError::MissingParameter("--key"))?,
            }
        };

        let port = match config.mode {
            ProvisionMode::Merge => {
                observe(Stage::PatchingFirmware);
                let merged_path = self.patch_firmware(profile, &firmware_path, &identity)?;

                observe(Stage::Flashing);
                if let Err(e) = self.collab.flasher.flash(&merged_path, profile) {
                    // a failed flash leaves the merged file for inspection
                    log::warn!("flash failed, keeping {}", merged_path.display());
                    return Err(e.into());
                }
                if let Err(e) = fs::remove_file(&merged_path) {
                    log::warn!("could not remove {}: {e}", merged_path.display());
                }
                None
            }
            ProvisionMode::Serial => {
                observe(Stage::Flashing);
                self.collab.flasher.flash(&firmware_path, profile)?;

                observe(Stage::DiscoveringPort);
                let port = discovery::detect_new_port(
                    self.collab.ports,
                    self.collab.prompt,
                    self.settle_delay,
                )?;

                observe(Stage::RunningKeyExchange);
                self.exchange_key(profile, &port, &identity)?;
                Some(port)
            }
        };

        observe(Stage::Done);
        Ok(Outcome { identity, port })
    }

    fn register_one(&self) -> Result<DeviceIdentity, ProvisionError> {
        let backend = self
            .collab
            .backend
            .ok_or(ValidationError::MissingParameter("--org-id"))?;
        let mut identities = backend.register(1)?;
        let identity = identities.pop().ok_or_else(|| {
            crate::error::RegistrationError::MalformedIdentity("empty device list".to_string())
        })?;
        log::info!("registered device {}", identity.device_id);
        Ok(identity)
    }

    /// Write the patched firmware copy next to the cached artifacts
    fn patch_firmware(
        &self,
        profile: &BoardProfile,
        firmware_path: &Path,
        identity: &DeviceIdentity,
    ) -> Result<PathBuf, ProvisionError> {
        let key = patch::decode_key(&identity.key)?;
        let offsets = self.resolve_offsets(profile)?;

        let source = fs::read(firmware_path).map_err(|e| ProvisionError::Io {
            path: firmware_path.to_path_buf(),
            source: e,
        })?;

        let utc_millis = (self.collab.now_millis)();
        let patched = patch::patch(&source, &offsets, &key, utc_millis)?;

        let file_name = firmware_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| profile.firmware_source_path.to_string());
        let merged_path = self.config.cache_dir.join(format!("merged-{file_name}"));

        fs::write(&merged_path, &patched).map_err(|e| ProvisionError::Io {
            path: merged_path.clone(),
            source: e,
        })?;
        log::debug!("wrote merged image to {}", merged_path.display());
        Ok(merged_path)
    }

    /// CLI overrides win; anything missing comes from per-board metadata
    fn resolve_offsets(&self, profile: &BoardProfile) -> Result<PatchOffsets, ProvisionError> {
        let config = self.config;
        if let (Some(key_offset), Some(utc_offset)) = (config.key_offset, config.utc_offset) {
            return Ok(PatchOffsets {
                key_offset,
                utc_offset,
            });
        }

        let url = format!(
            "{}/{}.offsets.json",
            config.base_url.trim_end_matches('/'),
            profile.board_id
        );
        let meta = cache::fetch_offsets(self.collab.fetcher, &url)?;
        Ok(PatchOffsets {
            key_offset: config.key_offset.unwrap_or(meta.key_offset),
            utc_offset: config.utc_offset.unwrap_or(meta.utc_offset),
        })
    }

    fn exchange_key(
        &self,
        profile: &BoardProfile,
        port: &str,
        identity: &DeviceIdentity,
    ) -> Result<(), ProvisionError> {
        let key = patch::decode_key(&identity.key)?;

        // restart the firmware so it is listening for the key
        self.collab.flasher.reset(profile)?;
        if !self.reset_delay.is_zero() {
            log::debug!("waiting {:?} for device reset", self.reset_delay);
            thread::sleep(self.reset_delay);
        }

        let utc_millis = (self.collab.now_millis)();
        self.collab.exchanger.exchange(port, &key, utc_millis)?;
        Ok(())
    }
}
