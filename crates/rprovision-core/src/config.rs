//! Pipeline configuration
//!
//! One immutable value threaded through every component call instead of
//! ambient environment state. Built by the CLI layer, validated once at the
//! start of a run.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::board::{self, BoardProfile};
use crate::error::ValidationError;

/// How the device receives its key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionMode {
    /// Patch key and timestamp into a copy of the firmware, then flash it
    Merge,
    /// Flash the generic image, then push the key over the serial port
    Serial,
}

impl FromStr for ProvisionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "merge" => Ok(ProvisionMode::Merge),
            "serial" => Ok(ProvisionMode::Serial),
            other => Err(format!("invalid provision option '{other}' (expected merge or serial)")),
        }
    }
}

impl fmt::Display for ProvisionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProvisionMode::Merge => write!(f, "merge"),
            ProvisionMode::Serial => write!(f, "serial"),
        }
    }
}

/// Immutable configuration for one provisioning run
#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    /// Target board id, resolved against [`board::BOARDS`]
    pub board_id: String,
    /// Selected provisioning mode
    pub mode: ProvisionMode,
    /// Caller-supplied device id (required unless auto-registering)
    pub device_id: Option<String>,
    /// Caller-supplied base64 device key (required unless auto-registering)
    pub key: Option<String>,
    /// Organization id for the registration backend
    pub org_id: Option<String>,
    /// Bearer token for the registration backend
    pub bearer_token: Option<String>,
    /// Register a fresh identity with the backend before flashing
    pub auto_register: bool,
    /// Key patch offset override; fetched from board metadata when absent
    pub key_offset: Option<u32>,
    /// UTC patch offset override; fetched from board metadata when absent
    pub utc_offset: Option<u32>,
    /// Base content location for artifacts and the backend API
    pub base_url: String,
    /// Directory holding cached artifacts and the merged output file
    pub cache_dir: PathBuf,
    /// Local firmware image, skipping the firmware fetch entirely
    pub firmware_file: Option<PathBuf>,
}

impl ProvisionConfig {
    /// Validate the configuration and resolve the board profile
    ///
    /// Runs before any network or device I/O. A failure here leaves no side
    /// effects.
    pub fn validate(&self) -> Result<&'static BoardProfile, ValidationError> {
        let profile = board::resolve(&self.board_id)?;

        if self.base_url.trim().is_empty() {
            return Err(ValidationError::MissingParameter("--base-url"));
        }

        if self.auto_register {
            if self.org_id.as_deref().map_or(true, str::is_empty) {
                return Err(ValidationError::MissingParameter("--org-id"));
            }
            if self.bearer_token.as_deref().map_or(true, str::is_empty) {
                return Err(ValidationError::MissingParameter("--bearer-token"));
            }
        } else {
            if self.device_id.as_deref().map_or(true, str::is_empty) {
                return Err(ValidationError::MissingParameter("--device-id"));
            }
            if self.key.as_deref().map_or(true, str::is_empty) {
                return Err(ValidationError::MissingParameter("--key"));
            }
        }

        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ProvisionConfig {
        ProvisionConfig {
            board_id: "xg24_ek2703a".to_string(),
            mode: ProvisionMode::Merge,
            device_id: Some("3f1c".to_string()),
            key: Some("a".repeat(44)),
            org_id: None,
            bearer_token: None,
            auto_register: false,
            key_offset: Some(0x2000),
            utc_offset: Some(0x2020),
            base_url: "http://localhost:8000".to_string(),
            cache_dir: PathBuf::from(".rprovision"),
            firmware_file: None,
        }
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("merge".parse::<ProvisionMode>().unwrap(), ProvisionMode::Merge);
        assert_eq!("Serial".parse::<ProvisionMode>().unwrap(), ProvisionMode::Serial);
        assert!("usb".parse::<ProvisionMode>().is_err());
    }

    #[test]
    fn test_validate_ok() {
        let profile = base_config().validate().unwrap();
        assert_eq!(profile.board_id, "xg24_ek2703a");
    }

    #[test]
    fn test_validate_unsupported_board() {
        let mut config = base_config();
        config.board_id = "unknown-board".to_string();
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::UnsupportedBoard(_)
        ));
    }

    #[test]
    fn test_validate_requires_identity_without_auto_register() {
        let mut config = base_config();
        config.key = None;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::MissingParameter("--key")
        ));

        let mut config = base_config();
        config.device_id = None;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::MissingParameter("--device-id")
        ));
    }

    #[test]
    fn test_validate_requires_credentials_with_auto_register() {
        let mut config = base_config();
        config.auto_register = true;
        config.device_id = None;
        config.key = None;
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::MissingParameter("--org-id")
        ));

        config.org_id = Some("org-1".to_string());
        assert!(matches!(
            config.validate().unwrap_err(),
            ValidationError::MissingParameter("--bearer-token")
        ));

        config.bearer_token = Some("token".to_string());
        assert!(config.validate().is_ok());
    }
}
