//! Device registrar
//!
//! Obtains fresh device identities from the key-issuing backend. Registration
//! is not idempotent backend-side: every successful call creates new device
//! records, so nothing here retries. A transport failure leaves it unknown
//! whether an identity was created; the operator decides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RegistrationError;

/// Encryption scheme label sent with every registration request
pub const ENCRYPTION_SCHEME: &str = "AES-256-CTR";

/// A device identity issued by the backend
///
/// The key stays base64 at rest; it is decoded only at the patch or
/// key-exchange boundary. Never persisted by the pipeline: it is displayed
/// to the operator, who owns durable storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Backend-assigned device id
    pub device_id: String,
    /// Base64-encoded 32-byte symmetric key
    pub key: String,
}

/// A previously registered device, as listed by the backend
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceRecord {
    /// Backend-assigned device id
    pub device_id: String,
    /// Operator-assigned name, if any
    #[serde(default)]
    pub name: Option<String>,
}

/// Process-boundary seam for the registration backend
pub trait DeviceBackend {
    /// Create `count` fresh identities
    fn register(&self, count: usize) -> Result<Vec<DeviceIdentity>, RegistrationError>;

    /// List devices already registered with the organization
    fn list(&self) -> Result<Vec<DeviceRecord>, RegistrationError>;
}

#[derive(Serialize)]
struct CreateRequest<'a> {
    n_devices: usize,
    encryption: &'a str,
}

#[derive(Deserialize)]
struct CreateResponse {
    devices: Vec<RawIdentity>,
}

#[derive(Deserialize)]
struct RawIdentity {
    device_id: Option<String>,
    key: Option<String>,
}

#[derive(Deserialize)]
struct ListResponse {
    devices: Vec<DeviceRecord>,
}

/// Blocking HTTP implementation of [`DeviceBackend`]
pub struct HttpBackend {
    client: reqwest::blocking::Client,
    devices_url: String,
    bearer_token: String,
}

impl HttpBackend {
    /// Build a backend client for one organization
    pub fn new(
        base_url: &str,
        org_id: &str,
        bearer_token: &str,
        timeout: Duration,
    ) -> Result<Self, RegistrationError> {
        let client = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            devices_url: format!("{}/org/{}/devices", base_url.trim_end_matches('/'), org_id),
            bearer_token: bearer_token.to_string(),
        })
    }

    fn check_status(status: reqwest::StatusCode) -> Result<(), RegistrationError> {
        match status.as_u16() {
            401 | 403 => Err(RegistrationError::InvalidCredentials),
            s if !status.is_success() => Err(RegistrationError::Rejected { status: s }),
            _ => Ok(()),
        }
    }
}

impl DeviceBackend for HttpBackend {
    fn register(&self, count: usize) -> Result<Vec<DeviceIdentity>, RegistrationError> {
        log::info!("registering {count} device(s) with the backend");
        let response = self
            .client
            .post(&self.devices_url)
            .bearer_auth(&self.bearer_token)
            .json(&CreateRequest {
                n_devices: count,
                encryption: ENCRYPTION_SCHEME,
            })
            .send()?;

        Self::check_status(response.status())?;

        let body: CreateResponse = response
            .json()
            .map_err(|e| RegistrationError::MalformedIdentity(e.to_string()))?;
        validate_identities(body.devices, count)
    }

    fn list(&self) -> Result<Vec<DeviceRecord>, RegistrationError> {
        let response = self
            .client
            .get(&self.devices_url)
            .bearer_auth(&self.bearer_token)
            .send()?;

        Self::check_status(response.status())?;

        let body: ListResponse = response
            .json()
            .map_err(|e| RegistrationError::MalformedIdentity(e.to_string()))?;
        Ok(body.devices)
    }
}

/// Check that the backend returned exactly the identities asked for
///
/// A missing or empty `device_id` or `key` fails the whole batch, even when
/// the transport call itself reported success.
fn validate_identities(
    raw: Vec<RawIdentity>,
    expected: usize,
) -> Result<Vec<DeviceIdentity>, RegistrationError> {
    if raw.len() != expected {
        return Err(RegistrationError::MalformedIdentity(format!(
            "expected {expected} identities, backend returned {}",
            raw.len()
        )));
    }

    raw.into_iter()
        .map(|identity| {
            let device_id = match identity.device_id {
                Some(id) if !id.trim().is_empty() => id,
                _ => {
                    return Err(RegistrationError::MalformedIdentity(
                        "missing device_id".to_string(),
                    ))
                }
            };
            let key = match identity.key {
                Some(key) if !key.trim().is_empty() => key,
                _ => {
                    return Err(RegistrationError::MalformedIdentity(format!(
                        "missing key for device {device_id}"
                    )))
                }
            };
            Ok(DeviceIdentity { device_id, key })
        })
        .collect()
}
