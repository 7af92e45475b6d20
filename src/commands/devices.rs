//! Devices command implementation

use std::time::Duration;

use rprovision_core::registrar::{DeviceBackend, HttpBackend};

const BACKEND_TIMEOUT: Duration = Duration::from_secs(20);

/// List devices registered with the backend
pub fn run_devices(
    base_url: &str,
    org_id: Option<String>,
    bearer_token: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let org_id = org_id.ok_or("missing --org-id (or PROVISION_ORG_ID)")?;
    let bearer_token = bearer_token.ok_or("missing --bearer-token (or PROVISION_API_TOKEN)")?;

    let backend = HttpBackend::new(base_url, &org_id, &bearer_token, BACKEND_TIMEOUT)?;
    let records = backend.list()?;

    if records.is_empty() {
        println!("No devices registered for organization {org_id}");
        return Ok(());
    }

    println!("Registered devices:");
    println!();
    for record in &records {
        match &record.name {
            Some(name) => println!("  {:38} {}", record.device_id, name),
            None => println!("  {}", record.device_id),
        }
    }
    Ok(())
}
