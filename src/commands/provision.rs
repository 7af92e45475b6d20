//! Provision command implementation

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use indicatif::{ProgressBar, ProgressStyle};
use rprovision_core::cache::HttpFetcher;
use rprovision_core::config::ProvisionConfig;
use rprovision_core::discovery::SystemPorts;
use rprovision_core::pipeline::{Collaborators, Pipeline, Stage, TOOLS_DIR};
use rprovision_core::registrar::HttpBackend;
use rprovision_core::serial::SerialKeyExchange;
use rprovision_jlink::JLink;

/// Timeout for artifact downloads
const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for backend registration calls
const BACKEND_TIMEOUT: Duration = Duration::from_secs(20);

/// Run the provision command
pub fn run_provision(config: &ProvisionConfig) -> Result<(), Box<dyn std::error::Error>> {
    let fetcher = HttpFetcher::new(FETCH_TIMEOUT)?;
    let flasher = JLink::new(config.cache_dir.join(TOOLS_DIR));
    let ports = SystemPorts;
    let exchanger = SerialKeyExchange::new();

    let backend = match (&config.org_id, &config.bearer_token) {
        (Some(org_id), Some(token)) if config.auto_register => Some(HttpBackend::new(
            &config.base_url,
            org_id,
            token,
            BACKEND_TIMEOUT,
        )?),
        _ => None,
    };

    let prompt = || {
        println!("Connect the device's USB cable now...");
    };
    let now_millis = || {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64)
    };

    let pipeline = Pipeline::new(
        config,
        Collaborators {
            fetcher: &fetcher,
            backend: backend.as_ref().map(|b| b as &dyn rprovision_core::registrar::DeviceBackend),
            flasher: &flasher,
            ports: &ports,
            exchanger: &exchanger,
            prompt: &prompt,
            now_millis: &now_millis,
        },
    );

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(100));

    let outcome = pipeline.run(|stage| {
        log::info!("entering stage {stage}");
        pb.set_message(stage_message(stage));
        if stage == Stage::DiscoveringPort {
            // keep the spinner off the operator prompt line
            pb.disable_steady_tick();
        }
    });

    match outcome {
        Ok(outcome) => {
            pb.finish_with_message("provisioning complete");
            println!();
            println!("Device ID:  {}", outcome.identity.device_id);
            println!("Device Key: {}", outcome.identity.key);
            if let Some(port) = &outcome.port {
                println!("Serial:     {port}");
            }
            println!();
            println!(
                "{} successfully flashed and provisioned!",
                config.board_id.trim()
            );
            println!("Store the device key now; it is not persisted anywhere.");
            Ok(())
        }
        Err(e) => {
            pb.finish_and_clear();
            Err(e.into())
        }
    }
}

fn stage_message(stage: Stage) -> &'static str {
    match stage {
        Stage::Validating => "Validating parameters...",
        Stage::AcquiringTools => "Acquiring probe tools...",
        Stage::AcquiringFirmware => "Acquiring firmware...",
        Stage::RegisteringDevice => "Registering device with the backend...",
        Stage::PatchingFirmware => "Patching key and timestamp into firmware...",
        Stage::Flashing => "Flashing (this may take a while)...",
        Stage::DiscoveringPort => "Waiting for the device to enumerate...",
        Stage::RunningKeyExchange => "Sending key over serial...",
        Stage::Done => "Finishing up...",
    }
}
