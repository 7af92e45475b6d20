//! rprovision-core - Core library for IoT device provisioning
//!
//! This crate implements the provisioning pipeline: artifact acquisition,
//! binary patching of a per-device key and timestamp into a firmware image,
//! device registration against a key-issuing backend, flashing orchestration
//! through an injected [`flasher::Flasher`], and serial-port discovery.
//!
//! External collaborators (the debug-probe tool, the registration backend,
//! serial enumeration, the operator prompt, and the clock) sit behind traits
//! so the whole pipeline runs against fakes in tests.
//!
//! # Example
//!
//! ```ignore
//! use rprovision_core::pipeline::{Collaborators, Pipeline};
//!
//! let pipeline = Pipeline::new(&config, collaborators);
//! let outcome = pipeline.run(|stage| log::info!("entering {stage}"))?;
//! println!("provisioned device {}", outcome.identity.device_id);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod board;
pub mod cache;
pub mod config;
pub mod discovery;
pub mod error;
pub mod flasher;
pub mod patch;
pub mod pipeline;
pub mod registrar;
pub mod serial;

pub use board::BoardProfile;
pub use config::{ProvisionConfig, ProvisionMode};
pub use error::ProvisionError;
pub use registrar::DeviceIdentity;
