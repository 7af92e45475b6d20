//! Error types for the provisioning pipeline
//!
//! One enum per pipeline concern, unified in [`ProvisionError`]. The
//! controller surfaces the first failure verbatim and halts; nothing in this
//! crate retries automatically.

use std::path::PathBuf;

use thiserror::Error;

/// Input validation failures, raised before any network or device I/O
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Board id does not resolve to a known profile
    #[error("unsupported board '{0}' (run `rprovision list-boards` for supported ids)")]
    UnsupportedBoard(String),

    /// A required parameter is absent
    #[error("missing required parameter: {0}")]
    MissingParameter(&'static str),
}

/// Artifact download and extraction failures
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP client could not be constructed
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),

    /// Transport-level failure while downloading
    #[error("download of {url} failed: {source}")]
    Network {
        /// URL that was being fetched
        url: String,
        /// Underlying transport error
        #[source]
        source: reqwest::Error,
    },

    /// Server answered with a non-success status
    #[error("{url} returned HTTP {status}")]
    HttpStatus {
        /// URL that was being fetched
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Archive could not be unpacked
    #[error("corrupt archive {path}: {reason}")]
    Extract {
        /// Path of the downloaded archive
        path: PathBuf,
        /// Decoder/unpack error text
        reason: String,
    },

    /// Per-board offset metadata did not parse
    #[error("offset metadata from {url} is malformed: {reason}")]
    Metadata {
        /// URL of the metadata document
        url: String,
        /// Parse error text
        reason: String,
    },

    /// Local filesystem failure while staging an artifact
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being written or renamed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Backend registration failures
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// Request never completed
    #[error("backend request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Backend refused the bearer token or organization id
    #[error("backend rejected credentials (check --org-id and --bearer-token)")]
    InvalidCredentials,

    /// Backend answered with an unexpected status
    #[error("backend rejected the request: HTTP {status}")]
    Rejected {
        /// HTTP status code
        status: u16,
    },

    /// Response parsed but did not contain a usable identity
    #[error("backend returned a malformed identity: {0}")]
    MalformedIdentity(String),
}

/// Binary patch failures
#[derive(Debug, Error)]
pub enum PatchError {
    /// Key text is not valid base64
    #[error("device key is not valid base64: {0}")]
    KeyEncoding(String),

    /// Decoded key has the wrong length
    #[error("decoded device key is {0} bytes, expected 32")]
    KeyLength(usize),

    /// A patch region does not fit inside the image
    #[error("patch region {offset:#x}+{len} exceeds image size {image_len}")]
    OutOfBounds {
        /// Start offset of the offending region
        offset: u32,
        /// Region length in bytes
        len: u32,
        /// Total image size
        image_len: usize,
    },

    /// Key and timestamp regions intersect
    #[error("key and UTC patch regions overlap; refusing to patch")]
    RegionOverlap,
}

/// Debug-probe subprocess failures
#[derive(Debug, Error)]
pub enum FlashError {
    /// Probe tool is neither on PATH nor in the cached tools directory
    #[error("flash tool not found on PATH or in {}", searched.display())]
    ToolNotFound {
        /// Cached tools directory that was searched
        searched: PathBuf,
    },

    /// Tool ran but reported failure
    #[error("flash tool exited with status {status}: {stderr}")]
    Probe {
        /// Process exit code
        status: i32,
        /// Tail of the tool's stderr output
        stderr: String,
    },

    /// Tool did not finish within the allotted time
    #[error("flash tool did not finish within {seconds} s; device may need reconnecting")]
    Timeout {
        /// Configured timeout
        seconds: u64,
    },

    /// Tool could not be spawned or its pipes failed
    #[error("failed to run flash tool: {0}")]
    Io(#[from] std::io::Error),
}

/// Serial endpoint discovery failures
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// No endpoint appeared after the settle delay
    #[error("no new serial device detected; check the cable and reconnect the device")]
    NoNewDevice,

    /// Platform enumeration itself failed
    #[error("serial port enumeration failed: {0}")]
    Enumeration(String),
}

/// Serial key-exchange failures
#[derive(Debug, Error)]
pub enum SerialExchangeError {
    /// Port could not be opened or configured
    #[error("serial port {port} error: {source}")]
    Port {
        /// Port name
        port: String,
        /// Underlying serial error
        #[source]
        source: serialport::Error,
    },

    /// Write to the open port failed
    #[error("write to {port} failed: {source}")]
    Write {
        /// Port name
        port: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Unified pipeline error
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// See [`ValidationError`]
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// See [`FetchError`]
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// See [`RegistrationError`]
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    /// See [`PatchError`]
    #[error(transparent)]
    Patch(#[from] PatchError),
    /// See [`FlashError`]
    #[error(transparent)]
    Flash(#[from] FlashError),
    /// See [`DiscoveryError`]
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    /// See [`SerialExchangeError`]
    #[error(transparent)]
    SerialExchange(#[from] SerialExchangeError),
    /// Filesystem failure outside the cache (e.g. writing the merged image)
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Affected path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}
