//! Error types shared by the update state machine and its collaborators

use thiserror::Error;

use crate::controller::UpdateOutcome;

/// Failure to open a transfer session against the update endpoint
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OpenError {
    #[error("network unreachable: {0}")]
    Connectivity(String),

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("timed out after {0} ms")]
    Timeout(u32),

    #[error("server answered HTTP {0}")]
    HttpStatus(u16),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl OpenError {
    /// Outcome recorded for a cycle that could not open its session.
    ///
    /// Link, TLS and timeout failures mean the endpoint was unreachable. A
    /// reachable server that refused the request counts as a transfer failure.
    pub fn outcome(&self) -> UpdateOutcome {
        match self {
            OpenError::Connectivity(_) | OpenError::Tls(_) | OpenError::Timeout(_) => {
                UpdateOutcome::ConnectivityUnavailable
            }
            OpenError::HttpStatus(_) | OpenError::InvalidRequest(_) => UpdateOutcome::TransferFailed,
        }
    }
}

/// Malformed image prefix
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("image prefix too short: {got} of {need} bytes")]
    TooShort { got: usize, need: usize },

    #[error("bad image magic 0x{0:02x}")]
    BadImageMagic(u8),

    #[error("bad app descriptor magic 0x{0:08x}")]
    BadDescriptorMagic(u32),

    #[error("version field is empty or not UTF-8")]
    InvalidVersion,
}

/// Mid-stream failure while pulling the image body
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("stream ended after {received} of {expected} bytes")]
    Truncated { received: u64, expected: u64 },

    #[error("unexpected HTTP {0} mid-transfer")]
    HttpStatus(u16),

    #[error("server did not honour range starting at {expected} (got {got:?})")]
    RangeMismatch { expected: u64, got: Option<u64> },

    #[error("descriptor: {0}")]
    Descriptor(#[from] DescriptorError),

    #[error("flash write failed: {0}")]
    Flash(String),
}

/// Finalization rejected a fully received image
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("payload incomplete: {received} bytes received")]
    Incomplete { received: u64 },

    #[error("image too short to carry a digest ({0} bytes)")]
    TooShort(u64),

    #[error("SHA-256 digest mismatch")]
    DigestMismatch,

    #[error("image rejected: {0}")]
    Rejected(String),
}

/// Boot partition could not be switched
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommitError {
    #[error("no update partition available")]
    NoPartition,

    #[error("failed to set boot partition: {0}")]
    Partition(String),
}

/// Invalid updater configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("endpoint URL is empty")]
    EmptyUrl,

    #[error("unsupported URL scheme in {0}")]
    UnsupportedScheme(String),

    #[error("check interval must be non-zero")]
    ZeroInterval,

    #[error("timeout must be non-zero")]
    ZeroTimeout,

    #[error("max request size {got} is below the {min}-byte descriptor region")]
    RequestTooSmall { got: usize, min: usize },
}

/// Network link could not be brought up
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectivityError {
    #[error("link init failed: {0}")]
    Init(String),
}
