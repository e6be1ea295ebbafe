//! OTA Core - hardware-independent update logic for the ESP32 OTA updater
//!
//! Everything in this crate can be built and tested on the host. The firmware
//! crate plugs ESP-IDF implementations into the traits defined here
//! (`Transport`, `RangeSource`, `BootSelector`, `Restart`, `ConnectivityProvider`,
//! `Delay`).

pub mod backoff;
pub mod body;
pub mod boot;
pub mod config;
pub mod connectivity;
pub mod controller;
pub mod decision;
pub mod error;
pub mod image;
pub mod range;
pub mod transfer;
pub mod verify;
pub mod version;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use body::{RangeSource, RangedBody, ResponseHead};
pub use boot::{BootSelector, Restart};
pub use config::{OtaConfig, TrustAnchor};
pub use connectivity::{wait_for_link_up, ConnectivityProvider, LinkEvent, LinkMonitor, LinkWait};
pub use controller::{CycleState, CycleStats, Delay, StdDelay, UpdateController, UpdateOutcome};
pub use decision::{decide, Decision};
pub use error::{
    CommitError, ConfigError, ConnectivityError, DescriptorError, OpenError, TransferError,
    ValidationError,
};
pub use transfer::{OpenRequest, PullStatus, SessionGuard, TransferSession, Transport};
pub use version::{BuildInfo, VersionDescriptor};
