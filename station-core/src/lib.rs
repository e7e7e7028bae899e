//! Station Core - Hardware-independent logic for the ESP32 OTA station
//!
//! This crate contains the connectivity and update state machines so they
//! can be tested on the host platform without ESP32 hardware. Everything
//! that touches a peripheral or the ESP-IDF runtime is behind a trait
//! implemented by the firmware crate.

pub mod config;
pub mod net;
pub mod rollback;
pub mod status;
pub mod update;

pub use config::{Config, ConfigError};
pub use net::{
    ConnectionState, LinkDriver, LinkError, LinkEvent, NetSession, RetryPolicy, WaitOutcome,
};
pub use rollback::{commit_running_image, CommitError, CommitOutcome, ImageState, SystemImage};
pub use status::{Rgb, StatusColor, StatusLed, StatusReporter};
pub use update::{
    AbortReason, BlinkStep, ChunkStatus, FinishError, ImageDescriptor, Platform,
    ProgressBlinker, TransportError, UpdateError, UpdateManager, UpdatePolicy, UpdateState,
    UpdateTransport,
};
