//! OTA update task.
//!
//! The transfer loop performs long blocking network reads, so it runs in
//! its own thread with a dedicated stack, started only after the network
//! has settled.

pub mod flash;
pub mod partition;
pub mod transport;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;

use station_core::{Config, Platform, StatusReporter, UpdateError, UpdateManager, UpdatePolicy};

use crate::status::StatusStrip;
use crate::system::EspPlatform;
use partition::EspSystemImage;
use transport::HttpsOtaTransport;

/// The HTTPS/TLS stack needs a roomy stack for the transfer loop.
const UPDATE_TASK_STACK: usize = 12 * 1024;

/// Arms the update subsystem: spawns the task that runs one update
/// session to its terminal state. A successful session restarts the
/// device from inside the session.
pub fn spawn_update_task(
    manager: Arc<UpdateManager>,
    config: &Config,
    status: Arc<StatusReporter<StatusStrip>>,
) -> Result<thread::JoinHandle<()>> {
    let url = config.ota_url.clone();
    let start_delay = Duration::from_secs(config.ota_start_delay_secs as u64);
    let policy = UpdatePolicy {
        check_same_version: config.check_same_version,
        check_downgrade: config.check_downgrade,
    };

    let handle = thread::Builder::new()
        .name("ota_update".into())
        .stack_size(UPDATE_TASK_STACK)
        .spawn(move || {
            let mut platform = EspPlatform;
            // Let the network settle before starting a long transfer.
            platform.delay(start_delay);

            let mut transport = HttpsOtaTransport;
            let system = EspSystemImage;
            match manager.run(&url, &mut transport, &system, &status, &mut platform, &policy) {
                Ok(terminal) => log::info!("update session finished: {:?}", terminal),
                Err(UpdateError::AlreadyInProgress) => {
                    log::warn!("update session already running")
                }
            }
        })?;
    Ok(handle)
}
