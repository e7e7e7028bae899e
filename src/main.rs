use anyhow::{anyhow, Result};
use esp_idf_hal::prelude::*;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_sys as _; // Binstart
use log::info;
use std::sync::Arc;
use std::time::Duration;

// Generate the ESP-IDF app descriptor (version, project name) embedded
// in the image header; the updater reads it back out of candidates.
#[allow(unexpected_cfgs)]
mod app_desc {
    esp_idf_sys::esp_app_desc!();
}

mod config;
mod logging;
mod network;
mod ota;
mod status;
mod system;

use station_core::{
    commit_running_image, StatusColor, StatusReporter, UpdateManager, WaitOutcome,
};

use crate::network::WifiManager;
use crate::ota::partition::EspSystemImage;
use crate::status::StatusStrip;

/// How long the green "connected" color holds before the indicator goes
/// back to idle.
const CONNECTED_DISPLAY: Duration = Duration::from_secs(2);

fn main() {
    esp_idf_svc::sys::link_patches();

    if logging::init_logger().is_err() {
        println!("logger initialization failed");
    }

    info!(
        "esp32-ota-station {} starting, free heap: {} bytes",
        env!("CARGO_PKG_VERSION"),
        unsafe { esp_idf_sys::esp_get_free_heap_size() }
    );

    if let Err(e) = run() {
        log::error!("fatal: {:?}", e);
        log::error!("restarting in 10 seconds");
        system::restart_after(Duration::from_secs(10));
    }
}

fn run() -> Result<()> {
    info!("boot reason: {}", system::reset_reason());

    // Startup phase 1: persistent storage.
    let nvs = system::init_nvs()?;
    let config = config::load_or_default(nvs.clone());
    config
        .validate()
        .map_err(|e| anyhow!("invalid configuration: {}", e))?;

    let peripherals = Peripherals::take()?;
    let sysloop = EspSystemEventLoop::take()?;

    // Startup phase 2: status indicator.
    let led = StatusStrip::new(peripherals.rmt.channel0, peripherals.pins.gpio48)?;
    let status = Arc::new(StatusReporter::new(led));

    // Startup phase 3: network, with a bounded wait.
    let mut wifi = WifiManager::new(peripherals.modem, sysloop, nvs, &config, status.clone())?;
    wifi.start()?;

    let timeout = Duration::from_secs(config.connect_timeout_secs as u64);
    match wifi.session().wait_until_connected(timeout) {
        WaitOutcome::Connected => {
            info!("network up, IP: {:?}", wifi.ip());
            std::thread::sleep(CONNECTED_DISPLAY);
            status.set_connectivity(StatusColor::Off);
        }
        WaitOutcome::Failed => {
            // Terminal: the retry budget is spent. Stay alive so the
            // operator sees the red indicator; no updates this boot, and
            // a pending-verify image is left to roll back on next boot.
            log::error!("network connection failed, updates disabled this boot");
            return hold_degraded();
        }
        WaitOutcome::TimedOut => {
            log::error!("network connection timed out after {:?}", timeout);
            return hold_degraded();
        }
    }

    // Startup phase 4: arm the update subsystem.
    let manager = Arc::new(UpdateManager::new());
    let update_task = ota::spawn_update_task(manager.clone(), &config, status.clone())?;

    // All startup phases succeeded; if this is the first boot after an
    // update, commit the image and cancel the pending rollback. Failure
    // here is surfaced by commit_running_image and the device keeps
    // running.
    let mut image = EspSystemImage;
    commit_running_image(&mut image);

    // A successful update restarts the device from inside the session,
    // so a normal join means no update was installed.
    if update_task.join().is_err() {
        log::error!("update task panicked");
    }
    info!("update session over; staying connected");
    loop {
        std::thread::sleep(Duration::from_secs(60));
    }
}

/// Keeps the device alive in its degraded state: the status indicator
/// and log output remain the operator's only signal.
fn hold_degraded() -> Result<()> {
    loop {
        std::thread::sleep(Duration::from_secs(60));
    }
}
