//! System-level plumbing: NVS bootstrap, reset diagnostics, restart.

use std::time::Duration;

use anyhow::{bail, Result};
use esp_idf_svc::nvs::EspDefaultNvsPartition;

use station_core::Platform;

/// Initializes NVS flash, recovering once from a full or version-migrated
/// partition by erasing it. A second failure is fatal: running with
/// inconsistent persisted state is unsafe.
pub fn init_nvs() -> Result<EspDefaultNvsPartition> {
    unsafe {
        use esp_idf_sys::*;
        let mut err = nvs_flash_init();
        if err == ESP_ERR_NVS_NO_FREE_PAGES as i32 || err == ESP_ERR_NVS_NEW_VERSION_FOUND as i32 {
            log::warn!("NVS partition unusable (0x{:x}), erasing and retrying once", err);
            let erase = nvs_flash_erase();
            if erase != 0 {
                bail!("NVS erase failed: 0x{:x}", erase);
            }
            err = nvs_flash_init();
        }
        if err != 0 {
            bail!("NVS init failed: 0x{:x}", err);
        }
    }
    Ok(EspDefaultNvsPartition::take()?)
}

/// The last reset reason, for the boot log.
pub fn reset_reason() -> &'static str {
    let reason = unsafe { esp_idf_sys::esp_reset_reason() };
    match reason {
        esp_idf_sys::esp_reset_reason_t_ESP_RST_POWERON => "power-on",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_SW => "software restart",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_PANIC => "panic",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_INT_WDT => "interrupt watchdog",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_TASK_WDT => "task watchdog",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_WDT => "other watchdog",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_DEEPSLEEP => "deep sleep wake",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_BROWNOUT => "brownout",
        _ => "unknown",
    }
}

/// Delay/restart effects for the update session.
pub struct EspPlatform;

impl Platform for EspPlatform {
    fn delay(&mut self, duration: Duration) {
        esp_idf_hal::delay::FreeRtos::delay_ms(duration.as_millis() as u32);
    }

    fn restart(&mut self) {
        log::info!("restarting");
        log::logger().flush();
        unsafe { esp_idf_sys::esp_restart() };
    }
}

/// Restart helper for fatal startup errors.
pub fn restart_after(duration: Duration) -> ! {
    std::thread::sleep(duration);
    unsafe { esp_idf_sys::esp_restart() };
    unreachable!()
}
