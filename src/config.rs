use anyhow::Result;
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs};

use station_core::Config;

const CONFIG_NAMESPACE: &str = "otastation";
const CONFIG_KEY: &str = "config";

/// Compiled-in defaults from station_config.h (via build.rs env vars).
fn compiled_default() -> Config {
    let mut config = Config::default();
    config.wifi_ssid = env!("WIFI_SSID").to_string();
    config.wifi_password = env!("WIFI_PASSWORD").to_string();
    config.ota_url = env!("FIRMWARE_UPGRADE_URL").to_string();
    config
}

/// Loads configuration from NVS, falling back to (and persisting) the
/// compiled-in defaults. NVS values with empty credentials are patched
/// from the compiled defaults so a wiped partition does not brick the
/// network setup.
pub fn load_or_default(partition: EspDefaultNvsPartition) -> Config {
    match load_from_nvs(partition.clone()) {
        Ok(Some(mut config)) => {
            log::info!("loaded configuration from NVS");
            if config.wifi_ssid.is_empty() {
                let defaults = compiled_default();
                log::warn!(
                    "NVS WiFi credentials empty, using compiled defaults: SSID='{}'",
                    defaults.wifi_ssid
                );
                config.wifi_ssid = defaults.wifi_ssid;
                config.wifi_password = defaults.wifi_password;
            }
            if config.ota_url.is_empty() {
                config.ota_url = compiled_default().ota_url;
            }
            config
        }
        Ok(None) => {
            log::info!("no stored configuration, using compiled defaults");
            let config = compiled_default();
            if let Err(e) = save_to_nvs(partition, &config) {
                log::warn!("failed to persist default config: {:?}", e);
            }
            config
        }
        Err(e) => {
            log::warn!("failed to load config from NVS: {:?}, using defaults", e);
            compiled_default()
        }
    }
}

fn load_from_nvs(partition: EspDefaultNvsPartition) -> Result<Option<Config>> {
    let nvs = EspNvs::new(partition, CONFIG_NAMESPACE, true)?;
    let mut buf = vec![0u8; 1024];
    match nvs.get_blob(CONFIG_KEY, &mut buf)? {
        Some(data) => Ok(Some(serde_json::from_slice(data)?)),
        None => Ok(None),
    }
}

fn save_to_nvs(partition: EspDefaultNvsPartition, config: &Config) -> Result<()> {
    let mut nvs = EspNvs::new(partition, CONFIG_NAMESPACE, true)?;
    let data = serde_json::to_vec(config)?;
    nvs.set_blob(CONFIG_KEY, &data)?;
    Ok(())
}
