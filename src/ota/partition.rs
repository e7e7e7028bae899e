//! Secure-boot/partition collaborator backed by the ESP-IDF OTA ops API.

use esp_idf_sys::{
    esp_app_desc_t, esp_efuse_read_secure_version, esp_ota_get_partition_description,
    esp_ota_get_running_partition, esp_ota_get_state_partition,
    esp_ota_img_states_t_ESP_OTA_IMG_ABORTED, esp_ota_img_states_t_ESP_OTA_IMG_INVALID,
    esp_ota_img_states_t_ESP_OTA_IMG_NEW, esp_ota_img_states_t_ESP_OTA_IMG_PENDING_VERIFY,
    esp_ota_img_states_t_ESP_OTA_IMG_VALID, esp_ota_mark_app_valid_cancel_rollback,
};

use station_core::{CommitError, ImageState, SystemImage};

pub struct EspSystemImage;

impl SystemImage for EspSystemImage {
    fn running_version(&self) -> Option<String> {
        unsafe {
            let running = esp_ota_get_running_partition();
            let mut desc = esp_app_desc_t::default();
            if esp_ota_get_partition_description(running, &mut desc) != 0 {
                return None;
            }
            let bytes: Vec<u8> = desc
                .version
                .iter()
                .take_while(|&&c| c != 0)
                .map(|&c| c as u8)
                .collect();
            Some(String::from_utf8_lossy(&bytes).into_owned())
        }
    }

    fn security_version_floor(&self) -> u32 {
        unsafe { esp_efuse_read_secure_version() }
    }

    fn image_state(&self) -> ImageState {
        unsafe {
            let running = esp_ota_get_running_partition();
            let mut state = 0;
            if esp_ota_get_state_partition(running, &mut state) != 0 {
                return ImageState::Undefined;
            }
            match state {
                s if s == esp_ota_img_states_t_ESP_OTA_IMG_NEW => ImageState::New,
                s if s == esp_ota_img_states_t_ESP_OTA_IMG_PENDING_VERIFY => {
                    ImageState::PendingVerify
                }
                s if s == esp_ota_img_states_t_ESP_OTA_IMG_VALID => ImageState::Valid,
                s if s == esp_ota_img_states_t_ESP_OTA_IMG_INVALID => ImageState::Invalid,
                s if s == esp_ota_img_states_t_ESP_OTA_IMG_ABORTED => ImageState::Aborted,
                _ => ImageState::Undefined,
            }
        }
    }

    fn mark_valid_cancel_rollback(&mut self) -> Result<(), CommitError> {
        let result = unsafe { esp_ota_mark_app_valid_cancel_rollback() };
        if result == 0 {
            Ok(())
        } else {
            Err(CommitError(format!(
                "esp_ota_mark_app_valid_cancel_rollback failed (0x{:x})",
                result
            )))
        }
    }
}
