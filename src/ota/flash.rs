//! OTA partition writer using the ESP-IDF OTA API.

use core::ffi::c_void;

use esp_idf_sys::{
    esp_ota_abort, esp_ota_begin, esp_ota_end, esp_ota_get_next_update_partition,
    esp_ota_handle_t, esp_ota_set_boot_partition, esp_ota_write, esp_partition_t,
    ESP_ERR_OTA_VALIDATE_FAILED, OTA_SIZE_UNKNOWN,
};

use station_core::FinishError;

#[derive(Debug)]
pub enum FlashError {
    NoUpdatePartition,
    BeginFailed(i32),
    WriteFailed(i32),
}

/// Streams image bytes into the inactive partition. `finish` validates
/// and activates the image; `abort` (or Drop) discards it so the
/// bootloader never considers the half-written partition bootable.
pub struct OtaFlashWriter {
    update_partition: *const esp_partition_t,
    handle: Option<esp_ota_handle_t>,
    bytes_written: usize,
}

// The raw partition pointer refers to a static ESP-IDF table entry.
unsafe impl Send for OtaFlashWriter {}

impl OtaFlashWriter {
    /// Opens the next update partition for writing. `image_size` may be
    /// unknown when the server sends no Content-Length.
    pub fn begin(image_size: Option<usize>) -> Result<Self, FlashError> {
        let update_partition = unsafe { esp_ota_get_next_update_partition(core::ptr::null()) };
        if update_partition.is_null() {
            return Err(FlashError::NoUpdatePartition);
        }

        let size = image_size.unwrap_or(OTA_SIZE_UNKNOWN as usize);
        let mut handle: esp_ota_handle_t = 0;
        let result = unsafe { esp_ota_begin(update_partition, size as _, &mut handle) };
        if result != 0 {
            return Err(FlashError::BeginFailed(result));
        }

        Ok(Self {
            update_partition,
            handle: Some(handle),
            bytes_written: 0,
        })
    }

    pub fn write(&mut self, data: &[u8]) -> Result<(), FlashError> {
        let handle = self.handle.ok_or(FlashError::WriteFailed(-1))?;
        let result =
            unsafe { esp_ota_write(handle, data.as_ptr() as *const c_void, data.len() as _) };
        if result != 0 {
            return Err(FlashError::WriteFailed(result));
        }
        self.bytes_written += data.len();
        Ok(())
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    /// Validates the received image and makes it the boot partition.
    pub fn finish(mut self) -> Result<(), FinishError> {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => return Err(FinishError::Corrupt("no OTA handle".into())),
        };

        let result = unsafe { esp_ota_end(handle) };
        if result == ESP_ERR_OTA_VALIDATE_FAILED as i32 {
            return Err(FinishError::Corrupt(format!(
                "image validation failed (0x{:x})",
                result
            )));
        } else if result != 0 {
            return Err(FinishError::Corrupt(format!(
                "esp_ota_end failed (0x{:x})",
                result
            )));
        }

        let result = unsafe { esp_ota_set_boot_partition(self.update_partition) };
        if result != 0 {
            return Err(FinishError::Commit(format!(
                "esp_ota_set_boot_partition failed (0x{:x})",
                result
            )));
        }
        Ok(())
    }

    /// Discards the in-flight write and invalidates the partial image.
    pub fn abort(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            let result = unsafe { esp_ota_abort(handle) };
            if result != 0 {
                log::warn!("esp_ota_abort failed: 0x{:x}", result);
            }
        }
    }
}

impl Drop for OtaFlashWriter {
    fn drop(&mut self) {
        self.release();
    }
}
