// Boot partition switch and device restart

use std::time::Duration;

use esp_idf_hal::delay::FreeRtos;
use esp_idf_sys::{esp, esp_ota_set_boot_partition, esp_restart};
use ota_core::{BootSelector, CommitError, Delay, Restart};

use super::session::FlashedImage;

/// Marks a finalized image as the next boot target
pub struct EspBootSelector;

impl BootSelector<FlashedImage> for EspBootSelector {
    fn commit(&mut self, image: FlashedImage) -> Result<(), CommitError> {
        let partition = image.partition();
        if partition.is_null() {
            return Err(CommitError::NoPartition);
        }

        esp!(unsafe { esp_ota_set_boot_partition(partition) })
            .map_err(|e| CommitError::Partition(e.to_string()))?;

        log::info!(
            "Boot partition set to 0x{:x} ({} byte image)",
            unsafe { (*partition).address },
            image.bytes()
        );
        Ok(())
    }
}

pub struct EspRestart;

impl Restart for EspRestart {
    fn restart(&mut self) {
        log::warn!("Restarting into new firmware");
        log::logger().flush();

        // Give some time for final operations
        FreeRtos::delay_ms(1000);

        unsafe {
            esp_restart();
        }
    }
}

/// Blocks the calling FreeRTOS task
pub struct FreeRtosDelay;

impl Delay for FreeRtosDelay {
    fn delay(&mut self, duration: Duration) {
        let ms = duration.as_millis().min(u32::MAX as u128) as u32;
        FreeRtos::delay_ms(ms);
    }
}
