#![cfg_attr(not(target_os = "espidf"), allow(dead_code))]

mod config;
mod logging;

#[cfg(target_os = "espidf")]
mod network;
#[cfg(target_os = "espidf")]
mod ota;
#[cfg(target_os = "espidf")]
mod system;
#[cfg(target_os = "espidf")]
mod version;

// Generate ESP-IDF app descriptor
// Note: This macro generates warnings about cfg conditions but they're harmless
#[cfg(target_os = "espidf")]
#[allow(unexpected_cfgs)]
mod app_desc {
    esp_idf_sys::esp_app_desc!();
}

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    use esp_idf_hal::delay::FreeRtos;
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::{eventloop::EspSystemEventLoop, nvs::EspDefaultNvsPartition};
    use log::info;

    // Initialize ESP-IDF
    esp_idf_svc::sys::link_patches();

    logging::init_logger().map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    let current = version::running_descriptor();
    info!("ESP32 OTA updater, running firmware {}", current);
    info!("Free heap: {} bytes", unsafe { esp_idf_sys::esp_get_free_heap_size() });
    system::log_reset_reason();

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    // Erases and re-initializes the partition if it is full or from a newer IDF
    let nvs = EspDefaultNvsPartition::take()?;

    let device_config = config::load_or_default(nvs.clone())?;
    if !logging::set_max_level_from_str(&device_config.log_level) {
        log::warn!("Unknown log level '{}', keeping info", device_config.log_level);
    }
    device_config.ota.validate()?;

    ota::task::spawn(ota::task::OtaTaskParams {
        modem: peripherals.modem,
        sys_loop,
        nvs,
        wifi_ssid: device_config.wifi_ssid,
        wifi_password: device_config.wifi_password,
        config: device_config.ota,
        current,
    })?;

    loop {
        FreeRtos::delay_ms(60_000);
        log::debug!("Free heap: {} bytes", unsafe { esp_idf_sys::esp_get_free_heap_size() });
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    // Host builds only carry the configuration and logging units for testing
    let _ = logging::init_logger();
    let defaults = config::DeviceConfig::default();
    log::warn!(
        "esp32-ota-updater targets ESP-IDF; build with --target xtensa-esp32s3-espidf (endpoint: '{}')",
        defaults.ota.endpoint_url
    );
}
