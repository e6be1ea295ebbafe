//! Reset reason reporting

use log::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetKind {
    PowerOn,
    Software,
    Panic,
    Watchdog,
    Brownout,
    Other,
}

/// Get the last reset reason as a string
pub fn get_reset_reason() -> &'static str {
    let reason = unsafe { esp_idf_sys::esp_reset_reason() };

    match reason {
        esp_idf_sys::esp_reset_reason_t_ESP_RST_UNKNOWN => "Unknown",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_POWERON => "Power-on",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_EXT => "External pin",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_SW => "Software reset",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_PANIC => "Panic",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_INT_WDT => "Interrupt watchdog",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_TASK_WDT => "Task watchdog",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_WDT => "Other watchdog",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_DEEPSLEEP => "Deep sleep",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_BROWNOUT => "Brownout",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_SDIO => "SDIO",
        _ => "Unknown reason code",
    }
}

pub fn reset_kind() -> ResetKind {
    let reason = unsafe { esp_idf_sys::esp_reset_reason() };

    match reason {
        esp_idf_sys::esp_reset_reason_t_ESP_RST_POWERON => ResetKind::PowerOn,
        esp_idf_sys::esp_reset_reason_t_ESP_RST_SW => ResetKind::Software,
        esp_idf_sys::esp_reset_reason_t_ESP_RST_PANIC => ResetKind::Panic,
        esp_idf_sys::esp_reset_reason_t_ESP_RST_INT_WDT
        | esp_idf_sys::esp_reset_reason_t_ESP_RST_TASK_WDT
        | esp_idf_sys::esp_reset_reason_t_ESP_RST_WDT => ResetKind::Watchdog,
        esp_idf_sys::esp_reset_reason_t_ESP_RST_BROWNOUT => ResetKind::Brownout,
        _ => ResetKind::Other,
    }
}

/// Log why we booted. The updater restarts through `esp_restart`, so a
/// software reset usually means a new image was just committed.
pub fn log_reset_reason() -> ResetKind {
    let kind = reset_kind();
    info!("Boot reason: {}", get_reset_reason());
    match kind {
        ResetKind::Software => info!("Software reset detected - likely after OTA update"),
        ResetKind::Panic | ResetKind::Watchdog => warn!("Previous run ended abnormally ({:?})", kind),
        ResetKind::Brownout => warn!("Brownout reset - check the power supply"),
        ResetKind::PowerOn | ResetKind::Other => {}
    }
    kind
}
