use ota_core::OtaConfig;
use serde::{Deserialize, Serialize};

#[cfg(target_os = "espidf")]
use anyhow::Result;
#[cfg(target_os = "espidf")]
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};

#[cfg(target_os = "espidf")]
const CONFIG_NAMESPACE: &str = "ota";
#[cfg(target_os = "espidf")]
const CONFIG_KEY: &str = "config";
#[cfg(target_os = "espidf")]
const MAX_CONFIG_SIZE: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    // WiFi settings
    pub wifi_ssid: String,
    pub wifi_password: String,

    pub log_level: String,

    // OTA settings
    pub ota: OtaConfig,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        // Compiled-in values from ota_config.h, exported by build.rs
        Self {
            wifi_ssid: env!("WIFI_SSID").to_string(),
            wifi_password: env!("WIFI_PASSWORD").to_string(),
            log_level: "info".to_string(),
            ota: OtaConfig::with_url(env!("OTA_URL")),
        }
    }
}

impl DeviceConfig {
    /// Take compiled-in values for anything left empty in the stored config.
    /// Returns true if a field changed.
    pub fn fill_missing_from(&mut self, defaults: &DeviceConfig) -> bool {
        let mut changed = false;
        if self.wifi_ssid.is_empty() && !defaults.wifi_ssid.is_empty() {
            log::warn!("Stored WiFi SSID empty, using compiled default '{}'", defaults.wifi_ssid);
            self.wifi_ssid = defaults.wifi_ssid.clone();
            self.wifi_password = defaults.wifi_password.clone();
            changed = true;
        }
        if self.ota.endpoint_url.trim().is_empty() && !defaults.ota.endpoint_url.is_empty() {
            log::warn!("Stored OTA URL empty, using compiled default {}", defaults.ota.endpoint_url);
            self.ota.endpoint_url = defaults.ota.endpoint_url.clone();
            changed = true;
        }
        changed
    }

    #[cfg(target_os = "espidf")]
    pub fn save(&self, nvs: &mut EspNvs<NvsDefault>) -> Result<()> {
        let json = serde_json::to_vec(self)?;
        nvs.set_blob(CONFIG_KEY, &json)?;
        log::info!("Configuration saved to NVS");
        Ok(())
    }
}

/// Load the stored configuration, falling back to (and persisting) the
/// compiled-in defaults.
#[cfg(target_os = "espidf")]
pub fn load_or_default(partition: EspDefaultNvsPartition) -> Result<DeviceConfig> {
    let mut nvs = EspNvs::new(partition, CONFIG_NAMESPACE, true)?;
    let defaults = DeviceConfig::default();

    match load_from_nvs(&nvs) {
        Ok(mut config) => {
            log::info!("Loaded configuration from NVS");
            if config.fill_missing_from(&defaults) {
                if let Err(e) = config.save(&mut nvs) {
                    log::warn!("Failed to save updated config: {:?}", e);
                }
            }
            Ok(config)
        }
        Err(e) => {
            log::warn!("Failed to load config from NVS: {:?}, using defaults", e);
            if let Err(save_err) = defaults.save(&mut nvs) {
                log::warn!("Failed to save default config to NVS: {:?}", save_err);
            }
            Ok(defaults)
        }
    }
}

#[cfg(target_os = "espidf")]
fn load_from_nvs(nvs: &EspNvs<NvsDefault>) -> Result<DeviceConfig> {
    let mut buf = vec![0u8; MAX_CONFIG_SIZE];
    let data = nvs
        .get_blob(CONFIG_KEY, &mut buf)?
        .ok_or_else(|| anyhow::anyhow!("Config not found in NVS namespace '{}'", CONFIG_NAMESPACE))?;

    let config: DeviceConfig = serde_json::from_slice(data)?;
    Ok(config)
}
