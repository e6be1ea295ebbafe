//! Updater configuration that can be tested independently of NVS

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::image::DESCRIPTOR_REGION_LEN;
use crate::transfer::OpenRequest;

/// Where server certificates are checked against
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TrustAnchor {
    /// Mozilla root bundle compiled into ESP-IDF
    CertificateBundle,
    /// Certificates installed in the ESP-TLS global CA store at boot
    GlobalCaStore,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OtaConfig {
    pub endpoint_url: String,
    pub trust_anchor: TrustAnchor,
    pub check_interval_secs: u32,
    pub timeout_ms: u32,
    pub max_request_size: usize,
    pub tx_buffer_size: usize,
    pub enabled: bool,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            endpoint_url: String::new(),
            trust_anchor: TrustAnchor::CertificateBundle,
            check_interval_secs: 30,
            timeout_ms: 10_000,
            max_request_size: 4096,
            tx_buffer_size: 2048,
            enabled: true,
        }
    }
}

impl OtaConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            endpoint_url: url.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.endpoint_url.trim();
        if url.is_empty() {
            return Err(ConfigError::EmptyUrl);
        }
        if url.starts_with("http://") {
            log::warn!("OTA endpoint {} is not encrypted", url);
        } else if !url.starts_with("https://") {
            return Err(ConfigError::UnsupportedScheme(url.to_string()));
        }
        if self.check_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        // The descriptor must arrive in the first bounded request
        if self.max_request_size < DESCRIPTOR_REGION_LEN {
            return Err(ConfigError::RequestTooSmall {
                got: self.max_request_size,
                min: DESCRIPTOR_REGION_LEN,
            });
        }
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs as u64)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms as u64)
    }

    pub fn open_request(&self) -> OpenRequest<'_> {
        OpenRequest {
            url: self.endpoint_url.trim(),
            timeout: self.timeout(),
            trust_anchor: self.trust_anchor,
            max_request_size: self.max_request_size,
            tx_buffer_size: self.tx_buffer_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_device_build() {
        let config = OtaConfig::default();
        assert_eq!(config.check_interval(), Duration::from_secs(30));
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.max_request_size, 4096);
        assert_eq!(config.tx_buffer_size, 2048);
        assert_eq!(config.trust_anchor, TrustAnchor::CertificateBundle);
    }

    #[test]
    fn test_config_serialization() {
        let config = OtaConfig::with_url("https://updates.example.com/fw.bin");
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: OtaConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: OtaConfig =
            serde_json::from_str(r#"{"endpoint_url":"https://x/fw.bin","check_interval_secs":300}"#).unwrap();
        assert_eq!(config.check_interval_secs, 300);
        assert_eq!(config.timeout_ms, 10_000);
        assert!(config.enabled);
    }

    #[test]
    fn test_validation() {
        assert!(OtaConfig::with_url("https://x/fw.bin").validate().is_ok());
        assert!(OtaConfig::with_url("http://192.168.1.10/fw.bin").validate().is_ok());
        assert_eq!(OtaConfig::default().validate(), Err(ConfigError::EmptyUrl));
        assert!(matches!(
            OtaConfig::with_url("ftp://x/fw.bin").validate(),
            Err(ConfigError::UnsupportedScheme(_))
        ));

        let mut config = OtaConfig::with_url("https://x/fw.bin");
        config.check_interval_secs = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroInterval));

        let mut config = OtaConfig::with_url("https://x/fw.bin");
        config.timeout_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroTimeout));

        let mut config = OtaConfig::with_url("https://x/fw.bin");
        config.max_request_size = 128;
        assert_eq!(
            config.validate(),
            Err(ConfigError::RequestTooSmall { got: 128, min: DESCRIPTOR_REGION_LEN })
        );
    }

    #[test]
    fn test_open_request_trims_url() {
        let config = OtaConfig::with_url("  https://x/fw.bin ");
        let request = config.open_request();
        assert_eq!(request.url, "https://x/fw.bin");
        assert_eq!(request.timeout, Duration::from_millis(10_000));
    }
}
