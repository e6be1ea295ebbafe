//! Version and build metadata of a firmware image

use heapless::String;
use serde::{Deserialize, Serialize};

/// Field widths of `esp_app_desc_t`
pub const VERSION_LEN: usize = 32;
pub const PROJECT_NAME_LEN: usize = 32;
pub const TIME_LEN: usize = 16;
pub const DATE_LEN: usize = 16;
pub const IDF_VER_LEN: usize = 32;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub project_name: String<PROJECT_NAME_LEN>,
    pub build_time: String<TIME_LEN>,
    pub build_date: String<DATE_LEN>,
    pub idf_version: String<IDF_VER_LEN>,
    pub secure_version: u32,
}

impl BuildInfo {
    /// Fields longer than their C counterparts are truncated.
    pub fn new(project_name: &str, build_time: &str, build_date: &str, idf_version: &str, secure_version: u32) -> Self {
        Self {
            project_name: truncated(project_name),
            build_time: truncated(build_time),
            build_date: truncated(build_date),
            idf_version: truncated(idf_version),
            secure_version,
        }
    }
}

/// Identifies one firmware image. Immutable once read.
///
/// Two descriptors name the same firmware when their version strings are
/// byte-for-byte equal; build metadata is informational only. The version
/// is kept whole: images read from flash never exceed [`VERSION_LEN`], but
/// configured or test versions may.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDescriptor {
    version: std::string::String,
    build: BuildInfo,
}

impl VersionDescriptor {
    /// Descriptor with empty build metadata.
    pub fn new(version: &str) -> Self {
        Self::with_build(version, BuildInfo::default())
    }

    pub fn with_build(version: &str, build: BuildInfo) -> Self {
        Self {
            version: version.to_owned(),
            build,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn build(&self) -> &BuildInfo {
        &self.build
    }
}

impl core::fmt::Display for VersionDescriptor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.build.project_name.is_empty() {
            write!(f, "{}", self.version)
        } else {
            write!(f, "{} {}", self.build.project_name, self.version)
        }
    }
}

/// Copy as much of `s` as fits into a fixed-capacity string.
fn truncated<const N: usize>(s: &str) -> String<N> {
    let mut out = String::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_version_is_kept_whole() {
        let long = "1.0.0-".repeat(10);
        let desc = VersionDescriptor::new(&long);
        assert_eq!(desc.version(), long);
    }

    #[test]
    fn test_versions_sharing_a_long_prefix_differ() {
        let prefix = "1.0.0-build.".repeat(3);
        let a = VersionDescriptor::new(&format!("{prefix}aaaa"));
        let b = VersionDescriptor::new(&format!("{prefix}bbbb"));
        assert!(prefix.len() > VERSION_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn test_build_fields_are_truncated() {
        let build = BuildInfo::new(&"p".repeat(40), "12:00:00", "Jan  1 2024", "v5.3", 0);
        assert_eq!(build.project_name.len(), PROJECT_NAME_LEN);
    }

    #[test]
    fn test_display_includes_project() {
        let build = BuildInfo::new("ota_update", "", "", "", 0);
        let desc = VersionDescriptor::with_build("1.1.0", build);
        assert_eq!(desc.to_string(), "ota_update 1.1.0");
        assert_eq!(VersionDescriptor::new("1.1.0").to_string(), "1.1.0");
    }
}
