// Version of the running image

use core::ffi::{c_char, CStr};

use ota_core::{BuildInfo, VersionDescriptor};

// Cargo package version from Cargo.toml; esp_app_desc!() embeds the same string
pub const CARGO_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Descriptor of the image that is executing right now, read from the
/// `esp_app_desc_t` linked into it.
pub fn running_descriptor() -> VersionDescriptor {
    let desc = unsafe { esp_idf_sys::esp_app_get_description() };
    if desc.is_null() {
        log::warn!("No app descriptor linked; falling back to Cargo version");
        return VersionDescriptor::new(CARGO_VERSION);
    }
    let desc = unsafe { &*desc };

    let build = BuildInfo::new(
        c_field(&desc.project_name),
        c_field(&desc.time),
        c_field(&desc.date),
        c_field(&desc.idf_ver),
        desc.secure_version,
    );
    VersionDescriptor::with_build(c_field(&desc.version), build)
}

fn c_field(field: &[c_char]) -> &str {
    // Fields are NUL-padded; a full field has no terminator
    let bytes = unsafe { core::slice::from_raw_parts(field.as_ptr() as *const u8, field.len()) };
    match CStr::from_bytes_until_nul(bytes) {
        Ok(s) => s.to_str().unwrap_or(""),
        Err(_) => core::str::from_utf8(bytes).unwrap_or(""),
    }
}
