// ESP-IDF application image prefix
//
// Layout of the first bytes of every app image:
//   esp_image_header_t           24 bytes  (magic 0xE9 at 0, chip id at 12, hash_appended at 23)
//   esp_image_segment_header_t    8 bytes
//   esp_app_desc_t              256 bytes  (magic 0xABCD5432 at 0, version at 16, ...)

use crate::error::DescriptorError;
use crate::version::{BuildInfo, VersionDescriptor};

pub const IMAGE_MAGIC: u8 = 0xE9;
pub const APP_DESC_MAGIC: u32 = 0xABCD_5432;

pub const IMAGE_HEADER_LEN: usize = 24;
pub const SEGMENT_HEADER_LEN: usize = 8;
pub const APP_DESC_LEN: usize = 256;

/// Bytes needed before the version of a candidate image is known
pub const DESCRIPTOR_REGION_LEN: usize = IMAGE_HEADER_LEN + SEGMENT_HEADER_LEN + APP_DESC_LEN;

const HASH_APPENDED_OFFSET: usize = 23;
const CHIP_ID_OFFSET: usize = 12;

// Offsets inside esp_app_desc_t
const SECURE_VERSION_OFFSET: usize = 4;
const VERSION_OFFSET: usize = 16;
const PROJECT_NAME_OFFSET: usize = 48;
const TIME_OFFSET: usize = 80;
const DATE_OFFSET: usize = 96;
const IDF_VER_OFFSET: usize = 112;

/// Facts from the image header that matter to validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub segment_count: u8,
    pub chip_id: u16,
    pub hash_appended: bool,
}

pub fn parse_header(prefix: &[u8]) -> Result<ImageHeader, DescriptorError> {
    if prefix.len() < IMAGE_HEADER_LEN {
        return Err(DescriptorError::TooShort {
            got: prefix.len(),
            need: IMAGE_HEADER_LEN,
        });
    }
    if prefix[0] != IMAGE_MAGIC {
        return Err(DescriptorError::BadImageMagic(prefix[0]));
    }
    Ok(ImageHeader {
        segment_count: prefix[1],
        chip_id: u16::from_le_bytes([prefix[CHIP_ID_OFFSET], prefix[CHIP_ID_OFFSET + 1]]),
        hash_appended: prefix[HASH_APPENDED_OFFSET] == 1,
    })
}

/// Read the version descriptor of an image from its first
/// `DESCRIPTOR_REGION_LEN` bytes.
pub fn parse_descriptor(prefix: &[u8]) -> Result<VersionDescriptor, DescriptorError> {
    if prefix.len() < DESCRIPTOR_REGION_LEN {
        return Err(DescriptorError::TooShort {
            got: prefix.len(),
            need: DESCRIPTOR_REGION_LEN,
        });
    }
    parse_header(prefix)?;

    let desc = &prefix[IMAGE_HEADER_LEN + SEGMENT_HEADER_LEN..DESCRIPTOR_REGION_LEN];
    let magic = read_u32(desc, 0);
    if magic != APP_DESC_MAGIC {
        return Err(DescriptorError::BadDescriptorMagic(magic));
    }

    let version = c_str(&desc[VERSION_OFFSET..VERSION_OFFSET + 32])
        .filter(|v| !v.is_empty())
        .ok_or(DescriptorError::InvalidVersion)?;

    // Metadata fields are informational; garbage there is not fatal
    let build = BuildInfo::new(
        c_str(&desc[PROJECT_NAME_OFFSET..PROJECT_NAME_OFFSET + 32]).unwrap_or(""),
        c_str(&desc[TIME_OFFSET..TIME_OFFSET + 16]).unwrap_or(""),
        c_str(&desc[DATE_OFFSET..DATE_OFFSET + 16]).unwrap_or(""),
        c_str(&desc[IDF_VER_OFFSET..IDF_VER_OFFSET + 32]).unwrap_or(""),
        read_u32(desc, SECURE_VERSION_OFFSET),
    );

    Ok(VersionDescriptor::with_build(version, build))
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// NUL-terminated (or field-filling) UTF-8 string
fn c_str(field: &[u8]) -> Option<&str> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    core::str::from_utf8(&field[..end]).ok()
}

/// Build a descriptor region the way `esp_app_desc!()` and esptool lay it out.
/// Used by simulations and tests to serve realistic images.
#[cfg(any(test, feature = "sim"))]
pub fn encode_prefix(version: &str, project: &str, hash_appended: bool) -> Vec<u8> {
    let mut out = vec![0u8; DESCRIPTOR_REGION_LEN];
    out[0] = IMAGE_MAGIC;
    out[1] = 1;
    out[CHIP_ID_OFFSET..CHIP_ID_OFFSET + 2].copy_from_slice(&9u16.to_le_bytes()); // ESP32-S3
    out[HASH_APPENDED_OFFSET] = hash_appended as u8;

    let desc = &mut out[IMAGE_HEADER_LEN + SEGMENT_HEADER_LEN..];
    desc[0..4].copy_from_slice(&APP_DESC_MAGIC.to_le_bytes());
    put(&mut desc[VERSION_OFFSET..VERSION_OFFSET + 32], version);
    put(&mut desc[PROJECT_NAME_OFFSET..PROJECT_NAME_OFFSET + 32], project);
    put(&mut desc[TIME_OFFSET..TIME_OFFSET + 16], "12:00:00");
    put(&mut desc[DATE_OFFSET..DATE_OFFSET + 16], "Oct 19 2026");
    put(&mut desc[IDF_VER_OFFSET..IDF_VER_OFFSET + 32], "v5.3");
    out
}

#[cfg(any(test, feature = "sim"))]
fn put(field: &mut [u8], value: &str) {
    let n = value.len().min(field.len() - 1);
    field[..n].copy_from_slice(&value.as_bytes()[..n]);
}
