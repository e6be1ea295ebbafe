//! Streaming SHA-256 check of an ESP app image
//!
//! With `hash_appended` set, the last 32 bytes of the image are the SHA-256 of
//! every byte before them. Bytes are fed as they arrive; the verifier holds
//! back the most recent 32 so the digest never covers the trailer.

use sha2::{Digest, Sha256};

use crate::error::ValidationError;
use crate::image::DESCRIPTOR_REGION_LEN;

pub const DIGEST_LEN: usize = 32;

pub struct ImageVerifier {
    hasher: Sha256,
    tail: [u8; DIGEST_LEN],
    tail_len: usize,
    total: u64,
    hash_appended: bool,
}

impl ImageVerifier {
    pub fn new(hash_appended: bool) -> Self {
        Self {
            hasher: Sha256::new(),
            tail: [0; DIGEST_LEN],
            tail_len: 0,
            total: 0,
            hash_appended,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.total += data.len() as u64;

        if data.len() >= DIGEST_LEN {
            // Everything held back plus all but the last 32 new bytes is payload
            self.hasher.update(&self.tail[..self.tail_len]);
            let split = data.len() - DIGEST_LEN;
            self.hasher.update(&data[..split]);
            self.tail.copy_from_slice(&data[split..]);
            self.tail_len = DIGEST_LEN;
            return;
        }

        let overflow = (self.tail_len + data.len()).saturating_sub(DIGEST_LEN);
        if overflow > 0 {
            self.hasher.update(&self.tail[..overflow]);
            self.tail.copy_within(overflow..self.tail_len, 0);
            self.tail_len -= overflow;
        }
        self.tail[self.tail_len..self.tail_len + data.len()].copy_from_slice(data);
        self.tail_len += data.len();
    }

    pub fn bytes_seen(&self) -> u64 {
        self.total
    }

    pub fn finish(self) -> Result<(), ValidationError> {
        let min = if self.hash_appended {
            (DESCRIPTOR_REGION_LEN + DIGEST_LEN) as u64
        } else {
            DESCRIPTOR_REGION_LEN as u64
        };
        if self.total < min {
            return Err(ValidationError::TooShort(self.total));
        }
        if !self.hash_appended {
            log::debug!("Image carries no appended digest; length check only");
            return Ok(());
        }

        let digest = self.hasher.finalize();
        if digest.as_slice() == &self.tail[..] {
            Ok(())
        } else {
            Err(ValidationError::DigestMismatch)
        }
    }
}

/// Append the trailer `ImageVerifier` expects. Used to build test images.
#[cfg(any(test, feature = "sim"))]
pub fn append_digest(image: &mut Vec<u8>) {
    let digest = Sha256::digest(&image[..]);
    image.extend_from_slice(digest.as_slice());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::encode_prefix;

    fn image(body_len: usize) -> Vec<u8> {
        let mut img = encode_prefix("1.1.0", "ota_update", true);
        img.extend((0..body_len).map(|i| (i % 251) as u8));
        append_digest(&mut img);
        img
    }

    #[test]
    fn test_whole_image_at_once() {
        let img = image(1000);
        let mut v = ImageVerifier::new(true);
        v.update(&img);
        assert_eq!(v.bytes_seen(), img.len() as u64);
        assert!(v.finish().is_ok());
    }

    #[test]
    fn test_odd_chunk_sizes() {
        let img = image(4099);
        for chunk in [1usize, 7, 31, 32, 33, 500, 4096] {
            let mut v = ImageVerifier::new(true);
            for part in img.chunks(chunk) {
                v.update(part);
            }
            assert!(v.finish().is_ok(), "chunk size {}", chunk);
        }
    }

    #[test]
    fn test_corrupt_body_detected() {
        let mut img = image(2048);
        img[1500] ^= 0x01;
        let mut v = ImageVerifier::new(true);
        for part in img.chunks(256) {
            v.update(part);
        }
        assert_eq!(v.finish(), Err(ValidationError::DigestMismatch));
    }

    #[test]
    fn test_truncated_image_fails() {
        let img = image(2048);
        let mut v = ImageVerifier::new(true);
        v.update(&img[..img.len() - 10]);
        assert_eq!(v.finish(), Err(ValidationError::DigestMismatch));

        let mut v = ImageVerifier::new(true);
        v.update(&img[..100]);
        assert_eq!(v.finish(), Err(ValidationError::TooShort(100)));
    }

    #[test]
    fn test_no_appended_hash_checks_length_only() {
        let mut img = encode_prefix("1.1.0", "x", false);
        img.extend_from_slice(&[0xAA; 64]);
        let mut v = ImageVerifier::new(false);
        v.update(&img);
        assert!(v.finish().is_ok());
    }
}
