//! Image body retrieval over bounded HTTP range requests
//!
//! [`RangedBody`] sends the first `Range` request, decides from the answer
//! whether the server honours ranges, and then hands out body bytes across
//! as many follow-up requests as the image needs. The HTTP client itself
//! sits behind [`RangeSource`] so the same logic runs on the device and
//! against the in-memory server in `sim`.

use core::fmt::Display;

use crate::error::{OpenError, TransferError};
use crate::range::{next_range, parse_content_range, ContentRange};

pub const HTTP_OK: u16 = 200;
pub const HTTP_PARTIAL_CONTENT: u16 = 206;

/// Status line and the headers the download cares about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub content_range: Option<ContentRange>,
    pub content_length: Option<u64>,
}

impl ResponseHead {
    pub fn from_headers(status: u16, content_range: Option<&str>, content_length: Option<&str>) -> Self {
        Self {
            status,
            content_range: content_range.and_then(parse_content_range),
            content_length: content_length.and_then(|v| v.trim().parse().ok()),
        }
    }
}

/// A connection that can issue `GET` with `Range: bytes=start-end` and
/// read back the response body.
pub trait RangeSource {
    type Error: Display;

    /// Send the request and wait for the response head.
    fn request(&mut self, start: u64, end: u64) -> Result<ResponseHead, Self::Error>;

    /// Read body bytes of the current response. `Ok(0)` once it ends.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

pub struct RangedBody<S> {
    source: S,
    max_request_size: usize,
    /// Server honours `Range`; later spans are fetched with new requests
    ranged: bool,
    total: Option<u64>,
    /// Body bytes left in the current response, when known
    response_remaining: Option<u64>,
    received: u64,
    ended: bool,
}

impl<S: RangeSource> RangedBody<S> {
    /// Request the first `max_request_size` bytes.
    ///
    /// `206` needs a `Content-Range` starting at 0 with a known total. `200`
    /// means the whole image follows in this one response. Client errors go
    /// through `source_error` so the caller can classify them.
    pub fn open<F>(mut source: S, max_request_size: usize, source_error: F) -> Result<Self, OpenError>
    where
        F: FnOnce(S::Error) -> OpenError,
    {
        if max_request_size == 0 {
            return Err(OpenError::InvalidRequest("zero request size".into()));
        }
        let head = source
            .request(0, max_request_size as u64 - 1)
            .map_err(source_error)?;

        let mut body = Self {
            source,
            max_request_size,
            ranged: false,
            total: None,
            response_remaining: None,
            received: 0,
            ended: false,
        };

        match head.status {
            HTTP_PARTIAL_CONTENT => {
                let range = head
                    .content_range
                    .ok_or_else(|| OpenError::InvalidRequest("206 without a usable Content-Range".into()))?;
                if range.start != 0 {
                    return Err(OpenError::InvalidRequest(format!(
                        "first range starts at {} instead of 0",
                        range.start
                    )));
                }
                let total = range
                    .total
                    .ok_or_else(|| OpenError::InvalidRequest("Content-Range without total size".into()))?;
                body.ranged = true;
                body.total = Some(total);
                body.response_remaining = Some(range.len());
            }
            HTTP_OK => {
                log::warn!("Server ignores Range requests; streaming the whole image in one response");
                body.total = head.content_length;
                body.response_remaining = head.content_length;
            }
            status => return Err(OpenError::HttpStatus(status)),
        }
        Ok(body)
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Declared image size, when the server announced one
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn is_ranged(&self) -> bool {
        self.ranged
    }

    /// True once every declared byte arrived, or, without a declared size,
    /// once the response ended.
    pub fn is_complete(&self) -> bool {
        match self.total {
            Some(total) => self.received >= total,
            None => self.ended,
        }
    }

    /// Read body bytes, moving on to the next range when the current
    /// response is used up. Never reads past the current response, so one
    /// call touches at most one request. `Ok(0)` means the image ended.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransferError> {
        if buf.is_empty() || self.ended {
            return Ok(0);
        }
        if self.response_remaining == Some(0) && !self.fetch_next_range()? {
            self.ended = true;
            return Ok(0);
        }

        let want = match self.response_remaining {
            Some(remaining) => remaining.min(buf.len() as u64) as usize,
            None => buf.len(),
        };
        let n = self
            .source
            .read(&mut buf[..want])
            .map_err(|e| TransferError::Io(e.to_string()))?;

        if n == 0 {
            if let (Some(remaining), Some(total)) = (self.response_remaining, self.total) {
                if remaining > 0 {
                    return Err(TransferError::Truncated {
                        received: self.received,
                        expected: total,
                    });
                }
            }
            self.ended = true;
            return Ok(0);
        }

        if let Some(remaining) = self.response_remaining.as_mut() {
            *remaining -= n as u64;
        }
        self.received += n as u64;
        Ok(n)
    }

    /// Fill `len` bytes or fail with `Truncated`.
    pub fn read_prefix(&mut self, len: usize) -> Result<Vec<u8>, TransferError> {
        let mut prefix = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let n = self.read(&mut prefix[filled..])?;
            if n == 0 {
                return Err(TransferError::Truncated {
                    received: filled as u64,
                    expected: len as u64,
                });
            }
            filled += n;
        }
        Ok(prefix)
    }

    /// Request the span after the bytes received so far. Returns false when
    /// nothing is left to fetch.
    fn fetch_next_range(&mut self) -> Result<bool, TransferError> {
        let (true, Some(total)) = (self.ranged, self.total) else {
            return Ok(false);
        };
        let Some((start, end)) = next_range(self.received, total, self.max_request_size) else {
            return Ok(false);
        };

        log::debug!("Requesting bytes {}-{} of {}", start, end, total);
        let head = self
            .source
            .request(start, end)
            .map_err(|e| TransferError::Io(format!("range {}-{}: {}", start, end, e)))?;
        if head.status != HTTP_PARTIAL_CONTENT {
            return Err(TransferError::HttpStatus(head.status));
        }
        match head.content_range {
            Some(range) if range.start == start => {
                self.response_remaining = Some(range.len());
                Ok(true)
            }
            other => Err(TransferError::RangeMismatch {
                expected: start,
                got: other.map(|r| r.start),
            }),
        }
    }
}
