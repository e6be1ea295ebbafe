// OTA transfer session - streams an image over HTTP(S) into the next OTA partition

use core::ffi::c_void;

use embedded_svc::http::Method;
use esp_idf_svc::http::client::{Configuration, EspHttpConnection};
use esp_idf_sys::{
    esp, esp_ota_abort, esp_ota_begin, esp_ota_end, esp_ota_get_next_update_partition, esp_ota_handle_t,
    esp_ota_write, esp_partition_t, EspError, ESP_ERR_HTTP_EAGAIN, ESP_ERR_OTA_VALIDATE_FAILED, ESP_ERR_TIMEOUT,
    OTA_SIZE_UNKNOWN,
};
use ota_core::image::{self, DESCRIPTOR_REGION_LEN};
use ota_core::range::range_header_value;
use ota_core::verify::ImageVerifier;
use ota_core::{
    OpenError, OpenRequest, PullStatus, RangeSource, RangedBody, ResponseHead, TransferError, TransferSession,
    Transport, TrustAnchor, ValidationError, VersionDescriptor,
};

/// ESP-TLS and mbedTLS errors are reported from this base upwards
const ESP_TLS_ERR_BASE: i32 = 0x8000;
const ESP_TLS_ERR_END: i32 = 0x8100;

/// Opens one HTTP(S) session per check cycle
pub struct EspTransport;

/// An image that was fully written and accepted by `esp_ota_end`.
/// Only `EspTransferSession::finalize` creates one.
pub struct FlashedImage {
    partition: *const esp_partition_t,
    bytes: u64,
}

impl FlashedImage {
    pub fn partition(&self) -> *const esp_partition_t {
        self.partition
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

struct FlashWriter {
    partition: *const esp_partition_t,
    handle: esp_ota_handle_t,
}

impl FlashWriter {
    fn begin(image_size: Option<u64>) -> Result<Self, TransferError> {
        let partition = unsafe { esp_ota_get_next_update_partition(core::ptr::null()) };
        if partition.is_null() {
            return Err(TransferError::Flash("no OTA update partition".into()));
        }

        let size = match image_size {
            Some(size) => size as usize,
            None => OTA_SIZE_UNKNOWN as usize,
        };
        let mut handle: esp_ota_handle_t = 0;
        esp!(unsafe { esp_ota_begin(partition, size, &mut handle) })
            .map_err(|e| TransferError::Flash(format!("esp_ota_begin: {}", e)))?;

        log::info!("Writing update to partition at 0x{:x}", unsafe { (*partition).address });
        Ok(Self { partition, handle })
    }

    fn write(&self, data: &[u8]) -> Result<(), TransferError> {
        esp!(unsafe { esp_ota_write(self.handle, data.as_ptr() as *const c_void, data.len()) })
            .map_err(|e| TransferError::Flash(format!("esp_ota_write: {}", e)))
    }

    fn abort(self) {
        unsafe {
            esp_ota_abort(self.handle);
        }
    }
}

/// One HTTP(S) connection re-used for every range of the image
struct HttpRangeSource {
    conn: EspHttpConnection,
    url: String,
}

impl RangeSource for HttpRangeSource {
    type Error = EspError;

    fn request(&mut self, start: u64, end: u64) -> Result<ResponseHead, EspError> {
        let range = range_header_value(start, end);
        self.conn
            .initiate_request(Method::Get, &self.url, &[("Range", range.as_str())])?;
        self.conn.initiate_response()?;
        Ok(ResponseHead::from_headers(
            self.conn.status(),
            self.conn.header("Content-Range"),
            self.conn.header("Content-Length"),
        ))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, EspError> {
        self.conn.read(buf)
    }
}

pub struct EspTransferSession {
    body: Option<RangedBody<HttpRangeSource>>,
    total: Option<u64>,
    received: u64,
    /// Descriptor bytes read before the flash was opened
    pending: Vec<u8>,
    buf: Vec<u8>,
    flash: Option<FlashWriter>,
    verifier: Option<ImageVerifier>,
    complete: bool,
}

impl Transport for EspTransport {
    type Session = EspTransferSession;

    fn open(&mut self, request: &OpenRequest<'_>) -> Result<EspTransferSession, OpenError> {
        if request.url.is_empty() {
            return Err(OpenError::InvalidRequest("empty URL".into()));
        }
        let timeout_ms = request.timeout.as_millis() as u32;

        let conn = EspHttpConnection::new(&http_config(request))
            .map_err(|e| OpenError::Connectivity(format!("HTTP client init: {}", e)))?;
        let source = HttpRangeSource {
            conn,
            url: request.url.to_string(),
        };
        let body = RangedBody::open(source, request.max_request_size, |e| open_error(e, timeout_ms))?;

        log::info!(
            "OTA session open: {} ({} bytes, {})",
            request.url,
            body.total().map_or_else(|| "unknown".to_string(), |t| t.to_string()),
            if body.is_ranged() { "ranged" } else { "single response" }
        );
        Ok(EspTransferSession {
            total: body.total(),
            body: Some(body),
            received: 0,
            pending: Vec::new(),
            buf: vec![0u8; request.max_request_size],
            flash: None,
            verifier: None,
            complete: false,
        })
    }
}

impl EspTransferSession {
    fn body(&mut self) -> Result<&mut RangedBody<HttpRangeSource>, TransferError> {
        self.body
            .as_mut()
            .ok_or_else(|| TransferError::Io("session closed".into()))
    }

    fn store(&mut self, data: &[u8]) -> Result<(), TransferError> {
        let flash = self
            .flash
            .as_ref()
            .ok_or_else(|| TransferError::Flash("flash not open".into()))?;
        flash.write(data)
    }

    /// Returns true while more of the payload is pending
    fn pull_chunk(&mut self) -> Result<bool, TransferError> {
        if self.flash.is_none() {
            if self.verifier.is_none() {
                return Err(TransferError::Io("descriptor not read".into()));
            }
            self.flash = Some(FlashWriter::begin(self.total)?);
            let pending = std::mem::take(&mut self.pending);
            self.store(&pending)?;
        }

        let mut buf = std::mem::take(&mut self.buf);
        let result = self.consume_chunk(&mut buf);
        self.buf = buf;
        result
    }

    fn consume_chunk(&mut self, buf: &mut [u8]) -> Result<bool, TransferError> {
        let body = self.body()?;
        let n = body.read(buf)?;
        let (received, complete) = (body.received(), body.is_complete());
        self.received = received;
        self.complete = complete;

        if n > 0 {
            self.store(&buf[..n])?;
            if let Some(verifier) = self.verifier.as_mut() {
                verifier.update(&buf[..n]);
            }
        }
        Ok(n > 0 && !self.complete)
    }
}

impl TransferSession for EspTransferSession {
    type Image = FlashedImage;

    fn read_descriptor(&mut self) -> Result<VersionDescriptor, TransferError> {
        let body = self.body()?;
        let prefix = body.read_prefix(DESCRIPTOR_REGION_LEN)?;
        let received = body.received();
        self.received = received;

        let header = image::parse_header(&prefix)?;
        let descriptor = image::parse_descriptor(&prefix)?;
        log::debug!(
            "Image header: {} segments, chip id {}, hash appended: {}",
            header.segment_count,
            header.chip_id,
            header.hash_appended
        );

        let mut verifier = ImageVerifier::new(header.hash_appended);
        verifier.update(&prefix);
        self.verifier = Some(verifier);
        self.pending = prefix;
        Ok(descriptor)
    }

    fn pull_next(&mut self) -> PullStatus {
        if self.complete {
            return PullStatus::Done;
        }
        match self.pull_chunk() {
            Ok(true) => PullStatus::InProgress,
            Ok(false) => PullStatus::Done,
            Err(e) => PullStatus::Error(e),
        }
    }

    fn bytes_transferred(&self) -> u64 {
        self.received
    }

    fn total_size(&self) -> Option<u64> {
        self.total
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn finalize(&mut self) -> Result<FlashedImage, ValidationError> {
        if !self.complete {
            return Err(ValidationError::Incomplete { received: self.received });
        }
        let verifier = self
            .verifier
            .take()
            .ok_or_else(|| ValidationError::Rejected("descriptor never read".into()))?;
        let flash = self
            .flash
            .take()
            .ok_or_else(|| ValidationError::Rejected("nothing written to flash".into()))?;

        if let Err(e) = verifier.finish() {
            flash.abort();
            return Err(e);
        }

        // esp_ota_end releases the handle whatever it returns
        let result = unsafe { esp_ota_end(flash.handle) };
        if result == ESP_ERR_OTA_VALIDATE_FAILED as i32 {
            return Err(ValidationError::Rejected("ESP_ERR_OTA_VALIDATE_FAILED".into()));
        }
        esp!(result).map_err(|e| ValidationError::Rejected(format!("esp_ota_end: {}", e)))?;

        Ok(FlashedImage {
            partition: flash.partition,
            bytes: self.received,
        })
    }

    fn close(&mut self) {
        if let Some(flash) = self.flash.take() {
            log::debug!("Aborting unfinished OTA write");
            flash.abort();
        }
        if self.body.take().is_some() {
            log::debug!("OTA session closed after {} bytes", self.received);
        }
    }
}

fn http_config(request: &OpenRequest<'_>) -> Configuration {
    let mut config = Configuration {
        buffer_size_tx: Some(request.tx_buffer_size),
        timeout: Some(request.timeout),
        ..Default::default()
    };
    match request.trust_anchor {
        TrustAnchor::CertificateBundle => {
            config.crt_bundle_attach = Some(esp_idf_sys::esp_crt_bundle_attach);
        }
        TrustAnchor::GlobalCaStore => {
            config.use_global_ca_store = true;
        }
    }
    config
}

fn open_error(e: EspError, timeout_ms: u32) -> OpenError {
    let code = e.code();
    if code == ESP_ERR_HTTP_EAGAIN as i32 || code == ESP_ERR_TIMEOUT as i32 {
        OpenError::Timeout(timeout_ms)
    } else if (ESP_TLS_ERR_BASE..ESP_TLS_ERR_END).contains(&code) {
        OpenError::Tls(e.to_string())
    } else {
        OpenError::Connectivity(e.to_string())
    }
}
