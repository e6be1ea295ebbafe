//! Simulated collaborators for host-side tests
//!
//! Every simulated piece records what was asked of it in a shared
//! [`CallLog`], so a test can hand ownership to the controller and still
//! inspect the calls afterwards.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::body::{RangeSource, RangedBody, ResponseHead, HTTP_OK, HTTP_PARTIAL_CONTENT};
use crate::boot::{BootSelector, Restart};
use crate::connectivity::{ConnectivityProvider, LinkEvent};
use crate::controller::Delay;
use crate::error::{CommitError, ConnectivityError, OpenError, TransferError, ValidationError};
use crate::image::{self, DESCRIPTOR_REGION_LEN};
use crate::range::ContentRange;
use crate::transfer::{OpenRequest, PullStatus, TransferSession, Transport};
use crate::verify::{self, ImageVerifier};
use crate::version::VersionDescriptor;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Calls {
    pub opens: u32,
    pub descriptor_reads: u32,
    pub pulls: u32,
    pub finalizes: u32,
    pub closes: u32,
    /// Closes that actually released resources
    pub releases: u32,
    pub commits: u32,
    pub committed_versions: Vec<String>,
    pub restarts: u32,
    pub inits: u32,
    pub teardowns: u32,
    pub last_request_size: usize,
    /// `Range` spans sent to the in-memory HTTP server
    pub requested_ranges: Vec<(u64, u64)>,
}

#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Calls>>);

impl CallLog {
    fn lock(&self) -> MutexGuard<'_, Calls> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Calls {
        self.lock().clone()
    }
}

/// Image token handed out by simulated sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimImage {
    pub version: String,
    pub bytes: u64,
}

/// Session that replays a fixed list of pull results
pub struct ScriptedSession {
    descriptor: Result<VersionDescriptor, TransferError>,
    steps: VecDeque<PullStatus>,
    finalize: Result<(), ValidationError>,
    chunk: u64,
    received: u64,
    complete: bool,
    complete_on_done: bool,
    released: bool,
    log: CallLog,
}

impl ScriptedSession {
    pub fn new(version: &str, steps: Vec<PullStatus>, log: CallLog) -> Self {
        Self {
            descriptor: Ok(VersionDescriptor::new(version)),
            steps: steps.into(),
            finalize: Ok(()),
            chunk: 4096,
            received: 0,
            complete: false,
            complete_on_done: true,
            released: false,
            log,
        }
    }

    pub fn with_finalize(mut self, result: Result<(), ValidationError>) -> Self {
        self.finalize = result;
        self
    }

    pub fn with_descriptor_error(mut self, error: TransferError) -> Self {
        self.descriptor = Err(error);
        self
    }

    /// `Done` without the declared payload, as a server closing early would
    pub fn incomplete_on_done(mut self) -> Self {
        self.complete_on_done = false;
        self
    }
}

impl TransferSession for ScriptedSession {
    type Image = SimImage;

    fn read_descriptor(&mut self) -> Result<VersionDescriptor, TransferError> {
        self.log.lock().descriptor_reads += 1;
        self.received = DESCRIPTOR_REGION_LEN as u64;
        self.descriptor.clone()
    }

    fn pull_next(&mut self) -> PullStatus {
        self.log.lock().pulls += 1;
        let step = self
            .steps
            .pop_front()
            .unwrap_or_else(|| PullStatus::Error(TransferError::Io("script exhausted".into())));
        match &step {
            PullStatus::InProgress => self.received += self.chunk,
            PullStatus::Done => {
                self.received += self.chunk;
                self.complete = self.complete_on_done;
            }
            PullStatus::Error(_) => {}
        }
        step
    }

    fn bytes_transferred(&self) -> u64 {
        self.received
    }

    fn total_size(&self) -> Option<u64> {
        None
    }

    fn is_complete(&self) -> bool {
        self.complete
    }

    fn finalize(&mut self) -> Result<SimImage, ValidationError> {
        self.log.lock().finalizes += 1;
        if !self.complete {
            return Err(ValidationError::Incomplete { received: self.received });
        }
        self.finalize.clone()?;
        let version = match &self.descriptor {
            Ok(d) => d.version().to_string(),
            Err(_) => String::new(),
        };
        Ok(SimImage { version, bytes: self.received })
    }

    fn close(&mut self) {
        let mut calls = self.log.lock();
        calls.closes += 1;
        if !self.released {
            self.released = true;
            calls.releases += 1;
        }
    }
}

/// Hands out pre-built sessions (or open errors) one per cycle
pub struct ScriptedTransport {
    queue: VecDeque<Result<ScriptedSession, OpenError>>,
    log: CallLog,
}

impl ScriptedTransport {
    pub fn new(log: CallLog) -> Self {
        Self { queue: VecDeque::new(), log }
    }

    pub fn then_session(mut self, session: ScriptedSession) -> Self {
        self.queue.push_back(Ok(session));
        self
    }

    pub fn then_open_error(mut self, error: OpenError) -> Self {
        self.queue.push_back(Err(error));
        self
    }
}

impl Transport for ScriptedTransport {
    type Session = ScriptedSession;

    fn open(&mut self, request: &OpenRequest<'_>) -> Result<ScriptedSession, OpenError> {
        {
            let mut calls = self.log.lock();
            calls.opens += 1;
            calls.last_request_size = request.max_request_size;
        }
        self.queue
            .pop_front()
            .unwrap_or_else(|| Err(OpenError::Connectivity("no scripted session".into())))
    }
}

/// How [`SimHttpServer`] answers range requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerBehavior {
    HonoursRange,
    /// Plain `200` with the whole image and a `Content-Length`
    IgnoresRange,
    /// Answers every request with the span of the first one
    RepeatsFirstRange,
    /// `206` with `Content-Range: bytes a-b/*`
    UnknownTotal,
    /// Honours ranges, but the connection drops once `at` image bytes went out
    EndsEarly { at: usize },
    /// Plain `200` that drops after `at` bytes
    IgnoresRangeEndsEarly { at: usize },
    /// Every request gets this status and no body
    Status(u16),
}

/// In-memory HTTP endpoint serving one image
pub struct SimHttpServer {
    image: Arc<Vec<u8>>,
    behavior: ServerBehavior,
    cursor: usize,
    /// Exclusive end of the current response body
    end: usize,
    first_span: Option<(u64, u64)>,
    log: CallLog,
}

impl SimHttpServer {
    pub fn new(image: Vec<u8>, behavior: ServerBehavior, log: CallLog) -> Self {
        Self::shared(Arc::new(image), behavior, log)
    }

    fn shared(image: Arc<Vec<u8>>, behavior: ServerBehavior, log: CallLog) -> Self {
        Self {
            image,
            behavior,
            cursor: 0,
            end: 0,
            first_span: None,
            log,
        }
    }

    fn respond(&mut self, status: u16, cursor: usize, end: usize) -> ResponseHead {
        self.cursor = cursor;
        self.end = end;
        ResponseHead {
            status,
            content_range: None,
            content_length: None,
        }
    }
}

impl RangeSource for SimHttpServer {
    type Error = Infallible;

    fn request(&mut self, start: u64, end: u64) -> Result<ResponseHead, Infallible> {
        self.log.lock().requested_ranges.push((start, end));
        let len = self.image.len();
        let total = len as u64;

        let head = match self.behavior {
            ServerBehavior::Status(status) => self.respond(status, 0, 0),
            ServerBehavior::IgnoresRange | ServerBehavior::IgnoresRangeEndsEarly { .. } => ResponseHead {
                content_length: Some(total),
                ..self.respond(HTTP_OK, 0, len)
            },
            _ => {
                let (start, end) = match (self.behavior, self.first_span) {
                    (ServerBehavior::RepeatsFirstRange, Some(span)) => span,
                    _ => (start, end),
                };
                if start >= total {
                    return Ok(self.respond(416, 0, 0));
                }
                let end = end.min(total - 1);
                self.first_span.get_or_insert((start, end));
                let announced = match self.behavior {
                    ServerBehavior::UnknownTotal => None,
                    _ => Some(total),
                };
                ResponseHead {
                    content_range: Some(ContentRange { start, end, total: announced }),
                    content_length: Some(end - start + 1),
                    ..self.respond(HTTP_PARTIAL_CONTENT, start as usize, end as usize + 1)
                }
            }
        };
        Ok(head)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Infallible> {
        let limit = match self.behavior {
            ServerBehavior::EndsEarly { at } | ServerBehavior::IgnoresRangeEndsEarly { at } => self.end.min(at),
            _ => self.end,
        };
        let n = buf.len().min(limit.saturating_sub(self.cursor));
        buf[..n].copy_from_slice(&self.image[self.cursor..self.cursor + n]);
        self.cursor += n;
        Ok(n)
    }
}

/// Serves a real ESP image from a [`SimHttpServer`] through the same
/// ranged body reader the device uses, verifying it the way the device does.
pub struct ImageTransport {
    image: Arc<Vec<u8>>,
    behavior: ServerBehavior,
    fail_after_pulls: Option<u32>,
    log: CallLog,
}

impl ImageTransport {
    pub fn new(image: Vec<u8>, log: CallLog) -> Self {
        Self {
            image: Arc::new(image),
            behavior: ServerBehavior::HonoursRange,
            fail_after_pulls: None,
            log,
        }
    }

    pub fn serving(mut self, behavior: ServerBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Drop the connection on the given pull
    pub fn failing_after(mut self, pulls: u32) -> Self {
        self.fail_after_pulls = Some(pulls);
        self
    }
}

impl Transport for ImageTransport {
    type Session = ImageSession;

    fn open(&mut self, request: &OpenRequest<'_>) -> Result<ImageSession, OpenError> {
        {
            let mut calls = self.log.lock();
            calls.opens += 1;
            calls.last_request_size = request.max_request_size;
        }
        if request.url.is_empty() {
            return Err(OpenError::InvalidRequest("empty URL".into()));
        }
        let server = SimHttpServer::shared(Arc::clone(&self.image), self.behavior, self.log.clone());
        let body = RangedBody::open(server, request.max_request_size, |e| match e {})?;
        Ok(ImageSession {
            total: body.total(),
            body: Some(body),
            buf: vec![0u8; request.max_request_size],
            received: 0,
            pulls: 0,
            fail_after_pulls: self.fail_after_pulls,
            verifier: None,
            version: None,
            complete: false,
            released: false,
            log: self.log.clone(),
        })
    }
}

pub struct ImageSession {
    body: Option<RangedBody<SimHttpServer>>,
    buf: Vec<u8>,
    received: u64,
    total: Option<u64>,
    pulls: u32,
    fail_after_pulls: Option<u32>,
    verifier: Option<ImageVerifier>,
    version: Option<String>,
    complete: bool,
    released: bool,
    log: CallLog,
}

impl ImageSession {
    /// Returns true while more of the image is pending
    fn pull_chunk(&mut self) -> Result<bool, TransferError> {
        let Some(verifier) = self.verifier.as_mut() else {
            return Err(TransferError::Io("descriptor not read".into()));
        };
        let body = self
            .body
            .as_mut()
            .ok_or_else(|| TransferError::Io("session closed".into()))?;
        let n = body.read(&mut self.buf)?;
        verifier.update(&self.buf[..n]);
        self.received = body.received();
        self.complete = body.is_complete();
        Ok(n > 0 && !self.complete)
    }
}

impl TransferSession for ImageSession {
    type Image = SimImage;

    fn read_descriptor(&mut self) -> Result<VersionDescriptor, TransferError> {
        self.log.lock().descriptor_reads += 1;
        let body = self
            .body
            .as_mut()
            .ok_or_else(|| TransferError::Io("session closed".into()))?;
        let prefix = body.read_prefix(DESCRIPTOR_REGION_LEN)?;
        self.received = body.received();

        let header = image::parse_header(&prefix)?;
        let descriptor = image::parse_descriptor(&prefix)?;
        let mut verifier = ImageVerifier::new(header.hash_appended);
        verifier.update(&prefix);
        self.verifier = Some(verifier);
        self.version = Some(descriptor.version().to_string());
        Ok(descriptor)
    }

    fn pull_next(&mut self) -> PullStatus {
        self.log.lock().pulls += 1;
        self.pulls += 1;
        if Some(self.pulls) == self.fail_after_pulls {
            return PullStatus::Error(TransferError::Io("connection reset".into()));
        }
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

    fn finalize(&mut self) -> Result<SimImage, ValidationError> {
        self.log.lock().finalizes += 1;
        if !self.complete {
            return Err(ValidationError::Incomplete { received: self.received });
        }
        let verifier = self
            .verifier
            .take()
            .ok_or_else(|| ValidationError::Rejected("finalized twice".into()))?;
        verifier.finish()?;
        let version = self
            .version
            .clone()
            .ok_or_else(|| ValidationError::Rejected("descriptor never read".into()))?;
        Ok(SimImage { version, bytes: self.received })
    }

    fn close(&mut self) {
        let mut calls = self.log.lock();
        calls.closes += 1;
        if !self.released {
            self.released = true;
            self.body = None;
            calls.releases += 1;
        }
    }
}

/// Complete ESP image: descriptor region, `body_len` filler bytes and,
/// if requested, the appended SHA-256.
pub fn build_image(version: &str, body_len: usize, hash_appended: bool) -> Vec<u8> {
    let mut img = image::encode_prefix(version, "ota_update", hash_appended);
    img.extend((0..body_len).map(|i| (i * 7 % 256) as u8));
    if hash_appended {
        verify::append_digest(&mut img);
    }
    img
}

pub struct SimBoot {
    fail: Option<CommitError>,
    log: CallLog,
}

impl SimBoot {
    pub fn new(log: CallLog) -> Self {
        Self { fail: None, log }
    }

    pub fn failing(mut self, error: CommitError) -> Self {
        self.fail = Some(error);
        self
    }
}

impl BootSelector<SimImage> for SimBoot {
    fn commit(&mut self, image: SimImage) -> Result<(), CommitError> {
        let mut calls = self.log.lock();
        calls.commits += 1;
        if let Some(e) = &self.fail {
            return Err(e.clone());
        }
        calls.committed_versions.push(image.version);
        Ok(())
    }
}

pub struct SimRestart {
    log: CallLog,
}

impl SimRestart {
    pub fn new(log: CallLog) -> Self {
        Self { log }
    }
}

impl Restart for SimRestart {
    fn restart(&mut self) {
        self.log.lock().restarts += 1;
    }
}

/// Link whose state tests flip through a [`SimLinkHandle`]
pub struct SimLink {
    up: Arc<AtomicBool>,
    subscribers: Arc<Mutex<Vec<Sender<LinkEvent>>>>,
    failing_inits: u32,
    log: CallLog,
}

impl SimLink {
    pub fn up(log: CallLog) -> Self {
        Self::with_state(true, log)
    }

    pub fn down(log: CallLog) -> Self {
        Self::with_state(false, log)
    }

    fn with_state(up: bool, log: CallLog) -> Self {
        Self {
            up: Arc::new(AtomicBool::new(up)),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            failing_inits: 0,
            log,
        }
    }

    /// Fail the first `n` calls to `init`
    pub fn failing_init(mut self, n: u32) -> Self {
        self.failing_inits = n;
        self
    }

    pub fn handle(&self) -> SimLinkHandle {
        SimLinkHandle {
            up: Arc::clone(&self.up),
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl ConnectivityProvider for SimLink {
    fn init(&mut self) -> Result<(), ConnectivityError> {
        self.log.lock().inits += 1;
        if self.failing_inits > 0 {
            self.failing_inits -= 1;
            return Err(ConnectivityError::Init("association timed out".into()));
        }
        Ok(())
    }

    fn teardown(&mut self) {
        self.log.lock().teardowns += 1;
        self.up.store(false, Ordering::SeqCst);
    }

    fn is_up(&self) -> bool {
        self.up.load(Ordering::SeqCst)
    }

    fn subscribe(&mut self) -> Receiver<LinkEvent> {
        let (tx, rx) = channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }
}

#[derive(Clone)]
pub struct SimLinkHandle {
    up: Arc<AtomicBool>,
    subscribers: Arc<Mutex<Vec<Sender<LinkEvent>>>>,
}

impl SimLinkHandle {
    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
        let event = if up { LinkEvent::Up } else { LinkEvent::Down };
        let subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        for tx in subscribers.iter() {
            let _ = tx.send(event);
        }
    }
}

#[derive(Debug, Default)]
pub struct RecordingDelay {
    pub waits: Vec<Duration>,
}

impl Delay for RecordingDelay {
    fn delay(&mut self, duration: Duration) {
        self.waits.push(duration);
    }
}
