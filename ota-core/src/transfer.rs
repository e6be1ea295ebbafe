//! Chunked image retrieval
//!
//! A [`Transport`] opens one [`TransferSession`] per check cycle. The session
//! yields the candidate descriptor before any of the body is pulled, so a
//! cycle with nothing to install never downloads more than the first bounded
//! request.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use crate::config::TrustAnchor;
use crate::error::{OpenError, TransferError, ValidationError};
use crate::version::VersionDescriptor;

/// Parameters for opening a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRequest<'a> {
    pub url: &'a str,
    pub timeout: Duration,
    pub trust_anchor: TrustAnchor,
    /// Upper bound on bytes fetched per HTTP request
    pub max_request_size: usize,
    pub tx_buffer_size: usize,
}

/// Result of one `pull_next` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullStatus {
    /// More data pending; call again
    InProgress,
    /// Transport reports end of payload
    Done,
    Error(TransferError),
}

pub trait Transport {
    type Session: TransferSession;

    fn open(&mut self, request: &OpenRequest<'_>) -> Result<Self::Session, OpenError>;
}

pub trait TransferSession {
    /// Token proving an image passed finalization; the only thing a
    /// `BootSelector` accepts.
    type Image;

    fn read_descriptor(&mut self) -> Result<VersionDescriptor, TransferError>;

    /// Pull the next chunk. Blocks on network I/O up to the transport timeout.
    fn pull_next(&mut self) -> PullStatus;

    fn bytes_transferred(&self) -> u64;

    /// Declared payload size, when the server announced one
    fn total_size(&self) -> Option<u64>;

    /// True once the entire declared payload has been received
    fn is_complete(&self) -> bool;

    /// Run the trailing integrity checks on a completely received image.
    fn finalize(&mut self) -> Result<Self::Image, ValidationError>;

    /// Release transport and flash resources. Must be safe to call any
    /// number of times.
    fn close(&mut self);
}

/// Owns a session for one cycle and closes it on every exit path,
/// including early returns and unwinding.
pub struct SessionGuard<S: TransferSession> {
    session: S,
}

impl<S: TransferSession> SessionGuard<S> {
    pub fn new(session: S) -> Self {
        Self { session }
    }
}

impl<S: TransferSession> Deref for SessionGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S: TransferSession> DerefMut for SessionGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

impl<S: TransferSession> Drop for SessionGuard<S> {
    fn drop(&mut self) {
        self.session.close();
    }
}

/// Download progress in percent, if the total is known
pub fn progress_percent(received: u64, total: Option<u64>) -> Option<u8> {
    match total {
        Some(0) | None => None,
        Some(total) => Some(((received.min(total) * 100) / total) as u8),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{CallLog, ScriptedSession};

    #[test]
    fn test_guard_closes_on_drop() {
        let log = CallLog::default();
        {
            let _guard = SessionGuard::new(ScriptedSession::new("1.0.0", vec![], log.clone()));
        }
        let calls = log.snapshot();
        assert_eq!(calls.closes, 1);
        assert_eq!(calls.releases, 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let log = CallLog::default();
        {
            let mut guard = SessionGuard::new(ScriptedSession::new("1.0.0", vec![], log.clone()));
            guard.close();
            guard.close();
        }
        let calls = log.snapshot();
        assert_eq!(calls.closes, 3);
        assert_eq!(calls.releases, 1, "resources released exactly once");
    }

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(50, Some(200)), Some(25));
        assert_eq!(progress_percent(300, Some(200)), Some(100));
        assert_eq!(progress_percent(10, None), None);
        assert_eq!(progress_percent(10, Some(0)), None);
    }
}
