//! Boot partition switch and device restart

use crate::error::CommitError;

/// Marks a validated image as the next boot target.
///
/// `Image` is the token a `TransferSession` hands out from a successful
/// `finalize`, so a partial or rejected download cannot reach `commit`.
pub trait BootSelector<Image> {
    fn commit(&mut self, image: Image) -> Result<(), CommitError>;
}

/// Full device restart. Device implementations do not return.
pub trait Restart {
    fn restart(&mut self);
}
