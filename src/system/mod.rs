pub mod reset;

pub use reset::{log_reset_reason, ResetKind};
