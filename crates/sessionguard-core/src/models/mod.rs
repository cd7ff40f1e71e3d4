//! Data types shared by the store, cache and manager.

pub mod outcome;
pub mod session;

pub use outcome::{VerificationOutcome, VerifyMode};
pub use session::SessionRecord;
