//! Draft and outbox management.
//!
//! A [`ComposeSession`] owns one draft while it is edited. Edits are
//! debounced into remote saves on a dedicated worker task; closing the
//! session flushes pending edits, and sending hands the draft to the
//! server with an optional cancel window.

mod model;
mod session;

pub use model::Draft;
pub use session::{BodySource, CancelHandle, ComposePhase, ComposeSession, DraftEvent, SendOutcome};
