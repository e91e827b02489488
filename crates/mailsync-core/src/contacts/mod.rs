//! Contact merge engine.
//!
//! Remote contacts are synced into the store; device contacts come from a
//! [`LocalContactSource`]. Both are joined per email address into an
//! in-memory map of [`MergedContact`] used for autocomplete and display.

mod manager;
mod model;

pub use manager::{ContactManager, LocalContactSource, NoLocalContacts};
pub use model::{AddressBook, Contact, LocalContact, MergedContact, email_key};
