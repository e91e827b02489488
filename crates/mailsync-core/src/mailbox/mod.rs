//! Mailbox identity and credential storage.

pub mod credentials;
mod model;

pub use credentials::{
    CredentialError, CredentialResult, CredentialStore, KeyringCredentialStore,
    MemoryCredentialStore,
};
pub use model::{Mailbox, Quotas, Signature, SignatureResponse, UserId};
