//! Error types for the core library.

use thiserror::Error;

use crate::gateway::GatewayError;
use crate::mailbox::CredentialError;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Remote gateway call failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Credential storage error.
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// No principal address book is stored for the mailbox.
    #[error("No principal address book")]
    AddressBookNotFound,

    /// A newly created contact was absent from the refetched list.
    #[error("Contact not found: {0}")]
    ContactNotFound(String),

    /// Folder is not present in the local store.
    #[error("Folder not found: {0}")]
    FolderNotFound(String),

    /// Message is not present in the local store.
    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// The compose session was already sent or closed.
    #[error("Compose session is closed")]
    SessionClosed,
}

/// Coarse error category, used by callers to pick a presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Timeout or lost connection; already retried by the gateway.
    TransportTransient,
    /// Any other network or HTTP failure.
    TransportFatal,
    /// Structured error reported by the server.
    Api,
    /// The credential expired and could not be renewed for this request.
    AuthExpired,
    /// The credential was revoked; the user must sign in again.
    AuthInvalid,
    /// A required local field or record is missing.
    LocalPrecondition,
    /// An entity expected after a round trip is absent.
    NotFound,
    /// Local storage failure.
    Storage,
}

impl Error {
    /// Returns the category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Gateway(e) => e.kind(),
            Self::Database(_) | Self::Serde(_) | Self::Io(_) => ErrorKind::Storage,
            Self::Credential(_) => ErrorKind::AuthExpired,
            Self::Config(_) | Self::AddressBookNotFound | Self::SessionClosed => {
                ErrorKind::LocalPrecondition
            }
            Self::ContactNotFound(_) | Self::FolderNotFound(_) | Self::MessageNotFound(_) => {
                ErrorKind::NotFound
            }
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
