//! # mailsync-core
//!
//! Local-first mail cache and sync engine.
//!
//! This crate provides:
//! - **Entity Store** - per-user `SQLite` database of folders, threads,
//!   messages, contacts and drafts, with change notifications
//! - **Remote Gateway** - typed async contract to the mail API, with token
//!   refresh and transient retry handled inside the HTTP implementation
//! - **Sync Engine** - folder tree and paged thread sync with a stale-response guard
//! - **Contact Merge Engine** - device and remote contacts joined per email
//! - **Draft/Outbox Manager** - compose sessions with debounced autosave
//! - **Mutation Coordinator** - optimistic message actions
//!
//! ## Wiring
//!
//! ```ignore
//! use std::sync::Arc;
//! use mailsync_core::{KeyringCredentialStore, MailContext, SyncConfig};
//!
//! let config = SyncConfig::load_default()?;
//! let context = MailContext::from_config(config, Arc::new(KeyringCredentialStore))?;
//! let mailbox = context.mailboxes(user).await?.remove(0);
//! let session = context.mailbox_session(&mailbox).await?;
//! let folders = session.sync.sync_folders(&mailbox).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod contacts;
pub mod context;
pub mod draft;
mod error;
pub mod gateway;
pub mod mailbox;
pub mod mutation;
pub mod store;
pub mod sync;

pub use config::SyncConfig;
pub use contacts::{
    AddressBook, Contact, ContactManager, LocalContact, LocalContactSource, MergedContact,
};
pub use context::{MailContext, MailboxSession};
pub use draft::{BodySource, CancelHandle, ComposeSession, Draft, DraftEvent, SendOutcome};
pub use error::{Error, ErrorKind, Result};
pub use gateway::{Filter, GatewayError, HttpGateway, RemoteGateway};
pub use mailbox::{
    CredentialError, CredentialStore, KeyringCredentialStore, Mailbox, MemoryCredentialStore,
    UserId,
};
pub use mutation::MutationCoordinator;
pub use store::{EntityStore, Folder, FolderRole, Message, StoreEvent, Thread};
pub use sync::{FolderNode, SyncEngine, ThreadSync};
