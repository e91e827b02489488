//! Mail entity models.
//!
//! These types decode directly from API payloads and are what the
//! [`EntityStore`](super::EntityStore) persists and hands back.

use std::cmp::Ordering;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Canonical folder role. At most one folder per role exists in a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FolderRole {
    /// Archive folder.
    Archive,
    /// Drafts folder.
    Draft,
    /// Inbox folder.
    Inbox,
    /// Sent mail folder.
    Sent,
    /// Spam/junk folder.
    Spam,
    /// Trash folder.
    Trash,
}

impl FolderRole {
    /// Sort precedence: inbox, drafts, sent, spam, trash, archive.
    #[must_use]
    pub const fn order(self) -> u8 {
        match self {
            Self::Inbox => 1,
            Self::Draft => 2,
            Self::Sent => 3,
            Self::Spam => 4,
            Self::Trash => 5,
            Self::Archive => 6,
        }
    }

    /// Display name used instead of the server name.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Archive => "Archives",
            Self::Draft => "Drafts",
            Self::Inbox => "Inbox",
            Self::Sent => "Sent",
            Self::Spam => "Spam",
            Self::Trash => "Trash",
        }
    }

    /// Wire/storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Archive => "ARCHIVE",
            Self::Draft => "DRAFT",
            Self::Inbox => "INBOX",
            Self::Sent => "SENT",
            Self::Spam => "SPAM",
            Self::Trash => "TRASH",
        }
    }

    /// Parses a role name, case-insensitively. Accepts `drafts` for [`Self::Draft`].
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "ARCHIVE" | "ARCHIVES" => Some(Self::Archive),
            "DRAFT" | "DRAFTS" => Some(Self::Draft),
            "INBOX" => Some(Self::Inbox),
            "SENT" => Some(Self::Sent),
            "SPAM" => Some(Self::Spam),
            "TRASH" => Some(Self::Trash),
            _ => None,
        }
    }
}

fn default_separator() -> String {
    "/".to_string()
}

/// A mail folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Folder {
    /// Server id.
    pub id: String,
    /// Full path, components joined by `separator`.
    pub path: String,
    /// Server display name.
    pub name: String,
    /// Canonical role, if any.
    #[serde(default)]
    pub role: Option<FolderRole>,
    /// Unread messages.
    #[serde(default)]
    pub unread_count: Option<u32>,
    /// Total messages.
    #[serde(default)]
    pub total_count: Option<u32>,
    /// Pinned by the user.
    #[serde(default)]
    pub is_favorite: bool,
    /// Collapsed in the folder list. Local UI state, never overwritten by sync.
    #[serde(default)]
    pub is_collapsed: bool,
    /// Path separator.
    #[serde(default = "default_separator")]
    pub separator: String,
}

impl Folder {
    /// Name to show: the role name for role folders, the server name otherwise.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.role.map_or(self.name.as_str(), |role| role.display_name())
    }

    /// Display ordering: role folders first by role precedence, then
    /// favorites, then by name.
    #[must_use]
    pub fn display_cmp(&self, other: &Self) -> Ordering {
        match (self.role, other.role) {
            (Some(mine), Some(theirs)) => mine.order().cmp(&theirs.order()),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => other
                .is_favorite
                .cmp(&self.is_favorite)
                .then_with(|| self.name.cmp(&other.name)),
        }
    }

    /// Path components.
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.path.split(self.separator.as_str())
    }

    /// Returns true if `self` is `folder` or one of its ancestors.
    #[must_use]
    pub fn is_parent_of(&self, folder: &Self) -> bool {
        let mine: Vec<&str> = self.components().collect();
        let theirs: Vec<&str> = folder.components().collect();
        mine.len() <= theirs.len() && mine.iter().zip(&theirs).all(|(a, b)| a == b)
    }

    /// Path of the direct parent, if the path has more than one component.
    #[must_use]
    pub fn parent_path(&self) -> Option<&str> {
        if self.separator.is_empty() {
            return None;
        }
        self.path
            .rsplit_once(self.separator.as_str())
            .map(|(parent, _)| parent)
    }
}

/// Sorts folders in display order.
pub fn sort_folders(folders: &mut [Folder]) {
    folders.sort_by(Folder::display_cmp);
}

/// A mail address with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Recipient {
    /// Email address.
    pub email: String,
    /// Display name (may be empty).
    #[serde(default)]
    pub name: String,
}

impl Recipient {
    /// Creates a recipient.
    #[must_use]
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: name.into(),
        }
    }

    /// Returns "Name <email>", or just the email when there is no name.
    #[must_use]
    pub fn display(&self) -> String {
        if self.name.is_empty() {
            self.email.clone()
        } else {
            format!("{} <{}>", self.name, self.email)
        }
    }

    /// Name if present, otherwise the email.
    #[must_use]
    pub fn short_name(&self) -> &str {
        if self.name.is_empty() {
            &self.email
        } else {
            &self.name
        }
    }
}

/// Attachment disposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentDisposition {
    /// Rendered inside the body.
    Inline,
    /// Regular attachment.
    Attachment,
}

impl AttachmentDisposition {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inline => "inline",
            Self::Attachment => "attachment",
        }
    }

    /// Parses the storage representation, defaulting to [`Self::Attachment`].
    #[must_use]
    pub fn parse(value: &str) -> Self {
        if value == "inline" {
            Self::Inline
        } else {
            Self::Attachment
        }
    }
}

/// Decodes an id the server sends either as a string or as an integer.
pub(crate) fn string_or_int<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(i64),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Str(s)) => s,
        Some(Raw::Int(i)) => i.to_string(),
        None => String::new(),
    })
}

/// A message attachment. Owned by exactly one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Attachment uuid, once uploaded.
    #[serde(default)]
    pub uuid: Option<String>,
    /// MIME part id, always normalized to a string.
    #[serde(default, deserialize_with = "string_or_int")]
    pub part_id: String,
    /// MIME type.
    pub mime_type: String,
    /// Transfer encoding.
    #[serde(default)]
    pub encoding: Option<String>,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
    /// File name.
    pub name: String,
    /// Inline or attachment.
    pub disposition: AttachmentDisposition,
    /// Content-ID for inline parts.
    #[serde(default)]
    pub content_id: Option<String>,
    /// Download resource path.
    #[serde(default)]
    pub resource: Option<String>,
    /// Link when the file was stored in the cloud drive instead.
    #[serde(default)]
    pub drive_url: Option<String>,
}

impl Attachment {
    /// Local cache path: `<tmp>/<message uid>_<part id>/<name>`.
    #[must_use]
    pub fn local_path(&self, message_uid: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("{message_uid}_{}", self.part_id))
            .join(&self.name)
    }
}

/// Message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    /// Content.
    pub value: String,
    /// MIME type of the content (`text/html` or `text/plain`).
    #[serde(rename = "type", default = "default_body_type")]
    pub body_type: String,
}

fn default_body_type() -> String {
    "text/html".to_string()
}

/// A message. Belongs to one thread and one folder at fetch time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server uid.
    pub uid: String,
    /// `Message-ID` header.
    #[serde(default)]
    pub message_id: Option<String>,
    /// Subject.
    #[serde(default)]
    pub subject: Option<String>,
    /// Date.
    pub date: DateTime<Utc>,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Senders.
    #[serde(default)]
    pub from: Vec<Recipient>,
    /// Recipients.
    #[serde(default)]
    pub to: Vec<Recipient>,
    /// Carbon copy.
    #[serde(default)]
    pub cc: Vec<Recipient>,
    /// Blind carbon copy.
    #[serde(default)]
    pub bcc: Vec<Recipient>,
    /// Reply-To.
    #[serde(default)]
    pub reply_to: Vec<Recipient>,
    /// Full body, only present once fetched on demand.
    #[serde(default)]
    pub body: Option<Body>,
    /// Attachments.
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Folder holding the message.
    #[serde(default)]
    pub folder_id: String,
    /// Preview text.
    #[serde(default)]
    pub preview: String,
    /// Read flag.
    #[serde(default)]
    pub seen: bool,
    /// Starred flag.
    #[serde(default)]
    pub flagged: bool,
    /// Answered flag.
    #[serde(default)]
    pub answered: bool,
    /// Draft flag.
    #[serde(default)]
    pub is_draft: bool,
    /// Same content surfaced in another folder.
    #[serde(default)]
    pub is_duplicate: bool,
    /// Whether any attachment is present.
    #[serde(default)]
    pub has_attachments: bool,
    /// API resource path.
    #[serde(default)]
    pub resource: String,
    /// Resource of the editable draft, for draft messages.
    #[serde(default)]
    pub draft_resource: Option<String>,
}

impl Message {
    /// Subject, or an empty string.
    #[must_use]
    pub fn formatted_subject(&self) -> &str {
        self.subject.as_deref().unwrap_or_default()
    }
}

/// Messages of `messages` that should be shown in a thread.
///
/// Outside the Trash folder, duplicates and messages already moved to the
/// Trash are hidden. Viewing the Trash shows everything. The result is in
/// chronological order.
#[must_use]
pub fn visible_messages(
    messages: Vec<Message>,
    viewing_folder_id: &str,
    trash_folder_id: Option<&str>,
) -> Vec<Message> {
    let viewing_trash = trash_folder_id == Some(viewing_folder_id);
    let mut visible: Vec<Message> = messages
        .into_iter()
        .filter(|m| {
            viewing_trash || (!m.is_duplicate && Some(m.folder_id.as_str()) != trash_folder_id)
        })
        .collect();
    visible.sort_by(|a, b| a.date.cmp(&b.date));
    visible
}

/// A conversation as listed in one folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    /// Server uid.
    pub uid: String,
    /// Folder this thread is listed in.
    #[serde(default)]
    pub folder_id: String,
    /// Subject.
    #[serde(default)]
    pub subject: Option<String>,
    /// Date of the most recent message.
    pub date: DateTime<Utc>,
    /// Constituent messages.
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Unseen constituent messages.
    #[serde(default)]
    pub unseen_messages: u32,
    /// Any constituent message starred.
    #[serde(default)]
    pub flagged: bool,
    /// Any constituent message has attachments.
    #[serde(default)]
    pub has_attachments: bool,
}

impl Thread {
    /// Distinct sender names, in message order, joined by ", ".
    #[must_use]
    pub fn formatted_participants(&self) -> String {
        let mut names: Vec<&str> = Vec::new();
        for sender in self.messages.iter().flat_map(|m| &m.from) {
            let name = sender.short_name();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names.join(", ")
    }
}
