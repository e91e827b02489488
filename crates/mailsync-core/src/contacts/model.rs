//! Contact models: remote contacts, device contacts and their merged view.

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};

use crate::store::model::string_or_int;

/// Normalizes an email for use as a lookup key.
#[must_use]
pub fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

/// A remote contact container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBook {
    /// Server id.
    pub id: i64,
    /// Server uuid.
    #[serde(default)]
    pub uuid: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Default target for new contacts.
    #[serde(default)]
    pub is_principal: bool,
}

/// Decodes contact emails sent either as plain strings or as `{value}` objects.
fn emails<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Plain(String),
        Object { value: String },
    }

    Ok(Option::<Vec<Raw>>::deserialize(deserializer)?
        .unwrap_or_default()
        .into_iter()
        .map(|raw| match raw {
            Raw::Plain(value) | Raw::Object { value } => value,
        })
        .collect())
}

/// A contact stored on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Server id, normalized to a string.
    #[serde(deserialize_with = "string_or_int")]
    pub id: String,
    /// Full name.
    #[serde(default)]
    pub name: String,
    /// First name.
    #[serde(default)]
    pub firstname: String,
    /// Last name.
    #[serde(default)]
    pub lastname: String,
    /// Email addresses.
    #[serde(default, deserialize_with = "emails")]
    pub emails: Vec<String>,
    /// Owning address book.
    #[serde(default, alias = "addressbook_id")]
    pub address_book_id: Option<i64>,
}

impl Contact {
    /// Full name, or first and last name joined.
    #[must_use]
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("{} {}", self.firstname, self.lastname)
                .trim()
                .to_string()
        } else {
            self.name.clone()
        }
    }
}

/// A contact from the device address book.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalContact {
    /// Device identifier.
    pub identifier: String,
    /// Display name.
    pub name: String,
    /// Email addresses.
    pub emails: Vec<String>,
}

/// Local and remote contact information for one email address.
///
/// Rebuilt on every contact refresh; only [`ContactManager::add_contact`]
/// patches an entry in place.
///
/// [`ContactManager::add_contact`]: super::ContactManager::add_contact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedContact {
    /// Email address as it was found.
    pub email: String,
    /// Matching device contact.
    pub local: Option<Arc<LocalContact>>,
    /// Matching remote contact.
    pub remote: Option<Arc<Contact>>,
}

impl MergedContact {
    /// Display name: local first, then remote, else empty.
    #[must_use]
    pub fn name(&self) -> String {
        self.local
            .as_ref()
            .map(|local| local.name.trim().to_string())
            .filter(|name| !name.is_empty())
            .or_else(|| self.remote.as_ref().map(|remote| remote.display_name()))
            .unwrap_or_default()
    }

    /// Returns "Name <email>", or just the email when there is no name.
    #[must_use]
    pub fn display(&self) -> String {
        let name = self.name();
        if name.is_empty() {
            self.email.clone()
        } else {
            format!("{name} <{}>", self.email)
        }
    }

    /// Case-insensitive substring match on name or email.
    #[must_use]
    pub fn matches(&self, query: &str) -> bool {
        let query_lower = query.to_lowercase();
        self.email.to_lowercase().contains(&query_lower)
            || self.name().to_lowercase().contains(&query_lower)
    }
}
