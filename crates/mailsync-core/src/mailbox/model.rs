//! Mailbox model types.

use serde::{Deserialize, Serialize};

/// Identifier of the authenticated user owning one or more mailboxes.
///
/// One local store and one credential exist per user.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    /// Create a new user ID.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One authenticated remote mail account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mailbox {
    /// Numeric mailbox id.
    pub mailbox_id: i64,
    /// UUID used in API paths.
    pub uuid: String,
    /// Full email address.
    pub email: String,
    /// Local part of the address, as the hosting API names it.
    pub mailbox: String,
    /// Hosting product id.
    pub hosting_id: i64,
    /// Link id between the user and the mailbox.
    pub link_id: i64,
    /// Owning user.
    #[serde(default)]
    pub user_id: UserId,
    /// Unseen messages across all folders.
    #[serde(default)]
    pub unseen_messages: u32,
    /// Last known quota usage.
    #[serde(default)]
    pub quotas: Option<Quotas>,
}

/// Storage quota usage of a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quotas {
    /// Used space, in bytes.
    pub size: u64,
}

impl Quotas {
    /// Hosting limit for a mailbox (20 GiB).
    pub const SIZE_LIMIT: u64 = 21_474_836_480;

    /// Fraction of the limit in use, clamped to `0.0..=1.0`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progression(&self) -> f64 {
        (self.size as f64 / Self::SIZE_LIMIT as f64).clamp(0.0, 1.0)
    }
}

/// A sender identity with its HTML signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Signature id.
    pub id: i64,
    /// Display name of the signature.
    pub name: String,
    /// HTML content.
    #[serde(default)]
    pub content: String,
    /// Sender display name.
    #[serde(default)]
    pub full_name: String,
    /// Sender address.
    pub sender: String,
    /// Whether this is the default identity.
    #[serde(default)]
    pub is_default: bool,
}

/// Signatures available to a mailbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureResponse {
    /// All signatures.
    #[serde(default)]
    pub signatures: Vec<Signature>,
    /// Id of the default signature, if any.
    #[serde(default)]
    pub default_signature_id: Option<i64>,
}

impl SignatureResponse {
    /// Returns the default signature.
    #[must_use]
    pub fn default_signature(&self) -> Option<&Signature> {
        self.default_signature_id
            .and_then(|id| self.signatures.iter().find(|s| s.id == id))
            .or_else(|| self.signatures.iter().find(|s| s.is_default))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_mailbox_without_optional_fields() {
        let mailbox: Mailbox = serde_json::from_str(
            r#"{
                "mailbox_id": 7,
                "uuid": "b1c2",
                "email": "me@example.com",
                "mailbox": "me",
                "hosting_id": 42,
                "link_id": 3
            }"#,
        )
        .unwrap();
        assert_eq!(mailbox.uuid, "b1c2");
        assert_eq!(mailbox.unseen_messages, 0);
        assert!(mailbox.quotas.is_none());
    }

    #[test]
    fn test_quota_progression() {
        assert!((Quotas { size: 0 }.progression()).abs() < f64::EPSILON);
        let half = Quotas {
            size: Quotas::SIZE_LIMIT / 2,
        };
        assert!((half.progression() - 0.5).abs() < 1e-9);
        let over = Quotas {
            size: Quotas::SIZE_LIMIT * 2,
        };
        assert!((over.progression() - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_default_signature() {
        let response = SignatureResponse {
            signatures: vec![
                Signature {
                    id: 1,
                    name: "Work".into(),
                    content: "<b>Work</b>".into(),
                    full_name: "Me".into(),
                    sender: "me@example.com".into(),
                    is_default: true,
                },
                Signature {
                    id: 2,
                    name: "Home".into(),
                    content: String::new(),
                    full_name: "Me".into(),
                    sender: "me@example.com".into(),
                    is_default: false,
                },
            ],
            default_signature_id: Some(2),
        };
        assert_eq!(response.default_signature().unwrap().id, 2);

        let fallback = SignatureResponse {
            default_signature_id: None,
            ..response
        };
        assert_eq!(fallback.default_signature().unwrap().id, 1);
    }
}
