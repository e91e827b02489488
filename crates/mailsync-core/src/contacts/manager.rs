//! Merged contact map and remote contact sync.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::model::{AddressBook, Contact, LocalContact, MergedContact, email_key};
use crate::gateway::RemoteGateway;
use crate::mailbox::Mailbox;
use crate::store::{EntityStore, Recipient};
use crate::{Error, Result};

/// Device address book.
#[async_trait]
pub trait LocalContactSource: Send + Sync {
    /// All device contacts. An inaccessible address book yields no contacts.
    async fn contacts(&self) -> Vec<LocalContact>;
}

/// Source for platforms without a device address book.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLocalContacts;

#[async_trait]
impl LocalContactSource for NoLocalContacts {
    async fn contacts(&self) -> Vec<LocalContact> {
        Vec::new()
    }
}

/// Keeps the merged contact view of one user.
pub struct ContactManager {
    gateway: Arc<dyn RemoteGateway>,
    store: EntityStore,
    local: Arc<dyn LocalContactSource>,
    merged: RwLock<HashMap<String, MergedContact>>,
}

impl ContactManager {
    /// Creates a manager with an empty merged view.
    #[must_use]
    pub fn new(
        gateway: Arc<dyn RemoteGateway>,
        store: EntityStore,
        local: Arc<dyn LocalContactSource>,
    ) -> Self {
        Self {
            gateway,
            store,
            local,
            merged: RwLock::new(HashMap::new()),
        }
    }

    /// Syncs address books and contacts, then rebuilds the merged view.
    ///
    /// The merge runs even when the remote fetch fails, so device contacts
    /// stay available offline.
    ///
    /// # Errors
    ///
    /// Returns the fetch error after merging, or the store error.
    pub async fn refresh(&self, mailbox: &Mailbox) -> Result<()> {
        let fetched = self.fetch_remote(mailbox).await;
        if let Err(e) = &fetched {
            warn!("Contact refresh failed, merging stored contacts: {}", e);
        }
        self.merge_contacts().await?;
        fetched
    }

    async fn fetch_remote(&self, mailbox: &Mailbox) -> Result<()> {
        let address_books = self.gateway.address_books(mailbox).await?;
        let contacts = self.gateway.contacts(mailbox).await?;
        self.store.upsert_contacts(&address_books, &contacts).await?;
        info!(
            "Synced {} address books and {} contacts",
            address_books.len(),
            contacts.len()
        );
        Ok(())
    }

    /// Rebuilds the merged view from device contacts and stored remote
    /// contacts. Returns the number of entries.
    ///
    /// # Errors
    ///
    /// Returns an error if reading stored contacts fails; the previous view
    /// is kept in that case.
    pub async fn merge_contacts(&self) -> Result<usize> {
        let local = self.local.contacts().await;
        let remote = self.store.contacts().await?;

        let mut merged: HashMap<String, MergedContact> = HashMap::new();
        for contact in local.into_iter().map(Arc::new) {
            for email in &contact.emails {
                let entry = merged.entry(email_key(email)).or_insert_with(|| MergedContact {
                    email: email.clone(),
                    local: None,
                    remote: None,
                });
                entry.local = Some(Arc::clone(&contact));
            }
        }
        for contact in remote.into_iter().map(Arc::new) {
            for email in &contact.emails {
                let entry = merged.entry(email_key(email)).or_insert_with(|| MergedContact {
                    email: email.clone(),
                    local: None,
                    remote: None,
                });
                entry.remote = Some(Arc::clone(&contact));
            }
        }

        let count = merged.len();
        *self.merged.write().unwrap_or_else(PoisonError::into_inner) = merged;
        debug!("Merged {} contact entries", count);
        Ok(count)
    }

    /// Merged contact for an email address.
    #[must_use]
    pub fn contact(&self, email: &str) -> Option<MergedContact> {
        self.merged
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&email_key(email))
            .cloned()
    }

    /// Merged contacts whose name or email contains `query`, ignoring case.
    #[must_use]
    pub fn contacts_matching(&self, query: &str) -> Vec<MergedContact> {
        let mut matches: Vec<MergedContact> = self
            .merged
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|contact| contact.matches(query))
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.email.cmp(&b.email));
        matches
    }

    /// Creates a remote contact for `recipient` in the principal address
    /// book and patches the merged entry for its email.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AddressBookNotFound`] without a principal address
    /// book, [`Error::ContactNotFound`] if the created contact is missing
    /// from the refetched list, or the gateway or store error.
    pub async fn add_contact(
        &self,
        mailbox: &Mailbox,
        recipient: &Recipient,
    ) -> Result<MergedContact> {
        let address_book = self
            .store
            .principal_address_book()
            .await?
            .ok_or(Error::AddressBookNotFound)?;

        let id = self
            .gateway
            .add_contact(mailbox, recipient, &address_book)
            .await?;
        let contact = self
            .gateway
            .contacts(mailbox)
            .await?
            .into_iter()
            .find(|contact| contact.id == id)
            .ok_or_else(|| Error::ContactNotFound(id.clone()))?;
        self.store.insert_contact(&contact).await?;
        info!("Added contact {} to address book {}", id, address_book.id);

        let contact = Arc::new(contact);
        let mut merged = self.merged.write().unwrap_or_else(PoisonError::into_inner);
        let entry = match merged.entry(email_key(&recipient.email)) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(MergedContact {
                email: recipient.email.clone(),
                local: None,
                remote: None,
            }),
        };
        entry.remote = Some(contact);
        Ok(entry.clone())
    }

    /// The address book new contacts go to.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn principal_address_book(&self) -> Result<Option<AddressBook>> {
        self.store.principal_address_book().await
    }

    /// Stored address book by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn address_book(&self, id: i64) -> Result<Option<AddressBook>> {
        self.store.address_book(id).await
    }

    /// Stored remote contact by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn remote_contact(&self, id: &str) -> Result<Option<Contact>> {
        self.store.contact(id).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use crate::gateway::fake::{FakeGateway, mailbox};

    struct Device(Vec<LocalContact>);

    #[async_trait]
    impl LocalContactSource for Device {
        async fn contacts(&self) -> Vec<LocalContact> {
            self.0.clone()
        }
    }

    fn local(name: &str, emails: &[&str]) -> LocalContact {
        LocalContact {
            identifier: name.to_string(),
            name: name.to_string(),
            emails: emails.iter().map(ToString::to_string).collect(),
        }
    }

    fn remote(id: &str, name: &str, emails: &[&str]) -> Contact {
        Contact {
            id: id.to_string(),
            name: name.to_string(),
            firstname: String::new(),
            lastname: String::new(),
            emails: emails.iter().map(ToString::to_string).collect(),
            address_book_id: Some(1),
        }
    }

    fn principal() -> AddressBook {
        AddressBook {
            id: 1,
            uuid: "book".to_string(),
            name: "Contacts".to_string(),
            is_principal: true,
        }
    }

    async fn manager(gateway: &Arc<FakeGateway>, device: Vec<LocalContact>) -> ContactManager {
        let store = EntityStore::in_memory().await.unwrap();
        ContactManager::new(gateway.clone(), store, Arc::new(Device(device)))
    }

    #[tokio::test]
    async fn test_merge_fans_out_per_email() {
        let gateway = Arc::new(FakeGateway::default());
        *gateway.contacts.lock().unwrap() = vec![remote("9", "Bea Remote", &["b@x.com"])];
        let manager = manager(&gateway, vec![local("Ann", &["a@x.com", "b@x.com"])]).await;

        manager.refresh(&mailbox()).await.unwrap();

        assert_eq!(manager.contacts_matching("").len(), 2);
        let b = manager.contact("B@X.com").unwrap();
        assert!(b.local.is_some());
        assert!(b.remote.is_some());
        assert_eq!(b.name(), "Ann");
        let a = manager.contact("a@x.com").unwrap();
        assert!(a.remote.is_none());
    }

    #[tokio::test]
    async fn test_later_contact_wins_on_shared_email() {
        let gateway = Arc::new(FakeGateway::default());
        *gateway.contacts.lock().unwrap() = vec![
            remote("1", "Old Remote", &["b@x.com"]),
            remote("2", "New Remote", &["b@x.com"]),
        ];
        let device = vec![local("Ann", &["a@x.com"]), local("Anna", &["A@x.com"])];
        let manager = manager(&gateway, device).await;

        manager.refresh(&mailbox()).await.unwrap();

        assert_eq!(manager.contacts_matching("").len(), 2);
        assert_eq!(manager.contact("a@x.com").unwrap().name(), "Anna");
        let b = manager.contact("b@x.com").unwrap();
        assert_eq!(b.remote.unwrap().id, "2");
    }

    #[tokio::test]
    async fn test_failed_refresh_still_merges_local() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.fail("contacts");
        let manager = manager(&gateway, vec![local("Ann", &["a@x.com"])]).await;

        let err = manager.refresh(&mailbox()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransportFatal);
        assert_eq!(manager.contact("a@x.com").unwrap().name(), "Ann");
    }

    #[tokio::test]
    async fn test_search_is_case_insensitive() {
        let gateway = Arc::new(FakeGateway::default());
        *gateway.contacts.lock().unwrap() = vec![
            remote("1", "Grace Hopper", &["grace@navy.mil"]),
            remote("2", "Alan Turing", &["alan@bletchley.uk"]),
        ];
        let manager = manager(&gateway, Vec::new()).await;
        manager.refresh(&mailbox()).await.unwrap();

        let found = manager.contacts_matching("HOPPER");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].email, "grace@navy.mil");
        assert_eq!(manager.contacts_matching("bletchley").len(), 1);
    }

    #[tokio::test]
    async fn test_add_contact_requires_principal_book() {
        let gateway = Arc::new(FakeGateway::default());
        let manager = manager(&gateway, Vec::new()).await;

        let err = manager
            .add_contact(&mailbox(), &Recipient::new("new@x.com", "New"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::AddressBookNotFound));
        assert_eq!(err.kind(), ErrorKind::LocalPrecondition);
        assert_eq!(gateway.calls_to("add_contact"), 0);
    }

    #[tokio::test]
    async fn test_add_contact_patches_merged_entry() {
        let gateway = Arc::new(FakeGateway::default());
        *gateway.address_books.lock().unwrap() = vec![principal()];
        *gateway.created_contact.lock().unwrap() = Some(remote("42", "New Person", &["new@x.com"]));
        let manager = manager(&gateway, vec![local("Device Name", &["new@x.com"])]).await;
        manager.refresh(&mailbox()).await.unwrap();

        let merged = manager
            .add_contact(&mailbox(), &Recipient::new("new@x.com", "New Person"))
            .await
            .unwrap();

        assert_eq!(merged.remote.as_ref().unwrap().id, "42");
        assert!(merged.local.is_some());
        assert_eq!(manager.contact("new@x.com").unwrap(), merged);
        assert!(manager.remote_contact("42").await.unwrap().is_some());
        assert_eq!(manager.principal_address_book().await.unwrap().unwrap().id, 1);
    }

    #[tokio::test]
    async fn test_add_contact_missing_after_refetch() {
        let gateway = Arc::new(FakeGateway::default());
        *gateway.address_books.lock().unwrap() = vec![principal()];
        let manager = manager(&gateway, Vec::new()).await;
        manager.refresh(&mailbox()).await.unwrap();

        let err = manager
            .add_contact(&mailbox(), &Recipient::new("ghost@x.com", ""))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ContactNotFound(ref id) if id == "unknown"));
        assert!(manager.contact("ghost@x.com").is_none());
    }
}
