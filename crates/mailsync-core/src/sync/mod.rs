//! Sync engine: keeps the local store in step with the server.
//!
//! The engine is pull-based. Folder lists are replaced wholesale; thread
//! lists are fetched page by page, with per-folder page state and a
//! stale-response guard keyed by mailbox and folder.

mod tree;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

pub use tree::{FolderNode, build_folder_tree};

use crate::gateway::{Filter, RemoteGateway};
use crate::mailbox::{Mailbox, Quotas, SignatureResponse};
use crate::store::{EntityStore, FolderRole, Message, PagePrune, Thread, visible_messages};
use crate::{Error, Result, SyncConfig};

/// Outcome of a thread page fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadSync {
    /// The page was stored.
    Applied {
        /// Whether another page exists.
        has_more: bool,
        /// Threads in the page.
        count: usize,
    },
    /// The active context changed while the page was in flight; nothing
    /// was stored.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FolderKey {
    mailbox: String,
    folder: String,
}

impl FolderKey {
    fn new(mailbox: &Mailbox, folder_id: &str) -> Self {
        Self {
            mailbox: mailbox.uuid.clone(),
            folder: folder_id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PageState {
    next_page: u32,
    has_more: bool,
    loading: bool,
}

impl Default for PageState {
    fn default() -> Self {
        Self {
            next_page: 1,
            has_more: true,
            loading: false,
        }
    }
}

#[derive(Debug, Default)]
struct ActiveContext {
    key: Option<FolderKey>,
    generation: u64,
}

/// Pulls folders, threads and messages into one user's store.
pub struct SyncEngine {
    gateway: Arc<dyn RemoteGateway>,
    store: EntityStore,
    page_size: u32,
    prefetch_distance: usize,
    pages: Mutex<HashMap<FolderKey, PageState>>,
    folder_locks: Mutex<HashMap<FolderKey, Arc<tokio::sync::Mutex<()>>>>,
    active: Mutex<ActiveContext>,
}

impl SyncEngine {
    /// Creates an engine writing to `store`.
    #[must_use]
    pub fn new(gateway: Arc<dyn RemoteGateway>, store: EntityStore, config: &SyncConfig) -> Self {
        Self {
            gateway,
            store,
            page_size: config.page_size.max(1),
            prefetch_distance: config.prefetch_distance,
            pages: Mutex::new(HashMap::new()),
            folder_locks: Mutex::new(HashMap::new()),
            active: Mutex::new(ActiveContext::default()),
        }
    }

    /// The store this engine writes to.
    #[must_use]
    pub const fn store(&self) -> &EntityStore {
        &self.store
    }

    /// Replaces the stored folder list with the server's and returns the
    /// folder tree.
    ///
    /// # Errors
    ///
    /// Returns the gateway or store error; the store is left untouched on
    /// failure.
    pub async fn sync_folders(&self, mailbox: &Mailbox) -> Result<Vec<FolderNode>> {
        let folders = self.gateway.folders(mailbox).await?;
        let count = folders.len();
        self.store.replace_folders(&folders).await?;
        info!("Synced {} folders for {}", count, mailbox.email);
        Ok(build_folder_tree(self.store.folders().await?))
    }

    /// Makes `folder_id` of `mailbox` the active context. Pages in flight
    /// for any other context are dropped when they arrive.
    pub fn set_active(&self, mailbox: &Mailbox, folder_id: &str) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let key = FolderKey::new(mailbox, folder_id);
        if active.key.as_ref() != Some(&key) {
            active.key = Some(key);
            active.generation += 1;
        }
    }

    /// Fetches page `page` (1-based) of a folder's threads and stores it.
    ///
    /// Pages of one folder are applied one at a time. The first page of an
    /// unfiltered listing also removes stored threads the server no longer
    /// lists in the range it covers.
    ///
    /// # Errors
    ///
    /// Returns the gateway or store error; the store is left untouched on
    /// failure.
    pub async fn sync_threads(
        &self,
        mailbox: &Mailbox,
        folder_id: &str,
        page: u32,
        filter: Filter,
    ) -> Result<ThreadSync> {
        let page = page.max(1);
        let key = FolderKey::new(mailbox, folder_id);
        let lock = self.folder_lock(&key);
        let _guard = lock.lock().await;

        let generation = self.generation();
        let offset = (page - 1).saturating_mul(self.page_size);
        let response = match self.gateway.threads(mailbox, folder_id, offset, filter).await {
            Ok(response) => response,
            Err(e) => {
                self.finish_page(&key, None);
                return Err(e.into());
            }
        };

        if !self.is_current(&key, generation) {
            debug!("Dropping stale page {} of {}", page, folder_id);
            self.finish_page(&key, None);
            return Ok(ThreadSync::Stale);
        }

        let count = response.threads.len();
        let has_more = u32::try_from(count).is_ok_and(|count| count >= self.page_size);
        let prune = match (page, filter) {
            (1, Filter::All) if has_more => PagePrune::Window,
            (1, Filter::All) => PagePrune::All,
            _ => PagePrune::None,
        };

        if let Err(e) = self
            .store
            .apply_thread_page(folder_id, &response.threads, prune, response.response_at)
            .await
        {
            self.finish_page(&key, None);
            return Err(e);
        }
        self.finish_page(&key, Some((page + 1, has_more)));

        info!(
            "Synced page {} of {} ({} threads, more: {})",
            page, folder_id, count, has_more
        );
        Ok(ThreadSync::Applied { has_more, count })
    }

    /// Fetches the next page when `index` is within the prefetch distance
    /// of the `loaded` rows. Returns `None` when nothing was requested.
    ///
    /// # Errors
    ///
    /// Returns the error of the page fetch.
    pub async fn load_next_page_if_needed(
        &self,
        mailbox: &Mailbox,
        folder_id: &str,
        index: usize,
        loaded: usize,
    ) -> Result<Option<ThreadSync>> {
        if index.saturating_add(self.prefetch_distance) < loaded {
            return Ok(None);
        }

        let key = FolderKey::new(mailbox, folder_id);
        let next_page = {
            let mut pages = self.pages.lock().unwrap_or_else(PoisonError::into_inner);
            let state = pages.entry(key).or_default();
            if !state.has_more || state.loading {
                return Ok(None);
            }
            state.loading = true;
            state.next_page
        };

        self.sync_threads(mailbox, folder_id, next_page, Filter::All)
            .await
            .map(Some)
    }

    /// Whether another page of `folder_id` is known to exist.
    #[must_use]
    pub fn has_more(&self, mailbox: &Mailbox, folder_id: &str) -> bool {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&FolderKey::new(mailbox, folder_id))
            .is_none_or(|state| state.has_more)
    }

    /// Returns a message with its full body, fetching it on first access.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MessageNotFound`] if the message is not stored, or
    /// the gateway or store error.
    pub async fn fetch_message(&self, mailbox: &Mailbox, uid: &str) -> Result<Message> {
        let message = self
            .store
            .message(uid)
            .await?
            .ok_or_else(|| Error::MessageNotFound(uid.to_string()))?;
        if message.body.is_some() {
            return Ok(message);
        }

        let full = self.gateway.message(mailbox, &message.resource).await?;
        self.store.update_message(&full).await?;
        debug!("Fetched body of {}", uid);
        self.store
            .message(uid)
            .await?
            .ok_or_else(|| Error::MessageNotFound(uid.to_string()))
    }

    /// Messages of `thread` to show while viewing `folder_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn visible_messages(&self, folder_id: &str, thread: &Thread) -> Result<Vec<Message>> {
        let trash = self.store.folder_by_role(FolderRole::Trash).await?;
        Ok(visible_messages(
            thread.messages.clone(),
            folder_id,
            trash.as_ref().map(|f| f.id.as_str()),
        ))
    }

    /// Fetches the storage quota of `mailbox`.
    ///
    /// # Errors
    ///
    /// Returns the gateway error.
    pub async fn refresh_quotas(&self, mailbox: &Mailbox) -> Result<Quotas> {
        Ok(self.gateway.quotas(mailbox).await?)
    }

    /// Fetches the sender identities of `mailbox`.
    ///
    /// # Errors
    ///
    /// Returns the gateway error.
    pub async fn signatures(&self, mailbox: &Mailbox) -> Result<SignatureResponse> {
        Ok(self.gateway.signatures(mailbox).await?)
    }

    fn folder_lock(&self, key: &FolderKey) -> Arc<tokio::sync::Mutex<()>> {
        self.folder_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone()
    }

    fn generation(&self) -> u64 {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    /// A response is current if no switch happened since it was requested,
    /// or if its own context is the active one.
    fn is_current(&self, key: &FolderKey, generation: u64) -> bool {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.generation == generation || active.key.as_ref() == Some(key)
    }

    fn finish_page(&self, key: &FolderKey, applied: Option<(u32, bool)>) {
        let mut pages = self.pages.lock().unwrap_or_else(PoisonError::into_inner);
        let state = pages.entry(key.clone()).or_default();
        state.loading = false;
        if let Some((next_page, has_more)) = applied {
            state.next_page = next_page;
            state.has_more = has_more;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::gateway::ThreadPage;
    use crate::gateway::fake::{FakeGateway, mailbox};
    use crate::store::model::tests::{folder, message};

    fn thread(uid: &str, folder_id: &str, minute: u32) -> Thread {
        let message = message(&format!("m-{uid}"), folder_id, minute);
        Thread {
            uid: uid.to_string(),
            folder_id: folder_id.to_string(),
            subject: message.subject.clone(),
            date: message.date,
            messages: vec![message],
            unseen_messages: 1,
            flagged: false,
            has_attachments: false,
        }
    }

    fn page(threads: Vec<Thread>) -> ThreadPage {
        ThreadPage {
            threads,
            messages_count: None,
            response_at: None,
        }
    }

    async fn engine(gateway: &Arc<FakeGateway>, page_size: u32) -> SyncEngine {
        let config = SyncConfig {
            page_size,
            prefetch_distance: 2,
            ..SyncConfig::default()
        };
        let store = EntityStore::in_memory().await.unwrap();
        SyncEngine::new(gateway.clone(), store, &config)
    }

    #[tokio::test]
    async fn test_sync_folders_builds_tree() {
        let gateway = Arc::new(FakeGateway::default());
        let mut child = folder("child", "Child", None, false);
        child.path = "Parent/Child".to_string();
        *gateway.folders.lock().unwrap() = vec![
            folder("parent", "Parent", None, false),
            child,
            folder("inbox", "INBOX", Some(FolderRole::Inbox), false),
        ];
        let engine = engine(&gateway, 50).await;

        let tree = engine.sync_folders(&mailbox()).await.unwrap();

        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].folder.id, "inbox");
        assert_eq!(tree[1].children[0].folder.id, "child");
        assert_eq!(engine.store().folders().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_failed_folder_sync_keeps_store() {
        let gateway = Arc::new(FakeGateway::default());
        *gateway.folders.lock().unwrap() =
            vec![folder("inbox", "INBOX", Some(FolderRole::Inbox), false)];
        let engine = engine(&gateway, 50).await;
        engine.sync_folders(&mailbox()).await.unwrap();

        gateway.fail("folders");
        let err = engine.sync_folders(&mailbox()).await.unwrap_err();

        assert_eq!(err.kind(), crate::ErrorKind::TransportFatal);
        assert_eq!(engine.store().folders().await.unwrap().len(), 1);
        assert_eq!(gateway.calls_to("folders"), 2);
    }

    #[tokio::test]
    async fn test_pagination_offsets_and_has_more() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.set_page(
            "inbox",
            0,
            page(vec![thread("a", "inbox", 30), thread("b", "inbox", 20)]),
        );
        gateway.set_page("inbox", 2, page(vec![thread("c", "inbox", 10)]));
        let engine = engine(&gateway, 2).await;
        let mailbox = mailbox();

        let first = engine
            .sync_threads(&mailbox, "inbox", 1, Filter::All)
            .await
            .unwrap();
        assert_eq!(first, ThreadSync::Applied { has_more: true, count: 2 });

        let second = engine
            .load_next_page_if_needed(&mailbox, "inbox", 1, 2)
            .await
            .unwrap();
        assert_eq!(second, Some(ThreadSync::Applied { has_more: false, count: 1 }));
        assert!(!engine.has_more(&mailbox, "inbox"));

        let third = engine
            .load_next_page_if_needed(&mailbox, "inbox", 2, 3)
            .await
            .unwrap();
        assert_eq!(third, None);
        assert_eq!(gateway.calls(), ["threads inbox@0", "threads inbox@2"]);
        assert_eq!(engine.store().thread_count("inbox").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_next_page_not_requested_far_from_end() {
        let gateway = Arc::new(FakeGateway::default());
        let engine = engine(&gateway, 50).await;

        let result = engine
            .load_next_page_if_needed(&mailbox(), "inbox", 10, 50)
            .await
            .unwrap();

        assert_eq!(result, None);
        assert!(gateway.calls().is_empty());
    }

    // The first branch of each join issues its request before the switch
    // runs; the gateway delay keeps the response in flight meanwhile.

    #[tokio::test]
    async fn test_stale_page_is_dropped() {
        let gateway = Arc::new(FakeGateway::with_delay(Duration::from_millis(100)));
        gateway.set_page("inbox", 0, page(vec![thread("a", "inbox", 1)]));
        let engine = engine(&gateway, 50).await;
        let mailbox = mailbox();
        engine.set_active(&mailbox, "inbox");

        let (result, ()) = tokio::join!(
            engine.sync_threads(&mailbox, "inbox", 1, Filter::All),
            async { engine.set_active(&mailbox, "sent") },
        );

        assert_eq!(result.unwrap(), ThreadSync::Stale);
        assert_eq!(engine.store().thread_count("inbox").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_active_folder_page_is_applied() {
        let gateway = Arc::new(FakeGateway::with_delay(Duration::from_millis(100)));
        gateway.set_page("sent", 0, page(vec![thread("a", "sent", 1)]));
        let engine = engine(&gateway, 50).await;
        let mailbox = mailbox();
        engine.set_active(&mailbox, "inbox");

        let (result, ()) = tokio::join!(
            engine.sync_threads(&mailbox, "sent", 1, Filter::All),
            async { engine.set_active(&mailbox, "sent") },
        );

        assert_eq!(result.unwrap(), ThreadSync::Applied { has_more: false, count: 1 });
        assert_eq!(engine.store().thread_count("sent").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_fetch_message_loads_body_once() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.set_page("inbox", 0, page(vec![thread("a", "inbox", 1)]));
        let engine = engine(&gateway, 50).await;
        let mailbox = mailbox();
        engine
            .sync_threads(&mailbox, "inbox", 1, Filter::All)
            .await
            .unwrap();

        let stored = engine.store().message("m-a").await.unwrap().unwrap();
        let mut full = stored.clone();
        full.folder_id = String::new();
        full.body = Some(crate::store::Body {
            value: "<p>Hi</p>".into(),
            body_type: "text/html".into(),
        });
        gateway.messages.lock().unwrap().insert(stored.resource.clone(), full);

        let first = engine.fetch_message(&mailbox, "m-a").await.unwrap();
        let second = engine.fetch_message(&mailbox, "m-a").await.unwrap();

        assert_eq!(first.body.unwrap().value, "<p>Hi</p>");
        assert_eq!(second.folder_id, "inbox");
        assert_eq!(gateway.calls_to("message"), 1);
    }

    #[tokio::test]
    async fn test_visible_messages_hides_duplicates_outside_trash() {
        let gateway = Arc::new(FakeGateway::default());
        let engine = engine(&gateway, 50).await;
        engine
            .store()
            .replace_folders(&[
                folder("inbox", "INBOX", Some(FolderRole::Inbox), false),
                folder("trash", "Trash", Some(FolderRole::Trash), false),
            ])
            .await
            .unwrap();
        let mut duplicate = message("b", "inbox", 2);
        duplicate.is_duplicate = true;
        let thread = Thread {
            messages: vec![message("a", "inbox", 1), duplicate, message("c", "inbox", 3)],
            ..thread("t", "inbox", 3)
        };

        let uids = |messages: Vec<Message>| messages.into_iter().map(|m| m.uid).collect::<Vec<_>>();
        assert_eq!(uids(engine.visible_messages("inbox", &thread).await.unwrap()), ["a", "c"]);
        assert_eq!(uids(engine.visible_messages("trash", &thread).await.unwrap()), ["a", "b", "c"]);
    }
}
