//! Compose session with debounced autosave.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, warn};

use super::model::Draft;
use crate::gateway::{NewAttachment, RemoteGateway};
use crate::mailbox::Mailbox;
use crate::store::{Attachment, EntityStore};
use crate::{Error, ErrorKind, Result, SyncConfig};

const EVENT_CAPACITY: usize = 32;

/// Reads the current HTML from the editor surface.
#[async_trait]
pub trait BodySource: Send + Sync {
    /// Current body, or `None` if the editor is not ready.
    async fn current_body(&self) -> Option<String>;
}

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposePhase {
    /// Accepting edits.
    Editing,
    /// A save is in flight.
    Saving,
    /// A send is in flight.
    Sending,
    /// Sent; the session no longer accepts edits.
    Sent,
    /// The last send failed; edits are accepted again.
    Failed,
}

/// Session notifications for the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DraftEvent {
    /// The draft was saved remotely.
    Saved {
        /// Server uuid of the draft.
        uuid: String,
    },
    /// A save failed; the draft is still dirty.
    SaveFailed(ErrorKind),
    /// The draft was sent.
    Sent,
    /// The send failed; the draft is still editable.
    SendFailed(ErrorKind),
}

/// Handle to undo a send within its delay window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelHandle {
    /// Cancel resource returned by the server.
    pub resource: String,
    /// Length of the cancel window.
    pub delay: Duration,
}

/// Result of a successful send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOutcome {
    /// Present when the send can still be cancelled.
    pub cancel: Option<CancelHandle>,
}

#[derive(Debug)]
enum Command {
    Edited,
    Cancel,
    Shutdown,
}

#[derive(Debug)]
struct SessionState {
    dirty: bool,
    revision: u64,
    phase: ComposePhase,
}

struct Shared {
    mailbox: Mailbox,
    gateway: Arc<dyn RemoteGateway>,
    store: EntityStore,
    body_source: Option<Arc<dyn BodySource>>,
    draft: Mutex<Draft>,
    state: Mutex<SessionState>,
    save_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<DraftEvent>,
    restore_dirty_on_send_failure: bool,
}

impl Shared {
    fn draft(&self) -> MutexGuard<'_, Draft> {
        self.draft.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: DraftEvent) {
        // No subscriber is fine.
        let _ = self.events.send(event);
    }

    async fn read_body(&self) {
        if let Some(source) = &self.body_source {
            if let Some(body) = source.current_body().await {
                self.draft().body = body;
            }
        }
    }

    async fn mirror(&self, draft: &Draft) {
        if let Err(e) = self.store.save_draft(draft).await {
            warn!("Could not store draft {} locally: {}", draft.local_uuid, e);
        }
    }

    /// Saves the draft if dirty. Returns whether a save happened.
    ///
    /// Edits made while the save is in flight keep the draft dirty.
    async fn save(&self) -> Result<bool> {
        let _guard = self.save_lock.lock().await;
        let revision = {
            let mut state = self.state();
            if !state.dirty || state.phase == ComposePhase::Sent {
                return Ok(false);
            }
            state.phase = ComposePhase::Saving;
            state.revision
        };

        self.read_body().await;
        let draft = self.draft().clone();
        let result = self.gateway.save_draft(&self.mailbox, &draft).await;

        match result {
            Ok(saved) => {
                let draft = {
                    let mut current = self.draft();
                    current.uuid = Some(saved.uuid.clone());
                    if saved.uid.is_some() {
                        current.message_uid.clone_from(&saved.uid);
                    }
                    current.clone()
                };
                self.mirror(&draft).await;
                {
                    let mut state = self.state();
                    if state.revision == revision {
                        state.dirty = false;
                    }
                    state.phase = ComposePhase::Editing;
                }
                info!("Draft {} saved as {}", draft.local_uuid, saved.uuid);
                self.emit(DraftEvent::Saved { uuid: saved.uuid });
                Ok(true)
            }
            Err(e) => {
                self.mirror(&draft).await;
                self.state().phase = ComposePhase::Editing;
                warn!("Draft {} save failed: {}", draft.local_uuid, e);
                self.emit(DraftEvent::SaveFailed(e.kind()));
                Err(e.into())
            }
        }
    }
}

/// Debounce loop. Each edit pushes the deadline back; only the last edit
/// within the window triggers a save.
async fn run_autosave(
    shared: Arc<Shared>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    delay: Duration,
) {
    let mut deadline: Option<Instant> = None;
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Edited) => deadline = Some(Instant::now() + delay),
                Some(Command::Cancel) => deadline = None,
                Some(Command::Shutdown) | None => break,
            },
            () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                if let Err(e) = shared.save().await {
                    debug!("Autosave failed: {}", e);
                }
            }
        }
    }
}

/// One open draft being edited.
pub struct ComposeSession {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    worker: JoinHandle<()>,
}

impl ComposeSession {
    /// Opens a session on `draft` and starts its autosave worker.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn open(
        mailbox: Mailbox,
        gateway: Arc<dyn RemoteGateway>,
        store: EntityStore,
        draft: Draft,
        config: &SyncConfig,
        body_source: Option<Arc<dyn BodySource>>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Arc::new(Shared {
            mailbox,
            gateway,
            store,
            body_source,
            draft: Mutex::new(draft),
            state: Mutex::new(SessionState {
                dirty: false,
                revision: 0,
                phase: ComposePhase::Editing,
            }),
            save_lock: tokio::sync::Mutex::new(()),
            events,
            restore_dirty_on_send_failure: config.restore_dirty_on_send_failure,
        });
        let (commands, receiver) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_autosave(
            Arc::clone(&shared),
            receiver,
            config.autosave_delay(),
        ));
        Self {
            shared,
            commands,
            worker,
        }
    }

    /// Snapshot of the draft.
    #[must_use]
    pub fn draft(&self) -> Draft {
        self.shared.draft().clone()
    }

    /// Whether edits are waiting to be saved.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.shared.state().dirty
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> ComposePhase {
        self.shared.state().phase
    }

    /// Subscribes to session events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DraftEvent> {
        self.shared.events.subscribe()
    }

    /// Applies an edit and restarts the autosave timer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] once the draft was sent.
    pub fn edit(&self, change: impl FnOnce(&mut Draft)) -> Result<()> {
        {
            let mut state = self.shared.state();
            if state.phase == ComposePhase::Sent {
                return Err(Error::SessionClosed);
            }
            change(&mut self.shared.draft());
            state.dirty = true;
            state.revision += 1;
            if state.phase == ComposePhase::Failed {
                state.phase = ComposePhase::Editing;
            }
        }
        self.commands
            .send(Command::Edited)
            .map_err(|_| Error::SessionClosed)
    }

    /// Records that the editor body changed; it is read at save time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] once the draft was sent.
    pub fn body_changed(&self) -> Result<()> {
        self.edit(|_| {})
    }

    /// Uploads an attachment and adds it to the draft.
    ///
    /// # Errors
    ///
    /// Returns the gateway error, or [`Error::SessionClosed`] once sent.
    pub async fn add_attachment(&self, attachment: &NewAttachment) -> Result<Attachment> {
        let uploaded = self
            .shared
            .gateway
            .create_attachment(&self.shared.mailbox, attachment)
            .await?;
        let added = uploaded.clone();
        self.edit(move |draft| draft.attachments.push(added))?;
        Ok(uploaded)
    }

    /// Saves now if dirty, cancelling the pending timer.
    ///
    /// # Errors
    ///
    /// Returns the save error; the draft stays dirty.
    pub async fn save_now(&self) -> Result<bool> {
        let _ = self.commands.send(Command::Cancel);
        self.shared.save().await
    }

    /// Sends the draft.
    ///
    /// The dirty flag is cleared before sending. On failure it is set again
    /// only when the session was opened with
    /// `restore_dirty_on_send_failure`; the draft stays editable either way.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] if already sent, or the gateway error.
    pub async fn send(&self) -> Result<SendOutcome> {
        if self.phase() == ComposePhase::Sent {
            return Err(Error::SessionClosed);
        }
        let _ = self.commands.send(Command::Cancel);
        let shared = &self.shared;
        let _guard = shared.save_lock.lock().await;

        shared.read_body().await;
        {
            let mut state = shared.state();
            state.dirty = false;
            state.phase = ComposePhase::Sending;
        }
        let draft = shared.draft().clone();

        match shared.gateway.send_draft(&shared.mailbox, &draft).await {
            Ok(receipt) => {
                shared.state().phase = ComposePhase::Sent;
                if let Err(e) = shared.store.delete_draft(&draft.local_uuid).await {
                    warn!("Could not remove sent draft {}: {}", draft.local_uuid, e);
                }
                info!("Draft {} sent", draft.local_uuid);
                shared.emit(DraftEvent::Sent);
                Ok(SendOutcome {
                    cancel: receipt.cancel_resource.map(|resource| CancelHandle {
                        resource,
                        delay: Duration::from_secs(u64::from(draft.delay.unwrap_or_default())),
                    }),
                })
            }
            Err(e) => {
                {
                    let mut state = shared.state();
                    state.phase = ComposePhase::Failed;
                    if shared.restore_dirty_on_send_failure {
                        state.dirty = true;
                    }
                }
                warn!("Draft {} send failed: {}", draft.local_uuid, e);
                shared.emit(DraftEvent::SendFailed(e.kind()));
                Err(e.into())
            }
        }
    }

    /// Cancels a send within its window. The draft becomes editable again.
    ///
    /// # Errors
    ///
    /// Returns the gateway error, for instance once the window has passed.
    pub async fn cancel_send(&self, handle: &CancelHandle) -> Result<()> {
        self.shared
            .gateway
            .cancel_send(&self.shared.mailbox, &handle.resource)
            .await?;
        let mut state = self.shared.state();
        state.phase = ComposePhase::Editing;
        state.dirty = true;
        info!("Send cancelled");
        Ok(())
    }

    /// Stops the autosave worker and flushes pending edits once.
    ///
    /// # Errors
    ///
    /// Returns the error of the final save.
    pub async fn close(self) -> Result<()> {
        let _ = self.commands.send(Command::Shutdown);
        if let Err(e) = self.worker.await {
            warn!("Autosave worker ended abnormally: {}", e);
        }
        self.shared.save().await.map(|_| ())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::gateway::fake::{FakeGateway, mailbox};

    // Store queries wait on the SQLite worker thread. An idle runtime with a
    // paused clock jumps to the pool's acquire deadline meanwhile, so only
    // the debounce test pauses, and only while no query is expected.

    struct Editor(&'static str);

    #[async_trait]
    impl BodySource for Editor {
        async fn current_body(&self) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    async fn session(
        gateway: &Arc<FakeGateway>,
        config: &SyncConfig,
    ) -> (ComposeSession, EntityStore) {
        let store = EntityStore::in_memory().await.unwrap();
        let session = ComposeSession::open(
            mailbox(),
            gateway.clone(),
            store.clone(),
            Draft::new(),
            config,
            None,
        );
        (session, store)
    }

    fn type_text(session: &ComposeSession, text: &str) {
        session.edit(|draft| draft.body.push_str(text)).unwrap();
    }

    #[tokio::test]
    async fn test_edits_are_debounced_into_one_save() {
        let gateway = Arc::new(FakeGateway::default());
        let (session, _store) = session(&gateway, &SyncConfig::default()).await;
        tokio::time::pause();

        type_text(&session, "a");
        tokio::time::sleep(Duration::from_secs(1)).await;
        type_text(&session, "b");
        tokio::time::sleep(Duration::from_secs(1)).await;
        type_text(&session, "c");

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(gateway.calls_to("save_draft"), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(gateway.calls(), ["save_draft abc"]);
        tokio::time::resume();
        session.close().await.unwrap();
        assert_eq!(gateway.calls_to("save_draft"), 1);
    }

    #[tokio::test]
    async fn test_first_save_assigns_remote_uuid() {
        let gateway = Arc::new(FakeGateway::default());
        let (session, store) = session(&gateway, &SyncConfig::default()).await;
        let local_uuid = session.draft().local_uuid;

        type_text(&session, "hello");
        assert!(session.save_now().await.unwrap());

        assert!(!session.is_dirty());
        assert_eq!(session.draft().uuid.as_deref(), Some("remote-draft"));
        let stored = store.draft(&local_uuid).await.unwrap().unwrap();
        assert_eq!(stored.uuid.as_deref(), Some("remote-draft"));
        assert!(!session.save_now().await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_save_keeps_dirty_and_local_copy() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.fail("save_draft");
        let (session, store) = session(&gateway, &SyncConfig::default()).await;
        let mut events = session.subscribe();

        type_text(&session, "unsaved");
        let err = session.save_now().await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::TransportFatal);
        assert!(session.is_dirty());
        assert_eq!(
            events.recv().await.unwrap(),
            DraftEvent::SaveFailed(ErrorKind::TransportFatal)
        );
        let stored = store.draft(&session.draft().local_uuid).await.unwrap().unwrap();
        assert_eq!(stored.body, "unsaved");

        gateway.recover("save_draft");
        assert!(session.save_now().await.unwrap());
        assert!(!session.is_dirty());
    }

    #[tokio::test]
    async fn test_edit_during_save_stays_dirty() {
        let gateway = Arc::new(FakeGateway::with_delay(Duration::from_millis(300)));
        let (session, _store) = session(&gateway, &SyncConfig::default()).await;
        type_text(&session, "first");

        let (saved, ()) = tokio::join!(session.save_now(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            type_text(&session, " second");
        });

        assert!(saved.unwrap());
        assert!(session.is_dirty());
    }

    #[tokio::test]
    async fn test_close_flushes_pending_edit() {
        let gateway = Arc::new(FakeGateway::default());
        let (session, _store) = session(&gateway, &SyncConfig::default()).await;

        type_text(&session, "last words");
        session.close().await.unwrap();

        assert_eq!(gateway.calls(), ["save_draft last words"]);
    }

    #[tokio::test]
    async fn test_body_is_read_from_editor() {
        let gateway = Arc::new(FakeGateway::default());
        let store = EntityStore::in_memory().await.unwrap();
        let session = ComposeSession::open(
            mailbox(),
            gateway.clone(),
            store,
            Draft::new(),
            &SyncConfig::default(),
            Some(Arc::new(Editor("<p>from editor</p>"))),
        );

        session.body_changed().unwrap();
        session.save_now().await.unwrap();

        assert_eq!(gateway.calls(), ["save_draft <p>from editor</p>"]);
    }

    #[tokio::test]
    async fn test_failed_send_leaves_dirty_cleared_by_default() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.fail("send_draft");
        let (session, _store) = session(&gateway, &SyncConfig::default()).await;
        type_text(&session, "body");

        assert!(session.send().await.is_err());

        assert!(!session.is_dirty());
        assert_eq!(session.phase(), ComposePhase::Failed);
        type_text(&session, " more");
        assert_eq!(session.phase(), ComposePhase::Editing);
    }

    #[tokio::test]
    async fn test_failed_send_restores_dirty_when_configured() {
        let gateway = Arc::new(FakeGateway::default());
        gateway.fail("send_draft");
        let config = SyncConfig {
            restore_dirty_on_send_failure: true,
            ..SyncConfig::default()
        };
        let (session, _store) = session(&gateway, &config).await;
        type_text(&session, "body");

        assert!(session.send().await.is_err());

        assert!(session.is_dirty());
    }

    #[tokio::test]
    async fn test_send_with_cancel_window() {
        let gateway = Arc::new(FakeGateway::default());
        let (session, store) = session(&gateway, &SyncConfig::default()).await;
        session
            .edit(|draft| {
                draft.body = "bye".to_string();
                draft.delay = Some(10);
            })
            .unwrap();
        session.save_now().await.unwrap();

        let outcome = session.send().await.unwrap();

        let handle = outcome.cancel.unwrap();
        assert_eq!(handle.delay, Duration::from_secs(10));
        assert_eq!(session.phase(), ComposePhase::Sent);
        assert!(matches!(session.edit(|_| {}), Err(Error::SessionClosed)));
        assert!(store.drafts().await.unwrap().is_empty());

        session.cancel_send(&handle).await.unwrap();
        assert_eq!(session.phase(), ComposePhase::Editing);
        assert_eq!(gateway.calls_to("cancel_send"), 1);
    }

    #[tokio::test]
    async fn test_add_attachment() {
        let gateway = Arc::new(FakeGateway::default());
        let (session, _store) = session(&gateway, &SyncConfig::default()).await;

        let attachment = session
            .add_attachment(&NewAttachment {
                name: "notes.txt".to_string(),
                mime_type: "text/plain".to_string(),
                data: b"hello".to_vec(),
            })
            .await
            .unwrap();

        assert_eq!(attachment.size, 5);
        assert_eq!(session.draft().attachments, [attachment]);
        assert!(session.is_dirty());
    }
}
