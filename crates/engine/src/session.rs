//! Drives one conversation view: loads it, sends messages, streams the
//! reply through the reducer and reconciles with the server afterwards.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::StreamExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use parlance_shared::ids::is_temp_id;
use parlance_shared::{Message, StreamChunk};

use crate::api::ConversationBackend;
use crate::conversations::ConversationService;
use crate::error::{ChatError, ChatResult};
use crate::events::Notifier;
use crate::reducer::{self, Applied, StreamEvent};
use crate::store::{Begun, Rejection, SessionId, SessionSnapshot, SessionStore};
use crate::transport::{Transport, Trigger};
use crate::trigger::NavigationIntent;

/// How a send (or an auto-triggered reply) ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Refused before anything changed.
    Rejected(Rejection),
    /// The reply finished. `reconciled` is false when the reload of the
    /// persisted messages failed or was overtaken, in which case the
    /// streamed text stays on screen as is.
    Completed { reconciled: bool },
    /// The request or the stream failed; the session is in the error state.
    Failed(String),
    /// The user moved on before the reply finished; its events were dropped.
    Superseded,
}

pub struct ChatSession<T, B> {
    transport: Arc<T>,
    conversations: ConversationService<B>,
    store: Arc<Mutex<SessionStore>>,
    updates: Arc<watch::Sender<SessionSnapshot>>,
    notifier: Notifier,
}

impl<T, B> Clone for ChatSession<T, B> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            conversations: self.conversations.clone(),
            store: Arc::clone(&self.store),
            updates: Arc::clone(&self.updates),
            notifier: self.notifier.clone(),
        }
    }
}

impl<T, B> ChatSession<T, B>
where
    T: Transport + 'static,
    B: ConversationBackend + 'static,
{
    pub fn new(transport: Arc<T>, conversations: ConversationService<B>) -> Self {
        let store = SessionStore::new();
        let (updates, _) = watch::channel(store.snapshot());
        let notifier = conversations.notifier().clone();

        Self {
            transport,
            conversations,
            store: Arc::new(Mutex::new(store)),
            updates: Arc::new(updates),
            notifier,
        }
    }

    /// Receive a fresh snapshot after every change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.updates.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.store().snapshot()
    }

    pub fn conversations(&self) -> &ConversationService<B> {
        &self.conversations
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Display `conversation_id`, discarding the previous conversation's
    /// messages and any stream still running for it.
    ///
    /// When `intent` asks for it and the loaded conversation holds just its
    /// first user message, the assistant's reply is requested here and the
    /// outcome returned.
    pub async fn select(
        &self,
        conversation_id: Option<String>,
        intent: NavigationIntent,
    ) -> Option<SendOutcome> {
        let view = self.update(|store| store.select(conversation_id.clone(), intent));
        let id = conversation_id?;
        debug!(conversation_id = %id, "conversation selected");

        let cached = self.conversations.detail(&id).map(|detail| detail.messages);
        if let Some(messages) = cached.clone() {
            self.update(|store| store.show_cached(view, messages));
        }

        let messages = if is_temp_id(&id) {
            cached.unwrap_or_default()
        } else {
            match self.conversations.backend().get_conversation(&id).await {
                Ok(detail) => {
                    let messages = detail.messages.clone();
                    self.conversations.store_detail(detail);
                    messages
                }
                Err(err) => {
                    warn!(error = %err, conversation_id = %id, "failed to load conversation");
                    self.notifier.error(err.user_message());
                    cached.unwrap_or_default()
                }
            }
        };

        if !self.update(|store| store.finish_load(view, messages)) {
            debug!(conversation_id = %id, "load superseded by another selection");
            return None;
        }
        self.run_auto_trigger().await
    }

    /// Send `text` as a user message and stream the reply.
    ///
    /// Empty input, no selected conversation, a load in progress or a
    /// reply already in flight reject the send without touching state.
    pub async fn send(&self, text: &str) -> SendOutcome {
        let started = self.try_update(|store| {
            let text = store.check_send(text)?;
            let first = store.messages.is_empty();
            let begun = store.begin(Some(Message::user(text.clone())))?;
            Ok((begun, first.then_some(text)))
        });

        let (begun, first_message) = match started {
            Ok(started) => started,
            Err(rejection) => {
                debug!(%rejection, "send rejected");
                return SendOutcome::Rejected(rejection);
            }
        };

        if let Some(text) = first_message {
            self.conversations
                .generate_title_in_background(begun.conversation_id.clone(), text);
        }
        self.drive(begun, Trigger::SubmitMessage).await
    }

    /// Ask for a reply to the history as it stands, without adding a message.
    pub async fn respond(&self) -> SendOutcome {
        let started = self.try_update(|store| {
            store.check_respond()?;
            store.begin(None)
        });

        match started {
            Ok(begun) => self.drive(begun, Trigger::RegenerateMessage).await,
            Err(rejection) => {
                debug!(%rejection, "respond rejected");
                SendOutcome::Rejected(rejection)
            }
        }
    }

    /// Fire the first-message auto-trigger if it is armed and due.
    pub async fn run_auto_trigger(&self) -> Option<SendOutcome> {
        let fired = self.update(|store| {
            if !store.evaluate_trigger() {
                return None;
            }
            let first = store.messages.first().map(Message::text);
            store.conversation_id.clone().map(|id| (id, first))
        });
        let (conversation_id, first) = fired?;

        info!(%conversation_id, "requesting first reply");
        if let Some(text) = first {
            self.conversations
                .generate_title_in_background(conversation_id, text);
        }
        Some(self.respond().await)
    }

    /// Reload the selected conversation and replace the message list with
    /// the persisted one.
    pub async fn reconcile(&self) -> ChatResult<bool> {
        let (conversation_id, revision) = {
            let store = self.store();
            (store.conversation_id.clone(), store.revision())
        };
        match conversation_id {
            Some(id) => self.reconcile_from(&id, revision).await,
            None => Ok(false),
        }
    }

    /// Dismiss the error banner so the user can send again.
    pub fn clear_error(&self) -> bool {
        self.update(SessionStore::clear_error)
    }

    async fn drive(&self, begun: Begun, trigger: Trigger) -> SendOutcome {
        let Begun {
            session,
            conversation_id,
            history,
        } = begun;
        self.publish();

        let mut stream = match self
            .transport
            .open(Some(&conversation_id), &history, trigger)
            .await
        {
            Ok(stream) => stream,
            Err(err) => {
                error!(error = %err, %session, "failed to open stream");
                return self.fail(session, err);
            }
        };

        if self.apply(session, StreamEvent::Opened) == Applied::Stale {
            return SendOutcome::Superseded;
        }

        while let Some(item) = stream.next().await {
            let event = match item {
                Ok(StreamChunk::TextDelta(delta)) => StreamEvent::Delta(delta),
                Ok(StreamChunk::Complete(message)) => StreamEvent::Completed(message),
                Err(err) => {
                    error!(error = %err, %session, "stream failed");
                    return self.fail(session, err);
                }
            };

            match self.apply(session, event) {
                Applied::Updated => {}
                Applied::Completed => return self.after_completion(session, &conversation_id).await,
                Applied::Failed | Applied::Stale => {
                    debug!(%session, "session superseded, dropping stream");
                    return SendOutcome::Superseded;
                }
            }
        }

        // Body ended without a completion event.
        match self.apply(session, StreamEvent::Completed(None)) {
            Applied::Completed => self.after_completion(session, &conversation_id).await,
            _ => SendOutcome::Superseded,
        }
    }

    fn fail(&self, session: SessionId, err: ChatError) -> SendOutcome {
        let message = err.user_message();
        match self.apply(session, StreamEvent::Failed(message.clone())) {
            Applied::Failed => SendOutcome::Failed(message),
            _ => SendOutcome::Superseded,
        }
    }

    async fn after_completion(&self, session: SessionId, conversation_id: &str) -> SendOutcome {
        match self.reconcile_from(conversation_id, session.revision()).await {
            Ok(reconciled) => SendOutcome::Completed { reconciled },
            Err(err) => {
                warn!(error = %err, "keeping streamed reply without reconciliation");
                SendOutcome::Completed { reconciled: false }
            }
        }
    }

    async fn reconcile_from(&self, conversation_id: &str, revision: u64) -> ChatResult<bool> {
        let detail = self
            .conversations
            .backend()
            .get_conversation(conversation_id)
            .await
            .map_err(|err| ChatError::Reconciliation {
                conversation_id: conversation_id.to_string(),
                message: err.user_message(),
            })?;

        let messages = detail.messages.clone();
        let replaced =
            self.update(|store| store.replace_messages(conversation_id, revision, messages));
        if replaced {
            self.conversations.store_detail(detail);
        } else {
            debug!(conversation_id, "reload overtaken, keeping local messages");
        }
        Ok(replaced)
    }

    fn apply(&self, session: SessionId, event: StreamEvent) -> Applied {
        self.update(|store| reducer::apply(store, session, event))
    }

    fn update<R>(&self, f: impl FnOnce(&mut SessionStore) -> R) -> R {
        let (result, snapshot) = {
            let mut store = self.store();
            let result = f(&mut store);
            (result, store.snapshot())
        };
        self.updates.send_replace(snapshot);
        result
    }

    /// Like `update`, but observers only hear about it on success.
    fn try_update<R, E>(&self, f: impl FnOnce(&mut SessionStore) -> Result<R, E>) -> Result<R, E> {
        let mut store = self.store();
        f(&mut store)
    }

    fn publish(&self) {
        let snapshot = self.store().snapshot();
        self.updates.send_replace(snapshot);
    }

    fn store(&self) -> MutexGuard<'_, SessionStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
