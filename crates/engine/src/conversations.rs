use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use parlance_shared::{Conversation, ConversationPatch, ConversationWithMessages, NewConversation};

use crate::api::ConversationBackend;
use crate::cache::ConversationCache;
use crate::error::ChatResult;
use crate::events::Notifier;

/// Conversation mutations with optimistic cache updates.
///
/// Every mutation snapshots the cache, applies its change locally, then
/// calls the backend. A failed call rolls the cache back before the error
/// is reported.
pub struct ConversationService<B> {
    backend: Arc<B>,
    cache: Arc<Mutex<ConversationCache>>,
    notifier: Notifier,
}

impl<B> Clone for ConversationService<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            cache: Arc::clone(&self.cache),
            notifier: self.notifier.clone(),
        }
    }
}

impl<B: ConversationBackend + 'static> ConversationService<B> {
    pub fn new(backend: Arc<B>, notifier: Notifier) -> Self {
        Self {
            backend,
            cache: Arc::new(Mutex::new(ConversationCache::new())),
            notifier,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// The cached sidebar list, newest first.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.cache().list()
    }

    pub fn detail(&self, id: &str) -> Option<ConversationWithMessages> {
        self.cache().detail(id).cloned()
    }

    pub fn store_detail(&self, detail: ConversationWithMessages) {
        self.cache().store_detail(detail);
    }

    pub async fn refresh(&self) -> ChatResult<Vec<Conversation>> {
        match self.backend.list_conversations().await {
            Ok(conversations) => {
                let mut cache = self.cache();
                cache.set_list(conversations);
                Ok(cache.list())
            }
            Err(err) => {
                warn!(error = %err, "failed to load conversations");
                self.notifier.error(err.user_message());
                Err(err)
            }
        }
    }

    /// Create a conversation together with its first message.
    ///
    /// A temporary record heads the list until the server answers; it is
    /// then replaced by the real one, whose detail entry is seeded empty.
    pub async fn create_with_message(&self, params: &NewConversation) -> ChatResult<Conversation> {
        let temp = Conversation::temporary(params.title.as_deref(), params.system_prompt.as_deref());
        self.create_from(temp, self.backend.create_with_message(params))
            .await
    }

    /// Create an empty conversation, listed optimistically like
    /// `create_with_message`.
    pub async fn create(&self, title: Option<&str>) -> ChatResult<Conversation> {
        let temp = Conversation::temporary(title, None);
        self.create_from(temp, self.backend.create_conversation(title))
            .await
    }

    async fn create_from(
        &self,
        temp: Conversation,
        call: impl Future<Output = ChatResult<Conversation>>,
    ) -> ChatResult<Conversation> {
        let snapshot = self.cache().add_optimistic(temp.clone());

        match call.await {
            Ok(conversation) => {
                let mut cache = self.cache();
                cache.replace_temp(&temp.id, conversation.clone());
                cache.precache_detail(conversation.clone());
                info!(conversation_id = %conversation.id, "conversation created");
                Ok(conversation)
            }
            Err(err) => {
                self.cache().rollback(snapshot);
                warn!(error = %err, "failed to create conversation");
                self.notifier
                    .error(message_or(&err, "Failed to create conversation"));
                Err(err)
            }
        }
    }

    pub async fn delete(&self, id: &str) -> ChatResult<()> {
        let snapshot = self.cache().remove_optimistic(id);

        match self.backend.delete_conversation(id).await {
            Ok(()) => {
                info!(conversation_id = id, "conversation deleted");
                self.notifier.success("Conversation deleted");
                Ok(())
            }
            Err(err) => {
                self.cache().rollback(snapshot);
                warn!(error = %err, conversation_id = id, "failed to delete conversation");
                self.notifier
                    .error(message_or(&err, "Failed to delete conversation"));
                Err(err)
            }
        }
    }

    pub async fn update(&self, id: &str, patch: &ConversationPatch) -> ChatResult<Conversation> {
        let snapshot = self.cache().update_optimistic(id, patch);

        match self.backend.update_conversation(id, patch).await {
            Ok(conversation) => {
                self.cache().upsert(conversation.clone());
                Ok(conversation)
            }
            Err(err) => {
                if let Some(snapshot) = snapshot {
                    self.cache().rollback(snapshot);
                }
                warn!(error = %err, conversation_id = id, "failed to update conversation");
                self.notifier
                    .error(message_or(&err, "Failed to update conversation"));
                Err(err)
            }
        }
    }

    pub async fn update_system_prompt(&self, id: &str, system_prompt: &str) -> ChatResult<Conversation> {
        let patch = ConversationPatch::system_prompt(system_prompt);
        let snapshot = self.cache().update_optimistic(id, &patch);

        match self.backend.update_system_prompt(id, system_prompt).await {
            Ok(conversation) => {
                self.cache().upsert(conversation.clone());
                self.notifier.success("Instructions updated");
                Ok(conversation)
            }
            Err(err) => {
                if let Some(snapshot) = snapshot {
                    self.cache().rollback(snapshot);
                }
                warn!(error = %err, conversation_id = id, "failed to update instructions");
                self.notifier
                    .error(message_or(&err, "Failed to update instructions"));
                Err(err)
            }
        }
    }

    /// Ask the server to title a conversation from its first message.
    pub async fn generate_title(&self, id: &str, message: &str) -> ChatResult<String> {
        let title = self.backend.generate_title(id, message).await?;
        self.cache().apply_title(id, &title);
        info!(conversation_id = id, %title, "conversation titled");
        Ok(title)
    }

    /// Best-effort titling that never blocks the chat flow. Failures are
    /// only logged.
    pub fn generate_title_in_background(&self, id: String, message: String) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(err) = service.generate_title(&id, &message).await {
                warn!(error = %err, conversation_id = %id, "title generation failed");
            }
        })
    }

    fn cache(&self) -> MutexGuard<'_, ConversationCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn message_or(err: &crate::error::ChatError, fallback: &str) -> String {
    let message = err.user_message();
    if message.is_empty() {
        fallback.to_string()
    } else {
        message
    }
}
