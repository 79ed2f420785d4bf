use async_trait::async_trait;

use parlance_shared::{Conversation, ConversationPatch, ConversationWithMessages, NewConversation};

use super::client::ApiClient;
use crate::error::ChatResult;

/// The persisted side of a conversation: what the session reloads after a
/// stream and what the sidebar cache mutates optimistically.
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    async fn list_conversations(&self) -> ChatResult<Vec<Conversation>>;

    async fn get_conversation(&self, id: &str) -> ChatResult<ConversationWithMessages>;

    async fn create_conversation(&self, title: Option<&str>) -> ChatResult<Conversation>;

    async fn create_with_message(&self, params: &NewConversation) -> ChatResult<Conversation>;

    async fn update_conversation(
        &self,
        id: &str,
        patch: &ConversationPatch,
    ) -> ChatResult<Conversation>;

    async fn update_system_prompt(&self, id: &str, system_prompt: &str)
    -> ChatResult<Conversation>;

    async fn delete_conversation(&self, id: &str) -> ChatResult<()>;

    async fn generate_title(&self, id: &str, message: &str) -> ChatResult<String>;
}

#[async_trait]
impl ConversationBackend for ApiClient {
    async fn list_conversations(&self) -> ChatResult<Vec<Conversation>> {
        ApiClient::list_conversations(self).await
    }

    async fn get_conversation(&self, id: &str) -> ChatResult<ConversationWithMessages> {
        ApiClient::get_conversation(self, id).await
    }

    async fn create_conversation(&self, title: Option<&str>) -> ChatResult<Conversation> {
        ApiClient::create_conversation(self, title).await
    }

    async fn create_with_message(&self, params: &NewConversation) -> ChatResult<Conversation> {
        ApiClient::create_with_message(self, params).await
    }

    async fn update_conversation(
        &self,
        id: &str,
        patch: &ConversationPatch,
    ) -> ChatResult<Conversation> {
        ApiClient::update_conversation(self, id, patch).await
    }

    async fn update_system_prompt(
        &self,
        id: &str,
        system_prompt: &str,
    ) -> ChatResult<Conversation> {
        ApiClient::update_system_prompt(self, id, system_prompt).await
    }

    async fn delete_conversation(&self, id: &str) -> ChatResult<()> {
        ApiClient::delete_conversation(self, id).await
    }

    async fn generate_title(&self, id: &str, message: &str) -> ChatResult<String> {
        ApiClient::generate_title(self, id, message).await
    }
}
