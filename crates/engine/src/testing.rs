//! In-memory collaborators for unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use parlance_shared::{
    Conversation, ConversationPatch, ConversationWithMessages, Message, NewConversation,
};

use crate::api::ConversationBackend;
use crate::error::{ChatError, ChatResult};
use crate::transport::{ChunkStream, Transport, Trigger};
use parlance_shared::StreamChunk;

pub(crate) fn conversation(id: &str, title: &str) -> Conversation {
    let at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    Conversation {
        id: id.into(),
        title: title.into(),
        system_prompt: None,
        created_at: at,
        updated_at: at,
    }
}

pub(crate) fn server_message(id: &str, role: parlance_shared::Role, text: &str) -> Message {
    let mut message = Message::provisional(role, text);
    message.id = id.into();
    message
}

#[derive(Default)]
struct BackendState {
    order: Vec<String>,
    conversations: HashMap<String, ConversationWithMessages>,
    failure: Option<String>,
    created: usize,
    loads: usize,
}

/// A backend that keeps conversations in memory. `fail_next` makes the
/// next call return a transport error.
#[derive(Default)]
pub(crate) struct FakeBackend {
    state: Mutex<BackendState>,
}

impl FakeBackend {
    pub fn with(conversations: Vec<Conversation>) -> Self {
        let backend = Self::default();
        {
            let mut state = backend.state.lock().unwrap();
            for conversation in conversations {
                state.order.push(conversation.id.clone());
                state.conversations.insert(
                    conversation.id.clone(),
                    ConversationWithMessages::empty(conversation),
                );
            }
        }
        backend
    }

    pub fn fail_next(&self, message: &str) {
        self.state.lock().unwrap().failure = Some(message.to_string());
    }

    /// Replace what the server has persisted for `id`.
    pub fn set_messages(&self, id: &str, messages: Vec<Message>) {
        let mut state = self.state.lock().unwrap();
        if let Some(detail) = state.conversations.get_mut(id) {
            detail.messages = messages;
        }
    }

    pub fn loads(&self) -> usize {
        self.state.lock().unwrap().loads
    }

    fn check(&self) -> ChatResult<()> {
        match self.state.lock().unwrap().failure.take() {
            Some(message) => Err(ChatError::transport(None, message)),
            None => Ok(()),
        }
    }

    fn not_found(id: &str) -> ChatError {
        ChatError::transport(Some(reqwest::StatusCode::NOT_FOUND), format!("{id} not found"))
    }
}

#[async_trait]
impl ConversationBackend for FakeBackend {
    async fn list_conversations(&self) -> ChatResult<Vec<Conversation>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.conversations.get(id))
            .map(|detail| detail.conversation.clone())
            .collect())
    }

    async fn get_conversation(&self, id: &str) -> ChatResult<ConversationWithMessages> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        state.loads += 1;
        state.conversations.get(id).cloned().ok_or_else(|| Self::not_found(id))
    }

    async fn create_conversation(&self, title: Option<&str>) -> ChatResult<Conversation> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        state.created += 1;
        let id = format!("new-{}", state.created);
        let created = conversation(&id, title.unwrap_or("New Chat"));
        state.order.insert(0, id.clone());
        state
            .conversations
            .insert(id, ConversationWithMessages::empty(created.clone()));
        Ok(created)
    }

    async fn create_with_message(&self, params: &NewConversation) -> ChatResult<Conversation> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        state.created += 1;
        let id = format!("new-{}", state.created);
        let mut created = conversation(&id, params.title.as_deref().unwrap_or("New Chat"));
        created.system_prompt = params.system_prompt.clone();

        let first = server_message(
            &format!("{id}-m1"),
            parlance_shared::Role::User,
            &params.first_message,
        );
        state.order.insert(0, id.clone());
        state.conversations.insert(
            id,
            ConversationWithMessages {
                conversation: created.clone(),
                messages: vec![first],
            },
        );
        Ok(created)
    }

    async fn update_conversation(
        &self,
        id: &str,
        patch: &ConversationPatch,
    ) -> ChatResult<Conversation> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        let detail = state.conversations.get_mut(id).ok_or_else(|| Self::not_found(id))?;
        patch.apply_to(&mut detail.conversation);
        Ok(detail.conversation.clone())
    }

    async fn update_system_prompt(&self, id: &str, system_prompt: &str) -> ChatResult<Conversation> {
        self.update_conversation(id, &ConversationPatch::system_prompt(system_prompt))
            .await
    }

    async fn delete_conversation(&self, id: &str) -> ChatResult<()> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        state.order.retain(|existing| existing != id);
        state.conversations.remove(id).map(|_| ()).ok_or_else(|| Self::not_found(id))
    }

    async fn generate_title(&self, id: &str, message: &str) -> ChatResult<String> {
        self.check()?;
        let title = format!("Title: {message}");
        let mut state = self.state.lock().unwrap();
        if let Some(detail) = state.conversations.get_mut(id) {
            detail.conversation.title = title.clone();
        }
        Ok(title)
    }
}

/// One call the transport received.
#[derive(Clone, Debug)]
pub(crate) struct Opened {
    pub conversation_id: Option<String>,
    pub messages: Vec<Message>,
    pub trigger: Trigger,
}

enum Script {
    Chunks(Vec<ChatResult<StreamChunk>>),
    Live(mpsc::UnboundedReceiver<ChatResult<StreamChunk>>),
    Refuse(String),
}

/// A transport that replays queued responses in order.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    scripts: Mutex<Vec<Script>>,
    calls: Mutex<Vec<Opened>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response made of these deltas followed by a completion.
    pub fn reply(self, deltas: &[&str]) -> Self {
        let mut chunks: Vec<ChatResult<StreamChunk>> = deltas
            .iter()
            .map(|delta| Ok(StreamChunk::TextDelta(delta.to_string())))
            .collect();
        chunks.push(Ok(StreamChunk::Complete(None)));
        self.script(Script::Chunks(chunks))
    }

    pub fn chunks(self, chunks: Vec<ChatResult<StreamChunk>>) -> Self {
        self.script(Script::Chunks(chunks))
    }

    /// Queue a response whose status is not a success.
    pub fn refuse(self, message: &str) -> Self {
        self.script(Script::Refuse(message.to_string()))
    }

    /// Queue a response the test feeds by hand.
    pub fn live(&self) -> mpsc::UnboundedSender<ChatResult<StreamChunk>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts.lock().unwrap().push(Script::Live(rx));
        tx
    }

    pub fn calls(&self) -> Vec<Opened> {
        self.calls.lock().unwrap().clone()
    }

    fn script(self, script: Script) -> Self {
        self.scripts.lock().unwrap().push(script);
        self
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(
        &self,
        conversation_id: Option<&str>,
        messages: &[Message],
        trigger: Trigger,
    ) -> ChatResult<ChunkStream> {
        self.calls.lock().unwrap().push(Opened {
            conversation_id: conversation_id.map(str::to_string),
            messages: messages.to_vec(),
            trigger,
        });

        let conversation_id = conversation_id.filter(|id| !id.is_empty());
        if conversation_id.is_none() {
            return Err(ChatError::Configuration("no conversation".into()));
        }

        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            return Err(ChatError::transport(None, "no scripted response"));
        }
        match scripts.remove(0) {
            Script::Chunks(chunks) => Ok(stream::iter(chunks).boxed()),
            Script::Live(rx) => Ok(UnboundedReceiverStream::new(rx).boxed()),
            Script::Refuse(message) => Err(ChatError::transport(
                Some(reqwest::StatusCode::INTERNAL_SERVER_ERROR),
                message,
            )),
        }
    }
}
