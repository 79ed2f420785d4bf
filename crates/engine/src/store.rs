use std::fmt;
use std::sync::Arc;

use parlance_shared::{Message, Role};

use crate::trigger::{AutoTrigger, NavigationIntent, TriggerConditions};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChatStatus {
    #[default]
    Ready,
    Submitted,
    Streaming,
    Error,
}

impl ChatStatus {
    pub fn is_busy(self) -> bool {
        matches!(self, ChatStatus::Submitted | ChatStatus::Streaming)
    }
}

impl fmt::Display for ChatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ChatStatus::Ready => "ready",
            ChatStatus::Submitted => "submitted",
            ChatStatus::Streaming => "streaming",
            ChatStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// Tag carried by every stream event; events whose tag is not the live
/// session are discarded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

impl SessionId {
    /// The store revision this session started.
    pub(crate) fn revision(self) -> u64 {
        self.0
    }
}

/// One outstanding send.
#[derive(Clone, Debug)]
pub struct StreamSession {
    pub id: SessionId,
    pub conversation_id: String,
    pub accumulated_text: String,
    pub is_complete: bool,
}

/// Why a send (or respond) was refused. Refusals change nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    EmptyInput,
    NoConversation,
    Loading,
    Busy(ChatStatus),
    NothingToAnswer,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::EmptyInput => write!(f, "message is empty"),
            Rejection::NoConversation => write!(f, "no conversation selected"),
            Rejection::Loading => write!(f, "conversation is still loading"),
            Rejection::Busy(status) => write!(f, "a reply is already in progress ({status})"),
            Rejection::NothingToAnswer => write!(f, "conversation has no messages"),
        }
    }
}

/// A send that passed the guards: what the transport needs to open it.
#[derive(Clone, Debug)]
pub(crate) struct Begun {
    pub session: SessionId,
    pub conversation_id: String,
    pub history: Arc<Vec<Message>>,
}

/// State of the currently displayed conversation.
///
/// Owns the message list and the stream session. Switching conversations
/// discards both; nothing else mutates them except the reducer and the
/// reconciliation step.
#[derive(Debug, Default)]
pub struct SessionStore {
    pub(crate) conversation_id: Option<String>,
    pub(crate) messages: Arc<Vec<Message>>,
    pub(crate) status: ChatStatus,
    pub(crate) stream: Option<StreamSession>,
    pub(crate) loading: bool,
    pub(crate) error: Option<String>,
    next_session: u64,
    selected_at: u64,
    view: u64,
    pub(crate) trigger: AutoTrigger,
    pub(crate) intent: NavigationIntent,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch to `conversation_id`, dropping everything that belonged to
    /// the previous one. Returns a token that `finish_load` checks so a
    /// slow load for an earlier selection cannot land here.
    pub(crate) fn select(&mut self, conversation_id: Option<String>, intent: NavigationIntent) -> u64 {
        self.view += 1;
        self.trigger.conversation_changed(conversation_id.as_deref());
        if intent.auto_trigger {
            if let Some(id) = &conversation_id {
                self.trigger.arm(id.clone());
            }
        }

        self.loading = conversation_id.is_some();
        self.conversation_id = conversation_id;
        self.messages = Arc::new(Vec::new());
        self.status = ChatStatus::Ready;
        self.stream = None;
        self.error = None;
        self.intent = intent;
        self.selected_at = self.next_session;
        self.view
    }

    /// Install loaded messages for the view `select` returned.
    pub(crate) fn finish_load(&mut self, view: u64, messages: Vec<Message>) -> bool {
        if view != self.view {
            return false;
        }
        self.loading = false;
        // A send begun meanwhile owns the list now; reconciliation will settle it.
        if self.next_session == self.selected_at {
            self.messages = Arc::new(messages);
        }
        true
    }

    /// Show cached messages while the authoritative load is in flight.
    pub(crate) fn show_cached(&mut self, view: u64, messages: Vec<Message>) {
        if view == self.view {
            self.messages = Arc::new(messages);
            self.loading = false;
        }
    }

    pub(crate) fn check_send(&self, text: &str) -> Result<String, Rejection> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Rejection::EmptyInput);
        }
        self.check_open()?;
        Ok(text.to_string())
    }

    pub(crate) fn check_respond(&self) -> Result<(), Rejection> {
        self.check_open()?;
        if self.messages.is_empty() {
            return Err(Rejection::NothingToAnswer);
        }
        Ok(())
    }

    fn check_open(&self) -> Result<(), Rejection> {
        if self.conversation_id.is_none() {
            return Err(Rejection::NoConversation);
        }
        if self.loading {
            return Err(Rejection::Loading);
        }
        if self.status != ChatStatus::Ready {
            return Err(Rejection::Busy(self.status));
        }
        Ok(())
    }

    /// Start a stream session, appending `user` first when given. Callers
    /// must have passed `check_send` or `check_respond`.
    pub(crate) fn begin(&mut self, user: Option<Message>) -> Result<Begun, Rejection> {
        let conversation_id = self.conversation_id.clone().ok_or(Rejection::NoConversation)?;
        if let Some(message) = user {
            Arc::make_mut(&mut self.messages).push(message);
        }

        self.next_session += 1;
        let session = SessionId(self.next_session);
        self.stream = Some(StreamSession {
            id: session,
            conversation_id: conversation_id.clone(),
            accumulated_text: String::new(),
            is_complete: false,
        });
        self.status = ChatStatus::Submitted;
        self.error = None;

        Ok(Begun {
            session,
            conversation_id,
            history: Arc::clone(&self.messages),
        })
    }

    /// The newest session begun so far. Used to detect a send that
    /// started while a reload was in flight.
    pub(crate) fn revision(&self) -> u64 {
        self.next_session
    }

    /// Replace the list with the authoritative one. Refused when the user
    /// moved to another conversation or started another send since
    /// `revision` was read.
    pub(crate) fn replace_messages(
        &mut self,
        conversation_id: &str,
        revision: u64,
        messages: Vec<Message>,
    ) -> bool {
        if self.conversation_id.as_deref() != Some(conversation_id)
            || self.next_session != revision
            || self.status.is_busy()
        {
            return false;
        }

        self.messages = Arc::new(messages);
        self.stream = None;
        true
    }

    pub(crate) fn clear_error(&mut self) -> bool {
        if self.status != ChatStatus::Error {
            return false;
        }
        self.status = ChatStatus::Ready;
        self.error = None;
        true
    }

    pub(crate) fn trigger_conditions(&self) -> TriggerConditions {
        TriggerConditions {
            conversation_id: self.conversation_id.clone(),
            loaded: !self.loading,
            message_count: self.messages.len(),
            first_is_user: self
                .messages
                .first()
                .is_some_and(|message| message.role == Role::User),
            ready: self.status == ChatStatus::Ready,
        }
    }

    /// Evaluate the auto-trigger; the navigation intent is consumed when it fires.
    pub(crate) fn evaluate_trigger(&mut self) -> bool {
        let fired = self.trigger.evaluate(self.trigger_conditions());
        if fired {
            self.intent.take();
        }
        fired
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let in_flight_text = self
            .stream
            .as_ref()
            .filter(|stream| !stream.is_complete)
            .map(|stream| stream.accumulated_text.clone())
            .unwrap_or_default();

        SessionSnapshot {
            conversation_id: self.conversation_id.clone(),
            messages: Arc::clone(&self.messages),
            status: self.status,
            in_flight_text,
            loading: self.loading,
            error: self.error.clone(),
        }
    }
}

/// Read-only view of the session, published after every change.
#[derive(Clone, Debug, Default)]
pub struct SessionSnapshot {
    pub conversation_id: Option<String>,
    pub messages: Arc<Vec<Message>>,
    pub status: ChatStatus,
    pub in_flight_text: String,
    pub loading: bool,
    pub error: Option<String>,
}

impl SessionSnapshot {
    pub fn is_streaming(&self) -> bool {
        self.status == ChatStatus::Streaming
    }

    /// The message list plus the reply being streamed, if any.
    pub fn display_messages(&self) -> Vec<Message> {
        let mut messages = self.messages.as_ref().clone();
        if self.status.is_busy() && !self.in_flight_text.is_empty() {
            messages.push(Message::provisional(
                Role::Assistant,
                self.in_flight_text.clone(),
            ));
        }
        messages
    }
}
