//! Folds stream events into the session store, one at a time, in arrival order.

use std::sync::Arc;

use tracing::{debug, trace};

use parlance_shared::{Message, Role};

use crate::store::{ChatStatus, SessionId, SessionStore};

#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// The response headers arrived.
    Opened,
    Delta(String),
    /// No more deltas. May carry the server's consolidated message.
    Completed(Option<Message>),
    Failed(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Applied {
    Updated,
    Completed,
    Failed,
    /// The event belongs to a session that is no longer live (superseded
    /// by a conversation switch, or already finished). Nothing changed.
    Stale,
}

pub fn apply(store: &mut SessionStore, session: SessionId, event: StreamEvent) -> Applied {
    let live = store
        .stream
        .as_ref()
        .is_some_and(|stream| stream.id == session && !stream.is_complete);
    if !live {
        trace!(%session, ?event, "discarding stale stream event");
        return Applied::Stale;
    }

    match event {
        StreamEvent::Opened => {
            if store.status == ChatStatus::Submitted {
                store.status = ChatStatus::Streaming;
            }
            Applied::Updated
        }
        StreamEvent::Delta(delta) => {
            store.status = ChatStatus::Streaming;
            if let Some(stream) = store.stream.as_mut() {
                stream.accumulated_text.push_str(&delta);
            }
            Applied::Updated
        }
        StreamEvent::Completed(payload) => {
            let text = finish(store);
            let reply = match payload {
                Some(message) => Some(message),
                None if !text.is_empty() => Some(Message::provisional(Role::Assistant, text)),
                None => None,
            };
            if let Some(reply) = reply {
                Arc::make_mut(&mut store.messages).push(reply);
            }
            store.status = ChatStatus::Ready;
            debug!(%session, "stream completed");
            Applied::Completed
        }
        StreamEvent::Failed(message) => {
            // The provisional user message stays so the input is not lost.
            finish(store);
            store.status = ChatStatus::Error;
            store.error = Some(message);
            debug!(%session, "stream failed");
            Applied::Failed
        }
    }
}

/// Close the live session and hand back what it accumulated.
fn finish(store: &mut SessionStore) -> String {
    match store.stream.as_mut() {
        Some(stream) => {
            stream.is_complete = true;
            std::mem::take(&mut stream.accumulated_text)
        }
        None => String::new(),
    }
}
