use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value, json};

use crate::ids::{generate_local_id, generate_temp_id, is_local_id, is_temp_id};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Placeholder record shown in the sidebar while the server creates the real one.
    pub fn temporary(title: Option<&str>, system_prompt: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id: generate_temp_id(),
            title: title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or("Untitled")
                .to_string(),
            system_prompt: system_prompt
                .filter(|p| !p.is_empty())
                .map(str::to_string),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_temporary(&self) -> bool {
        is_temp_id(&self.id)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationWithMessages {
    #[serde(flatten)]
    pub conversation: Conversation,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl ConversationWithMessages {
    pub fn empty(conversation: Conversation) -> Self {
        Self {
            conversation,
            messages: Vec::new(),
        }
    }
}

/// Partial update for a conversation; absent fields are left untouched.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl ConversationPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn system_prompt(prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(prompt.into()),
            ..Self::default()
        }
    }

    pub fn apply_to(&self, conversation: &mut Conversation) {
        if let Some(title) = &self.title {
            conversation.title = title.clone();
        }
        if let Some(prompt) = &self.system_prompt {
            conversation.system_prompt = Some(prompt.clone());
        }
    }
}

/// Body of the create-conversation-with-first-message call.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewConversation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub first_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl NewConversation {
    pub fn new(first_message: impl Into<String>) -> Self {
        Self {
            title: None,
            first_message: first_message.into(),
            system_prompt: None,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One typed piece of a message. Only text is rendered; every other part
/// is carried through untouched.
#[derive(Clone, Debug, PartialEq)]
pub enum MessagePart {
    Text(String),
    Other(Value),
}

impl MessagePart {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessagePart::Text(text) => Some(text),
            MessagePart::Other(_) => None,
        }
    }
}

impl Serialize for MessagePart {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MessagePart::Text(text) => json!({ "type": "text", "text": text }).serialize(serializer),
            MessagePart::Other(value) => value.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for MessagePart {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        if value.get("type").and_then(Value::as_str) == Some("text") {
            if let Some(text) = value.get("text").and_then(Value::as_str) {
                return Ok(MessagePart::Text(text.to_string()));
            }
        }
        Ok(MessagePart::Other(value))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(from = "WireMessage", rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Message {
    /// A message that exists only on this client until the server echoes it back.
    pub fn provisional(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: generate_local_id(),
            role,
            parts: vec![MessagePart::Text(text.into())],
            created_at: Some(Utc::now()),
            metadata: Map::new(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::provisional(Role::User, text)
    }

    /// All text parts concatenated in order.
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(MessagePart::as_text).collect()
    }

    pub fn is_provisional(&self) -> bool {
        is_local_id(&self.id)
    }
}

/// Accepts both the persisted shape (`content: string`) and the streamed
/// shape (`parts: [...]`).
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    id: String,
    role: Role,
    #[serde(default)]
    parts: Option<Vec<MessagePart>>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl From<WireMessage> for Message {
    fn from(wire: WireMessage) -> Self {
        let parts = match (wire.parts, wire.content) {
            (Some(parts), _) => parts,
            (None, Some(content)) => vec![MessagePart::Text(content)],
            (None, None) => Vec::new(),
        };
        let created_at = wire.created_at.or_else(|| {
            wire.metadata
                .get("createdAt")
                .and_then(Value::as_str)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|at| at.with_timezone(&Utc))
        });

        Self {
            id: wire.id,
            role: wire.role,
            parts,
            created_at,
            metadata: wire.metadata,
        }
    }
}

// Auth
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub credits: i64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub access_token: String,
    pub user: User,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persisted_message_with_plain_content_becomes_a_text_part() {
        let message: Message = serde_json::from_value(json!({
            "id": "m1",
            "role": "assistant",
            "content": "hello there",
            "createdAt": "2025-03-01T10:00:00.000Z"
        }))
        .unwrap();

        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.text(), "hello there");
        assert!(message.created_at.is_some());
        assert!(!message.is_provisional());
    }

    #[test]
    fn text_joins_text_parts_and_keeps_other_parts() {
        let message: Message = serde_json::from_value(json!({
            "id": "m2",
            "role": "assistant",
            "parts": [
                { "type": "step-start" },
                { "type": "text", "text": "hel" },
                { "type": "reasoning", "text": "thinking" },
                { "type": "text", "text": "lo" }
            ],
            "metadata": { "createdAt": "2025-03-01T10:00:00Z" }
        }))
        .unwrap();

        assert_eq!(message.text(), "hello");
        assert_eq!(message.parts.len(), 4);
        assert!(message.created_at.is_some());

        let round = serde_json::to_value(&message).unwrap();
        assert_eq!(round["parts"][2]["type"], "reasoning");
        assert_eq!(round["parts"][1], json!({ "type": "text", "text": "hel" }));
    }

    #[test]
    fn conversation_with_messages_flattens_the_record() {
        let detail: ConversationWithMessages = serde_json::from_value(json!({
            "id": "c1",
            "title": "Trip planning",
            "systemPrompt": "be brief",
            "createdAt": "2025-03-01T10:00:00Z",
            "updatedAt": "2025-03-01T10:05:00Z",
            "messages": [{ "id": "m1", "role": "user", "content": "hi" }]
        }))
        .unwrap();

        assert_eq!(detail.conversation.id, "c1");
        assert_eq!(detail.conversation.system_prompt.as_deref(), Some("be brief"));
        assert_eq!(detail.messages.len(), 1);
    }

    #[test]
    fn temporary_conversation_defaults_title() {
        let temp = Conversation::temporary(None, Some(""));
        assert!(temp.is_temporary());
        assert_eq!(temp.title, "Untitled");
        assert_eq!(temp.system_prompt, None);

        let titled = Conversation::temporary(Some("Plans"), Some("be brief"));
        assert_eq!(titled.title, "Plans");
        assert_eq!(titled.system_prompt.as_deref(), Some("be brief"));
    }

    #[test]
    fn patch_only_touches_present_fields() {
        let mut conversation = Conversation::temporary(Some("Old"), Some("keep"));
        ConversationPatch::title("New").apply_to(&mut conversation);

        assert_eq!(conversation.title, "New");
        assert_eq!(conversation.system_prompt.as_deref(), Some("keep"));
        assert_eq!(
            serde_json::to_value(ConversationPatch::system_prompt("x")).unwrap(),
            json!({ "systemPrompt": "x" })
        );
    }
}
