use serde::{Deserialize, Serialize};

use parlance_shared::Message;

use crate::transport::Trigger;

// Streaming send
#[derive(Serialize)]
pub struct ChatRequest<'a> {
    pub messages: &'a [Message],
    pub id: &'a str,
    pub trigger: Trigger,
}

// Conversation creation
#[derive(Serialize)]
pub struct CreateConversationRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<&'a str>,
}

// System prompt
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemPromptRequest<'a> {
    pub system_prompt: &'a str,
}

// Title generation
#[derive(Serialize)]
pub struct GenerateTitleRequest<'a> {
    pub message: &'a str,
}

#[derive(Deserialize)]
pub struct GenerateTitleResponse {
    pub title: String,
}

/// Error payload the backend returns with non-2xx statuses.
#[derive(Deserialize, Default)]
pub struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ErrorBody {
    pub fn into_message(self) -> Option<String> {
        self.message.or(self.error).filter(|m| !m.is_empty())
    }
}
