//! Error types for the chat engine.

use reqwest::StatusCode;
use thiserror::Error;

pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Error, Debug)]
pub enum ChatError {
    /// The caller tried to stream without the inputs a request needs.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Non-success response, missing body, or a read that failed mid-stream.
    #[error("{}", describe_transport(.status, .message))]
    Transport {
        status: Option<StatusCode>,
        message: String,
    },

    /// A single stream line that could not be decoded. Never escapes the transport.
    #[error("malformed stream line: {0}")]
    Parse(String),

    /// The authoritative reload after a finished stream failed.
    #[error("failed to reload conversation {conversation_id}: {message}")]
    Reconciliation {
        conversation_id: String,
        message: String,
    },

    #[error("session expired, please sign in again")]
    Unauthorized,

    #[error("{0}")]
    Validation(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

fn describe_transport(status: &Option<StatusCode>, message: &str) -> String {
    match status {
        Some(status) => format!("transport error ({status}): {message}"),
        None => format!("transport error: {message}"),
    }
}

impl ChatError {
    pub fn transport(status: Option<StatusCode>, message: impl Into<String>) -> Self {
        ChatError::Transport {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ChatError::Transport { status, .. } => *status,
            ChatError::Unauthorized => Some(StatusCode::UNAUTHORIZED),
            ChatError::Http(err) => err.status(),
            _ => None,
        }
    }

    /// Text suitable for a notification or an inline banner.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::Transport { message, .. } if !message.is_empty() => message.clone(),
            ChatError::Validation(message) => message.clone(),
            other => other.to_string(),
        }
    }
}
