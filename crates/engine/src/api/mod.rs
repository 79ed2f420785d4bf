mod auth;
pub mod backend;
pub mod client;
pub mod types;

pub use backend::ConversationBackend;
pub use client::ApiClient;
