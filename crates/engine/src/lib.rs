pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod conversations;
pub mod error;
pub mod events;
pub mod reducer;
pub mod session;
pub mod store;
pub mod transport;
pub mod trigger;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiClient, ConversationBackend};
pub use auth::AuthContext;
pub use cache::{CacheSnapshot, ConversationCache};
pub use config::ApiConfig;
pub use conversations::ConversationService;
pub use error::{ChatError, ChatResult};
pub use events::{Notice, NoticeLevel, Notifier};
pub use session::{ChatSession, SendOutcome};
pub use store::{ChatStatus, Rejection, SessionSnapshot, SessionStore};
pub use transport::{HttpTransport, Transport, Trigger};
pub use trigger::{AutoTrigger, NavigationIntent, TriggerState};

pub use parlance_shared as shared;
