pub mod events;
pub mod ids;
pub mod schemas;

pub use events::{Decoded, DecodeError, StreamChunk, decode_line};
pub use schemas::{
    AuthResponse, Conversation, ConversationPatch, ConversationWithMessages, Credentials, Message,
    MessagePart, NewConversation, Role, User,
};
