//! 记忆层：按会话的短期对话历史

pub mod conversation;

pub use conversation::{ConversationMemory, Message, Role, SessionHistories};
