pub mod conversation;
pub mod conversations_store;
pub mod stream_manager;

pub use conversation::{
    ConversationContext, ConversationSummary, Role, Segment, ToolOptions, Turn, TurnStatus,
};
pub use conversations_store::{ConversationsStore, SessionView};
pub use stream_manager::{StreamStatus, TurnAssembler};
