pub mod llm_service;
pub mod media_resolver;
pub mod sse;
pub mod storage_service;
pub mod transcript_builder;

pub use llm_service::{
    ChunkStream, CompletionChunk, CompletionClient, ConnectivityCheck, OpenAiCompatibleClient,
};
pub use media_resolver::{MediaKind, MediaResolver, ResolvedMedia};
pub use storage_service::ObjectStorage;
pub use transcript_builder::{ChatMessage, ContentPart, MessageContent, MessageRole};
