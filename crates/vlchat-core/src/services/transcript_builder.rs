use serde::{Deserialize, Serialize};

use super::media_resolver::{MediaKind, MediaResolver};
use crate::models::{Role, Turn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaUrl {
    pub url: String,
}

/// One entry of a multi-part user message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: MediaUrl },
    VideoUrl { video_url: MediaUrl },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// A message in the OpenAI chat-completions wire format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }
}

/// Convert a conversation's turns into the message list sent to the model.
///
/// The system prompt comes first, then one message per turn in order.
/// User turns carry their media (in attachment order) followed by their
/// text. Assistant turns are reduced to their answer text; thinking traces
/// and error segments are never sent back. `history` is not modified.
pub async fn build(history: &[Turn], system_prompt: &str, resolver: &MediaResolver) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessage::system(system_prompt));

    for turn in history {
        match turn.role {
            Role::User => {
                let mut parts = Vec::with_capacity(turn.files().len() + 1);
                for file_ref in turn.files() {
                    let Some(media) = resolver.resolve(file_ref).await else {
                        continue;
                    };
                    let url = MediaUrl { url: media.url };
                    parts.push(match media.kind {
                        MediaKind::Image => ContentPart::ImageUrl { image_url: url },
                        MediaKind::Video => ContentPart::VideoUrl { video_url: url },
                    });
                }
                parts.push(ContentPart::Text {
                    text: turn.user_text().unwrap_or_default().to_string(),
                });
                messages.push(ChatMessage {
                    role: MessageRole::User,
                    content: MessageContent::Parts(parts),
                });
            }
            Role::Assistant => {
                messages.push(ChatMessage::assistant(turn.answer_text().unwrap_or_default()));
            }
        }
    }

    messages
}
