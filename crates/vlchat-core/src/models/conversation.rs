use serde::{Deserialize, Serialize};

/// Author of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Lifecycle marker shared by assistant turns and thinking blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnStatus {
    Pending,
    Done,
}

/// Display options of a thinking block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOptions {
    pub title: String,
    pub status: TurnStatus,
}

/// One typed piece of a turn's content.
///
/// Serialized with a `type` tag so persisted sessions keep the
/// `{"type": "text", "content": ...}` layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Segment {
    /// Local paths or URLs attached to a user turn
    File { content: Vec<String> },
    Text {
        content: String,
        /// Rendered as an error. Never sent back to the model.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        error: bool,
    },
    /// Thinking trace
    Tool { content: String, options: ToolOptions },
}

impl Segment {
    pub fn text(content: impl Into<String>) -> Self {
        Segment::Text {
            content: content.into(),
            error: false,
        }
    }

    pub fn error_text(content: impl Into<String>) -> Self {
        Segment::Text {
            content: content.into(),
            error: true,
        }
    }

    pub fn files(paths: Vec<String>) -> Self {
        Segment::File { content: paths }
    }

    pub fn thinking(
        content: impl Into<String>,
        title: impl Into<String>,
        status: TurnStatus,
    ) -> Self {
        Segment::Tool {
            content: content.into(),
            options: ToolOptions {
                title: title.into(),
                status,
            },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Segment::Text { error: true, .. })
    }
}

/// One message-equivalent unit of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub key: String,
    pub role: Role,
    pub content: Vec<Segment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
    #[serde(default)]
    pub loading: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TurnStatus>,
    #[serde(default)]
    pub edited: bool,
}

impl Turn {
    /// User turn: exactly a file segment followed by a text segment.
    pub fn user(text: impl Into<String>, files: Vec<String>) -> Self {
        Self {
            key: uuid::Uuid::new_v4().to_string(),
            role: Role::User,
            content: vec![Segment::files(files), Segment::text(text)],
            header: None,
            footer: None,
            loading: false,
            status: None,
            edited: false,
        }
    }

    /// Empty in-flight assistant turn.
    pub fn pending_assistant(header: impl Into<String>) -> Self {
        Self {
            key: uuid::Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: Vec::new(),
            header: Some(header.into()),
            footer: None,
            loading: true,
            status: Some(TurnStatus::Pending),
            edited: false,
        }
    }

    /// Text of a user turn (its text segment).
    pub fn user_text(&self) -> Option<&str> {
        self.content.iter().find_map(|segment| match segment {
            Segment::Text { content, .. } => Some(content.as_str()),
            _ => None,
        })
    }

    /// File references of a user turn.
    pub fn files(&self) -> &[String] {
        self.content
            .iter()
            .find_map(|segment| match segment {
                Segment::File { content } => Some(content.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    /// Answer text of an assistant turn: its first non-error text segment.
    pub fn answer_text(&self) -> Option<&str> {
        self.content.iter().find_map(|segment| match segment {
            Segment::Text {
                content,
                error: false,
            } => Some(content.as_str()),
            _ => None,
        })
    }

    /// Content of the thinking segment, if any.
    pub fn thinking_text(&self) -> Option<&str> {
        self.content.iter().find_map(|segment| match segment {
            Segment::Tool { content, .. } => Some(content.as_str()),
            _ => None,
        })
    }

    /// Content with the user/answer text replaced, keeping files and thinking.
    ///
    /// Error segments are dropped since the edited text supersedes them.
    pub fn content_with_text(&self, text: &str) -> Vec<Segment> {
        let mut replaced = false;
        let mut content: Vec<Segment> = self
            .content
            .iter()
            .filter(|segment| !segment.is_error())
            .map(|segment| match segment {
                Segment::Text { .. } if !replaced => {
                    replaced = true;
                    Segment::text(text)
                }
                other => other.clone(),
            })
            .collect();
        if !replaced {
            content.push(Segment::text(text));
        }
        content
    }

    /// Mark as finished. Clears `loading` and sets `status=done`.
    pub fn finish(&mut self) {
        self.loading = false;
        self.status = Some(TurnStatus::Done);
    }

    /// Replace content and flag as edited. The marker lands in the footer once.
    pub fn apply_edit(&mut self, content: Vec<Segment>, marker: &str) {
        self.content = content;
        if !self.edited {
            self.edited = true;
            self.footer = Some(match self.footer.take() {
                Some(footer) if !footer.is_empty() => format!("{footer} {marker}"),
                _ => marker.to_string(),
            });
        }
    }
}

/// Per-conversation context: the transcript plus its thinking flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub history: Vec<Turn>,
    #[serde(default = "default_enable_thinking")]
    pub enable_thinking: bool,
}

fn default_enable_thinking() -> bool {
    true
}

impl ConversationContext {
    pub fn new(enable_thinking: bool) -> Self {
        Self {
            history: Vec::new(),
            enable_thinking,
        }
    }

    /// Whether the transcript ends with a user turn waiting for an answer.
    pub fn has_trailing_user_turn(&self) -> bool {
        self.history.last().map(|t| t.role) == Some(Role::User)
    }
}

/// Sidebar entry for a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub key: String,
    pub label: String,
}
