use std::fmt::Write;

use vlchat_core::SessionSnapshot;
use vlchat_core::models::{Role, Segment, SessionView, Turn, TurnStatus};

const LABEL_MAX_CHARS: usize = 40;

/// Truncate text to max length
fn truncate_text(text: &str, max_len: usize) -> String {
    let first_line = text.lines().next().unwrap_or_default();
    if first_line.chars().count() > max_len {
        let head: String = first_line.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    } else {
        first_line.to_string()
    }
}

/// Prints the in-flight assistant turn incrementally.
///
/// Tracks how much of the thinking trace and answer was already written so
/// each snapshot only adds its new suffix.
#[derive(Debug, Default)]
pub struct StreamRenderer {
    turn_key: Option<String>,
    thinking_printed: usize,
    answer_printed: usize,
    errors_printed: usize,
    finished: bool,
}

impl StreamRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&mut self, snapshot: &SessionSnapshot) -> String {
        let mut out = String::new();
        let Some(turn) = snapshot.history.last().filter(|t| t.role == Role::Assistant) else {
            return out;
        };

        if self.turn_key.as_deref() != Some(turn.key.as_str()) {
            let in_flight = turn.loading || turn.status == Some(TurnStatus::Pending);
            *self = Self {
                turn_key: Some(turn.key.clone()),
                finished: !in_flight,
                ..Self::default()
            };
            if in_flight {
                let _ = writeln!(out, "\n[{}]", turn.header.as_deref().unwrap_or("assistant"));
            }
        }
        if self.finished {
            return out;
        }

        if let Some(thinking) = turn.thinking_text()
            && let Some(new) = thinking.get(self.thinking_printed..)
            && !new.is_empty()
        {
            if self.thinking_printed == 0 {
                out.push_str("  > ");
            }
            out.push_str(&new.replace('\n', "\n  > "));
            self.thinking_printed = thinking.len();
        }

        if let Some(answer) = turn.answer_text()
            && let Some(new) = answer.get(self.answer_printed..)
            && !new.is_empty()
        {
            if self.answer_printed == 0 && self.thinking_printed > 0 {
                out.push_str("\n\n");
            }
            out.push_str(new);
            self.answer_printed = answer.len();
        }

        let errors: Vec<&str> = turn
            .content
            .iter()
            .filter_map(|segment| match segment {
                Segment::Text {
                    content,
                    error: true,
                } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        for error in errors.iter().skip(self.errors_printed) {
            let _ = write!(out, "\n! {error}");
        }
        self.errors_printed = errors.len();

        if turn.status == Some(TurnStatus::Done) && !turn.loading {
            match &turn.footer {
                Some(footer) => {
                    let _ = writeln!(out, "\n({footer})");
                }
                None => out.push('\n'),
            }
            self.finished = true;
        }
        out
    }
}

pub fn format_conversations(view: &SessionView) -> String {
    if view.conversations.is_empty() {
        return "No conversations yet.\n".to_string();
    }
    let mut out = String::new();
    for (i, summary) in view.conversations.iter().enumerate() {
        let marker = if view.active_id.as_deref() == Some(summary.key.as_str()) {
            '*'
        } else {
            ' '
        };
        let streaming = if view.streaming.contains(&summary.key) {
            " [streaming]"
        } else {
            ""
        };
        let _ = writeln!(
            out,
            "{marker}{:>3}. {}{streaming}",
            i + 1,
            truncate_text(&summary.label, LABEL_MAX_CHARS)
        );
    }
    out
}

pub fn format_turn(turn: &Turn) -> String {
    let mut out = String::new();
    for segment in &turn.content {
        match segment {
            Segment::File { content } if !content.is_empty() => {
                let _ = writeln!(out, "  [files: {}]", content.join(", "));
            }
            Segment::File { .. } => {}
            Segment::Tool { content, options } => {
                let _ = writeln!(out, "  > {} ({} chars)", options.title, content.chars().count());
            }
            Segment::Text {
                content,
                error: false,
            } => {
                let _ = writeln!(out, "  {}", content.replace('\n', "\n  "));
            }
            Segment::Text {
                content,
                error: true,
            } => {
                let _ = writeln!(out, "  ! {content}");
            }
        }
    }
    if let Some(footer) = &turn.footer {
        let _ = writeln!(out, "  ({footer})");
    }
    out
}

pub fn format_history(history: &[Turn]) -> String {
    if history.is_empty() {
        return "Empty conversation.\n".to_string();
    }
    let mut out = String::new();
    for (i, turn) in history.iter().enumerate() {
        let who = match turn.role {
            Role::User => "you",
            Role::Assistant => turn.header.as_deref().unwrap_or("assistant"),
        };
        let _ = writeln!(out, "#{} {who}", i + 1);
        out.push_str(&format_turn(turn));
    }
    out
}
