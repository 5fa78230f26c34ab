use std::time::Instant;

use super::conversation::{Segment, Turn, TurnStatus};
use crate::services::CompletionChunk;
use crate::settings::{Locale, format_seconds};

/// Terminal and non-terminal states of one submission
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamStatus {
    Idle,
    Streaming,
    Done,
    Error(String),
    Cancelled,
}

impl StreamStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamStatus::Done | StreamStatus::Error(_) | StreamStatus::Cancelled
        )
    }
}

struct ThinkingBlock {
    content: String,
    title: String,
    status: TurnStatus,
}

/// Builds the segments of an in-flight assistant turn from completion chunks.
///
/// Keeps the thinking block and the answer apart and rewrites the turn's
/// content after every chunk as the non-empty subset of
/// `[thinking, answer]`, in that order.
pub struct TurnAssembler {
    locale: Locale,
    started_at: Instant,
    thinking: Option<ThinkingBlock>,
    answer: Option<String>,
}

impl TurnAssembler {
    pub fn new(locale: Locale) -> Self {
        Self::started_at(locale, Instant::now())
    }

    pub fn started_at(locale: Locale, started_at: Instant) -> Self {
        Self {
            locale,
            started_at,
            thinking: None,
            answer: None,
        }
    }

    fn elapsed_secs(&self) -> String {
        format_seconds(self.started_at.elapsed().as_secs_f64())
    }

    /// Fold one chunk into the turn.
    pub fn apply(&mut self, chunk: &CompletionChunk, turn: &mut Turn) {
        if let Some(reasoning) = chunk.reasoning_delta.as_deref().filter(|d| !d.is_empty()) {
            let locale = self.locale;
            let block = self.thinking.get_or_insert_with(|| ThinkingBlock {
                content: String::new(),
                title: locale.thinking_title(),
                status: TurnStatus::Pending,
            });
            block.content.push_str(reasoning);
        }

        if let Some(delta) = chunk.answer_delta.as_deref().filter(|d| !d.is_empty()) {
            if self.answer.is_none() {
                let elapsed = self.elapsed_secs();
                if let Some(block) = self.thinking.as_mut() {
                    block.title = self.locale.thought_done_title(&elapsed);
                    block.status = TurnStatus::Done;
                }
                self.answer = Some(String::new());
            }
            if let Some(answer) = self.answer.as_mut() {
                answer.push_str(delta);
            }
        }

        turn.content = self.segments();
        turn.loading = false;
    }

    fn segments(&self) -> Vec<Segment> {
        let mut segments = Vec::with_capacity(2);
        if let Some(block) = &self.thinking {
            segments.push(Segment::thinking(
                block.content.clone(),
                block.title.clone(),
                block.status,
            ));
        }
        if let Some(answer) = &self.answer {
            segments.push(Segment::text(answer.clone()));
        }
        segments
    }

    /// Normal completion: stamp the total elapsed time.
    pub fn complete(&self, turn: &mut Turn) {
        turn.finish();
        turn.footer = Some(self.locale.elapsed_footer(&self.elapsed_secs()));
    }

    pub fn answer(&self) -> Option<&str> {
        self.answer.as_deref()
    }

    pub fn reasoning(&self) -> Option<&str> {
        self.thinking.as_ref().map(|b| b.content.as_str())
    }
}

/// Finalize a turn whose stream failed, keeping whatever already arrived.
pub fn fail_turn(turn: &mut Turn, message: &str) {
    turn.finish();
    turn.content.push(Segment::error_text(message));
}

/// Freeze a turn after the user paused the completion.
pub fn pause_turn(turn: &mut Turn, locale: Locale) {
    turn.finish();
    turn.footer = Some(locale.paused_footer());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reasoning(text: &str) -> CompletionChunk {
        CompletionChunk {
            reasoning_delta: Some(text.to_string()),
            answer_delta: None,
        }
    }

    fn answer(text: &str) -> CompletionChunk {
        CompletionChunk {
            reasoning_delta: None,
            answer_delta: Some(text.to_string()),
        }
    }

    #[test]
    fn test_thinking_then_answer() {
        let mut turn = Turn::pending_assistant("bot");
        let mut assembler = TurnAssembler::new(Locale::En);

        assembler.apply(&reasoning("a"), &mut turn);
        match &turn.content[..] {
            [Segment::Tool { content, options }] => {
                assert_eq!(content, "a");
                assert_eq!(options.title, "Thinking...");
                assert_eq!(options.status, TurnStatus::Pending);
            }
            other => panic!("unexpected segments: {other:?}"),
        }
        assert!(!turn.loading);

        assembler.apply(&reasoning("b"), &mut turn);
        assembler.apply(&answer("x"), &mut turn);
        assembler.apply(&answer("y"), &mut turn);
        assembler.complete(&mut turn);

        assert_eq!(turn.content.len(), 2);
        match &turn.content[0] {
            Segment::Tool { content, options } => {
                assert_eq!(content, "ab");
                assert_eq!(options.status, TurnStatus::Done);
                assert!(options.title.starts_with("End of Thought ("));
                assert!(options.title.ends_with("s)"));
            }
            other => panic!("expected thinking segment, got {other:?}"),
        }
        assert_eq!(turn.content[1], Segment::text("xy"));
        assert_eq!(turn.status, Some(TurnStatus::Done));
    }

    #[test]
    fn test_answer_only() {
        let mut turn = Turn::pending_assistant("bot");
        let mut assembler = TurnAssembler::new(Locale::En);

        assembler.apply(&answer("Hi"), &mut turn);
        assembler.apply(&answer(" there"), &mut turn);

        assert_eq!(turn.content, vec![Segment::text("Hi there")]);
        assert_eq!(assembler.reasoning(), None);
        assert_eq!(assembler.answer(), Some("Hi there"));
    }

    #[test]
    fn test_chunk_with_both_deltas() {
        let mut turn = Turn::pending_assistant("bot");
        let mut assembler = TurnAssembler::new(Locale::En);

        assembler.apply(
            &CompletionChunk {
                reasoning_delta: Some("why".to_string()),
                answer_delta: Some("because".to_string()),
            },
            &mut turn,
        );

        assert_eq!(turn.thinking_text(), Some("why"));
        assert_eq!(turn.answer_text(), Some("because"));
        assert!(matches!(
            &turn.content[0],
            Segment::Tool { options, .. } if options.status == TurnStatus::Done
        ));
    }

    #[test]
    fn test_empty_chunk_still_clears_loading() {
        let mut turn = Turn::pending_assistant("bot");
        let mut assembler = TurnAssembler::new(Locale::En);

        assembler.apply(&CompletionChunk::default(), &mut turn);

        assert!(turn.content.is_empty());
        assert!(!turn.loading);
        assert_eq!(turn.status, Some(TurnStatus::Pending));
    }

    #[test]
    fn test_complete_footer_format() {
        let mut turn = Turn::pending_assistant("bot");
        let assembler = TurnAssembler::new(Locale::En);
        assembler.complete(&mut turn);

        let footer = turn.footer.unwrap();
        let number = footer.strip_suffix('s').unwrap();
        assert!(number.parse::<f64>().is_ok());
        assert_eq!(number.split('.').nth(1).map(str::len), Some(2));
    }

    #[test]
    fn test_fail_and_pause() {
        let mut turn = Turn::pending_assistant("bot");
        turn.content = vec![Segment::text("partial")];
        fail_turn(&mut turn, "connection reset");
        assert_eq!(turn.content.len(), 2);
        assert!(turn.content[1].is_error());
        assert!(!turn.loading);

        let mut turn = Turn::pending_assistant("bot");
        pause_turn(&mut turn, Locale::En);
        assert_eq!(turn.footer.as_deref(), Some("Chat completion paused"));
        assert_eq!(turn.status, Some(TurnStatus::Done));
    }
}
