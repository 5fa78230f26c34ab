//! Incremental decoder for `text/event-stream` bodies.
//!
//! Bytes are buffered until a full line is available, so multi-byte UTF-8
//! sequences split across network chunks decode correctly.

use anyhow::bail;
use serde::de::DeserializeOwned;

/// One `data:` payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub data: String,
}

impl SseFrame {
    /// The OpenAI-style end-of-stream sentinel
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }

    pub fn parse<T: DeserializeOwned>(&self) -> anyhow::Result<T> {
        serde_json::from_str(&self.data)
            .map_err(|e| anyhow::anyhow!("malformed stream chunk: {e}. Data: {}", self.preview()))
    }

    fn preview(&self) -> String {
        self.data.chars().take(200).collect()
    }
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Upper bound on a single buffered line
    const MAX_BUFFER_SIZE: usize = 1024 * 1024;

    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every complete `data:` frame.
    ///
    /// Fails once a single line grows past the buffer limit; the partial
    /// line is dropped and the stream cannot be resumed.
    pub fn push(&mut self, chunk: &[u8]) -> anyhow::Result<Vec<SseFrame>> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            // Blank separators and `:` keep-alive comments carry no data
            if line.is_empty() || line.starts_with(':') {
                continue;
            }
            if let Some(data) = line.strip_prefix("data:") {
                frames.push(SseFrame {
                    data: data.strip_prefix(' ').unwrap_or(data).to_string(),
                });
            }
        }

        if self.buffer.len() > Self::MAX_BUFFER_SIZE {
            let size = self.buffer.len();
            self.buffer.clear();
            bail!(
                "stream line of {size} bytes exceeds the {} byte limit",
                Self::MAX_BUFFER_SIZE
            );
        }

        Ok(frames)
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> anyhow::Result<Vec<SseFrame>> {
        if self.buffer.is_empty() {
            return Ok(Vec::new());
        }
        self.buffer.push(b'\n');
        self.push(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_frames() {
        let mut decoder = SseDecoder::new();
        let frames = decoder
            .push(b"data: {\"a\":1}\n\ndata: [DONE]\n\n")
            .unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "{\"a\":1}");
        assert!(frames[1].is_done());
    }

    #[test]
    fn test_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"par").unwrap().is_empty());
        let frames = decoder.push(b"t\": 1}\r\n").unwrap();
        assert_eq!(frames, vec![SseFrame { data: "{\"part\": 1}".to_string() }]);
    }

    #[test]
    fn test_multibyte_split() {
        let bytes = "data: 思考\n".as_bytes();
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&bytes[..8]).unwrap().is_empty());
        let frames = decoder.push(&bytes[8..]).unwrap();
        assert_eq!(frames[0].data, "思考");
    }

    #[test]
    fn test_comments_ignored() {
        let mut decoder = SseDecoder::new();
        let frames = decoder
            .push(b": OPENROUTER PROCESSING\n\ndata:x\n")
            .unwrap();
        assert_eq!(frames, vec![SseFrame { data: "x".to_string() }]);
    }

    #[test]
    fn test_finish_flushes_tail() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: tail").unwrap().is_empty());
        assert_eq!(decoder.finish().unwrap()[0].data, "tail");
        assert!(decoder.finish().unwrap().is_empty());
    }

    #[test]
    fn test_oversized_line_is_an_error() {
        let mut decoder = SseDecoder::new();
        let mut line = b"data: ".to_vec();
        line.resize(SseDecoder::MAX_BUFFER_SIZE + 16, b'x');

        let err = decoder.push(&line).unwrap_err();
        assert!(err.to_string().contains("exceeds"));
        // Rest of the dropped line must not surface as a frame
        assert!(decoder.push(b"yyy\n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_error_mentions_data() {
        let frame = SseFrame {
            data: "{oops".to_string(),
        };
        let err = frame.parse::<serde_json::Value>().unwrap_err();
        assert!(err.to_string().contains("{oops"));
    }
}
