use agent_stream::{RunOutcome, StreamEvent};
use serde_json::Value;

/// Frame type reserved for the terminal outcome of a run.
pub const RUN_OUTCOME_FRAME: &str = "run_outcome";

/// One decoded `data:` frame.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    Event(StreamEvent),
    Outcome(RunOutcome),
}

/// Incremental parser for SSE text streams.
///
/// Network chunks may end inside a multi-byte character; the incomplete tail
/// is held back until the next chunk completes it.
#[derive(Debug, Default)]
pub struct SseStreamParser {
    buffer: String,
    partial_utf8: Vec<u8>,
    skipped: usize,
}

impl SseStreamParser {
    /// Feed arbitrary bytes into the parser and drain complete frames.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.partial_utf8.extend_from_slice(bytes);
        self.decode_partial();
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }
        let mut frames = Vec::new();

        while let Some(split) = self.buffer.find("\n\n") {
            let frame = self.buffer[..split].to_string();
            self.buffer.drain(0..split + 2);

            let Some(payload) = extract_data_payload(&frame) else {
                continue;
            };
            if payload == "[DONE]" {
                continue;
            }

            match serde_json::from_str::<Value>(&payload)
                .ok()
                .and_then(map_frame)
            {
                Some(decoded) => frames.push(decoded),
                None => self.skipped += 1,
            }
        }

        frames
    }

    /// Parse a complete SSE payload string in one shot.
    pub fn parse_frames(input: &str) -> Vec<SseFrame> {
        let mut parser = Self::default();
        parser.feed(input.as_bytes())
    }

    pub fn is_empty_buffer(&self) -> bool {
        self.buffer.trim().is_empty() && self.partial_utf8.is_empty()
    }

    /// Count of frames that carried data but did not decode.
    pub fn skipped_frames(&self) -> usize {
        self.skipped
    }

    /// Moves every complete character from `partial_utf8` into `buffer`.
    /// Invalid sequences become U+FFFD; a truncated trailing one is kept.
    fn decode_partial(&mut self) {
        loop {
            match std::str::from_utf8(&self.partial_utf8) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    self.partial_utf8.clear();
                    return;
                }
                Err(error) => {
                    let valid = error.valid_up_to();
                    self.buffer
                        .push_str(&String::from_utf8_lossy(&self.partial_utf8[..valid]));
                    match error.error_len() {
                        Some(invalid) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            self.partial_utf8.drain(..valid + invalid);
                        }
                        None => {
                            self.partial_utf8.drain(..valid);
                            return;
                        }
                    }
                }
            }
        }
    }
}

fn extract_data_payload(frame: &str) -> Option<String> {
    let data_lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .collect();

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

fn map_frame(value: Value) -> Option<SseFrame> {
    if value.get("type")?.as_str()? == RUN_OUTCOME_FRAME {
        let outcome = value.get("outcome")?.clone();
        return serde_json::from_value(outcome).ok().map(SseFrame::Outcome);
    }
    serde_json::from_value(value).ok().map(SseFrame::Event)
}

#[cfg(test)]
mod tests {
    use super::{SseFrame, SseStreamParser};

    #[test]
    fn parse_sse_frames_incrementally() {
        let mut parser = SseStreamParser::default();
        let mut frames = Vec::new();

        frames.extend(parser.feed(b"data: {\"type\":\"text\",\"text\":\"Hello\"}\n\n"));
        assert_eq!(frames.len(), 1);

        frames.extend(parser.feed(b"data: [DONE]\n\n"));
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], SseFrame::Event(_)));
        assert!(parser.is_empty_buffer());
    }

    #[test]
    fn invalid_bytes_are_replaced_without_stalling() {
        let mut parser = SseStreamParser::default();
        let mut payload = b"data: {\"type\":\"text\",\"text\":\"a".to_vec();
        payload.push(0xff);
        payload.extend_from_slice(b"b\"}\n\n");

        let frames = parser.feed(&payload);
        assert_eq!(
            frames,
            vec![SseFrame::Event(agent_stream::StreamEvent::Text {
                text: "a\u{fffd}b".to_string()
            })]
        );
        assert!(parser.is_empty_buffer());
    }

    #[test]
    fn crlf_delimited_frames_are_accepted() {
        let frames = SseStreamParser::parse_frames(
            "event: message\r\ndata: {\"type\":\"reasoning\",\"text\":\"x\"}\r\n\r\n",
        );
        assert_eq!(frames.len(), 1);
    }
}
