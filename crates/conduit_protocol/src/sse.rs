/// One complete server-sent event payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    Data(String),
    /// The `[DONE]` terminator.
    Done,
}

/// Incremental parser for SSE text streams.
///
/// Bytes may be split anywhere, including inside a UTF-8 sequence; only
/// complete events (terminated by a blank line) are drained.
#[derive(Debug, Default)]
pub struct SseStreamParser {
    pending: Vec<u8>,
    buffer: String,
}

impl SseStreamParser {
    /// Feed arbitrary bytes into the parser and drain complete frames.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(bytes);
        let valid_up_to = match std::str::from_utf8(&self.pending) {
            Ok(_) => self.pending.len(),
            Err(error) if error.error_len().is_none() => error.valid_up_to(),
            Err(_) => self.pending.len(),
        };
        let decoded: Vec<u8> = self.pending.drain(..valid_up_to).collect();
        self.buffer.push_str(&String::from_utf8_lossy(&decoded));
        if self.buffer.contains('\r') {
            self.buffer = self.buffer.replace("\r\n", "\n");
        }

        let mut frames = Vec::new();
        while let Some(split) = self.buffer.find("\n\n") {
            let event = self.buffer[..split].to_string();
            self.buffer.drain(0..split + 2);

            match extract_data_payload(&event) {
                Some(payload) if payload == "[DONE]" => frames.push(SseFrame::Done),
                Some(payload) => frames.push(SseFrame::Data(payload)),
                None => {}
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
        self.pending.is_empty() && self.buffer.trim().is_empty()
    }
}

fn extract_data_payload(event: &str) -> Option<String> {
    let data_lines: Vec<&str> = event
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .collect();

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::{SseFrame, SseStreamParser};

    #[test]
    fn parse_sse_frames_incrementally() {
        let mut parser = SseStreamParser::default();
        let mut frames = Vec::new();

        frames.extend(parser.feed(b"data: {\"choices\":[]}"));
        assert!(frames.is_empty());
        frames.extend(parser.feed(b"\n\ndata: [DONE]\n\n"));

        assert_eq!(
            frames,
            vec![
                SseFrame::Data("{\"choices\":[]}".to_string()),
                SseFrame::Done
            ]
        );
        assert!(parser.is_empty_buffer());
    }

    #[test]
    fn split_utf8_sequence_is_reassembled() {
        let bytes = "data: héllo\n\n".as_bytes();
        let split = bytes.iter().position(|byte| *byte == 0xC3).unwrap() + 1;

        let mut parser = SseStreamParser::default();
        assert!(parser.feed(&bytes[..split]).is_empty());
        assert_eq!(
            parser.feed(&bytes[split..]),
            vec![SseFrame::Data("héllo".to_string())]
        );
    }

    #[test]
    fn comment_only_events_are_skipped() {
        let frames = SseStreamParser::parse_frames(": keep-alive\n\ndata: x\r\n\r\n");
        assert_eq!(frames, vec![SseFrame::Data("x".to_string())]);
    }
}
