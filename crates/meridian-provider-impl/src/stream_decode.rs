//! Framing-agnostic decoder for streaming HTTP bodies: auto-detects SSE,
//! newline-delimited JSON, or a single top-level JSON array on first byte,
//! then decodes consistently for the rest of the body.

use bytes::Bytes;
use meridian_protocol::sse::SseParser;

#[derive(Debug)]
enum Mode {
    Unknown,
    Sse(SseParser),
    Ndjson(String),
    JsonArray(JsonArrayDecoder),
}

#[derive(Debug)]
pub struct StreamDecoder {
    mode: Mode,
    pending: String,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            mode: Mode::Unknown,
            pending: String::new(),
        }
    }

    pub fn push(&mut self, chunk: &Bytes) -> Vec<String> {
        let Ok(text) = std::str::from_utf8(chunk) else {
            return Vec::new();
        };

        match &mut self.mode {
            Mode::Unknown => {
                self.pending.push_str(text);
                let combined = self.pending.as_str();
                let first_non_ws = combined.chars().find(|c| !c.is_whitespace());
                if combined.contains("data:")
                    || combined.contains("event:")
                    || matches!(first_non_ws, Some('d' | 'e' | ':'))
                {
                    let mut parser = SseParser::new();
                    let events = parser.push_str(combined);
                    self.mode = Mode::Sse(parser);
                    self.pending.clear();
                    return events
                        .into_iter()
                        .filter(|event| !event.data.is_empty())
                        .map(|event| event.data)
                        .collect();
                }
                if matches!(first_non_ws, Some('[')) {
                    let mut parser = JsonArrayDecoder::new();
                    let events = parser.push_str(combined);
                    self.mode = Mode::JsonArray(parser);
                    self.pending.clear();
                    return events;
                }
                if matches!(first_non_ws, Some('{')) {
                    let mut buffer = String::new();
                    buffer.push_str(combined);
                    let events = drain_ndjson(&mut buffer);
                    self.mode = Mode::Ndjson(buffer);
                    self.pending.clear();
                    return events;
                }
                Vec::new()
            }
            Mode::Sse(parser) => parser
                .push_str(text)
                .into_iter()
                .filter(|event| !event.data.is_empty())
                .map(|event| event.data)
                .collect(),
            Mode::Ndjson(buffer) => {
                buffer.push_str(text);
                drain_ndjson(buffer)
            }
            Mode::JsonArray(parser) => parser.push_str(text),
        }
    }

    pub fn finish(&mut self) -> Vec<String> {
        match &mut self.mode {
            Mode::Unknown => {
                let pending = self.pending.trim();
                if pending.is_empty() {
                    Vec::new()
                } else {
                    vec![pending.to_string()]
                }
            }
            Mode::Sse(parser) => parser
                .finish()
                .into_iter()
                .filter(|event| !event.data.is_empty())
                .map(|event| event.data)
                .collect(),
            Mode::Ndjson(buffer) => {
                let mut events = drain_ndjson(buffer);
                let remainder = buffer.trim();
                if !remainder.is_empty() {
                    events.push(remainder.to_string());
                }
                buffer.clear();
                events
            }
            Mode::JsonArray(parser) => parser.finish(),
        }
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct JsonArrayDecoder {
    current: String,
    depth: usize,
    in_string: bool,
    escape: bool,
    seen_array: bool,
}

impl JsonArrayDecoder {
    fn new() -> Self {
        Self {
            current: String::new(),
            depth: 0,
            in_string: false,
            escape: false,
            seen_array: false,
        }
    }

    fn push_str(&mut self, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        for ch in text.chars() {
            if !self.seen_array {
                if ch == '[' {
                    self.seen_array = true;
                }
                continue;
            }
            if self.depth == 0 {
                if ch.is_whitespace() || ch == ',' {
                    continue;
                }
                if ch == '{' {
                    self.depth = 1;
                    self.current.push(ch);
                }
                continue;
            }

            self.current.push(ch);
            if self.in_string {
                if self.escape {
                    self.escape = false;
                } else if ch == '\\' {
                    self.escape = true;
                } else if ch == '"' {
                    self.in_string = false;
                }
                continue;
            }

            match ch {
                '"' => self.in_string = true,
                '{' => self.depth += 1,
                '}' => {
                    self.depth -= 1;
                    if self.depth == 0 && !self.current.is_empty() {
                        out.push(std::mem::take(&mut self.current));
                    }
                }
                _ => {}
            }
        }
        out
    }

    fn finish(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        if self.depth == 0 && !self.current.trim().is_empty() {
            out.push(std::mem::take(&mut self.current));
        }
        out
    }
}

fn drain_ndjson(buffer: &mut String) -> Vec<String> {
    let mut out = Vec::new();
    loop {
        let Some(pos) = buffer.find('\n') else {
            break;
        };
        let mut line = buffer[..pos].to_string();
        buffer.drain(..=pos);
        if line.ends_with('\r') {
            line.pop();
        }
        let line = line.trim();
        if !line.is_empty() {
            out.push(line.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_sse_framing() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.push(&Bytes::from_static(b"data: {\"a\":1}\n\n"));
        assert_eq!(events, vec!["{\"a\":1}".to_string()]);
    }

    #[test]
    fn detects_ndjson_framing() {
        let mut decoder = StreamDecoder::new();
        let events = decoder.push(&Bytes::from_static(b"{\"a\":1}\n{\"a\":2}\n"));
        assert_eq!(events, vec!["{\"a\":1}".to_string(), "{\"a\":2}".to_string()]);
    }

    #[test]
    fn detects_json_array_framing_across_pushes() {
        let mut decoder = StreamDecoder::new();
        let mut events = decoder.push(&Bytes::from_static(b"[{\"a\":1},"));
        events.extend(decoder.push(&Bytes::from_static(b"{\"a\":2}]")));
        assert_eq!(events, vec!["{\"a\":1}".to_string(), "{\"a\":2}".to_string()]);
    }

    #[test]
    fn finish_flushes_unterminated_ndjson_line() {
        let mut decoder = StreamDecoder::new();
        decoder.push(&Bytes::from_static(b"{\"a\":1}\n{\"a\":2}"));
        assert_eq!(decoder.finish(), vec!["{\"a\":2}".to_string()]);
    }
}
