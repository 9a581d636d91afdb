use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

use futures::stream::{self, Stream, StreamExt};

use super::{FragmentStream, GenerationError};

/// Incremental server-sent-events parser. Only `data:` fields matter here;
/// `event:`, `id:`, `retry:` and comment lines are skipped.
#[derive(Debug, Default)]
pub(crate) struct SseParser {
    buffer: Vec<u8>,
    data: String,
}

impl SseParser {
    /// Feed raw bytes and return the payload of every event they complete.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<String>, GenerationError> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            // A '\n' byte never occurs inside a multi-byte sequence, so whole lines are valid
            // UTF-8 even when the network split a character.
            let line = String::from_utf8(line).map_err(invalid_utf8)?;
            self.process_line(line.trim_end_matches(|c| c == '\n' || c == '\r'), &mut events);
        }
        Ok(events)
    }

    /// Flush whatever is left once the byte stream has ended.
    pub fn finish(&mut self) -> Result<Option<String>, GenerationError> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let line = String::from_utf8(std::mem::take(&mut self.buffer)).map_err(invalid_utf8)?;
            self.process_line(line.trim_end_matches('\r'), &mut events);
        }
        self.process_line("", &mut events);
        Ok(events.pop())
    }

    fn process_line(&mut self, line: &str, events: &mut Vec<String>) {
        if line.is_empty() {
            if !self.data.is_empty() {
                events.push(std::mem::take(&mut self.data));
            }
            return;
        }
        if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            if !self.data.is_empty() {
                self.data.push('\n');
            }
            self.data.push_str(value);
        }
    }
}

fn invalid_utf8(e: std::string::FromUtf8Error) -> GenerationError {
    GenerationError::Malformed(format!("invalid UTF-8 in stream: {}", e))
}

struct DecodeState<S> {
    body: Pin<Box<S>>,
    parser: SseParser,
    ready: VecDeque<Result<String, GenerationError>>,
    finished: bool,
}

/// Turn an SSE byte stream into a stream of decoded fragments. `decode` maps one
/// event payload to its text. The stream ends after the first error.
pub(crate) fn fragments<S, B, E, D>(body: S, decode: D) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<GenerationError> + Send + 'static,
    D: Fn(&str) -> Result<String, GenerationError> + Send + Sync + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        parser: SseParser::default(),
        ready: VecDeque::new(),
        finished: false,
    };

    let decode = Arc::new(decode);
    stream::unfold(state, move |mut state| {
        let decode = Arc::clone(&decode);
        async move {
            loop {
                if let Some(item) = state.ready.pop_front() {
                    if item.is_err() {
                        state.ready.clear();
                        state.finished = true;
                    }
                    return Some((item, state));
                }
                if state.finished {
                    return None;
                }
                match state.body.next().await {
                    Some(Ok(chunk)) => match state.parser.feed(chunk.as_ref()) {
                        Ok(events) => state.ready.extend(events.iter().map(|e| (*decode)(e))),
                        Err(e) => {
                            state.ready.push_back(Err(e));
                            state.finished = true;
                        }
                    },
                    Some(Err(e)) => {
                        state.ready.push_back(Err(e.into()));
                        state.finished = true;
                    }
                    None => {
                        match state.parser.finish() {
                            Ok(Some(event)) => state.ready.push_back((*decode)(&event)),
                            Ok(None) => {}
                            Err(e) => state.ready.push_back(Err(e)),
                        }
                        state.finished = true;
                    }
                }
            }
        }
    })
    .boxed()
}
