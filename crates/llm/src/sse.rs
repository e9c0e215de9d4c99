//! Minimal server-sent-events reader for streaming provider responses.

use std::collections::VecDeque;

use futures::stream::{self, BoxStream, StreamExt};

use crate::error::ProviderError;
use crate::provider::{CompletionStream, StreamEvent};

/// Turns provider-specific `data:` payloads into [`StreamEvent`]s.
pub(crate) trait EventParser {
    fn feed(&mut self, data: &str) -> Result<Vec<StreamEvent>, ProviderError>;

    /// Called once the body ends; must yield the closing `Done`.
    fn finish(&mut self) -> Vec<StreamEvent>;
}

/// Drive `parser` over an SSE response. The stream ends after the parser's
/// closing events, or right after the first error.
pub(crate) fn completion_stream<P>(response: reqwest::Response, parser: P) -> CompletionStream
where
    P: EventParser + Send + 'static,
{
    let state = (data_lines(response), parser, VecDeque::new(), false);

    stream::unfold(state, |(mut lines, mut parser, mut pending, mut done)| async move {
        loop {
            if let Some(event) = pending.pop_front() {
                return Some((Ok(event), (lines, parser, pending, done)));
            }
            if done {
                return None;
            }
            match lines.next().await {
                Some(Ok(data)) => match parser.feed(&data) {
                    Ok(events) => pending.extend(events),
                    Err(e) => {
                        done = true;
                        return Some((Err(e), (lines, parser, pending, done)));
                    }
                },
                Some(Err(e)) => {
                    done = true;
                    return Some((Err(e), (lines, parser, pending, done)));
                }
                None => {
                    done = true;
                    pending.extend(parser.finish());
                }
            }
        }
    })
    .boxed()
}

/// The `data:` payloads of an SSE response body, in order.
///
/// Lines are split on raw bytes so multi-byte characters cut across network
/// chunks survive intact.
pub(crate) fn data_lines(response: reqwest::Response) -> BoxStream<'static, Result<String, ProviderError>> {
    let state = Reader {
        body: response.bytes_stream().map(|chunk| chunk.map(|b| b.to_vec())).boxed(),
        buf: Vec::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(data) = state.ready.pop_front() {
                return Some((Ok(data), state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    state.buf.extend_from_slice(&chunk);
                    state.drain_lines();
                }
                Some(Err(e)) => {
                    state.finished = true;
                    return Some((Err(ProviderError::from(e)), state));
                }
                None => {
                    state.finished = true;
                    state.buf.push(b'\n');
                    state.drain_lines();
                }
            }
        }
    })
    .boxed()
}

struct Reader {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    buf: Vec<u8>,
    ready: VecDeque<String>,
    finished: bool,
}

impl Reader {
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if let Some(data) = parse_data_line(&String::from_utf8_lossy(&line)) {
                self.ready.push_back(data);
            }
        }
    }
}

fn parse_data_line(line: &str) -> Option<String> {
    let data = line.trim_end_matches(['\r', '\n']).strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    (!data.is_empty()).then(|| data.to_string())
}
