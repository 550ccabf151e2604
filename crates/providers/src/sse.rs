//! Server-sent-events plumbing shared by provider adapters.
//!
//! [`SseDecoder`] buffers raw body chunks and yields complete `data:`
//! payloads; [`sse_response_stream`] drives it over a `reqwest::Response`
//! and hands each payload to a provider-specific parser.

use futures_util::{Stream, StreamExt};
use tw_domain::error::Result;
use tw_domain::stream::{BoxStream, StreamEvent};

use crate::util::from_reqwest;

/// Incremental SSE decoder.
///
/// Events are delimited by a blank line. Only `data:` lines are kept;
/// `event:`, `id:` and `retry:` lines are ignored. A trailing partial event
/// stays buffered until more bytes arrive or [`SseDecoder::finish`] is called.
///
/// Bytes are buffered undecoded and only whole events are turned into text,
/// so a multi-byte character split across network chunks survives intact.
/// `\r\n`, `\r` and `\n` line endings are all normalised to `\n`, including
/// a `\r\n` pair split across two chunks.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    /// The previous chunk ended on `\r`; a leading `\n` belongs to it.
    pending_cr: bool,
}

impl SseDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a body chunk and return every payload it completed.
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.reserve(chunk.len());
        for &byte in chunk {
            match byte {
                b'\r' => {
                    self.buffer.push(b'\n');
                    self.pending_cr = true;
                }
                b'\n' if self.pending_cr => self.pending_cr = false,
                _ => {
                    self.buffer.push(byte);
                    self.pending_cr = false;
                }
            }
        }
        self.drain()
    }

    /// Flush whatever is left once the body closes.
    pub(crate) fn finish(&mut self) -> Vec<String> {
        self.pending_cr = false;
        if self.buffer.iter().all(u8::is_ascii_whitespace) {
            self.buffer.clear();
            return Vec::new();
        }
        self.buffer.extend_from_slice(b"\n\n");
        self.drain()
    }

    fn drain(&mut self) -> Vec<String> {
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            let block = String::from_utf8_lossy(&block[..pos]);

            for line in block.lines() {
                if let Some(data) = line.trim().strip_prefix("data:") {
                    let data = data.trim();
                    if !data.is_empty() {
                        payloads.push(data.to_string());
                    }
                }
            }
        }
        payloads
    }
}

/// Build a [`BoxStream`] from an SSE `reqwest::Response` and a parser.
///
/// The parser is `FnMut` so adapters may keep state across payloads. A
/// fallback `Done` is emitted if the parser never produced one, so the
/// consumer always sees a terminal event on a clean close.
pub(crate) fn sse_response_stream<F>(
    response: reqwest::Response,
    parse_data: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    sse_chunk_stream(response.bytes_stream(), parse_data)
}

/// Drive [`SseDecoder`] over any stream of body chunks.
pub(crate) fn sse_chunk_stream<S, B, F>(
    chunks: S,
    mut parse_data: F,
) -> BoxStream<'static, Result<StreamEvent>>
where
    S: Stream<Item = std::result::Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    F: FnMut(&str) -> Vec<Result<StreamEvent>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut chunks = Box::pin(chunks);
        let mut decoder = SseDecoder::new();
        let mut done_emitted = false;

        loop {
            let payloads = match chunks.next().await {
                Some(Ok(bytes)) => decoder.push(bytes.as_ref()),
                None => {
                    for data in decoder.finish() {
                        for event in parse_data(&data) {
                            done_emitted |= matches!(&event, Ok(StreamEvent::Done { .. }));
                            yield event;
                        }
                    }
                    break;
                }
                Some(Err(e)) => {
                    yield Err(from_reqwest(e));
                    return;
                }
            };

            for data in payloads {
                for event in parse_data(&data) {
                    done_emitted |= matches!(&event, Ok(StreamEvent::Done { .. }));
                    yield event;
                }
            }
        }

        if !done_emitted {
            yield Ok(StreamEvent::Done {
                usage: None,
                finish_reason: Some("stop".into()),
            });
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
