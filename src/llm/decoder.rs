//! Newline-delimited JSON decoding of a chunked response body.
//!
//! Chunks carry no alignment guarantee: one record may span several chunks and one chunk
//! may hold several records. Complete lines are parsed as they become available; the
//! trailing unterminated fragment waits for the next chunk. Lines that fail to parse are
//! dropped and logged, the stream carries on.

use std::collections::VecDeque;
use std::pin::Pin;

use futures::{ stream, Stream, StreamExt };
use log::warn;
use serde_json::Value;

use super::chat::ChunkStream;
use crate::error::TransportError;

pub type RecordStream = Pin<Box<dyn Stream<Item = Result<Value, TransportError>> + Send>>;

#[derive(Debug, Default)]
pub struct NdjsonDecoder {
    buf: Vec<u8>,
}

impl NdjsonDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers `chunk` and returns every record completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        // Held-back bytes never contain a newline, so only the new chunk is scanned.
        let scan_from = self.buf.len();
        self.buf.extend_from_slice(chunk);

        let mut records = Vec::new();
        let mut start = 0;
        for pos in scan_from..self.buf.len() {
            if self.buf[pos] == b'\n' {
                if let Some(value) = parse_line(&self.buf[start..pos]) {
                    records.push(value);
                }
                start = pos + 1;
            }
        }
        self.buf.drain(..start);
        records
    }

    /// Parses whatever is held back once the body has ended.
    pub fn finish(&mut self) -> Option<Value> {
        let rest = std::mem::take(&mut self.buf);
        parse_line(&rest)
    }

    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

fn parse_line(raw: &[u8]) -> Option<Value> {
    // Bytes are only turned into text once a full line is buffered, so a multi-byte
    // character split across chunks arrives here intact.
    let text = match std::str::from_utf8(raw) {
        Ok(text) => text,
        Err(e) => {
            warn!("Dropping non UTF-8 stream line ({} bytes): {}", raw.len(), e);
            return None;
        }
    };
    let line = text.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(line) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("JSON parse error: {} for line: {}", e, line);
            None
        }
    }
}

struct DecodeState {
    chunks: ChunkStream,
    decoder: NdjsonDecoder,
    pending: VecDeque<Value>,
    exhausted: bool,
}

/// Lazily turns a chunk stream into a record stream. Single pass, arrival order.
/// A transport error is yielded once and ends the stream.
pub fn decode(chunks: ChunkStream) -> RecordStream {
    let state = DecodeState {
        chunks,
        decoder: NdjsonDecoder::new(),
        pending: VecDeque::new(),
        exhausted: false,
    };

    Box::pin(
        stream::unfold(state, |mut st| async move {
            loop {
                if let Some(value) = st.pending.pop_front() {
                    return Some((Ok(value), st));
                }
                if st.exhausted {
                    return None;
                }
                match st.chunks.next().await {
                    Some(Ok(bytes)) => {
                        let records = st.decoder.push(&bytes);
                        st.pending.extend(records);
                    }
                    Some(Err(e)) => {
                        st.exhausted = true;
                        return Some((Err(e), st));
                    }
                    None => {
                        st.exhausted = true;
                        if let Some(value) = st.decoder.finish() {
                            st.pending.push_back(value);
                        }
                    }
                }
            }
        })
    )
}
