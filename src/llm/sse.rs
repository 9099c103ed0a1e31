//! Incremental server-sent-events envelope reader.
//!
//! Bytes are pushed as they arrive from the network.  A record ends at
//! a blank line; each `data:` line of a complete record is parsed as
//! JSON.  Records may be split across any number of reads, including
//! in the middle of a multi-byte UTF-8 sequence.

use serde_json::Value;
use tracing::warn;

/// Sentinel some providers send after the last event.
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every JSON payload completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some((end, sep_len)) = find_record_end(&self.buffer) {
            let record: Vec<u8> = self.buffer.drain(..end + sep_len).take(end).collect();
            parse_record(&String::from_utf8_lossy(&record), &mut out);
        }
        out
    }

    /// Flush whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Vec<Value> {
        let rest = std::mem::take(&mut self.buffer);
        let mut out = Vec::new();
        let text = String::from_utf8_lossy(&rest);
        if !text.trim().is_empty() {
            parse_record(&text, &mut out);
        }
        out
    }
}

/// Locate the first blank-line separator, returning its offset and length.
fn find_record_end(buf: &[u8]) -> Option<(usize, usize)> {
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn parse_record(record: &str, out: &mut Vec<Value>) {
    for line in record.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() || data == DONE_SENTINEL {
            continue;
        }
        match serde_json::from_str::<Value>(data) {
            Ok(v) => out.push(v),
            Err(e) => warn!(error = %e, "sse chunk parse failed"),
        }
    }
}
