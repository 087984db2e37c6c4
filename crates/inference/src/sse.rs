//! Line-buffered decoder for `text/event-stream` style completion streams.
//!
//! The wire format is `data: <json-object>\n` per event, terminated by the
//! `data: [DONE]` sentinel. Network chunks split lines arbitrarily, so the
//! decoder carries a partial-line buffer across [`SseDecoder::feed`] calls.
//! Keeping decoding as a plain restartable struct (rather than callback
//! chains) keeps error propagation and cancellation identical to the
//! buffered request path.

use crate::error::{Error, Result};
use crate::types::StreamChunk;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the `[DONE]` sentinel has been seen; further input is
    /// ignored.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Consume one network chunk and return every chunk completed by it.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<StreamChunk>> {
        if self.done {
            return Ok(Vec::new());
        }

        self.buffer.push_str(&String::from_utf8_lossy(bytes));

        let mut chunks = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim();

            let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
                // Blank separators, comments and other fields are ignored.
                continue;
            };
            let payload = payload.trim_start();

            if payload == DONE_SENTINEL {
                self.done = true;
                break;
            }

            let chunk: StreamChunk = serde_json::from_str(payload)
                .map_err(|e| Error::StreamDecode(format!("{e}: {payload}")))?;
            chunks.push(chunk);
        }

        Ok(chunks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_line(content: &str) -> String {
        format!(
            "data: {{\"choices\":[{{\"index\":0,\"delta\":{{\"content\":\"{content}\"}},\"finish_reason\":null}}]}}\n"
        )
    }

    fn first_content(chunks: &[StreamChunk]) -> Option<String> {
        chunks
            .first()
            .and_then(|c| c.choices.first())
            .and_then(|c| c.delta.content.clone())
    }

    #[test]
    fn decodes_complete_lines() {
        let mut decoder = SseDecoder::new();
        let chunks = decoder.feed(data_line("Hel").as_bytes()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(first_content(&chunks).as_deref(), Some("Hel"));
        assert!(!decoder.is_done());
    }

    #[test]
    fn buffers_lines_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let line = data_line("Hello");
        let (head, tail) = line.split_at(17);

        assert!(decoder.feed(head.as_bytes()).unwrap().is_empty());
        let chunks = decoder.feed(tail.as_bytes()).unwrap();
        assert_eq!(first_content(&chunks).as_deref(), Some("Hello"));
    }

    #[test]
    fn done_sentinel_terminates_the_stream() {
        let mut decoder = SseDecoder::new();
        let input = format!("{}data: [DONE]\n{}", data_line("hi"), data_line("ignored"));

        let chunks = decoder.feed(input.as_bytes()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(decoder.is_done());

        // Input after the sentinel is discarded.
        assert!(decoder.feed(data_line("more").as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn non_data_lines_are_ignored() {
        let mut decoder = SseDecoder::new();
        let input = format!(": keep-alive\n\nevent: ping\n{}", data_line("ok"));

        let chunks = decoder.feed(input.as_bytes()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(first_content(&chunks).as_deref(), Some("ok"));
    }

    #[test]
    fn unparseable_payload_is_a_decode_error() {
        let mut decoder = SseDecoder::new();
        let err = decoder.feed(b"data: {not json}\n").unwrap_err();
        assert!(matches!(err, Error::StreamDecode(_)));
    }

    #[test]
    fn final_chunk_carries_finish_reason() {
        let mut decoder = SseDecoder::new();
        let chunks = decoder
            .feed(b"data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n")
            .unwrap();
        assert_eq!(
            chunks[0].choices[0].finish_reason.as_deref(),
            Some("stop")
        );
    }
}
