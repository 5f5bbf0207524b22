//! Newline-delimited JSON over a long-lived HTTP response.

use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde_json::Value;

use crate::error::{FeedError, Result};

/// The server sends a keep-alive at least every 30 seconds. Three missed
/// keep-alives mean the connection is dead.
pub const STALL_TIMEOUT: Duration = Duration::from_secs(90);

type ChunkStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Longest line kept while waiting for its terminator.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Splits a byte stream into lines. A line growing past the limit is
/// dropped up to its terminator.
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    max_line: usize,
    /// Inside an oversized line; skip bytes until the next newline.
    discarding: bool,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_line,
            discarding: false,
        }
    }

    pub fn push(&mut self, mut chunk: &[u8]) {
        if self.discarding {
            match chunk.iter().position(|b| *b == b'\n') {
                Some(end) => {
                    self.discarding = false;
                    chunk = &chunk[end + 1..];
                }
                None => return,
            }
        }
        self.pending.extend_from_slice(chunk);

        let complete = self
            .pending
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |end| end + 1);
        let partial = self.pending.len() - complete;
        if partial > self.max_line {
            tracing::warn!(bytes = partial, limit = self.max_line, "Dropping oversized feed line");
            self.pending.truncate(complete);
            self.discarding = true;
        }
    }

    /// Next complete line without its terminator.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let end = self.pending.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }

    /// Whatever is left once the stream has ended.
    pub fn take_rest(&mut self) -> Vec<u8> {
        if self.discarding {
            self.discarding = false;
            return Vec::new();
        }
        std::mem::take(&mut self.pending)
    }
}

/// One open feed connection.
pub struct FeedStream {
    chunks: ChunkStream,
    lines: LineBuffer,
    stall_timeout: Duration,
    finished: bool,
}

impl FeedStream {
    pub(crate) fn from_response(resp: reqwest::Response) -> Self {
        let chunks = resp
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()).map_err(FeedError::from));
        Self::from_chunks(chunks)
    }

    /// Stream over arbitrary byte chunks.
    pub fn from_chunks<S>(chunks: S) -> Self
    where
        S: Stream<Item = Result<Vec<u8>>> + Send + 'static,
    {
        Self {
            chunks: Box::pin(chunks),
            lines: LineBuffer::default(),
            stall_timeout: STALL_TIMEOUT,
            finished: false,
        }
    }

    pub fn with_stall_timeout(mut self, timeout: Duration) -> Self {
        self.stall_timeout = timeout;
        self
    }

    /// Next decoded item. `Ok(None)` when the server closed the stream.
    /// Keep-alive blank lines are skipped; lines that are not JSON are
    /// logged and skipped.
    pub async fn next_item(&mut self) -> Result<Option<Value>> {
        loop {
            if let Some(line) = self.lines.next_line() {
                if let Some(item) = decode_line(&line) {
                    return Ok(Some(item));
                }
                continue;
            }
            if self.finished {
                let rest = self.lines.take_rest();
                return Ok(decode_line(&rest));
            }

            let chunk = tokio::time::timeout(self.stall_timeout, self.chunks.next())
                .await
                .map_err(|_| FeedError::Stalled(self.stall_timeout.as_secs()))?;
            match chunk {
                Some(Ok(bytes)) => self.lines.push(&bytes),
                Some(Err(e)) => return Err(e),
                None => self.finished = true,
            }
        }
    }
}

fn decode_line(line: &[u8]) -> Option<Value> {
    let text = std::str::from_utf8(line).ok()?.trim();
    if text.is_empty() {
        return None;
    }
    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(error = %e, line = %text, "Skipping undecodable feed line");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stream_of(chunks: Vec<&'static str>) -> FeedStream {
        FeedStream::from_chunks(futures::stream::iter(
            chunks.into_iter().map(|c| Ok(c.as_bytes().to_vec())),
        ))
    }

    #[test]
    fn line_buffer_handles_crlf_and_partial_lines() {
        let mut buf = LineBuffer::default();
        buf.push(b"{\"a\":1}\r\n{\"b\"");
        assert_eq!(buf.next_line().unwrap(), b"{\"a\":1}");
        assert!(buf.next_line().is_none());
        buf.push(b":2}\n");
        assert_eq!(buf.next_line().unwrap(), b"{\"b\":2}");
    }

    #[test]
    fn oversized_line_is_dropped_up_to_its_terminator() {
        let mut buf = LineBuffer::with_max_line(8);
        buf.push(b"{\"a\":1}\n0123456789");
        assert_eq!(buf.next_line().unwrap(), b"{\"a\":1}");
        assert!(buf.next_line().is_none());

        buf.push(b"still the same line");
        assert!(buf.next_line().is_none());
        assert!(buf.pending.is_empty());

        buf.push(b"tail\n{\"b\":2}\n");
        assert_eq!(buf.next_line().unwrap(), b"{\"b\":2}");
        assert!(buf.next_line().is_none());
        assert!(buf.take_rest().is_empty());
    }

    #[tokio::test]
    async fn skips_keep_alives_and_joins_chunks() {
        let mut stream = stream_of(vec![
            "\r\n",
            "{\"text\":",
            "\"hi\"}\r\n\r\n",
            "{\"limit\":{\"track\":3}}",
        ]);
        assert_eq!(stream.next_item().await.unwrap(), Some(json!({"text": "hi"})));
        assert_eq!(
            stream.next_item().await.unwrap(),
            Some(json!({"limit": {"track": 3}}))
        );
        assert_eq!(stream.next_item().await.unwrap(), None);
    }

    #[tokio::test]
    async fn skips_garbage_lines() {
        let mut stream = stream_of(vec!["not json\n{\"x\":1}\n"]);
        assert_eq!(stream.next_item().await.unwrap(), Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn transport_errors_surface() {
        let mut stream = FeedStream::from_chunks(futures::stream::iter(vec![Err(
            FeedError::Network("reset".into()),
        )]));
        let err = stream.next_item().await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn stalls_time_out() {
        let mut stream = FeedStream::from_chunks(futures::stream::pending::<Result<Vec<u8>>>())
            .with_stall_timeout(Duration::from_millis(10));
        let err = stream.next_item().await.unwrap_err();
        assert!(matches!(err, FeedError::Stalled(_)));
    }

    #[tokio::test]
    async fn waits_while_a_line_is_incomplete() {
        let mut stream = FeedStream::from_chunks(
            futures::stream::iter(vec![Ok(b"{\"text\":".to_vec())])
                .chain(futures::stream::pending()),
        );
        let mut next = tokio_test::task::spawn(stream.next_item());
        tokio_test::assert_pending!(next.poll());
    }
}
