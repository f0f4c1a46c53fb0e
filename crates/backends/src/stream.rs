//! Server-sent event streaming shared by the HTTP backends.
//!
//! Bytes are buffered until a full line arrives, so multi-byte UTF-8
//! sequences split across network reads decode correctly.

use futures::StreamExt;
use parley_core::error::BackendError;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// One decoded SSE item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// A `data:` payload
    Data(String),
    /// The `data: [DONE]` sentinel
    Done,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = parse_line(&String::from_utf8_lossy(&line)) {
                events.push(event);
            }
        }
        events
    }

    /// Flush a trailing line that never got its newline.
    pub fn finish(&mut self) -> Option<SseEvent> {
        let line = std::mem::take(&mut self.buffer);
        parse_line(&String::from_utf8_lossy(&line))
    }
}

fn parse_line(line: &str) -> Option<SseEvent> {
    let line = line.trim_end_matches(['\n', '\r']);

    // Blank separators, comments, and non-data fields
    let data = line.strip_prefix("data:")?;
    let data = data.strip_prefix(' ').unwrap_or(data);

    if data.trim() == "[DONE]" {
        return Some(SseEvent::Done);
    }
    Some(SseEvent::Data(data.to_string()))
}

/// Whether [`drive`] should keep reading after a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Read `response` as SSE, handing each payload to `on_data`.
///
/// Ends when `on_data` returns [`Flow::Stop`], on `[DONE]`, or at end of
/// stream. Cancelling `token` drops the response (closing the connection)
/// and yields [`BackendError::Cancelled`].
pub async fn drive<F>(
    response: reqwest::Response,
    token: &CancellationToken,
    mut on_data: F,
) -> Result<(), BackendError>
where
    F: FnMut(&str) -> Result<Flow, BackendError>,
{
    let mut bytes_stream = response.bytes_stream();
    let mut decoder = SseDecoder::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(BackendError::Cancelled),
            next = bytes_stream.next() => next,
        };

        let Some(bytes) = next else { break };
        let bytes = bytes.map_err(|e| BackendError::StreamInterrupted(e.to_string()))?;

        for event in decoder.push(&bytes) {
            match event {
                SseEvent::Done => return Ok(()),
                SseEvent::Data(data) => {
                    if on_data(&data)? == Flow::Stop {
                        return Ok(());
                    }
                }
            }
        }
    }

    if let Some(SseEvent::Data(data)) = decoder.finish() {
        on_data(&data)?;
    }
    Ok(())
}

/// Send a request unless `token` is cancelled first.
pub async fn send(
    request: reqwest::RequestBuilder,
    token: &CancellationToken,
) -> Result<reqwest::Response, BackendError> {
    let response = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(BackendError::Cancelled),
        response = request.send() => response.map_err(map_transport)?,
    };

    let status = response.status().as_u16();
    if status == 200 {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    warn!(status, body = %body, "Backend returned error");
    if status == 503 {
        return Err(BackendError::Unavailable(format!(
            "server not ready (503): {body}"
        )));
    }
    Err(BackendError::Api {
        status_code: status,
        message: body,
    })
}

/// Map a reqwest failure onto the backend taxonomy.
pub fn map_transport(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout(e.to_string())
    } else {
        BackendError::Unavailable(e.to_string())
    }
}

/// Tracks time to first token and generation time.
#[derive(Debug, Clone, Copy)]
pub struct ChunkTimer {
    started: Instant,
    first_chunk: Option<Instant>,
}

impl ChunkTimer {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            first_chunk: None,
        }
    }

    pub fn mark_chunk(&mut self) {
        self.first_chunk.get_or_insert_with(Instant::now);
    }

    /// Time to the first chunk, or the whole elapsed time if none arrived.
    pub fn time_to_first_token(&self) -> Duration {
        self.first_chunk
            .unwrap_or_else(Instant::now)
            .duration_since(self.started)
    }

    /// Time spent generating after the first chunk.
    pub fn generation_time(&self) -> Option<Duration> {
        self.first_chunk.map(|first| first.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_data_lines() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: {\"content\":\"Hi\"}\n\n: keep-alive\n\ndata: [DONE]\n\n");
        assert_eq!(
            events,
            vec![
                SseEvent::Data(r#"{"content":"Hi"}"#.into()),
                SseEvent::Done
            ]
        );
    }

    #[test]
    fn buffers_partial_lines() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: {\"content\":").is_empty());
        let events = decoder.push(b"\"lo\"}\r\n");
        assert_eq!(events, vec![SseEvent::Data(r#"{"content":"lo"}"#.into())]);
    }

    #[test]
    fn reassembles_split_utf8() {
        let line = "data: héllo\n".as_bytes();
        // Split inside the two-byte 'é'
        let split = line.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(&line[..split]).is_empty());
        assert_eq!(decoder.push(&line[split..]), vec![SseEvent::Data("héllo".into())]);
    }

    #[test]
    fn data_without_space_after_colon() {
        let mut decoder = SseDecoder::new();
        assert_eq!(decoder.push(b"data:x\n"), vec![SseEvent::Data("x".into())]);
    }

    #[test]
    fn finish_flushes_trailing_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: tail").is_empty());
        assert_eq!(decoder.finish(), Some(SseEvent::Data("tail".into())));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn non_data_fields_ignored() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: message\nid: 4\nretry: 10\n").is_empty());
    }

    #[test]
    fn timer_without_chunks_reports_elapsed() {
        let timer = ChunkTimer::start();
        assert!(timer.generation_time().is_none());
        assert!(timer.time_to_first_token() >= Duration::ZERO);
    }

    #[test]
    fn timer_keeps_first_chunk() {
        let mut timer = ChunkTimer::start();
        timer.mark_chunk();
        let first = timer.time_to_first_token();
        std::thread::sleep(Duration::from_millis(5));
        timer.mark_chunk();
        assert_eq!(timer.time_to_first_token(), first);
    }
}
