//! Decoding of the newline-delimited JSON watch stream.

use crate::error::{ClientError, Result};
use crate::traits::PodEventStream;
use bytes::{Buf, Bytes, BytesMut};
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use podplacer_core::{PodInfo, WatchEvent, WatchEventType};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Accumulates body chunks and yields complete lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: BytesMut,
    /// Bytes of `buf` already known to hold no newline
    scanned: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and drain every complete line it finished
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
            let line = self.buf.split_to(self.scanned + offset).freeze();
            self.buf.advance(1);
            self.scanned = 0;
            lines.push(line);
        }
        self.scanned = self.buf.len();
        lines
    }

    /// Whatever is left once the body ends
    pub fn finish(&mut self) -> Option<Bytes> {
        if self.buf.is_empty() {
            None
        } else {
            self.scanned = 0;
            Some(self.buf.split().freeze())
        }
    }
}

/// Decode one watch line
///
/// Returns `None` for lines that carry nothing to act on: blank lines,
/// bookmarks and pods that fail conversion.
pub fn decode_line(line: &[u8]) -> Option<Result<WatchEvent<PodInfo>>> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }

    let raw: WatchEvent<serde_json::Value> = match serde_json::from_slice(line) {
        Ok(raw) => raw,
        Err(e) => {
            return Some(Err(ClientError::decode_failed(
                "watch event",
                e.to_string(),
            )))
        }
    };

    match raw.event_type {
        WatchEventType::Bookmark => None,
        WatchEventType::Error => {
            let message = raw.object["message"]
                .as_str()
                .unwrap_or("unknown watch error")
                .to_string();
            Some(Err(ClientError::watch_error(message)))
        }
        event_type => {
            let pod: Pod = match serde_json::from_value(raw.object) {
                Ok(p) => p,
                Err(e) => {
                    warn!("Failed to parse pod from watch event: {}", e);
                    return None;
                }
            };
            match PodInfo::try_from(&pod) {
                Ok(object) => Some(Ok(WatchEvent { event_type, object })),
                Err(e) => {
                    warn!("Skipping unusable pod in watch event: {}", e);
                    None
                }
            }
        }
    }
}

struct WatchState {
    body: BoxStream<'static, std::result::Result<Bytes, reqwest::Error>>,
    lines: LineBuffer,
    pending: VecDeque<Result<WatchEvent<PodInfo>>>,
    done: bool,
}

impl WatchState {
    fn queue(&mut self, line: &[u8]) {
        if let Some(event) = decode_line(line) {
            self.pending.push_back(event);
        }
    }
}

/// Turn a streaming response body into a stream of pod events
pub fn pod_event_stream(
    body: BoxStream<'static, std::result::Result<Bytes, reqwest::Error>>,
) -> PodEventStream {
    let state = WatchState {
        body,
        lines: LineBuffer::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((event, state));
            }
            if state.done {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    for line in state.lines.push(&chunk) {
                        state.queue(&line);
                    }
                }
                Some(Err(e)) => {
                    state.done = true;
                    state.pending.push_back(Err(ClientError::connection_failed(
                        "watch stream",
                        e.to_string(),
                    )));
                }
                None => {
                    debug!("Watch stream closed by server");
                    state.done = true;
                    if let Some(rest) = state.lines.finish() {
                        state.queue(&rest);
                    }
                }
            }
        }
    })
    .boxed()
}
