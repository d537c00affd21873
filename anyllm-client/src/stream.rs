//! Server-sent event decoding and the pull-based response iterator.
//!
//! A background task owns the transport, splits it into lines, decodes each
//! `data:` line and hands typed records to [`StreamReader`] over a bounded
//! channel. Dropping the reader cancels the task and releases the transport.

use crate::error::{LlmError, Result};
use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use std::fmt::Display;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Keep-alive comment some vendors send while overloaded.
pub const KEEP_ALIVE: &[u8] = b": keep-alive";

const DATA_PREFIX: &[u8] = b"data: ";
const DATA_PREFIX_NO_SPACE: &[u8] = b"data:";
const DONE_SENTINEL: &[u8] = b"[DONE]";
const CHANNEL_CAPACITY: usize = 64;

/// Result of decoding one transport line.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame<T> {
    Chunk(T),
    /// `[DONE]`: the stream ended cleanly.
    Done,
    /// Comment or non-data SSE field.
    Skip,
}

/// Decodes one SSE line (without its line terminator).
pub fn decode_line<T: DeserializeOwned>(line: &[u8]) -> Result<Frame<T>> {
    if line == KEEP_ALIVE {
        return Err(LlmError::ServiceUnavailable);
    }
    if line.starts_with(b":") {
        return Ok(Frame::Skip);
    }

    let payload = match line
        .strip_prefix(DATA_PREFIX)
        .or_else(|| line.strip_prefix(DATA_PREFIX_NO_SPACE))
    {
        Some(rest) => rest,
        None if is_non_data_field(line) => return Ok(Frame::Skip),
        None => line,
    };
    let payload = payload.trim_ascii();

    if payload == DONE_SENTINEL {
        return Ok(Frame::Done);
    }

    serde_json::from_slice(payload).map(Frame::Chunk).map_err(|e| {
        LlmError::StreamParse(format!(
            "chunk json error={e} data={}",
            String::from_utf8_lossy(payload)
        ))
    })
}

fn is_non_data_field(line: &[u8]) -> bool {
    [b"event:".as_slice(), b"id:".as_slice(), b"retry:".as_slice()]
        .iter()
        .any(|p| line.starts_with(p))
}

#[derive(Debug, Default)]
struct LineBuffer {
    buf: BytesMut,
    /// Prefix of `buf` already searched for a newline.
    scanned: usize,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn next_line(&mut self) -> Option<Bytes> {
        let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') else {
            self.scanned = self.buf.len();
            return None;
        };
        let mut line = self.buf.split_to(self.scanned + offset + 1);
        self.scanned = 0;
        line.truncate(line.len() - 1);
        strip_cr(&mut line);
        Some(line.freeze())
    }

    /// Final line when the transport ends without a trailing newline.
    fn take_rest(&mut self) -> Option<Bytes> {
        if self.buf.is_empty() {
            return None;
        }
        self.scanned = 0;
        let mut line = self.buf.split();
        strip_cr(&mut line);
        Some(line.freeze())
    }
}

fn strip_cr(line: &mut BytesMut) {
    if line.last() == Some(&b'\r') {
        line.truncate(line.len() - 1);
    }
}

/// Whether the decode loop keeps reading after a line.
enum Flow {
    Continue,
    Stop,
}

async fn forward_line<T: DeserializeOwned>(line: &[u8], tx: &mpsc::Sender<Result<T>>) -> Flow {
    // Separator noise.
    if line.len() <= 1 {
        return Flow::Continue;
    }
    match decode_line::<T>(line) {
        Ok(Frame::Chunk(chunk)) => {
            if tx.send(Ok(chunk)).await.is_err() {
                tracing::debug!("stream reader dropped; stopping decode loop");
                return Flow::Stop;
            }
            Flow::Continue
        }
        Ok(Frame::Skip) => Flow::Continue,
        Ok(Frame::Done) => {
            tracing::debug!("stream done sentinel received");
            Flow::Stop
        }
        Err(e) => {
            if matches!(e, LlmError::ServiceUnavailable) {
                tracing::warn!("vendor keep-alive received; reporting service unavailable");
            }
            let _ = tx.send(Err(e)).await;
            Flow::Stop
        }
    }
}

async fn decode_loop<S, E, T>(body: S, tx: mpsc::Sender<Result<T>>, cancel: CancellationToken)
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
    T: DeserializeOwned + Send + 'static,
{
    let mut body = Box::pin(body);
    let mut lines = LineBuffer::default();
    let mut lines_seen = 0usize;

    loop {
        while let Some(line) = lines.next_line() {
            lines_seen = lines_seen.saturating_add(1);
            if let Flow::Stop = forward_line(&line, &tx).await {
                tracing::debug!(lines_seen, "decode loop finished");
                return;
            }
        }

        let next = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(lines_seen, "stream reader cancelled; closing transport");
                return;
            }
            next = body.next() => next,
        };

        match next {
            Some(Ok(bytes)) => lines.push(&bytes),
            Some(Err(e)) => {
                let err = LlmError::Http(format!("stream read failed: {e}"));
                let _ = tx.send(Err(err)).await;
                return;
            }
            None => {
                if let Some(line) = lines.take_rest() {
                    let _ = forward_line(&line, &tx).await;
                }
                tracing::debug!(lines_seen, "transport reached eof");
                return;
            }
        }
    }
}

/// Single-pass cursor over a streamed response.
///
/// ```ignore
/// while reader.advance().await {
///     let chunk = reader.current();
/// }
/// if let Some(err) = reader.error() { /* transport or decode failure */ }
/// ```
///
/// Must be created inside a tokio runtime.
pub struct StreamReader<T> {
    rx: mpsc::Receiver<Result<T>>,
    current: Option<T>,
    err: Option<LlmError>,
    finished: bool,
    _cancel: DropGuard,
}

impl<T> StreamReader<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub fn new<S, E>(body: S) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        tokio::spawn(decode_loop(body, tx, cancel.clone()));
        Self {
            rx,
            current: None,
            err: None,
            finished: false,
            _cancel: cancel.drop_guard(),
        }
    }

    /// Waits for the next record. Returns `false` once the stream has ended,
    /// cleanly or not; check [`StreamReader::error`] to tell which.
    pub async fn advance(&mut self) -> bool {
        if self.finished {
            return false;
        }
        match self.rx.recv().await {
            Some(Ok(item)) => {
                self.current = Some(item);
                true
            }
            Some(Err(e)) => {
                self.finish();
                self.err = Some(e);
                false
            }
            None => {
                self.finish();
                self.err = None;
                false
            }
        }
    }

    /// The record produced by the last successful `advance`.
    pub fn current(&self) -> Option<&T> {
        self.current.as_ref()
    }

    pub fn take_current(&mut self) -> Option<T> {
        self.current.take()
    }

    /// Terminal error, `None` when the stream ended cleanly or is still live.
    pub fn error(&self) -> Option<&LlmError> {
        self.err.as_ref()
    }

    pub fn take_error(&mut self) -> Option<LlmError> {
        self.err.take()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Adapts the cursor into a `Stream`; a terminal error is yielded once as
    /// the last item.
    pub fn into_stream(self) -> impl Stream<Item = Result<T>> + Send {
        futures_util::stream::unfold(self, |mut reader| async move {
            if reader.advance().await {
                let item = reader.take_current()?;
                Some((Ok(item), reader))
            } else {
                let err = reader.take_error()?;
                Some((Err(err), reader))
            }
        })
    }

    fn finish(&mut self) {
        self.finished = true;
        self.current = None;
        self.rx.close();
    }
}
