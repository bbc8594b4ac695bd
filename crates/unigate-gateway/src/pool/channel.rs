//! Multiplexed wire channel
//!
//! One `WireChannel` wraps one byte stream to a backend server and carries
//! calls from any number of concurrent sessions. Requests are written as
//! newline-delimited JSON envelopes with a channel-unique numeric id; a
//! reader task matches each inbound response to its pending call through the
//! correlation map. Out-of-order completion is expected and handled - the
//! map, not arrival order, pairs responses with callers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::wire::{encode_frame, ErrorBody, RequestEnvelope, ResponseEnvelope};

use super::BoxedStream;

/// Failures visible to a single call on the channel.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// The channel was closed before the call could complete.
    #[error("channel closed")]
    Closed,
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    #[error("i/o failure: {0}")]
    Io(String),
    /// The backend answered with a protocol-level error.
    #[error("backend error {}: {}", .0.code, .0.message)]
    Remote(ErrorBody),
}

type PendingCall = oneshot::Sender<Result<Value, ErrorBody>>;

/// A live, multiplexed connection to one backend server.
pub struct WireChannel {
    writer: Mutex<WriteHalf<BoxedStream>>,
    pending: DashMap<u64, PendingCall>,
    next_id: AtomicU64,
    closed: CancellationToken,
}

impl std::fmt::Debug for WireChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireChannel")
            .field("pending", &self.pending.len())
            .field("next_id", &self.next_id)
            .field("closed", &self.closed)
            .finish()
    }
}

impl WireChannel {
    /// Wrap a connected stream and start the reader task.
    pub fn new(stream: BoxedStream) -> Arc<Self> {
        let (read_half, write_half) = tokio::io::split(stream);
        let channel = Arc::new(Self {
            writer: Mutex::new(write_half),
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            closed: CancellationToken::new(),
        });
        tokio::spawn(Arc::clone(&channel).read_loop(read_half));
        channel
    }

    /// Issue one call and await its correlated response.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        deadline: Duration,
    ) -> Result<Value, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        let request = RequestEnvelope::new(id, method, params);
        let frame = encode_frame(&request).map_err(|e| {
            self.pending.remove(&id);
            ChannelError::Io(e.to_string())
        })?;

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.write_all(frame.as_bytes()).await {
                self.pending.remove(&id);
                self.closed.cancel();
                return Err(ChannelError::Io(e.to_string()));
            }
            if let Err(e) = writer.flush().await {
                self.pending.remove(&id);
                self.closed.cancel();
                return Err(ChannelError::Io(e.to_string()));
            }
        }

        match tokio::time::timeout(deadline, rx).await {
            Err(_) => {
                // The response, if it ever arrives, is dropped by the reader.
                self.pending.remove(&id);
                Err(ChannelError::Timeout(deadline))
            }
            // Reader exited while we were waiting.
            Ok(Err(_)) => Err(ChannelError::Closed),
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(body))) => Err(ChannelError::Remote(body)),
        }
    }

    /// Cancellation token observed by the owning pool entry; fires when the
    /// transport dies or the channel is closed explicitly.
    pub fn closed(&self) -> &CancellationToken {
        &self.closed
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Tear the channel down. Pending calls fail with `Closed`.
    pub fn close(&self) {
        self.closed.cancel();
        self.pending.clear();
    }

    async fn read_loop(self: Arc<Self>, read_half: ReadHalf<BoxedStream>) {
        let mut lines = BufReader::new(read_half).lines();
        loop {
            tokio::select! {
                _ = self.closed.cancelled() => break,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => self.dispatch_frame(&line),
                    Ok(None) => {
                        debug!("[WireChannel] Stream closed by peer");
                        break;
                    }
                    Err(e) => {
                        warn!("[WireChannel] Read failure: {}", e);
                        break;
                    }
                },
            }
        }
        self.closed.cancel();
        // Dropping the senders wakes every waiter with `Closed`.
        self.pending.clear();
    }

    fn dispatch_frame(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let response: ResponseEnvelope = match serde_json::from_str(line) {
            Ok(response) => response,
            Err(e) => {
                warn!("[WireChannel] Discarding malformed frame: {}", e);
                return;
            }
        };
        let Some(id) = response.id.as_u64() else {
            debug!("[WireChannel] Frame without a numeric id, discarding");
            return;
        };
        match self.pending.remove(&id) {
            Some((_, tx)) => {
                // Send fails when the caller gave up (timeout, cancelled
                // session); the result is discarded, as specified.
                let _ = tx.send(response.into_outcome());
            }
            None => debug!(call_id = id, "[WireChannel] Response for unknown call"),
        }
    }
}
