//! Streaming Transport (C6, §4.6): relays an adapter's raw [`ChunkReceiver`]
//! through a bounded, FIFO channel, tracks whether any chunk has reached the
//! caller (so C5 can enforce "no fallback after first chunk delivered"), and
//! closes promptly on cancellation. `StreamChunk` already owns every byte it
//! carries, so the "deep copy at channel insertion" requirement is satisfied
//! by the channel send itself — no adapter-owned buffer crosses the
//! boundary by reference.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use meridian_common::ErrorKind;
use meridian_protocol::{ChunkExtra, Operation, StreamChunk};
use meridian_provider_core::ChunkReceiver;
use tokio::sync::{mpsc, watch};

/// Default bounded-channel capacity (§4.6).
pub const DEFAULT_CAPACITY: usize = 16;

/// A relayed stream, bounded and FIFO, with visibility into whether the
/// first chunk has already reached the caller.
pub struct StreamTransport {
    rx: mpsc::Receiver<StreamChunk>,
    delivered: Arc<AtomicBool>,
}

impl StreamTransport {
    /// Whether at least one chunk has been handed to the caller. Once true,
    /// the fallback state machine must not engage a different target for
    /// this request (§4.5, testable property #2).
    pub fn has_delivered(&self) -> bool {
        self.delivered.load(Ordering::Acquire)
    }

    pub async fn recv(&mut self) -> Option<StreamChunk> {
        let chunk = self.rx.recv().await;
        if chunk.is_some() {
            self.delivered.store(true, Ordering::Release);
        }
        chunk
    }
}

/// Spawns a relay task forwarding `source` into a freshly bounded channel of
/// `capacity` slots. `cancel` is flipped to `true` by the pipeline to
/// request cancellation; the relay task observes it within one `select!`
/// iteration, aborts reading `source`, sends a terminal error chunk, and
/// drops both ends, closing the output channel essentially immediately
/// (well inside any reasonable grace period, §4.6 S6). A closed channel
/// without a final element is a bug, so cancellation always sends one.
pub fn spawn(
    mut source: ChunkReceiver,
    capacity: usize,
    mut cancel: watch::Receiver<bool>,
    operation: Operation,
) -> StreamTransport {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let delivered = Arc::new(AtomicBool::new(false));

    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        let _ = tx.send(canceled_chunk(operation)).await;
                        break;
                    }
                }
                chunk = source.recv() => {
                    match chunk {
                        Some(chunk) => {
                            let is_final = chunk.is_final();
                            if tx.send(chunk).await.is_err() {
                                break;
                            }
                            if is_final {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    });

    StreamTransport { rx, delivered }
}

fn canceled_chunk(operation: Operation) -> StreamChunk {
    StreamChunk {
        operation,
        delta: None,
        finish_reason: None,
        usage: None,
        error: Some(ErrorKind::Canceled),
        extra: ChunkExtra { provider: String::new(), latency_ms: 0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_protocol::{ChunkDelta, ChunkExtra, Operation};
    use std::time::Duration;

    fn chunk(delta: &str, finished: bool) -> StreamChunk {
        StreamChunk {
            operation: Operation::ChatCompletion,
            delta: Some(ChunkDelta::Text(delta.to_string())),
            finish_reason: if finished { Some("stop".into()) } else { None },
            usage: None,
            error: None,
            extra: ChunkExtra { provider: "openai".into(), latency_ms: 1 },
        }
    }

    #[tokio::test]
    async fn chunks_are_forwarded_in_order() {
        let (tx, source) = mpsc::channel(4);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        tx.send(chunk("hello", false)).await.unwrap();
        tx.send(chunk(" world", true)).await.unwrap();
        drop(tx);

        let mut transport = spawn(source, DEFAULT_CAPACITY, cancel_rx, Operation::ChatCompletion);
        let first = transport.recv().await.unwrap();
        assert!(matches!(first.delta, Some(ChunkDelta::Text(ref s)) if s == "hello"));
        assert!(transport.has_delivered());
        let second = transport.recv().await.unwrap();
        assert!(second.is_final());
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn cancellation_sends_a_terminal_error_chunk_before_closing() {
        let (tx, source) = mpsc::channel(4);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        tx.send(chunk("partial", false)).await.unwrap();

        let mut transport = spawn(source, DEFAULT_CAPACITY, cancel_rx, Operation::ChatCompletion);
        let first = transport.recv().await.unwrap();
        assert!(!first.is_final());

        cancel_tx.send(true).unwrap();
        let terminal = tokio::time::timeout(Duration::from_millis(100), transport.recv())
            .await
            .unwrap()
            .expect("cancellation must send a terminal chunk before the channel closes");
        assert!(matches!(terminal.error, Some(ErrorKind::Canceled)));
        assert!(terminal.is_final());

        let closed = tokio::time::timeout(Duration::from_millis(100), transport.recv()).await;
        assert!(closed.unwrap().is_none());
    }

    #[tokio::test]
    async fn has_delivered_is_false_until_the_first_chunk_is_consumed() {
        let (tx, source) = mpsc::channel(4);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        tx.send(chunk("x", true)).await.unwrap();
        drop(tx);

        let mut transport = spawn(source, DEFAULT_CAPACITY, cancel_rx, Operation::ChatCompletion);
        assert!(!transport.has_delivered());
        transport.recv().await.unwrap();
        assert!(transport.has_delivered());
    }
}
