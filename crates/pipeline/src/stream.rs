//! Bounded data streams between pipeline nodes
//!
//! A stream is a FIFO, capacity-bounded queue of numeric chunks with a
//! monotonic completion signal. The producer suspends on `push` when the
//! queue is full (backpressure) and marks the stream done exactly once with
//! `close`; consumers drain every queued chunk before they ever observe
//! completion. Built on flume bounded channels, whose async send/recv are
//! the suspension points the scheduler multiplexes over.

use meas_types::DataChunk;
use std::sync::Arc;
use tracing::trace;

use crate::error::FilterError;

/// Default per-edge queue capacity.
pub const DEFAULT_CAPACITY: usize = 64;

/// Create one stream: a producer half and a consumer half.
pub fn stream(capacity: usize) -> (StreamWriter, StreamReader) {
    let (tx, rx) = flume::bounded(capacity);
    (StreamWriter { tx: Some(tx) }, StreamReader { rx })
}

/// Producer half of a stream.
///
/// Owned by exactly one upstream node (through its `OutputConnector`).
pub struct StreamWriter {
    // Taken on close; a `None` sender is the "done was signalled" state.
    tx: Option<flume::Sender<Arc<DataChunk>>>,
}

impl StreamWriter {
    /// Queue a chunk, suspending while the queue is at capacity.
    ///
    /// Chunks are validated at the boundary: an empty chunk never enters the
    /// queue. Pushing after `close` fails with [`FilterError::StreamClosed`],
    /// as does pushing once the consumer has gone away.
    pub async fn push(&self, chunk: Arc<DataChunk>) -> Result<(), FilterError> {
        if chunk.is_empty() {
            return Err(FilterError::BadChunk("empty chunk".into()));
        }
        let tx = self.tx.as_ref().ok_or(FilterError::StreamClosed)?;
        tx.send_async(chunk)
            .await
            .map_err(|_| FilterError::StreamClosed)
    }

    /// Signal that no more chunks will ever be pushed. Monotonic: the first
    /// call wins and later calls are no-ops.
    pub fn close(&mut self) {
        if self.tx.take().is_some() {
            trace!("stream writer closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }
}

/// Consumer half of a stream.
pub struct StreamReader {
    rx: flume::Receiver<Arc<DataChunk>>,
}

impl StreamReader {
    /// Receive the next chunk in FIFO order, suspending until one arrives.
    ///
    /// Returns `None` only once the producer has closed the stream *and*
    /// every previously queued chunk has been drained.
    pub async fn next(&self) -> Option<Arc<DataChunk>> {
        self.rx.recv_async().await.ok()
    }

    /// Number of chunks currently queued.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    fn chunk(values: &[f64]) -> Arc<DataChunk> {
        DataChunk::new(values.to_vec())
    }

    #[tokio::test]
    async fn chunks_arrive_in_push_order() {
        let (writer, reader) = stream(8);
        for i in 0..5 {
            writer.push(chunk(&[i as f64])).await.unwrap();
        }
        for i in 0..5 {
            assert_eq!(reader.next().await.unwrap().samples, vec![i as f64]);
        }
    }

    #[tokio::test]
    async fn done_is_observed_only_after_drain() {
        let (mut writer, reader) = stream(8);
        writer.push(chunk(&[1.0])).await.unwrap();
        writer.push(chunk(&[2.0])).await.unwrap();
        writer.close();

        assert_eq!(reader.next().await.unwrap().samples, vec![1.0]);
        assert_eq!(reader.next().await.unwrap().samples, vec![2.0]);
        assert!(reader.next().await.is_none());
    }

    #[tokio::test]
    async fn push_after_close_is_rejected() {
        let (mut writer, _reader) = stream(8);
        writer.close();
        assert_eq!(
            writer.push(chunk(&[1.0])).await,
            Err(FilterError::StreamClosed)
        );
    }

    #[tokio::test]
    async fn empty_chunks_never_enter_the_queue() {
        let (writer, reader) = stream(8);
        assert!(matches!(
            writer.push(chunk(&[])).await,
            Err(FilterError::BadChunk(_))
        ));
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn full_queue_stalls_the_producer() {
        let (writer, reader) = stream(1);
        writer.push(chunk(&[1.0])).await.unwrap();

        // Second push must suspend until the consumer makes room.
        let mut pending = Box::pin(writer.push(chunk(&[2.0])));
        assert!((&mut pending).now_or_never().is_none());

        assert_eq!(reader.next().await.unwrap().samples, vec![1.0]);
        pending.await.unwrap();
        assert_eq!(reader.next().await.unwrap().samples, vec![2.0]);
    }
}
