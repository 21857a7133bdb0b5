//! The [`RecordSource`] trait is how the dispatch pipeline pulls raw records
//! out of a ring buffer.
//!
//! The ring buffer itself is owned by the external loader: one source is
//! created for every buffer (or cpu shard) it exposes.

use std::future::Future;

use bytes::Bytes;
use tokio::sync::mpsc;

pub trait RecordSource: Send + 'static {
    /// Wait for the next raw record. `None` means the source is exhausted.
    ///
    /// Must be cancel safe: the pipeline stops waiting on shutdown.
    fn next_record(&mut self) -> impl Future<Output = Option<Bytes>> + Send;
}

/// Simple implementation for tokio::mpsc bounded channels.
impl RecordSource for mpsc::Receiver<Bytes> {
    async fn next_record(&mut self) -> Option<Bytes> {
        self.recv().await
    }
}

impl RecordSource for mpsc::UnboundedReceiver<Bytes> {
    async fn next_record(&mut self) -> Option<Bytes> {
        self.recv().await
    }
}
