//! Message-bus seam
//!
//! The broker client is an external collaborator: the pipeline only sees an
//! opaque source and sinks of keyed byte records. The in-memory channel
//! transport backs tests and demo mode.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Result, StreamGuardError};

/// One keyed byte record on the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: String,
    pub payload: Vec<u8>,
}

impl Record {
    pub fn new(key: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
        }
    }
}

/// Ordered source of records. Within one key, records arrive in input order.
#[async_trait]
pub trait RecordSource: Send {
    /// Next record, or `None` once the stream is closed.
    async fn poll(&mut self) -> Option<Record>;

    /// Acknowledges everything processed so far (at-least-once delivery:
    /// a crash before the commit replays records).
    async fn commit(&mut self) {}
}

/// Destination for records, keyed like the input.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn publish(&self, record: Record) -> Result<()>;
}

/// In-memory source fed by a tokio channel.
pub struct ChannelSource {
    receiver: mpsc::Receiver<Record>,
}

#[async_trait]
impl RecordSource for ChannelSource {
    async fn poll(&mut self) -> Option<Record> {
        self.receiver.recv().await
    }
}

/// In-memory sink draining into a tokio channel.
#[derive(Clone)]
pub struct ChannelSink {
    sender: mpsc::Sender<Record>,
}

#[async_trait]
impl RecordSink for ChannelSink {
    async fn publish(&self, record: Record) -> Result<()> {
        self.sender
            .send(record)
            .await
            .map_err(|_| StreamGuardError::Transport("sink channel closed".to_string()))
    }
}

/// Builds an in-memory source plus the sender that feeds it.
pub fn channel_source(capacity: usize) -> (mpsc::Sender<Record>, ChannelSource) {
    let (sender, receiver) = mpsc::channel(capacity);
    (sender, ChannelSource { receiver })
}

/// Builds an in-memory sink plus the receiver that drains it.
pub fn channel_sink(capacity: usize) -> (ChannelSink, mpsc::Receiver<Record>) {
    let (sender, receiver) = mpsc::channel(capacity);
    (ChannelSink { sender }, receiver)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_transport_round_trip() {
        let (tx, mut source) = channel_source(8);
        tx.send(Record::new("user_1", b"payload".to_vec()))
            .await
            .unwrap();
        drop(tx);

        let record = source.poll().await.unwrap();
        assert_eq!(record.key, "user_1");
        assert_eq!(record.payload, b"payload");
        assert!(source.poll().await.is_none());
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed() {
        let (sink, receiver) = channel_sink(1);
        drop(receiver);
        let err = sink.publish(Record::new("k", b"v".to_vec())).await;
        assert!(err.is_err());
    }
}
