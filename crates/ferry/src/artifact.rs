use bytes::{Bytes, BytesMut};
use storage_driver::Destination;

/// Write strategy selected by the destination's file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactClass {
    /// Complete media chunk, written once.
    Segment,
    /// Index rewritten as the stream grows.
    Manifest,
}

impl ArtifactClass {
    pub fn classify(destination: &Destination) -> Self {
        match destination.extension() {
            Some("ts" | "mp4") => Self::Segment,
            _ => Self::Manifest,
        }
    }
}

/// Append-only accumulation of manifest records.
///
/// Every snapshot is a prefix of every later one.
#[derive(Debug, Default)]
pub struct PendingPayload {
    buffer: BytesMut,
}

impl PendingPayload {
    pub fn append(&mut self, record: &[u8]) {
        self.buffer.extend_from_slice(record);
    }

    pub fn snapshot(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buffer)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
