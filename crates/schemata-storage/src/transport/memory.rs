//! In-process log transport

use super::{LogEntry, LogTransport, TransportError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Log kept entirely in memory, one vector per stream
#[derive(Default)]
pub struct MemoryLog {
    streams: RwLock<HashMap<String, Vec<(String, Vec<u8>)>>>,
}

impl MemoryLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in a stream
    pub fn len(&self, stream: &str) -> usize {
        self.streams.read().get(stream).map_or(0, Vec::len)
    }

    /// Whether a stream holds no records
    pub fn is_empty(&self, stream: &str) -> bool {
        self.len(stream) == 0
    }
}

#[async_trait]
impl LogTransport for MemoryLog {
    async fn append(&self, stream: &str, key: &str, value: &[u8]) -> Result<u64, TransportError> {
        let mut streams = self.streams.write();
        let records = streams.entry(stream.to_string()).or_default();
        records.push((key.to_string(), value.to_vec()));
        Ok(records.len() as u64 - 1)
    }

    async fn fetch(
        &self,
        stream: &str,
        from_offset: u64,
        max_records: usize,
    ) -> Result<Vec<LogEntry>, TransportError> {
        let streams = self.streams.read();
        let Some(records) = streams.get(stream) else {
            return Ok(Vec::new());
        };
        let start = usize::try_from(from_offset).unwrap_or(usize::MAX);
        Ok(records
            .iter()
            .enumerate()
            .skip(start)
            .take(max_records)
            .map(|(offset, (key, value))| LogEntry {
                offset: offset as u64,
                key: key.clone(),
                value: value.clone(),
            })
            .collect())
    }

    async fn end_offset(&self, stream: &str) -> Result<u64, TransportError> {
        Ok(self.len(stream) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offsets_are_per_stream() {
        let log = MemoryLog::new();
        assert_eq!(log.append("acme", "schema", b"{}").await.unwrap(), 0);
        assert_eq!(log.append("acme", "schema", b"{}").await.unwrap(), 1);
        assert_eq!(log.append("globex", "schema", b"{}").await.unwrap(), 0);
        assert_eq!(log.end_offset("acme").await.unwrap(), 2);
        assert_eq!(log.end_offset("unknown").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fetch_window() {
        let log = MemoryLog::new();
        for i in 0..5u8 {
            log.append("acme", "schema", &[i]).await.unwrap();
        }

        let batch = log.fetch("acme", 1, 2).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].offset, 1);
        assert_eq!(batch[0].value, vec![1]);
        assert_eq!(batch[1].offset, 2);

        assert!(log.fetch("acme", 5, 10).await.unwrap().is_empty());
        assert!(log.fetch("unknown", 0, 10).await.unwrap().is_empty());
    }
}
