//! Append-only log transports
//!
//! The replicated log is both the write path and the replication medium.
//! A transport exposes one append-only stream per tenant; offsets are
//! 0-based and dense within a stream.

mod memory;
mod segment;

pub use memory::MemoryLog;
pub use segment::{SegmentLog, SegmentLogConfig};

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Errors raised by a log transport
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("log I/O error on stream '{stream}': {source}")]
    Io {
        stream: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt log record in stream '{stream}' at offset {offset}: {reason}")]
    Corrupt {
        stream: String,
        offset: u64,
        reason: String,
    },

    #[error("record too large for stream '{stream}': {size} bytes")]
    RecordTooLarge { stream: String, size: usize },

    #[error("invalid log endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("no log endpoint could be opened: {0}")]
    NoEndpoint(String),

    #[error("log task failed: {0}")]
    Task(String),
}

/// A record read back from a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// 0-based position in the stream
    pub offset: u64,
    /// Record key (the record tag)
    pub key: String,
    /// Record value (the JSON payload)
    pub value: Vec<u8>,
}

/// An append-only, per-stream log
#[async_trait]
pub trait LogTransport: Send + Sync {
    /// Append a record and wait for it to be acknowledged.
    ///
    /// Returns the record's offset.
    async fn append(&self, stream: &str, key: &str, value: &[u8]) -> Result<u64, TransportError>;

    /// Fetch up to `max_records` records starting at `from_offset`, in
    /// offset order. An empty batch means the end of the stream.
    async fn fetch(
        &self,
        stream: &str,
        from_offset: u64,
        max_records: usize,
    ) -> Result<Vec<LogEntry>, TransportError>;

    /// Offset the next append to `stream` will receive
    async fn end_offset(&self, stream: &str) -> Result<u64, TransportError>;
}

/// A parsed log endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEndpoint {
    /// In-process log, lost on restart
    Memory,
    /// Segment files under a directory
    Directory(PathBuf),
}

impl LogEndpoint {
    /// Parse `memory://`, `file://<dir>` or a bare directory path
    pub fn parse(endpoint: &str) -> Result<Self, TransportError> {
        let endpoint = endpoint.trim();
        if endpoint == "memory://" || endpoint == "memory" {
            return Ok(Self::Memory);
        }
        let path = endpoint.strip_prefix("file://").unwrap_or(endpoint);
        if path.is_empty() || path.contains("://") {
            return Err(TransportError::InvalidEndpoint(endpoint.to_string()));
        }
        Ok(Self::Directory(PathBuf::from(path)))
    }
}

/// Open the first endpoint that can be opened, in configuration order
pub fn open_transport(
    endpoints: &[String],
    sync_on_write: bool,
) -> Result<Arc<dyn LogTransport>, TransportError> {
    let mut failures = Vec::new();
    for raw in endpoints {
        let opened: Result<Arc<dyn LogTransport>, TransportError> = match LogEndpoint::parse(raw) {
            Ok(LogEndpoint::Memory) => Ok(Arc::new(MemoryLog::new())),
            Ok(LogEndpoint::Directory(dir)) => {
                let config = SegmentLogConfig {
                    sync_on_write,
                    ..SegmentLogConfig::new(dir)
                };
                SegmentLog::open(config).map(|log| Arc::new(log) as Arc<dyn LogTransport>)
            }
            Err(e) => Err(e),
        };
        match opened {
            Ok(transport) => {
                info!("Using log endpoint {}", raw);
                return Ok(transport);
            }
            Err(e) => {
                warn!("Log endpoint {} unavailable: {}", raw, e);
                failures.push(format!("{raw}: {e}"));
            }
        }
    }
    Err(TransportError::NoEndpoint(failures.join("; ")))
}
