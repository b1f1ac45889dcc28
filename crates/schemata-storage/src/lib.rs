//! Schemata storage and consistency engine
//!
//! The replicated log is the write path and the source of truth. The
//! replay engine tails it into an in-memory cache that serves reads; in the
//! durable topology writes also land in a redb backend that answers reads
//! the cache has not caught up with yet.

pub mod backend;
pub mod cache;
pub mod cached;
pub mod combined;
pub mod error;
pub mod multiwriter;
pub mod null;
pub mod producer;
pub mod record;
pub mod replay;
pub mod traits;
pub mod transport;

pub use backend::{BackendError, RedbBackend};
pub use cache::{CacheSnapshot, MemoryCache};
pub use cached::CachedStorage;
pub use combined::CombinedStorage;
pub use error::{StorageError, StorageResult};
pub use multiwriter::MultiWriter;
pub use null::NullWriter;
pub use producer::LogWriter;
pub use record::{ADMIN_STREAM, LogRecord, RecordError, RecordTag};
pub use replay::{
    NullWatcher, ReplayConfig, ReplayEngine, ReplayStats, StreamCursor, Watcher, replay_to_end,
};
pub use traits::{SchemaWriter, StateReader, StateStore, StateWriter, Storage};
pub use transport::{LogEntry, LogTransport, MemoryLog, SegmentLog, TransportError, open_transport};
