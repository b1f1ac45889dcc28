//! Replay engine
//!
//! Tails tenant streams and applies their records to the cache. One
//! sequential reader per stream, records applied in offset order. Offsets
//! are never committed: every start replays each stream from offset 0.

use crate::error::{StorageError, StorageResult};
use crate::producer::schema_id;
use crate::record::LogRecord;
use crate::traits::StateWriter;
use crate::transport::{LogEntry, LogTransport, TransportError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Subscribes the process to tenant streams
pub trait Watcher: Send + Sync {
    /// Start replaying `stream` unless it is already being replayed
    fn watch(&self, stream: &str);
}

/// Watcher used in log-less mode: there is nothing to replay
#[derive(Debug, Default, Clone, Copy)]
pub struct NullWatcher;

impl Watcher for NullWatcher {
    fn watch(&self, stream: &str) {
        debug!("No log configured, not watching stream '{}'", stream);
    }
}

/// Counters for a replayed range of a stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records applied to the state
    pub applied: u64,
    /// Records that failed to decode or apply
    pub skipped: u64,
    /// Offset the next fetch starts at
    pub next_offset: u64,
}

impl ReplayStats {
    /// Number of records read, applied or not
    #[must_use]
    pub const fn records(&self) -> u64 {
        self.applied + self.skipped
    }
}

/// Apply one decoded record to the state
pub fn apply_record(state: &dyn StateWriter, offset: u64, record: LogRecord) -> StorageResult<()> {
    match record {
        LogRecord::Schema {
            client,
            subject,
            schema,
        } => state
            .add_schema(&client, &subject, schema_id(offset), &schema)
            .map(|_| ()),
        LogRecord::GlobalConfig {
            client,
            compatibility,
        } => state.set_global_config(&client, compatibility),
        LogRecord::SubjectConfig {
            client,
            subject,
            compatibility,
        } => state.set_subject_config(&client, &subject, compatibility),
        LogRecord::CreateUser { name, token, admin } => state.add_user(&name, &token, admin),
    }
}

/// Position of a single sequential reader in a stream
#[derive(Debug, Clone)]
pub struct StreamCursor {
    stream: String,
    next_offset: u64,
}

impl StreamCursor {
    /// Cursor at the start of `stream`
    pub fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            next_offset: 0,
        }
    }

    #[must_use]
    pub fn stream(&self) -> &str {
        &self.stream
    }

    #[must_use]
    pub const fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Fetch one batch and apply it in offset order.
    ///
    /// A record that fails to decode or apply is logged and skipped; only a
    /// fetch error is returned. An empty batch yields zero counters.
    pub async fn poll(
        &mut self,
        transport: &dyn LogTransport,
        state: &dyn StateWriter,
        max_records: usize,
    ) -> Result<ReplayStats, TransportError> {
        let batch = transport
            .fetch(&self.stream, self.next_offset, max_records)
            .await?;
        let mut stats = ReplayStats::default();
        for entry in batch {
            if self.apply_entry(state, &entry) {
                stats.applied += 1;
            } else {
                stats.skipped += 1;
            }
            self.next_offset = entry.offset + 1;
        }
        stats.next_offset = self.next_offset;
        Ok(stats)
    }

    fn apply_entry(&self, state: &dyn StateWriter, entry: &LogEntry) -> bool {
        let result = LogRecord::decode(&entry.key, &entry.value)
            .map_err(StorageError::from)
            .and_then(|record| apply_record(state, entry.offset, record));
        match result {
            Ok(()) => true,
            Err(e) => {
                error!(
                    "Skipping record at offset {} of stream '{}': {}",
                    entry.offset, self.stream, e
                );
                false
            }
        }
    }
}

/// Replay `stream` from offset 0 up to its current end
pub async fn replay_to_end(
    transport: &dyn LogTransport,
    state: &dyn StateWriter,
    stream: &str,
    batch_size: usize,
) -> Result<ReplayStats, TransportError> {
    let mut cursor = StreamCursor::new(stream);
    let mut total = ReplayStats::default();
    loop {
        let stats = cursor.poll(transport, state, batch_size.max(1)).await?;
        if stats.records() == 0 {
            break;
        }
        total.applied += stats.applied;
        total.skipped += stats.skipped;
    }
    total.next_offset = cursor.next_offset();
    Ok(total)
}

/// Replay engine settings
#[derive(Debug, Clone, Copy)]
pub struct ReplayConfig {
    /// Idle delay once a tailer reaches the end of its stream
    pub poll_interval: Duration,
    /// Maximum records fetched per batch
    pub fetch_batch: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            fetch_batch: 500,
        }
    }
}

/// Tails streams in background tasks, one task per stream
pub struct ReplayEngine {
    transport: Arc<dyn LogTransport>,
    state: Arc<dyn StateWriter>,
    config: ReplayConfig,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl ReplayEngine {
    pub fn new(
        transport: Arc<dyn LogTransport>,
        state: Arc<dyn StateWriter>,
        config: ReplayConfig,
    ) -> Self {
        Self {
            transport,
            state,
            config,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a tail task exists for `stream`
    pub fn is_watching(&self, stream: &str) -> bool {
        self.tasks.lock().contains_key(stream)
    }

    /// Streams currently tailed, sorted
    pub fn streams(&self) -> Vec<String> {
        let mut streams: Vec<String> = self.tasks.lock().keys().cloned().collect();
        streams.sort();
        streams
    }

    /// Abort every tail task
    pub fn shutdown(&self) {
        let tasks: Vec<(String, JoinHandle<()>)> = self.tasks.lock().drain().collect();
        for (stream, handle) in tasks {
            handle.abort();
            debug!("Stopped replaying stream '{}'", stream);
        }
        info!("Replay engine stopped");
    }

    async fn tail(
        transport: Arc<dyn LogTransport>,
        state: Arc<dyn StateWriter>,
        config: ReplayConfig,
        stream: String,
    ) {
        let mut cursor = StreamCursor::new(stream);
        let mut caught_up = false;
        loop {
            match cursor
                .poll(transport.as_ref(), state.as_ref(), config.fetch_batch.max(1))
                .await
            {
                Ok(stats) if stats.records() == 0 => {
                    if !caught_up {
                        info!(
                            "Stream '{}' replayed up to offset {}",
                            cursor.stream(),
                            cursor.next_offset()
                        );
                        caught_up = true;
                    }
                    tokio::time::sleep(config.poll_interval).await;
                }
                Ok(stats) => {
                    debug!(
                        "Stream '{}': applied {}, skipped {}, next offset {}",
                        cursor.stream(),
                        stats.applied,
                        stats.skipped,
                        stats.next_offset
                    );
                }
                Err(e) => {
                    warn!("Fetch error on stream '{}': {}", cursor.stream(), e);
                    tokio::time::sleep(config.poll_interval).await;
                }
            }
        }
    }
}

impl Watcher for ReplayEngine {
    fn watch(&self, stream: &str) {
        let mut tasks = self.tasks.lock();
        if tasks.contains_key(stream) {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            error!("No async runtime, can't replay stream '{}'", stream);
            return;
        };
        info!("Replaying stream '{}' from offset 0", stream);
        let handle = runtime.spawn(Self::tail(
            Arc::clone(&self.transport),
            Arc::clone(&self.state),
            self.config,
            stream.to_string(),
        ));
        tasks.insert(stream.to_string(), handle);
    }
}

impl Drop for ReplayEngine {
    fn drop(&mut self) {
        for handle in self.tasks.get_mut().values() {
            handle.abort();
        }
    }
}
