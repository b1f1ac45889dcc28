//! File-backed log transport
//!
//! One append-only segment file per stream. Records are framed as:
//!
//! ```text
//! +--------+--------+---------+-----------+-----+-------+--------+
//! | Magic  | Offset | Key len | Value len | Key | Value | CRC32C |
//! | 4B     | 8B     | 2B      | 4B        | var | var   | 4B     |
//! +--------+--------+---------+-----------+-----+-------+--------+
//! ```
//!
//! On open the file is scanned to rebuild the offset index; a torn or
//! corrupt tail is truncated. A directory must be owned by one process.

use super::{LogEntry, LogTransport, TransportError};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Segment record magic number
const SEGMENT_MAGIC: u32 = 0x534C_4F47; // "SLOG"

/// Record header size (magic + offset + key len + value len)
const RECORD_HEADER_SIZE: usize = 18;

const CRC_SIZE: usize = 4;

/// Segment log configuration
#[derive(Clone, Debug)]
pub struct SegmentLogConfig {
    /// Directory holding one `.log` file per stream
    pub dir: PathBuf,
    /// Fsync after every append
    pub sync_on_write: bool,
    /// Buffer size for writes
    pub write_buffer_size: usize,
}

impl SegmentLogConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sync_on_write: true,
            write_buffer_size: 64 * 1024, // 64KB
        }
    }
}

/// Append-only log persisted as one segment file per stream
pub struct SegmentLog {
    inner: Arc<SegmentLogInner>,
}

struct SegmentLogInner {
    config: SegmentLogConfig,
    streams: RwLock<HashMap<String, Arc<Mutex<StreamFile>>>>,
}

/// Open segment file of a single stream
struct StreamFile {
    name: String,
    path: PathBuf,
    writer: BufWriter<File>,
    /// Byte position of every record, indexed by offset
    positions: Vec<u64>,
    size: u64,
    /// Set when a failed append could not be rolled back
    poisoned: bool,
}

impl SegmentLog {
    /// Open (or create) a segment log directory
    pub fn open(config: SegmentLogConfig) -> Result<Self, TransportError> {
        std::fs::create_dir_all(&config.dir).map_err(|source| TransportError::Io {
            stream: String::new(),
            source,
        })?;
        info!("Opened segment log at {:?}", config.dir);
        Ok(Self {
            inner: Arc::new(SegmentLogInner {
                config,
                streams: RwLock::new(HashMap::new()),
            }),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, TransportError>
    where
        T: Send + 'static,
        F: FnOnce(&SegmentLogInner) -> Result<T, TransportError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner))
            .await
            .map_err(|e| TransportError::Task(e.to_string()))?
    }
}

impl SegmentLogInner {
    fn stream_path(&self, stream: &str) -> PathBuf {
        self.config.dir.join(format!("{}.log", file_stem(stream)))
    }

    /// Look up an open stream, opening its file if it exists (or `create`)
    fn lookup(
        &self,
        stream: &str,
        create: bool,
    ) -> Result<Option<Arc<Mutex<StreamFile>>>, TransportError> {
        if let Some(file) = self.streams.read().get(stream) {
            return Ok(Some(Arc::clone(file)));
        }

        let path = self.stream_path(stream);
        if !create && !path.exists() {
            return Ok(None);
        }

        let mut streams = self.streams.write();
        if let Some(file) = streams.get(stream) {
            return Ok(Some(Arc::clone(file)));
        }
        let file = Arc::new(Mutex::new(StreamFile::open(
            stream,
            path,
            self.config.write_buffer_size,
        )?));
        streams.insert(stream.to_string(), Arc::clone(&file));
        Ok(Some(file))
    }

    fn append(&self, stream: &str, key: &str, value: &[u8]) -> Result<u64, TransportError> {
        let Some(file) = self.lookup(stream, true)? else {
            return Err(TransportError::Task(format!("stream '{stream}' not opened")));
        };
        let mut file = file.lock();
        file.append(key, value, self.config.sync_on_write)
    }

    fn fetch(
        &self,
        stream: &str,
        from_offset: u64,
        max_records: usize,
    ) -> Result<Vec<LogEntry>, TransportError> {
        let Some(file) = self.lookup(stream, false)? else {
            return Ok(Vec::new());
        };

        // Resolve the byte range under the lock, read it without
        let (path, start_pos, end_pos, count) = {
            let file = file.lock();
            let total = file.positions.len() as u64;
            if from_offset >= total || max_records == 0 {
                return Ok(Vec::new());
            }
            let last = total.min(from_offset.saturating_add(max_records as u64));
            let start = file.positions[to_index(from_offset)];
            let end = if last == total {
                file.size
            } else {
                file.positions[to_index(last)]
            };
            (file.path.clone(), start, end, to_index(last - from_offset))
        };

        let mut buf = vec![0u8; to_index(end_pos - start_pos)];
        let mut reader = File::open(&path).map_err(|source| io_error(stream, source))?;
        reader
            .seek(SeekFrom::Start(start_pos))
            .map_err(|source| io_error(stream, source))?;
        reader
            .read_exact(&mut buf)
            .map_err(|source| io_error(stream, source))?;

        let mut entries = Vec::with_capacity(count);
        let mut pos = 0;
        while entries.len() < count {
            let expected = from_offset + entries.len() as u64;
            let (entry, size) =
                decode_record(&buf[pos..]).map_err(|reason| TransportError::Corrupt {
                    stream: stream.to_string(),
                    offset: expected,
                    reason,
                })?;
            if entry.offset != expected {
                return Err(TransportError::Corrupt {
                    stream: stream.to_string(),
                    offset: expected,
                    reason: format!("found offset {}", entry.offset),
                });
            }
            entries.push(entry);
            pos += size;
        }
        Ok(entries)
    }

    fn end_offset(&self, stream: &str) -> Result<u64, TransportError> {
        Ok(self
            .lookup(stream, false)?
            .map_or(0, |file| file.lock().positions.len() as u64))
    }
}

impl StreamFile {
    fn open(name: &str, path: PathBuf, buffer_size: usize) -> Result<Self, TransportError> {
        let (positions, size) = scan_segment(name, &path)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| io_error(name, source))?;

        // Drop anything past the last intact record
        let on_disk = file.metadata().map_err(|source| io_error(name, source))?.len();
        if on_disk > size {
            warn!(
                "Truncating torn tail of stream '{}': {} -> {} bytes",
                name, on_disk, size
            );
            file.set_len(size).map_err(|source| io_error(name, source))?;
        }

        debug!("Opened stream '{}' with {} records", name, positions.len());
        Ok(Self {
            name: name.to_string(),
            path,
            writer: BufWriter::with_capacity(buffer_size, file),
            positions,
            size,
            poisoned: false,
        })
    }

    fn append(&mut self, key: &str, value: &[u8], sync: bool) -> Result<u64, TransportError> {
        if self.poisoned {
            let reason = "segment left inconsistent by a failed append, reopen the log";
            return Err(io_error(&self.name, std::io::Error::other(reason)));
        }
        let offset = self.positions.len() as u64;
        let bytes = encode_record(offset, key, value).ok_or_else(|| {
            TransportError::RecordTooLarge {
                stream: self.name.clone(),
                size: key.len() + value.len(),
            }
        })?;

        if let Err(source) = self.write_frame(&bytes, sync) {
            self.rollback();
            return Err(io_error(&self.name, source));
        }

        self.positions.push(self.size);
        self.size += bytes.len() as u64;
        Ok(offset)
    }

    fn write_frame(&mut self, bytes: &[u8], sync: bool) -> std::io::Result<()> {
        self.writer.write_all(bytes)?;
        self.writer.flush()?;
        if sync {
            self.writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Discard the buffered part of a failed frame and cut the file back to
    /// the last acknowledged record
    fn rollback(&mut self) {
        let restored = self.writer.get_ref().try_clone().and_then(|file| {
            let capacity = self.writer.capacity();
            let fresh = BufWriter::with_capacity(capacity, file);
            let failed = std::mem::replace(&mut self.writer, fresh);
            // Unlike dropping, into_parts does not flush the buffer
            let (_file, _unwritten) = failed.into_parts();
            self.writer.get_ref().set_len(self.size)
        });
        if let Err(e) = restored {
            error!(
                "Can't roll back failed append on stream '{}', refusing further appends: {}",
                self.name, e
            );
            self.poisoned = true;
        }
    }
}

/// Scan a segment file, returning record positions and the intact length
fn scan_segment(stream: &str, path: &Path) -> Result<(Vec<u64>, u64), TransportError> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(source) => return Err(io_error(stream, source)),
    };

    let mut positions = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        match decode_record(&data[pos..]) {
            Ok((entry, size)) if entry.offset == positions.len() as u64 => {
                positions.push(pos as u64);
                pos += size;
            }
            Ok((entry, _)) => {
                warn!(
                    "Stream '{}' out of sequence at byte {}: expected offset {}, found {}",
                    stream,
                    pos,
                    positions.len(),
                    entry.offset
                );
                break;
            }
            Err(reason) => {
                // Partial or corrupted record - stop here
                warn!("Stream '{}' scan stopped at byte {}: {}", stream, pos, reason);
                break;
            }
        }
    }
    Ok((positions, pos as u64))
}

/// Frame a record; `None` when the key or value exceeds its length field
fn encode_record(offset: u64, key: &str, value: &[u8]) -> Option<Vec<u8>> {
    let key_len = u16::try_from(key.len()).ok()?;
    let value_len = u32::try_from(value.len()).ok()?;

    let mut buf = Vec::with_capacity(RECORD_HEADER_SIZE + key.len() + value.len() + CRC_SIZE);
    buf.extend_from_slice(&SEGMENT_MAGIC.to_le_bytes());
    buf.extend_from_slice(&offset.to_le_bytes());
    buf.extend_from_slice(&key_len.to_le_bytes());
    buf.extend_from_slice(&value_len.to_le_bytes());
    buf.extend_from_slice(key.as_bytes());
    buf.extend_from_slice(value);

    // CRC over everything except the CRC itself
    let crc = crc32c::crc32c(&buf);
    buf.extend_from_slice(&crc.to_le_bytes());
    Some(buf)
}

/// Parse one record from the front of `data`, returning it and its size
fn decode_record(data: &[u8]) -> Result<(LogEntry, usize), String> {
    if data.len() < RECORD_HEADER_SIZE + CRC_SIZE {
        return Err("record too small".into());
    }

    let magic = u32::from_le_bytes(le_bytes(&data[0..4]));
    if magic != SEGMENT_MAGIC {
        return Err("invalid magic".into());
    }
    let offset = u64::from_le_bytes(le_bytes(&data[4..12]));
    let key_len = usize::from(u16::from_le_bytes(le_bytes(&data[12..14])));
    let value_len = to_index(u64::from(u32::from_le_bytes(le_bytes(&data[14..18]))));

    let body_end = RECORD_HEADER_SIZE + key_len + value_len;
    let total_size = body_end + CRC_SIZE;
    if data.len() < total_size {
        return Err("record truncated".into());
    }

    let stored_crc = u32::from_le_bytes(le_bytes(&data[body_end..total_size]));
    if crc32c::crc32c(&data[..body_end]) != stored_crc {
        return Err("CRC mismatch".into());
    }

    let key = std::str::from_utf8(&data[RECORD_HEADER_SIZE..RECORD_HEADER_SIZE + key_len])
        .map_err(|e| format!("key is not UTF-8: {e}"))?
        .to_string();
    let value = data[RECORD_HEADER_SIZE + key_len..body_end].to_vec();
    Ok((LogEntry { offset, key, value }, total_size))
}

fn le_bytes<const N: usize>(slice: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(slice);
    out
}

fn to_index(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

fn io_error(stream: &str, source: std::io::Error) -> TransportError {
    TransportError::Io {
        stream: stream.to_string(),
        source,
    }
}

/// File stem for a stream name; anything outside `[A-Za-z0-9_-]` is hex-escaped
fn file_stem(stream: &str) -> String {
    let mut stem = String::with_capacity(stream.len());
    for byte in stream.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_') {
            stem.push(char::from(byte));
        } else {
            stem.push_str(&format!("%{byte:02x}"));
        }
    }
    stem
}

#[async_trait]
impl LogTransport for SegmentLog {
    async fn append(&self, stream: &str, key: &str, value: &[u8]) -> Result<u64, TransportError> {
        let (stream, key, value) = (stream.to_string(), key.to_string(), value.to_vec());
        self.blocking(move |inner| inner.append(&stream, &key, &value))
            .await
    }

    async fn fetch(
        &self,
        stream: &str,
        from_offset: u64,
        max_records: usize,
    ) -> Result<Vec<LogEntry>, TransportError> {
        let stream = stream.to_string();
        self.blocking(move |inner| inner.fetch(&stream, from_offset, max_records))
            .await
    }

    async fn end_offset(&self, stream: &str) -> Result<u64, TransportError> {
        let stream = stream.to_string();
        self.blocking(move |inner| inner.end_offset(&stream)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> SegmentLog {
        SegmentLog::open(SegmentLogConfig::new(dir.path())).unwrap()
    }

    #[test]
    fn test_record_framing() {
        let bytes = encode_record(7, "schema", b"{\"client\":\"acme\"}").unwrap();
        let (entry, size) = decode_record(&bytes).unwrap();
        assert_eq!(size, bytes.len());
        assert_eq!(entry.offset, 7);
        assert_eq!(entry.key, "schema");
        assert_eq!(entry.value, b"{\"client\":\"acme\"}");
    }

    #[test]
    fn test_record_crc_detects_corruption() {
        let mut bytes = encode_record(0, "schema", b"payload").unwrap();
        let last = bytes.len() - CRC_SIZE - 1;
        bytes[last] ^= 0xFF;
        assert_eq!(decode_record(&bytes).unwrap_err(), "CRC mismatch");
    }

    #[test]
    fn test_file_stem_escapes_separators() {
        assert_eq!(file_stem("acme-prod_1"), "acme-prod_1");
        assert_eq!(file_stem("../etc"), "%2e%2e%2fetc");
    }

    #[tokio::test]
    async fn test_append_and_fetch() {
        let dir = TempDir::new().unwrap();
        let log = open(&dir);

        for i in 0..10u8 {
            assert_eq!(log.append("acme", "schema", &[i]).await.unwrap(), u64::from(i));
        }
        assert_eq!(log.end_offset("acme").await.unwrap(), 10);

        let batch = log.fetch("acme", 3, 4).await.unwrap();
        let offsets: Vec<u64> = batch.iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![3, 4, 5, 6]);
        assert_eq!(batch[0].value, vec![3]);

        let tail = log.fetch("acme", 8, 100).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert!(log.fetch("acme", 10, 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_stream_is_empty_and_not_created() {
        let dir = TempDir::new().unwrap();
        let log = open(&dir);

        assert!(log.fetch("ghost", 0, 10).await.unwrap().is_empty());
        assert_eq!(log.end_offset("ghost").await.unwrap(), 0);
        assert!(!dir.path().join("ghost.log").exists());
    }

    #[tokio::test]
    async fn test_reopen_preserves_offsets() {
        let dir = TempDir::new().unwrap();
        {
            let log = open(&dir);
            log.append("acme", "schema", b"a").await.unwrap();
            log.append("acme", "schema", b"b").await.unwrap();
        }

        let log = open(&dir);
        assert_eq!(log.end_offset("acme").await.unwrap(), 2);
        assert_eq!(log.append("acme", "schema", b"c").await.unwrap(), 2);

        let all = log.fetch("acme", 0, 10).await.unwrap();
        let values: Vec<&[u8]> = all.iter().map(|e| e.value.as_slice()).collect();
        assert_eq!(values, vec![&b"a"[..], &b"b"[..], &b"c"[..]]);
    }

    #[tokio::test]
    async fn test_failed_append_is_rolled_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("acme.log");
        let mut file = StreamFile::open("acme", path.clone(), 1024).unwrap();
        assert_eq!(file.append("schema", b"first", false).unwrap(), 0);

        // A frame that failed midway: half on disk, half still buffered
        let frame = encode_record(1, "schema", b"lost").unwrap();
        let half = frame.len() / 2;
        file.writer.write_all(&frame[..half]).unwrap();
        file.writer.flush().unwrap();
        file.writer.write_all(&frame[half..]).unwrap();
        file.rollback();
        assert!(!file.poisoned);

        assert_eq!(file.append("schema", b"second", false).unwrap(), 1);
        drop(file);

        let (positions, size) = scan_segment("acme", &path).unwrap();
        assert_eq!(positions.len(), 2);
        assert_eq!(size, std::fs::metadata(&path).unwrap().len());

        let log = open(&dir);
        let all = log.fetch("acme", 0, 10).await.unwrap();
        let values: Vec<&[u8]> = all.iter().map(|e| e.value.as_slice()).collect();
        assert_eq!(values, vec![&b"first"[..], &b"second"[..]]);
    }

    #[tokio::test]
    async fn test_torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        {
            let log = open(&dir);
            log.append("acme", "schema", b"intact").await.unwrap();
        }

        // Simulate a crash halfway through the second append
        let path = dir.path().join("acme.log");
        let partial = encode_record(1, "schema", b"torn").unwrap();
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&partial[..partial.len() / 2]).unwrap();
        drop(file);

        let log = open(&dir);
        assert_eq!(log.end_offset("acme").await.unwrap(), 1);
        assert_eq!(log.append("acme", "schema", b"next").await.unwrap(), 1);

        let all = log.fetch("acme", 0, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[1].value, b"next");
    }
}
