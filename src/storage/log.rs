//! Per-tablet operation log.
//!
//! Each tablet owns a directory of log segments. Entries are
//! length-prefixed bincode records ordered by operation id; bootstrap
//! replays them into a fresh in-memory tablet. Segments rotate at a
//! maximum size so archival and eventual compaction operate on sealed
//! files.

use crate::storage::fs::FsManager;
use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Default maximum segment size (8 MB).
const DEFAULT_SEGMENT_MAX_SIZE: u64 = 8 * 1024 * 1024;

/// Identifier of one replicated operation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct OpId {
    /// Consensus term.
    pub term: u64,
    /// Position within the log.
    pub index: u64,
}

impl OpId {
    /// Create a new op id.
    pub const fn new(term: u64, index: u64) -> Self {
        Self { term, index }
    }
}

impl std::fmt::Display for OpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.term, self.index)
    }
}

/// Operation payload carried by a log entry.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum LogOp {
    /// Insert or overwrite a row.
    InsertRow { row_key: String, payload: Vec<u8> },
    /// Mutate an existing row in place.
    MutateRow { row_key: String, payload: Vec<u8> },
    /// Delete a row.
    DeleteRow { row_key: String },
    /// Advance the tablet schema to a new version.
    AlterSchema { schema_version: u32 },
    /// No-op entry (leader change marker).
    Noop,
}

/// A single log entry.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LogEntry {
    /// Operation identifier.
    pub op_id: OpId,
    /// Operation payload.
    pub op: LogOp,
}

impl LogEntry {
    /// Create a new entry.
    pub fn new(op_id: OpId, op: LogOp) -> Self {
        Self { op_id, op }
    }

    /// Serialize this entry to bytes.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).context("failed to serialize log entry")
    }

    /// Deserialize an entry from bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).context("failed to deserialize log entry")
    }
}

/// An open log segment.
#[derive(Debug)]
struct LogSegment {
    path: PathBuf,
    size_bytes: u64,
}

/// The operation log of one tablet.
pub struct TabletLog {
    tablet_id: String,
    dir: PathBuf,
    current_segment: RwLock<Option<LogSegment>>,
    segment_counter: AtomicU64,
    last_term: AtomicU64,
    last_index: AtomicU64,
    has_entries: AtomicBool,
    max_segment_size: u64,
}

impl TabletLog {
    /// Open (or create) the log for a tablet, recovering the segment
    /// counter and last written op id from existing segments.
    pub fn open(fs: &FsManager, tablet_id: &str) -> Result<Self> {
        let dir = fs.wal_dir(tablet_id);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create log directory for tablet {tablet_id}"))?;

        let log = Self {
            tablet_id: tablet_id.to_string(),
            dir,
            current_segment: RwLock::new(None),
            segment_counter: AtomicU64::new(0),
            last_term: AtomicU64::new(0),
            last_index: AtomicU64::new(0),
            has_entries: AtomicBool::new(false),
            max_segment_size: DEFAULT_SEGMENT_MAX_SIZE,
        };
        log.recover_state()?;
        Ok(log)
    }

    /// Override the rotation size (tests exercise rotation with tiny
    /// segments).
    pub fn with_segment_size(mut self, max_size: u64) -> Self {
        self.max_segment_size = max_size;
        self
    }

    /// Tablet this log belongs to.
    pub fn tablet_id(&self) -> &str {
        &self.tablet_id
    }

    /// The highest op id written to this log, if any.
    pub fn last_op_id(&self) -> Option<OpId> {
        if !self.has_entries.load(Ordering::Acquire) {
            return None;
        }
        Some(OpId::new(
            self.last_term.load(Ordering::Acquire),
            self.last_index.load(Ordering::Acquire),
        ))
    }

    fn recover_state(&self) -> Result<()> {
        let mut max_segment_id = 0u64;
        for path in self.segment_paths()? {
            if let Some(id) = segment_id_of(&path) {
                max_segment_id = max_segment_id.max(id + 1);
            }
        }
        self.segment_counter
            .store(max_segment_id, Ordering::Release);

        // Recover the tail op id by scanning; segments are modest and
        // this runs once per open.
        if let Some(last) = self.read_all()?.last() {
            self.note_written(last.op_id);
        }
        Ok(())
    }

    /// Append an entry, rotating the segment when full.
    pub fn append(&self, entry: &LogEntry) -> Result<()> {
        let bytes = entry.serialize()?;
        self.ensure_open_segment()?;

        let mut segment_guard = self.current_segment.write();
        let segment = segment_guard
            .as_mut()
            .expect("segment must be open after ensure_open_segment");

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&segment.path)
            .context("failed to open log segment")?;
        let mut writer = BufWriter::new(file);

        let len = bytes.len() as u32;
        writer
            .write_all(&len.to_le_bytes())
            .context("failed to write entry length")?;
        writer
            .write_all(&bytes)
            .context("failed to write entry data")?;
        writer.flush().context("failed to flush log segment")?;

        segment.size_bytes += 4 + bytes.len() as u64;
        self.note_written(entry.op_id);
        Ok(())
    }

    fn note_written(&self, op_id: OpId) {
        self.last_term.store(op_id.term, Ordering::Release);
        self.last_index.store(op_id.index, Ordering::Release);
        self.has_entries.store(true, Ordering::Release);
    }

    fn ensure_open_segment(&self) -> Result<()> {
        let mut segment_guard = self.current_segment.write();
        let needs_new = match &*segment_guard {
            None => true,
            Some(segment) => segment.size_bytes >= self.max_segment_size,
        };
        if needs_new {
            let segment_id = self.segment_counter.fetch_add(1, Ordering::AcqRel);
            let path = self.dir.join(format!("segment_{segment_id:016}.wal"));
            *segment_guard = Some(LogSegment {
                path,
                size_bytes: 0,
            });
        }
        Ok(())
    }

    /// Read every entry in op order.
    pub fn read_all(&self) -> Result<Vec<LogEntry>> {
        let mut entries = Vec::new();
        for path in self.segment_paths()? {
            read_segment_entries(&path, &mut entries)?;
        }
        Ok(entries)
    }

    fn segment_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .with_context(|| format!("failed to list log directory for {}", self.tablet_id))?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "wal"))
            .collect();
        paths.sort();
        Ok(paths)
    }
}

fn segment_id_of(path: &PathBuf) -> Option<u64> {
    path.file_stem()?
        .to_str()?
        .strip_prefix("segment_")?
        .parse()
        .ok()
}

fn read_segment_entries(path: &PathBuf, entries: &mut Vec<LogEntry>) -> Result<()> {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return Ok(()),
    };
    let mut reader = BufReader::new(file);
    let mut len_buf = [0u8; 4];

    loop {
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e).context("failed to read entry length"),
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        let mut entry_buf = vec![0u8; len];
        reader
            .read_exact(&mut entry_buf)
            .context("failed to read entry data")?;
        entries.push(LogEntry::deserialize(&entry_buf)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_fs() -> (tempfile::TempDir, FsManager) {
        let dir = tempfile::tempdir().unwrap();
        let fs = FsManager::open(dir.path()).unwrap();
        (dir, fs)
    }

    #[test]
    fn test_append_and_read_roundtrip() {
        let (_dir, fs) = new_fs();
        let log = TabletLog::open(&fs, "t1").unwrap();

        for i in 1..=5u64 {
            log.append(&LogEntry::new(
                OpId::new(1, i),
                LogOp::InsertRow {
                    row_key: format!("row-{i}"),
                    payload: vec![i as u8],
                },
            ))
            .unwrap();
        }

        let entries = log.read_all().unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[4].op_id, OpId::new(1, 5));
        assert_eq!(log.last_op_id(), Some(OpId::new(1, 5)));
    }

    #[test]
    fn test_empty_log_has_no_last_op() {
        let (_dir, fs) = new_fs();
        let log = TabletLog::open(&fs, "t1").unwrap();
        assert!(log.last_op_id().is_none());
        assert!(log.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_rotation_preserves_order() {
        let (_dir, fs) = new_fs();
        let log = TabletLog::open(&fs, "t1").unwrap().with_segment_size(64);

        for i in 1..=20u64 {
            log.append(&LogEntry::new(
                OpId::new(2, i),
                LogOp::InsertRow {
                    row_key: format!("row-{i:04}"),
                    payload: vec![0u8; 16],
                },
            ))
            .unwrap();
        }

        let entries = log.read_all().unwrap();
        assert_eq!(entries.len(), 20);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.op_id.index, i as u64 + 1);
        }
    }

    #[test]
    fn test_reopen_recovers_tail() {
        let (_dir, fs) = new_fs();
        {
            let log = TabletLog::open(&fs, "t1").unwrap();
            log.append(&LogEntry::new(OpId::new(3, 9), LogOp::Noop))
                .unwrap();
        }

        let reopened = TabletLog::open(&fs, "t1").unwrap();
        assert_eq!(reopened.last_op_id(), Some(OpId::new(3, 9)));
        reopened
            .append(&LogEntry::new(OpId::new(3, 10), LogOp::Noop))
            .unwrap();
        assert_eq!(reopened.read_all().unwrap().len(), 2);
    }
}
