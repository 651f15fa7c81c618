//! Tablet metadata persistence.
//!
//! Each tablet's durable description lives behind a two-level scheme:
//!
//! - a **master block**, a small immutable record naming the tablet and
//!   two metadata block ids;
//! - the **metadata blocks** themselves, written alternately (A, B, A,
//!   ...) with a monotonically increasing flush sequence. A crash mid
//!   rewrite leaves the previous block intact, and load picks whichever
//!   block decodes with the higher sequence.

use crate::storage::fs::{write_atomic, BlockId, FsManager};
use anyhow::{bail, Context, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Role of a peer within a tablet's replication quorum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Serves writes and replicates to followers.
    Leader,
    /// Votes and replicates.
    Follower,
    /// Non-voting replica catching up.
    Learner,
    /// Not part of the quorum.
    NonParticipant,
}

/// One peer in a tablet's quorum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuorumPeer {
    /// Permanent UUID of the peer's server.
    pub uuid: String,
    /// The peer's role.
    pub role: Role,
}

/// Replication configuration for a tablet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quorum {
    /// Configuration sequence number; -1 until consensus assigns one.
    pub seqno: i64,
    /// Whether this is a local (single-peer, no replication) quorum.
    pub local: bool,
    /// Member peers.
    pub peers: Vec<QuorumPeer>,
}

impl Quorum {
    /// Build a local single-peer quorum led by `uuid`.
    pub fn local_quorum(uuid: impl Into<String>) -> Self {
        Self {
            seqno: -1,
            local: true,
            peers: vec![QuorumPeer {
                uuid: uuid.into(),
                role: Role::Leader,
            }],
        }
    }

    /// Role of the given server within this quorum.
    pub fn role_of(&self, uuid: &str) -> Role {
        self.peers
            .iter()
            .find(|p| p.uuid == uuid)
            .map(|p| p.role)
            .unwrap_or(Role::NonParticipant)
    }
}

/// Column value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Bool,
    Int32,
    Int64,
    Float64,
    String,
    Bytes,
}

/// One column of a table schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub col_type: ColumnType,
    pub nullable: bool,
}

/// Table schema carried by tablet metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<ColumnSchema>,
}

impl Schema {
    /// A single-column key/value schema, handy in tests and tools.
    pub fn key_value() -> Self {
        Self {
            columns: vec![
                ColumnSchema {
                    name: "key".to_string(),
                    col_type: ColumnType::String,
                    nullable: false,
                },
                ColumnSchema {
                    name: "value".to_string(),
                    col_type: ColumnType::Bytes,
                    nullable: true,
                },
            ],
        }
    }
}

/// The master block: an immutable pointer record naming the two
/// alternating metadata blocks of one tablet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TabletMasterBlock {
    pub table_id: String,
    pub tablet_id: String,
    pub block_a: BlockId,
    pub block_b: BlockId,
}

impl TabletMasterBlock {
    /// Persist the master block for its tablet.
    pub fn persist(&self, fs: &FsManager) -> Result<()> {
        let path = fs.master_block_path(&self.tablet_id);
        let bytes = bincode::serialize(self).context("failed to encode master block")?;
        write_atomic(&path, &bytes)
            .with_context(|| format!("failed to persist master block for {}", self.tablet_id))
    }

    /// Open the master block of `tablet_id`, verifying it names the
    /// tablet it was looked up by.
    pub fn open(fs: &FsManager, tablet_id: &str) -> Result<Self> {
        let path = fs.master_block_path(tablet_id);
        let bytes = std::fs::read(&path)
            .with_context(|| format!("failed to read master block {}", path.display()))?;
        let block: TabletMasterBlock =
            bincode::deserialize(&bytes).context("failed to decode master block")?;
        if block.tablet_id != tablet_id {
            bail!(
                "master block {} names tablet {} instead of {}",
                path.display(),
                block.tablet_id,
                tablet_id
            );
        }
        Ok(block)
    }
}

/// On-disk representation of a metadata block.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetadataRecord {
    table_id: String,
    tablet_id: String,
    table_name: String,
    start_key: String,
    end_key: String,
    schema: Schema,
    schema_version: u32,
    quorum: Quorum,
    /// Arbiter between the two alternating blocks: higher wins.
    flush_seq: u64,
}

/// Durable description of one tablet.
///
/// Mutable fields are guarded by an internal lock; `flush` rewrites the
/// alternate metadata block atomically.
pub struct TabletMetadata {
    fs: Arc<FsManager>,
    master_block: TabletMasterBlock,
    record: Mutex<MetadataRecord>,
}

impl TabletMetadata {
    /// Create metadata for a brand-new tablet and flush it to disk.
    #[allow(clippy::too_many_arguments)]
    pub fn create_new(
        fs: &Arc<FsManager>,
        master_block: TabletMasterBlock,
        table_name: impl Into<String>,
        schema: Schema,
        quorum: Quorum,
        start_key: impl Into<String>,
        end_key: impl Into<String>,
    ) -> Result<Arc<Self>> {
        let record = MetadataRecord {
            table_id: master_block.table_id.clone(),
            tablet_id: master_block.tablet_id.clone(),
            table_name: table_name.into(),
            start_key: start_key.into(),
            end_key: end_key.into(),
            schema,
            schema_version: 0,
            quorum,
            flush_seq: 0,
        };
        let meta = Arc::new(Self {
            fs: Arc::clone(fs),
            master_block,
            record: Mutex::new(record),
        });
        meta.flush().context("failed to flush new tablet metadata")?;
        Ok(meta)
    }

    /// Load metadata through a master block, picking whichever
    /// alternating block carries the higher flush sequence.
    pub fn load(fs: &Arc<FsManager>, master_block: TabletMasterBlock) -> Result<Arc<Self>> {
        let record_a = read_block(fs, &master_block.block_a);
        let record_b = read_block(fs, &master_block.block_b);

        let record = match (record_a, record_b) {
            (Some(a), Some(b)) => {
                if a.flush_seq >= b.flush_seq {
                    a
                } else {
                    b
                }
            }
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => bail!(
                "no valid metadata block for tablet {} (blocks {} / {})",
                master_block.tablet_id,
                master_block.block_a,
                master_block.block_b
            ),
        };

        if record.tablet_id != master_block.tablet_id {
            bail!(
                "metadata block for tablet {} names tablet {}",
                master_block.tablet_id,
                record.tablet_id
            );
        }

        Ok(Arc::new(Self {
            fs: Arc::clone(fs),
            master_block,
            record: Mutex::new(record),
        }))
    }

    /// Rewrite the alternate metadata block.
    ///
    /// The write targets whichever block the incremented flush sequence
    /// maps to, so consecutive flushes alternate between A and B and a
    /// crash can only lose the in-flight write.
    pub fn flush(&self) -> Result<()> {
        let mut record = self.record.lock();
        record.flush_seq += 1;
        let block_id = if record.flush_seq % 2 == 1 {
            &self.master_block.block_a
        } else {
            &self.master_block.block_b
        };
        let bytes = bincode::serialize(&*record).context("failed to encode tablet metadata")?;
        write_atomic(&self.fs.block_path(block_id), &bytes).with_context(|| {
            format!(
                "failed to rewrite metadata block {} for tablet {}",
                block_id, record.tablet_id
            )
        })
    }

    /// The master block this metadata was opened through.
    pub fn master_block(&self) -> &TabletMasterBlock {
        &self.master_block
    }

    /// Tablet identifier.
    pub fn tablet_id(&self) -> &str {
        &self.master_block.tablet_id
    }

    /// Owning table identifier.
    pub fn table_id(&self) -> &str {
        &self.master_block.table_id
    }

    /// Owning table name.
    pub fn table_name(&self) -> String {
        self.record.lock().table_name.clone()
    }

    /// Start of the tablet's key range (inclusive).
    pub fn start_key(&self) -> String {
        self.record.lock().start_key.clone()
    }

    /// End of the tablet's key range (exclusive).
    pub fn end_key(&self) -> String {
        self.record.lock().end_key.clone()
    }

    /// Current schema.
    pub fn schema(&self) -> Schema {
        self.record.lock().schema.clone()
    }

    /// Current schema version.
    pub fn schema_version(&self) -> u32 {
        self.record.lock().schema_version
    }

    /// Bump the schema version (log replay of an alter-schema op).
    pub fn set_schema_version(&self, version: u32) {
        self.record.lock().schema_version = version;
    }

    /// Replication configuration.
    pub fn quorum(&self) -> Quorum {
        self.record.lock().quorum.clone()
    }
}

impl std::fmt::Debug for TabletMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabletMetadata")
            .field("tablet_id", &self.tablet_id())
            .field("table_id", &self.table_id())
            .finish_non_exhaustive()
    }
}

fn read_block(fs: &FsManager, block_id: &BlockId) -> Option<MetadataRecord> {
    let bytes = std::fs::read(fs.block_path(block_id)).ok()?;
    bincode::deserialize(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_fs() -> (tempfile::TempDir, Arc<FsManager>) {
        let dir = tempfile::tempdir().unwrap();
        let fs = Arc::new(FsManager::open(dir.path()).unwrap());
        (dir, fs)
    }

    fn new_master_block(fs: &FsManager, tablet_id: &str) -> TabletMasterBlock {
        TabletMasterBlock {
            table_id: "table-1".to_string(),
            tablet_id: tablet_id.to_string(),
            block_a: fs.generate_block_id(),
            block_b: fs.generate_block_id(),
        }
    }

    #[test]
    fn test_master_block_roundtrip() {
        let (_dir, fs) = new_fs();
        let block = new_master_block(&fs, "t1");
        block.persist(&fs).unwrap();

        let loaded = TabletMasterBlock::open(&fs, "t1").unwrap();
        assert_eq!(loaded.table_id, "table-1");
        assert_eq!(loaded.block_a, block.block_a);
    }

    #[test]
    fn test_master_block_open_missing_fails() {
        let (_dir, fs) = new_fs();
        assert!(TabletMasterBlock::open(&fs, "nope").is_err());
    }

    #[test]
    fn test_metadata_create_and_load() {
        let (_dir, fs) = new_fs();
        let block = new_master_block(&fs, "t1");
        block.persist(&fs).unwrap();

        let quorum = Quorum::local_quorum(fs.uuid());
        let meta = TabletMetadata::create_new(
            &fs,
            block.clone(),
            "users",
            Schema::key_value(),
            quorum,
            "a",
            "m",
        )
        .unwrap();
        assert_eq!(meta.schema_version(), 0);

        let loaded = TabletMetadata::load(&fs, block).unwrap();
        assert_eq!(loaded.table_name(), "users");
        assert_eq!(loaded.start_key(), "a");
        assert_eq!(loaded.end_key(), "m");
        assert_eq!(loaded.quorum().role_of(fs.uuid()), Role::Leader);
    }

    #[test]
    fn test_flush_alternates_and_load_prefers_newer() {
        let (_dir, fs) = new_fs();
        let block = new_master_block(&fs, "t1");
        block.persist(&fs).unwrap();

        let meta = TabletMetadata::create_new(
            &fs,
            block.clone(),
            "users",
            Schema::key_value(),
            Quorum::local_quorum(fs.uuid()),
            "",
            "",
        )
        .unwrap();

        meta.set_schema_version(7);
        meta.flush().unwrap();

        let loaded = TabletMetadata::load(&fs, block).unwrap();
        assert_eq!(loaded.schema_version(), 7);
    }

    #[test]
    fn test_load_survives_torn_newer_block() {
        let (_dir, fs) = new_fs();
        let block = new_master_block(&fs, "t1");
        block.persist(&fs).unwrap();

        let meta = TabletMetadata::create_new(
            &fs,
            block.clone(),
            "users",
            Schema::key_value(),
            Quorum::local_quorum(fs.uuid()),
            "",
            "",
        )
        .unwrap();

        // First flush landed in block A; the second targets block B.
        meta.set_schema_version(3);
        meta.flush().unwrap();

        // Simulate a torn rewrite of the most recent block.
        std::fs::write(fs.block_path(&block.block_b), b"garbage").unwrap();

        let loaded = TabletMetadata::load(&fs, block).unwrap();
        assert_eq!(loaded.schema_version(), 0);
    }

    #[test]
    fn test_quorum_role_lookup() {
        let quorum = Quorum::local_quorum("me");
        assert_eq!(quorum.role_of("me"), Role::Leader);
        assert_eq!(quorum.role_of("someone-else"), Role::NonParticipant);
    }
}
