//! Filesystem layout and identity.
//!
//! [`FsManager`] owns the server's data directory:
//!
//! ```text
//! <data_dir>/
//!   instance.slate          server identity record
//!   master-blocks/          one <tablet_id>.mblock per tablet
//!   blocks/                 metadata blocks (alternating rewrite targets)
//!   wal/<tablet_id>/        per-tablet log segments
//! ```
//!
//! It also hands out fresh block identifiers and the server UUID, which
//! is generated once and persisted on first start.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Extension used by master block files.
pub const MASTER_BLOCK_EXTENSION: &str = "mblock";

/// Identifier of one on-disk metadata block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockId(String);

impl BlockId {
    /// Generate a fresh random block id.
    pub fn new_random() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// View the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server identity persisted in the data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct InstanceRecord {
    uuid: String,
}

/// Manager for the server's on-disk layout.
#[derive(Debug)]
pub struct FsManager {
    data_dir: PathBuf,
    uuid: String,
}

impl FsManager {
    /// Open (or initialize) the data directory.
    ///
    /// On first start, generates the server UUID and persists it; on
    /// subsequent starts the persisted identity is loaded back.
    pub fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir).context("failed to create data directory")?;
        std::fs::create_dir_all(data_dir.join("master-blocks"))
            .context("failed to create master block directory")?;
        std::fs::create_dir_all(data_dir.join("blocks"))
            .context("failed to create metadata block directory")?;
        std::fs::create_dir_all(data_dir.join("wal"))
            .context("failed to create wal directory")?;

        let instance_path = data_dir.join("instance.slate");
        let uuid = if instance_path.exists() {
            let bytes =
                std::fs::read(&instance_path).context("failed to read instance record")?;
            let record: InstanceRecord =
                bincode::deserialize(&bytes).context("failed to decode instance record")?;
            record.uuid
        } else {
            let record = InstanceRecord {
                uuid: uuid::Uuid::new_v4().simple().to_string(),
            };
            let bytes =
                bincode::serialize(&record).context("failed to encode instance record")?;
            write_atomic(&instance_path, &bytes)?;
            record.uuid
        };

        Ok(Self { data_dir, uuid })
    }

    /// The server's permanent UUID.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// The data directory root.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Directory holding master block files.
    pub fn master_block_dir(&self) -> PathBuf {
        self.data_dir.join("master-blocks")
    }

    /// Path of the master block file for a tablet.
    pub fn master_block_path(&self, tablet_id: &str) -> PathBuf {
        self.master_block_dir()
            .join(format!("{tablet_id}.{MASTER_BLOCK_EXTENSION}"))
    }

    /// Path of a metadata block.
    pub fn block_path(&self, block_id: &BlockId) -> PathBuf {
        self.data_dir.join("blocks").join(format!("{block_id}.meta"))
    }

    /// Per-tablet log directory.
    pub fn wal_dir(&self, tablet_id: &str) -> PathBuf {
        self.data_dir.join("wal").join(tablet_id)
    }

    /// Generate a fresh block id.
    pub fn generate_block_id(&self) -> BlockId {
        BlockId::new_random()
    }

    /// Check whether a directory entry names a tablet master block.
    pub fn is_tablet_file_name(name: &str) -> bool {
        Path::new(name)
            .extension()
            .is_some_and(|ext| ext == MASTER_BLOCK_EXTENSION)
            && Path::new(name)
                .file_stem()
                .is_some_and(|stem| !stem.is_empty())
    }

    /// List the tablet ids that have a master block on disk.
    pub fn list_master_blocks(&self) -> Result<Vec<String>> {
        let mut tablet_ids = Vec::new();
        let entries = std::fs::read_dir(self.master_block_dir())
            .context("failed to list master block directory")?;
        for entry in entries {
            let entry = entry.context("failed to read master block directory entry")?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !Self::is_tablet_file_name(name) {
                continue;
            }
            if let Some(stem) = Path::new(name).file_stem().and_then(|s| s.to_str()) {
                tablet_ids.push(stem.to_string());
            }
        }
        tablet_ids.sort();
        Ok(tablet_ids)
    }
}

/// Write `bytes` to `path` via a temp file and rename, so readers see
/// either the old contents or the new, never a torn write.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, bytes)
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename into {}", path.display()))?;
    Ok(())
}
