//! Inspect command implementation.

use crate::storage::fs::FsManager;
use crate::storage::metadata::{TabletMasterBlock, TabletMetadata};
use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

/// Inspect on-disk tablet state.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Data directory to inspect.
    #[arg(short, long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Limit inspection to one tablet.
    #[arg(long)]
    pub tablet_id: Option<String>,
}

/// Run the inspect command.
pub fn run_inspect(args: InspectArgs) -> Result<()> {
    let fs = Arc::new(FsManager::open(&args.data_dir).context("failed to open data directory")?);
    println!("server uuid: {}", fs.uuid());

    let tablet_ids = match args.tablet_id {
        Some(id) => vec![id],
        None => fs.list_master_blocks()?,
    };

    if tablet_ids.is_empty() {
        println!("no tablets found");
        return Ok(());
    }

    for tablet_id in tablet_ids {
        let master_block = TabletMasterBlock::open(&fs, &tablet_id)
            .with_context(|| format!("failed to open master block for {tablet_id}"))?;
        let meta = TabletMetadata::load(&fs, master_block)
            .with_context(|| format!("failed to load metadata for {tablet_id}"))?;
        println!(
            "tablet {} table={} ({}) keys=[{:?}, {:?}) schema_version={}",
            meta.tablet_id(),
            meta.table_name(),
            meta.table_id(),
            meta.start_key(),
            meta.end_key(),
            meta.schema_version(),
        );
    }
    Ok(())
}
