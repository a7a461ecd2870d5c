//! In-memory per-shard index (spec.md §4.E): for every converted TSM file,
//! for every column, the decoded vector of index entries.
//!
//! Populated from disk at `connect` via `decode_from_file`, and appended to
//! as the converter produces new TSM files during the live session. Access
//! is through one `Mutex` per shard rather than a single global lock, so
//! queries against shard A are never blocked by an index update on shard B
//! — the closest a safe-Rust `Mutex` gets to spec.md §5's literal
//! "lock-free for queries" without unsafe atomics.

use crate::block::IndexEntry;
use crate::error::Result;
use crate::schema::{ColumnType, Schema};
use crate::shard::{FILE_WIDTH, TSM_FILE_COUNT, VIN_NUM_RANGE};
use crate::tsm::reader::TsmFile;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

struct FileIndex {
    columns: Vec<(String, ColumnType, Vec<IndexEntry>)>,
}

#[derive(Default)]
struct ShardIndex {
    files: BTreeMap<u32, FileIndex>,
}

pub struct IndexManager {
    data_dir: PathBuf,
    shards: Vec<Mutex<ShardIndex>>,
}

/// One entry's block plus the `[start, end]` slice (inclusive, in
/// block-relative ts_idx space) of it that actually falls inside the
/// queried window.
pub struct IndexHit {
    pub ordinal: u32,
    pub block_index: usize,
    pub entry: IndexEntry,
    pub lo_in_block: u16,
    pub hi_in_block: u16,
}

impl IndexManager {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            shards: (0..VIN_NUM_RANGE).map(|_| Mutex::new(ShardIndex::default())).collect(),
        }
    }

    fn tsm_path(&self, shard: u16, ordinal: u32) -> PathBuf {
        self.data_dir
            .join("compaction")
            .join(shard.to_string())
            .join(ordinal.to_string())
    }

    /// Reads the footer and index region of every converted file for
    /// `shard`, in ordinal order (`decode_from_file`, spec.md §4.E).
    pub fn load_shard(&self, shard: u16, schema: &Schema) -> Result<()> {
        let dir = self.data_dir.join("compaction").join(shard.to_string());
        if !dir.is_dir() {
            return Ok(());
        }
        let mut ordinals: Vec<u32> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse::<u32>().ok()))
            .collect();
        ordinals.sort_unstable();

        let mut shard_index = self.shards[shard as usize].lock().unwrap();
        for ordinal in ordinals {
            let path = self.tsm_path(shard, ordinal);
            let file = TsmFile::open(&path)?;
            file.validate_schema(schema)?;
            shard_index.files.insert(
                ordinal,
                FileIndex {
                    columns: file.into_index(),
                },
            );
        }
        Ok(())
    }

    /// Folds a freshly converted file's index into the shard's table —
    /// called by the converter (or its caller) right after a successful
    /// conversion, under the same shard mutex used for reads.
    pub fn record_conversion(&self, shard: u16, ordinal: u32, tsm_path: &Path) -> Result<()> {
        let file = TsmFile::open(tsm_path)?;
        let mut shard_index = self.shards[shard as usize].lock().unwrap();
        shard_index.files.insert(
            ordinal,
            FileIndex {
                columns: file.into_index(),
            },
        );
        Ok(())
    }

    /// `query_indexes`: for `column` in `shard`, across every known file,
    /// the index entries whose block overlaps `[lo_idx, hi_idx]` (inclusive,
    /// global ts_idx space), paired with the in-block sub-range that falls
    /// in the window.
    pub fn query(&self, shard: u16, column: &str, lo_idx: u16, hi_idx: u16) -> Vec<IndexHit> {
        let shard_index = self.shards[shard as usize].lock().unwrap();
        let mut hits = Vec::new();

        let first_file = lo_idx / FILE_WIDTH;
        let last_file = hi_idx / FILE_WIDTH;

        for file_ordinal in first_file..=last_file {
            if file_ordinal >= TSM_FILE_COUNT {
                break;
            }
            let Some(file_index) = shard_index.files.get(&(file_ordinal as u32)) else {
                continue;
            };
            let Some((_, _, entries)) = file_index.columns.iter().find(|(n, _, _)| n == column) else {
                continue;
            };

            let file_base = file_ordinal as u32 * FILE_WIDTH as u32;
            let file_lo = lo_idx.max(file_ordinal * FILE_WIDTH) as u32;
            let file_hi = hi_idx.min(file_ordinal * FILE_WIDTH + FILE_WIDTH - 1) as u32;
            if file_lo > file_hi {
                continue;
            }
            let local_lo = file_lo - file_base;
            let local_hi = file_hi - file_base;

            let block_width = crate::block::block_item_cap() as u32;
            let first_block = (local_lo / block_width) as usize;
            let last_block = (local_hi / block_width) as usize;

            for block_index in first_block..=last_block {
                if block_index >= entries.len() {
                    break;
                }
                let block_base = block_index as u32 * block_width;
                let lo_in_block = local_lo.saturating_sub(block_base).min(block_width - 1) as u16;
                let hi_in_block = (local_hi.min(block_base + block_width - 1) - block_base) as u16;
                hits.push(IndexHit {
                    ordinal: file_ordinal as u32,
                    block_index,
                    entry: entries[block_index],
                    lo_in_block,
                    hi_in_block,
                });
            }
        }

        hits
    }

    pub fn tsm_file_path(&self, shard: u16, ordinal: u32) -> PathBuf {
        self.tsm_path(shard, ordinal)
    }
}
