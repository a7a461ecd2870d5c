//! Per-shard flush writer (spec.md §4.C): appends rows to a staging file
//! until it reaches `FLUSH_SIZE`, then seals it and hands its ordinal to
//! whatever the caller wired up as the conversion hook.

use crate::error::Result;
use crate::row::Row;
use crate::schema::Schema;
use crate::shard::{COMPACTION_BATCH, FLUSH_SIZE};
use crate::staging;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Called with a newly sealed file's ordinal once `COMPACTION_BATCH` sealed,
/// unconverted files have accumulated. Runs under the writer's own mutex (see
/// `engine::ShardState`), so it must not block on anything but enqueueing.
pub type SealHook<'a> = dyn FnMut(u32) + 'a;

pub struct FlushWriter {
    dir: PathBuf,
    current: Option<BufWriter<File>>,
    current_ordinal: u32,
    current_count: u32,
    sealed_unconverted: u32,
}

fn staging_path(dir: &Path, ordinal: u32) -> PathBuf {
    dir.join(ordinal.to_string())
}

impl FlushWriter {
    /// Opens (or creates) the shard's staging directory and recovers any
    /// mid-interrupted tail file (SPEC_FULL.md §4.C): the highest-ordinal
    /// file present is reopened for append if it has a valid header and
    /// fewer than `FLUSH_SIZE` rows; otherwise a fresh ordinal is started.
    pub fn open(dir: PathBuf, schema: &Schema) -> Result<Self> {
        fs::create_dir_all(&dir)?;

        let mut ordinals: Vec<u32> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().and_then(|s| s.parse::<u32>().ok()))
            .collect();
        ordinals.sort_unstable();

        let mut writer = Self {
            dir,
            current: None,
            current_ordinal: 0,
            current_count: 0,
            sealed_unconverted: 0,
        };

        if let Some(&tail) = ordinals.last() {
            let path = staging_path(&writer.dir, tail);
            if let Some((count, valid_len)) = recover_tail(&path, schema)? {
                let file = OpenOptions::new().write(true).open(&path)?;
                file.set_len(valid_len as u64)?;
                drop(file);
                writer.current_ordinal = tail;
                writer.current_count = count;
                writer.current = Some(BufWriter::new(
                    OpenOptions::new().append(true).open(&path)?,
                ));
            } else {
                writer.current_ordinal = tail + 1;
            }
        }

        Ok(writer)
    }

    fn ensure_open(&mut self) -> Result<()> {
        if self.current.is_none() {
            let path = staging_path(&self.dir, self.current_ordinal);
            let mut f = BufWriter::new(OpenOptions::new().create(true).write(true).open(&path)?);
            staging::write_header(&mut f)?;
            self.current = Some(f);
            self.current_count = 0;
        }
        Ok(())
    }

    /// Appends one row, sealing and invoking `on_seal` when the current file
    /// reaches `FLUSH_SIZE` rows and the sealed-unconverted count reaches
    /// `COMPACTION_BATCH`.
    pub fn append(&mut self, schema: &Schema, row: &Row, on_seal: &mut SealHook) -> Result<()> {
        self.ensure_open()?;
        {
            let f = self.current.as_mut().unwrap();
            staging::write_row(f, schema, row)?;
            // A reader of this file is a fresh `File::open` in a different
            // code path (the staging-file scan), not this `BufWriter` — it
            // must flush past the userspace buffer after every row for the
            // write-then-query-immediately guarantee (spec.md §5) to hold.
            f.flush()?;
        }
        self.current_count += 1;

        if self.current_count >= FLUSH_SIZE {
            self.seal_current(on_seal)?;
        }
        Ok(())
    }

    fn seal_current(&mut self, on_seal: &mut SealHook) -> Result<()> {
        if let Some(mut f) = self.current.take() {
            f.flush()?;
            f.get_ref().sync_all()?;
        }
        let sealed_ordinal = self.current_ordinal;
        self.current_ordinal += 1;
        self.current_count = 0;
        self.sealed_unconverted += 1;

        if self.sealed_unconverted >= COMPACTION_BATCH {
            on_seal(sealed_ordinal);
            self.sealed_unconverted = 0;
        }
        Ok(())
    }

    /// Called once at shutdown: seals any partial file and submits it
    /// regardless of `COMPACTION_BATCH`, then returns.
    pub fn finalize(&mut self, on_seal: &mut SealHook) -> Result<()> {
        if self.current.is_some() {
            let partial_count = self.current_count;
            self.seal_current_partial(on_seal, partial_count)?;
        } else if self.sealed_unconverted > 0 {
            // A prior seal_current already deferred below the batch
            // threshold; flush it out now rather than losing the file.
            on_seal(self.current_ordinal - 1);
            self.sealed_unconverted = 0;
        }
        Ok(())
    }

    fn seal_current_partial(&mut self, on_seal: &mut SealHook, _partial_count: u32) -> Result<()> {
        if let Some(mut f) = self.current.take() {
            f.flush()?;
            f.get_ref().sync_all()?;
        }
        let sealed_ordinal = self.current_ordinal;
        self.current_ordinal += 1;
        self.current_count = 0;
        self.sealed_unconverted = 0;
        on_seal(sealed_ordinal);
        Ok(())
    }
}

/// Inspects an existing staging file and returns `Some((row_count,
/// valid_byte_len))` if it is a valid, not-yet-full tail file that appending
/// should resume into, or `None` if it is either full or unreadable (in
/// which case the caller starts a fresh ordinal rather than risk corrupting
/// it further). `valid_byte_len` stops short of any torn partial row left by
/// a crash mid-write, so the caller truncates to it before reopening for
/// append — otherwise the next append would land after garbage bytes.
fn recover_tail(path: &Path, schema: &Schema) -> Result<Option<(u32, usize)>> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(_) => return Ok(None),
    };
    let total_len = bytes.len();
    let mut cursor = bytes.as_slice();
    let path_str = path.display().to_string();
    if staging::read_header(&mut cursor, &path_str).is_err() {
        return Ok(None);
    }

    let mut count = 0u32;
    let mut valid_len = total_len - cursor.len();
    loop {
        match staging::read_row(&mut cursor, schema, 0) {
            Ok(Some(_)) => {
                count += 1;
                valid_len = total_len - cursor.len();
            }
            Ok(None) => break,
            Err(_) => break, // trailing partial row from a torn write; stop here
        }
    }

    if count >= FLUSH_SIZE {
        Ok(None)
    } else {
        Ok(Some((count, valid_len)))
    }
}
