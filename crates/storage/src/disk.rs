//! Durable block log: newline-delimited JSON, one block per line, in chain
//! order. Replayed front to back at startup to rebuild the account state.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ledgerd_primitives::block::BlockData;

use crate::{BlockStore, StoreError};

pub struct DiskStore {
    path: PathBuf,
    file: Mutex<File>,
}

impl DiskStore {
    /// Opens (creating when missing) the block log at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| StoreError::Backend(format!("create {}: {err}", parent.display())))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| StoreError::Backend(format!("open {}: {err}", path.display())))?;
        Ok(DiskStore {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }
}

impl BlockStore for DiskStore {
    fn append(&self, block: &BlockData) -> Result<(), StoreError> {
        let line = serde_json::to_string(block)
            .map_err(|err| StoreError::Backend(format!("encode block: {err}")))?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| StoreError::Backend("disk store lock poisoned".to_string()))?;
        writeln!(file, "{line}")
            .and_then(|_| file.flush())
            .map_err(|err| StoreError::Backend(format!("write {}: {err}", self.path.display())))
    }

    fn read_range(&self, from: u64, to: u64) -> Result<Vec<BlockData>, StoreError> {
        // Hold the append lock so a concurrent write cannot tear a line.
        let _guard = self
            .file
            .lock()
            .map_err(|_| StoreError::Backend("disk store lock poisoned".to_string()))?;
        let file = File::open(&self.path)
            .map_err(|err| StoreError::Backend(format!("open {}: {err}", self.path.display())))?;

        let mut blocks = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line
                .map_err(|err| StoreError::Backend(format!("read {}: {err}", self.path.display())))?;
            if line.trim().is_empty() {
                continue;
            }
            let block: BlockData = serde_json::from_str(&line)
                .map_err(|err| StoreError::Backend(format!("decode block: {err}")))?;
            if block.header.number >= from && block.header.number <= to {
                blocks.push(block);
            }
        }
        Ok(blocks)
    }
}
