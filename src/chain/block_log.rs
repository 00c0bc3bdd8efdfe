// Copyright (c) 2022 Octavian Oncescu
// Copyright (c) 2022-2023 The Purplecoin Core developers
// Licensed under the Apache License, Version 2.0 see LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0 or the MIT license, see
// LICENSE-MIT or http://opensource.org/licenses/MIT

use crate::primitives::SignedBlock;
use log::warn;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum BlockLogError {
    Io(std::io::Error),
    Encode(bincode::error::EncodeError),
    Decode(bincode::error::DecodeError),

    /// Blocks must append in strictly increasing height order
    OutOfOrder,
}

impl From<std::io::Error> for BlockLogError {
    fn from(other: std::io::Error) -> Self {
        Self::Io(other)
    }
}

impl From<bincode::error::EncodeError> for BlockLogError {
    fn from(other: bincode::error::EncodeError) -> Self {
        Self::Encode(other)
    }
}

impl From<bincode::error::DecodeError> for BlockLogError {
    fn from(other: bincode::error::DecodeError) -> Self {
        Self::Decode(other)
    }
}

/// Append-only file of irreversible blocks. Each entry is a length-prefixed
/// encoded block; `block_log.index` holds one 8-byte offset per height for
/// random access. Reversible blocks never land here.
pub struct BlockLog {
    files: Mutex<LogFiles>,
    head: Option<SignedBlock>,
    log_path: PathBuf,
    index_path: PathBuf,
}

struct LogFiles {
    log: File,
    index: File,
}

impl BlockLog {
    pub fn open(dir: &Path) -> Result<Self, BlockLogError> {
        std::fs::create_dir_all(dir)?;
        let log_path = dir.join("block_log");
        let index_path = dir.join("block_log.index");

        let log = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&log_path)?;
        let index = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&index_path)?;

        let mut block_log = Self {
            files: Mutex::new(LogFiles { log, index }),
            head: None,
            log_path,
            index_path,
        };

        if block_log.index_is_stale()? {
            warn!("Block log index is stale, rebuilding");
            block_log.rebuild_index()?;
        }

        let head_num = block_log.len()?;
        if head_num > 0 {
            block_log.head = block_log.read_block_by_num(head_num)?;
        }
        Ok(block_log)
    }

    /// Height of the newest logged block
    pub fn len(&self) -> Result<u32, BlockLogError> {
        let files = self.files.lock();
        let bytes = files.index.metadata()?.len();
        Ok((bytes / 8) as u32)
    }

    pub fn is_empty(&self) -> Result<bool, BlockLogError> {
        Ok(self.len()? == 0)
    }

    #[must_use]
    pub fn head(&self) -> Option<&SignedBlock> {
        self.head.as_ref()
    }

    fn index_is_stale(&self) -> Result<bool, BlockLogError> {
        let files = self.files.lock();
        let log_bytes = files.log.metadata()?.len();
        let index_bytes = files.index.metadata()?.len();
        Ok(log_bytes > 0 && index_bytes == 0)
    }

    fn rebuild_index(&mut self) -> Result<(), BlockLogError> {
        let mut files = self.files.lock();
        files.index.set_len(0)?;
        files.index.seek(SeekFrom::Start(0))?;

        let end = files.log.metadata()?.len();
        let mut pos = 0u64;
        let mut offsets = Vec::new();
        while pos < end {
            offsets.push(pos);
            files.log.seek(SeekFrom::Start(pos))?;
            let mut len_bytes = [0u8; 4];
            files.log.read_exact(&mut len_bytes)?;
            pos += 4 + u64::from(u32::from_le_bytes(len_bytes));
        }

        for offset in offsets {
            files.index.write_all(&offset.to_le_bytes())?;
        }
        files.index.flush()?;
        Ok(())
    }

    /// Append the next irreversible block
    pub fn append(&mut self, block: &SignedBlock) -> Result<(), BlockLogError> {
        let expected = self.len()? + 1;
        if block.block_num() != expected {
            return Err(BlockLogError::OutOfOrder);
        }

        let bytes = crate::codec::encode_to_vec(block)?;
        let mut files = self.files.lock();

        let offset = files.log.seek(SeekFrom::End(0))?;
        files.log.write_all(&(bytes.len() as u32).to_le_bytes())?;
        files.log.write_all(&bytes)?;

        files.index.seek(SeekFrom::End(0))?;
        files.index.write_all(&offset.to_le_bytes())?;

        drop(files);
        self.head = Some(block.clone());
        Ok(())
    }

    pub fn read_block_by_num(&self, num: u32) -> Result<Option<SignedBlock>, BlockLogError> {
        if num == 0 || num > self.len()? {
            return Ok(None);
        }

        let mut files = self.files.lock();
        files.index.seek(SeekFrom::Start(u64::from(num - 1) * 8))?;
        let mut offset_bytes = [0u8; 8];
        files.index.read_exact(&mut offset_bytes)?;
        let offset = u64::from_le_bytes(offset_bytes);

        files.log.seek(SeekFrom::Start(offset))?;
        let mut len_bytes = [0u8; 4];
        files.log.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        let mut bytes = vec![0u8; len];
        files.log.read_exact(&mut bytes)?;
        Ok(Some(crate::codec::decode(&bytes)?))
    }

    pub fn flush(&self) -> Result<(), BlockLogError> {
        let mut files = self.files.lock();
        files.log.flush()?;
        files.index.flush()?;
        Ok(())
    }

    /// Delete the log and its index from disk
    pub fn wipe(self) -> Result<(), BlockLogError> {
        drop(self.files);
        let _ = std::fs::remove_file(&self.log_path);
        let _ = std::fs::remove_file(&self.index_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::{BlockId, Hash256, SignedBlockHeader};
    use rand::Rng;

    fn temp_dir() -> PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("amaranth-log-{}", rand::thread_rng().gen::<u64>()));
        dir
    }

    fn block_at(num: u32) -> SignedBlock {
        let parent = if num == 1 {
            BlockId::default()
        } else {
            BlockId::from_digest(&Hash256::hash_from_slice(num.to_le_bytes()), num - 1)
        };
        SignedBlock {
            header: SignedBlockHeader {
                previous: parent,
                timestamp: 1_700_000_000 + u64::from(num) * 3,
                witness: "amaranth".into(),
                ..Default::default()
            },
            transactions: vec![],
        }
    }

    #[test]
    fn append_and_random_access() {
        let dir = temp_dir();
        let mut log = BlockLog::open(&dir).unwrap();
        assert!(log.is_empty().unwrap());

        for num in 1..=5 {
            log.append(&block_at(num)).unwrap();
        }
        assert_eq!(log.len().unwrap(), 5);
        assert_eq!(log.head().unwrap().block_num(), 5);

        let third = log.read_block_by_num(3).unwrap().unwrap();
        assert_eq!(third.block_num(), 3);
        assert!(log.read_block_by_num(6).unwrap().is_none());
        assert!(log.read_block_by_num(0).unwrap().is_none());
    }

    #[test]
    fn rejects_out_of_order_appends() {
        let dir = temp_dir();
        let mut log = BlockLog::open(&dir).unwrap();
        log.append(&block_at(1)).unwrap();
        assert!(matches!(
            log.append(&block_at(3)),
            Err(BlockLogError::OutOfOrder)
        ));
    }

    #[test]
    fn survives_reopen() {
        let dir = temp_dir();
        {
            let mut log = BlockLog::open(&dir).unwrap();
            for num in 1..=3 {
                log.append(&block_at(num)).unwrap();
            }
            log.flush().unwrap();
        }

        let log = BlockLog::open(&dir).unwrap();
        assert_eq!(log.len().unwrap(), 3);
        assert_eq!(log.head().unwrap().block_num(), 3);
    }

    #[test]
    fn rebuilds_a_missing_index() {
        let dir = temp_dir();
        {
            let mut log = BlockLog::open(&dir).unwrap();
            for num in 1..=4 {
                log.append(&block_at(num)).unwrap();
            }
            log.flush().unwrap();
        }
        std::fs::remove_file(dir.join("block_log.index")).unwrap();

        let log = BlockLog::open(&dir).unwrap();
        assert_eq!(log.len().unwrap(), 4);
        assert_eq!(log.read_block_by_num(2).unwrap().unwrap().block_num(), 2);
    }
}
