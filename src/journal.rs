/*
 * Copyright 2025 Luc Lenôtre
 *
 * This file is part of Maestro.
 *
 * Maestro is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Maestro is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Maestro. If not, see <https://www.gnu.org/licenses/>.
 */

//! The redo journal, making multi-block mutations atomic across crashes.
//!
//! A transaction is one descriptor block, up to [`MAX_TRANSACTION_LEN`] payload blocks and one
//! commit block, appended to a circular log. Payload blocks are installed at their final
//! location only once the commit record is on disk: a crash before the commit drops the
//! transaction on recovery, a crash after it replays the transaction in full.
//!
//! The journal superblock's `log_start` is the single source of truth for where the next
//! transaction begins in the log.

use crate::crc32;
use crate::disk::{BLOCK_SIZE, Block, Disk};
use crate::error::{Error, Result};
use crate::util::{read_struct, to_block};
use std::time::{SystemTime, UNIX_EPOCH};

/// Record type of a descriptor block.
const DESCRIPTOR: u32 = 1;
/// Record type of a commit block.
const COMMIT: u32 = 2;

/// The maximum number of payload blocks in one transaction.
pub const MAX_TRANSACTION_LEN: usize = 10;
/// The block holding the journal superblock.
pub const JOURNAL_LOCATION: u32 = 12;
/// The first block of the journal log region.
pub const JOURNAL_LOG_START: u32 = JOURNAL_LOCATION + 1;
/// The total number of journal blocks, superblock included.
pub const JOURNAL_LENGTH: u32 = 20;

/// Checksum method identifier: CRC32.
const CHECKSUM_CRC32: u32 = 0;

/// Returns the disk block of the log position `pos`, wrapping inside the circular log region.
fn jindex(pos: u32) -> u32 {
    pos % (JOURNAL_LENGTH - 1) + JOURNAL_LOG_START
}

/// Returns the current Unix timestamp in seconds.
fn timestamp() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// The on-disk journal superblock.
#[repr(C)]
#[derive(Clone, Copy)]
struct JournalSuper {
    /// The log position of the next transaction, relative to the log region.
    log_start: u32,
    /// The block number of the journal superblock.
    block_start: u32,
    /// The checksum method used for transactions.
    checksum_type: u32,
    /// The number of blocks of the journal.
    block_count: u32,
    /// The maximum number of payload blocks per transaction.
    max_transaction_len: u32,
    /// Checksum of the superblock itself.
    checksum: u32,
}

/// The on-disk descriptor record opening a transaction.
#[repr(C)]
#[derive(Clone, Copy)]
struct JournalDescriptor {
    /// Block type: [`DESCRIPTOR`].
    block_type: u32,
    /// Transaction sequence number.
    seq_num: u32,
    /// The number of payload blocks in the transaction.
    num_blocks: u32,
    /// The final disk location of each payload block.
    blocks: [u32; MAX_TRANSACTION_LEN],
}

/// The on-disk commit record closing a transaction.
#[repr(C)]
#[derive(Clone, Copy)]
struct JournalCommit {
    /// Block type: [`COMMIT`].
    block_type: u32,
    /// CRC32 of the descriptor block and payload blocks, or 0 when unchecksummed.
    checksum: u32,
    /// The Unix timestamp at which the transaction was logged.
    time: u32,
}

/// A block staged for the next transaction.
pub struct StagedBlock {
    /// The final location of the block on disk.
    pub block_num: u32,
    /// The bytes to install there.
    pub data: Box<Block>,
}

/// The staging list of modified blocks an operation accumulates before submitting one
/// transaction.
#[derive(Default)]
pub struct WriteBuffer {
    blocks: Vec<StagedBlock>,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    /// Stages `data` to be written to `block_num`, zero-padded to a full block.
    ///
    /// If the block is already staged its bytes are refreshed and [`Error::BufferDuplicate`] is
    /// reported; callers performing idempotent index-block updates treat that as success. A
    /// buffer holding [`MAX_TRANSACTION_LEN`] blocks rejects further entries.
    pub fn stage(&mut self, block_num: u32, data: &[u8]) -> Result<()> {
        debug_assert!(data.len() <= BLOCK_SIZE);
        let mut block = Box::new([0; BLOCK_SIZE]);
        block[..data.len()].copy_from_slice(data);
        if let Some(prev) = self.blocks.iter_mut().find(|b| b.block_num == block_num) {
            prev.data = block;
            return Err(Error::BufferDuplicate);
        }
        if self.blocks.len() == MAX_TRANSACTION_LEN {
            return Err(Error::ExceededMaxBuffer);
        }
        self.blocks.push(StagedBlock {
            block_num,
            data: block,
        });
        Ok(())
    }

    /// Stages an index block, tolerating one that is already staged.
    pub fn stage_index(&mut self, block_num: u32, data: &[u8]) -> Result<()> {
        match self.stage(block_num, data) {
            Err(Error::BufferDuplicate) => Ok(()),
            res => res,
        }
    }

    /// Returns the staged blocks, in staging order.
    pub fn blocks(&self) -> &[StagedBlock] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// The journal state held in memory while a disk is mounted.
pub struct Journal {
    sb: JournalSuper,
    /// The sequence number of the next transaction.
    seq: u32,
}

impl Journal {
    /// Writes a fresh journal onto `disk`. Called when formatting.
    pub fn init(disk: &mut Disk) -> Result<Self> {
        let sb = JournalSuper {
            log_start: 0,
            block_start: JOURNAL_LOCATION,
            checksum_type: CHECKSUM_CRC32,
            block_count: JOURNAL_LENGTH,
            max_transaction_len: MAX_TRANSACTION_LEN as u32,
            checksum: 0,
        };
        disk.write_block(JOURNAL_LOCATION, &to_block(&sb))?;
        disk.write_block(JOURNAL_LOG_START, &[0; BLOCK_SIZE])?;
        Ok(Self { sb, seq: 0 })
    }

    /// Reads the journal superblock from `disk` and replays the transaction at the head of the
    /// log if it was fully committed. An incomplete or absent transaction is dropped.
    pub fn recover(disk: &mut Disk) -> Result<Self> {
        let mut buf: Block = [0; BLOCK_SIZE];
        disk.read_block(JOURNAL_LOCATION, &mut buf)?;
        let sb = if buf.iter().all(|b| *b == 0) {
            // A wiped journal region holds nothing to replay
            JournalSuper {
                log_start: 0,
                block_start: JOURNAL_LOCATION,
                checksum_type: CHECKSUM_CRC32,
                block_count: JOURNAL_LENGTH,
                max_transaction_len: MAX_TRANSACTION_LEN as u32,
                checksum: 0,
            }
        } else {
            let sb: JournalSuper = read_struct(&buf);
            if sb.block_start != JOURNAL_LOCATION
                || sb.max_transaction_len != MAX_TRANSACTION_LEN as u32
            {
                return Err(Error::JournalBadHeader);
            }
            sb
        };
        let mut journal = Self { sb, seq: 0 };
        match journal.commit(disk) {
            // No valid transaction at the head of the log: the journal is clean
            Err(Error::Journal) => Ok(journal),
            Err(e) => Err(e),
            Ok(()) => Ok(journal),
        }
    }

    /// Logs the blocks of `buffer` as one transaction, then installs them at their final
    /// locations.
    pub fn new_transaction(&mut self, disk: &mut Disk, buffer: &WriteBuffer) -> Result<()> {
        let blocks = buffer.blocks();
        if blocks.len() > MAX_TRANSACTION_LEN {
            return Err(Error::ExceededMaxBuffer);
        }
        let mut desc = JournalDescriptor {
            block_type: DESCRIPTOR,
            seq_num: self.seq,
            num_blocks: blocks.len() as u32,
            blocks: [0; MAX_TRANSACTION_LEN],
        };
        for (i, block) in blocks.iter().enumerate() {
            desc.blocks[i] = block.block_num;
        }
        let desc_buf = to_block(&desc);
        disk.write_block(jindex(self.sb.log_start), &desc_buf)?;

        let mut digest = crc32::Digest::new();
        digest.update(&desc_buf);
        for (i, block) in blocks.iter().enumerate() {
            disk.write_block(jindex(self.sb.log_start + 1 + i as u32), &block.data)?;
            digest.update(&*block.data);
        }

        let commit = JournalCommit {
            block_type: COMMIT,
            checksum: digest.finish(),
            time: timestamp(),
        };
        disk.write_block(
            jindex(self.sb.log_start + blocks.len() as u32 + 1),
            &to_block(&commit),
        )?;
        self.seq = self.seq.wrapping_add(1);
        self.commit(disk)
    }

    /// Installs the transaction at the head of the log, marks the log clean past it and
    /// advances the superblock.
    fn commit(&mut self, disk: &mut Disk) -> Result<()> {
        let mut desc_buf: Block = [0; BLOCK_SIZE];
        disk.read_block(jindex(self.sb.log_start), &mut desc_buf)?;
        let desc: JournalDescriptor = read_struct(&desc_buf);
        if desc.block_type != DESCRIPTOR || desc.num_blocks as usize > MAX_TRANSACTION_LEN {
            return Err(Error::Journal);
        }

        let mut commit_buf: Block = [0; BLOCK_SIZE];
        disk.read_block(jindex(self.sb.log_start + desc.num_blocks + 1), &mut commit_buf)?;
        let commit: JournalCommit = read_struct(&commit_buf);
        if commit.block_type != COMMIT {
            return Err(Error::Journal);
        }

        let mut payload = Vec::with_capacity(desc.num_blocks as usize);
        for i in 0..desc.num_blocks {
            let mut buf: Block = [0; BLOCK_SIZE];
            disk.read_block(jindex(self.sb.log_start + 1 + i), &mut buf)?;
            payload.push(buf);
        }
        // A zero checksum marks an unchecksummed transaction
        if commit.checksum != 0 {
            let mut digest = crc32::Digest::new();
            digest.update(&desc_buf);
            for block in &payload {
                digest.update(block);
            }
            if digest.finish() != commit.checksum {
                return Err(Error::Journal);
            }
        }

        for (i, block) in payload.iter().enumerate() {
            disk.write_block(desc.blocks[i], block)?;
        }

        // The zeroed slot past the commit marks the log clean from here on
        disk.write_block(
            jindex(self.sb.log_start + desc.num_blocks + 2),
            &[0; BLOCK_SIZE],
        )?;
        self.sb.log_start = (self.sb.log_start + desc.num_blocks + 2) % (JOURNAL_LENGTH - 1);
        disk.write_block(JOURNAL_LOCATION, &to_block(&self.sb))?;
        Ok(())
    }
}
