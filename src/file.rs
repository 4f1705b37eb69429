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

//! Open files: the in-memory image of an inode and its block tree.

use crate::alloc::Bitmap;
use crate::disk::{BLOCK_SIZE, Block, Disk};
use crate::error::{Error, Result};
use crate::inode::{
    BlockPos, DIRECT_BLOCKS, FileType, Inode, MAX_FILE_SIZE, REFS_PER_INDIRECT, block_pos,
};
use crate::journal::WriteBuffer;
use crate::util::{read_struct, reinterpret};

/// The decoded content of an indirect block: a table of block references.
type RefTable = Box<[u32; REFS_PER_INDIRECT]>;

/// A data block cached in memory along with its location on disk.
pub(crate) struct CachedBlock {
    /// The number of the block on disk.
    pub num: u32,
    /// The block's content.
    pub data: Box<Block>,
}

/// The double-indirect level of an open file: the top table and the nested indirect tables it
/// references.
pub(crate) struct DoubleIndirect {
    pub table: RefTable,
    pub singles: Vec<RefTable>,
}

/// Where to seek from.
#[derive(Clone, Copy, Debug)]
pub enum SeekPos {
    /// The beginning of the file.
    Start,
    /// The end of the file.
    End,
    /// The given byte offset from the beginning of the file.
    Set(u32),
}

/// An open file.
///
/// The handle caches every block of the live portion of the file in an arena indexed by file
/// block number, together with the decoded indirect tables, and carries the current read/write
/// position. Dropping the handle releases the cache; the on-disk storage is untouched.
pub struct FileHandle {
    pub(crate) inode: Inode,
    /// The disk block holding the file's inode.
    pub(crate) inode_block: u32,
    /// The current position in bytes.
    pos: u32,
    /// The cached data blocks, indexed by file block number.
    pub(crate) blocks: Vec<CachedBlock>,
    /// The single-indirect table, present once the file spans more than [`DIRECT_BLOCKS`]
    /// blocks.
    pub(crate) indirect: Option<RefTable>,
    /// The double-indirect tables, present once the single-indirect table is full.
    pub(crate) dindirect: Option<DoubleIndirect>,
}

/// Reads an indirect block and decodes it as a table of block references.
fn read_table(disk: &mut Disk, num: u32) -> Result<RefTable> {
    let mut buf: Block = [0; BLOCK_SIZE];
    disk.read_block(num, &mut buf)?;
    Ok(Box::new(read_struct::<[u32; REFS_PER_INDIRECT]>(&buf)))
}

impl FileHandle {
    /// Loads the live content of the file described by `inode` into memory.
    ///
    /// Opening an empty file succeeds and yields a handle with no cached blocks.
    pub(crate) fn open(disk: &mut Disk, inode: Inode, inode_block: u32) -> Result<Self> {
        let total = inode.total_blocks() as usize;
        let mut file = Self {
            inode,
            inode_block,
            pos: 0,
            blocks: Vec::with_capacity(total),
            indirect: None,
            dindirect: None,
        };
        for i in 0..total.min(DIRECT_BLOCKS) {
            file.load_block(disk, inode.direct[i] as u32)?;
        }
        if total > DIRECT_BLOCKS {
            let table = read_table(disk, inode.indirect as u32)?;
            for i in 0..total.min(DIRECT_BLOCKS + REFS_PER_INDIRECT) - DIRECT_BLOCKS {
                file.load_block(disk, table[i])?;
            }
            file.indirect = Some(table);
        }
        if total > DIRECT_BLOCKS + REFS_PER_INDIRECT {
            let table = read_table(disk, inode.double_indirect as u32)?;
            let remaining = total - DIRECT_BLOCKS - REFS_PER_INDIRECT;
            let mut singles = Vec::with_capacity(remaining.div_ceil(REFS_PER_INDIRECT));
            for l1 in 0..remaining.div_ceil(REFS_PER_INDIRECT) {
                let single = read_table(disk, table[l1])?;
                let count = (remaining - l1 * REFS_PER_INDIRECT).min(REFS_PER_INDIRECT);
                for l2 in 0..count {
                    file.load_block(disk, single[l2])?;
                }
                singles.push(single);
            }
            file.dindirect = Some(DoubleIndirect { table, singles });
        }
        Ok(file)
    }

    /// Returns an empty handle over a fresh inode, for building files without a disk.
    #[cfg(test)]
    pub(crate) fn empty(inode: Inode) -> Self {
        Self {
            inode,
            inode_block: 0,
            pos: 0,
            blocks: Vec::new(),
            indirect: None,
            dindirect: None,
        }
    }

    fn load_block(&mut self, disk: &mut Disk, num: u32) -> Result<()> {
        let mut data = Box::new([0; BLOCK_SIZE]);
        disk.read_block(num, &mut data)?;
        self.blocks.push(CachedBlock { num, data });
        Ok(())
    }

    /// Returns the size of the file in bytes.
    pub fn size(&self) -> u32 {
        self.inode.file_size
    }

    /// Returns the type of the file.
    pub fn file_type(&self) -> FileType {
        self.inode.file_type()
    }

    /// Returns the current position in bytes.
    pub fn position(&self) -> u32 {
        self.pos
    }

    /// Returns the arena index of the cached block containing `byte`.
    fn block_index(byte: u32) -> Result<usize> {
        Ok(match block_pos(byte)? {
            BlockPos::Direct { l1, .. } => l1,
            BlockPos::Indirect { l1, .. } => DIRECT_BLOCKS + l1,
            BlockPos::DoubleIndirect { l1, l2, .. } => {
                DIRECT_BLOCKS + REFS_PER_INDIRECT + l1 * REFS_PER_INDIRECT + l2
            }
        })
    }

    /// Moves the read/write position.
    ///
    /// Seeking beyond the end of the file is rejected with [`Error::ByteOutOfRange`].
    pub fn seek(&mut self, pos: SeekPos) -> Result<()> {
        self.pos = match pos {
            SeekPos::Start => 0,
            SeekPos::End => self.inode.file_size,
            SeekPos::Set(offset) => {
                if offset > self.inode.file_size {
                    return Err(Error::ByteOutOfRange);
                }
                offset
            }
        };
        Ok(())
    }

    /// Reads bytes at the current position into `buf`, stopping at the end of the file.
    ///
    /// Returns the number of bytes read; a short count means the end of the file was reached.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let total = buf
            .len()
            .min(self.inode.file_size.saturating_sub(self.pos) as usize);
        let mut done = 0;
        while done < total {
            let index = Self::block_index(self.pos)?;
            let off = self.pos as usize % BLOCK_SIZE;
            let count = (BLOCK_SIZE - off).min(total - done);
            buf[done..done + count].copy_from_slice(&self.blocks[index].data[off..off + count]);
            done += count;
            self.pos += count as u32;
        }
        Ok(done)
    }

    /// Writes `content` at the current position, extending the file as needed.
    ///
    /// Every data block touched is staged into `w`; the caller owns committing the buffer as a
    /// transaction. Growing the file past [`MAX_FILE_SIZE`] fails with [`Error::FileFull`].
    pub(crate) fn write_bytes(
        &mut self,
        content: &[u8],
        w: &mut WriteBuffer,
        bitmap: &mut Bitmap,
    ) -> Result<()> {
        let mut done = 0;
        while done < content.len() {
            if self.pos == MAX_FILE_SIZE {
                return Err(Error::FileFull);
            }
            // Appending at a block-aligned end of file needs a fresh block first
            if self.pos == self.inode.file_size && self.inode.file_size % BLOCK_SIZE as u32 == 0 {
                self.extend(w, bitmap, 1)?;
            }
            let index = Self::block_index(self.pos)?;
            let off = self.pos as usize % BLOCK_SIZE;
            let count = (BLOCK_SIZE - off).min(content.len() - done);
            self.blocks[index].data[off..off + count]
                .copy_from_slice(&content[done..done + count]);
            done += count;
            self.pos += count as u32;
            if self.pos > self.inode.file_size {
                self.inode.file_size = self.pos;
            }
            let block = &self.blocks[index];
            w.stage(block.num, &*block.data)?;
        }
        Ok(())
    }

    /// Extends the file by `count` fresh blocks taken from `bitmap`, wiring them into the block
    /// tree. New index blocks are reserved as needed and every index block touched is staged
    /// into `w`. The new data blocks are installed zeroed into the cache.
    ///
    /// Returns the reserved data block numbers.
    pub(crate) fn extend(
        &mut self,
        w: &mut WriteBuffer,
        bitmap: &mut Bitmap,
        count: usize,
    ) -> Result<Vec<u16>> {
        let reserved = bitmap.reserve(count)?;
        let mut next = self.blocks.len();
        for &num in &reserved {
            match block_pos((next * BLOCK_SIZE) as u32)? {
                BlockPos::Direct { l1, .. } => self.inode.direct[l1] = num,
                BlockPos::Indirect { l1, .. } => {
                    if self.indirect.is_none() {
                        let table_block = bitmap.reserve(1)?[0];
                        self.inode.indirect = table_block;
                        self.indirect = Some(Box::new([0; REFS_PER_INDIRECT]));
                    }
                    let table = self.indirect.as_mut().unwrap();
                    table[l1] = num as u32;
                    w.stage_index(self.inode.indirect as u32, reinterpret(&**table))?;
                }
                BlockPos::DoubleIndirect { l1, l2, .. } => {
                    if self.dindirect.is_none() {
                        let table_block = bitmap.reserve(1)?[0];
                        self.inode.double_indirect = table_block;
                        self.dindirect = Some(DoubleIndirect {
                            table: Box::new([0; REFS_PER_INDIRECT]),
                            singles: Vec::new(),
                        });
                    }
                    let dind = self.dindirect.as_mut().unwrap();
                    if dind.singles.len() == l1 {
                        let single_block = bitmap.reserve(1)?[0];
                        dind.table[l1] = single_block as u32;
                        dind.singles.push(Box::new([0; REFS_PER_INDIRECT]));
                        w.stage_index(
                            self.inode.double_indirect as u32,
                            reinterpret(&*dind.table),
                        )?;
                    }
                    dind.singles[l1][l2] = num as u32;
                    w.stage_index(dind.table[l1], reinterpret(&*dind.singles[l1]))?;
                }
            }
            self.blocks.push(CachedBlock {
                num: num as u32,
                data: Box::new([0; BLOCK_SIZE]),
            });
            next += 1;
        }
        Ok(reserved)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::disk::BLOCK_COUNT;

    fn scratch() -> (FileHandle, WriteBuffer, Bitmap) {
        let mut bitmap = Bitmap::all_free();
        // The first 33 blocks are reserved on a real disk
        bitmap.reserve(33).unwrap();
        (
            FileHandle::empty(Inode::new(FileType::Flat)),
            WriteBuffer::new(),
            bitmap,
        )
    }

    #[test]
    fn extend_through_all_levels() {
        let (mut file, mut w, mut bitmap) = scratch();
        let blocks = file.extend(&mut w, &mut bitmap, 280).unwrap();

        assert_eq!(blocks.len(), 280);
        assert!(blocks.iter().all(|b| (*b as usize) < BLOCK_COUNT));
        assert_ne!(file.inode.indirect, 0);
        assert_ne!(file.inode.double_indirect, 0);
        assert_eq!(file.blocks.len(), 280);

        // Direct, single-indirect and double-indirect levels are all wired
        assert_eq!(file.inode.direct[0], blocks[0]);
        assert_eq!(file.inode.direct[9], blocks[9]);
        let ind = file.indirect.as_ref().unwrap();
        assert_eq!(ind[0], blocks[10] as u32);
        assert_eq!(ind[127], blocks[137] as u32);
        let dind = file.dindirect.as_ref().unwrap();
        assert_eq!(dind.singles.len(), 2);
        assert_eq!(dind.singles[0][0], blocks[138] as u32);
        assert_eq!(dind.singles[1][(280 - 138) % 128 - 1], blocks[279] as u32);

        // 280 data blocks, one single-indirect, one double-indirect and two nested tables
        assert_eq!(bitmap.free_count(), BLOCK_COUNT - 33 - 280 - 4);
        // Only index blocks end up in the buffer
        assert_eq!(w.len(), 4);
    }

    #[test]
    fn extend_is_contiguous_with_existing_blocks() {
        let (mut file, mut w, mut bitmap) = scratch();
        file.extend(&mut w, &mut bitmap, 5).unwrap();
        file.inode.file_size = 5 * BLOCK_SIZE as u32;
        let more = file.extend(&mut w, &mut bitmap, 8).unwrap();
        assert_eq!(file.blocks.len(), 13);
        assert_eq!(file.inode.direct[5], more[0]);
        // Block 10 crossed into the single-indirect level
        assert_eq!(file.indirect.as_ref().unwrap()[0], more[5] as u32);
    }

    #[test]
    fn extend_full_disk() {
        let (mut file, mut w, mut bitmap) = scratch();
        bitmap.reserve(BLOCK_COUNT - 33 - 2).unwrap();
        assert!(matches!(
            file.extend(&mut w, &mut bitmap, 3),
            Err(Error::DiskFull)
        ));
    }

    #[test]
    fn write_and_read_back() {
        let (mut file, mut w, mut bitmap) = scratch();
        let content: Vec<u8> = (0..1500u32).map(|i| i as u8).collect();
        file.write_bytes(&content, &mut w, &mut bitmap).unwrap();
        assert_eq!(file.size(), 1500);
        // Three fresh data blocks staged
        assert_eq!(w.len(), 3);

        file.seek(SeekPos::Start).unwrap();
        let mut read = vec![0; 2000];
        let count = file.read(&mut read).unwrap();
        assert_eq!(count, 1500);
        assert_eq!(&read[..1500], &content[..]);
        // The position sits at the end: further reads return nothing
        assert_eq!(file.read(&mut read).unwrap(), 0);
    }

    #[test]
    fn overwrite_keeps_size() {
        let (mut file, mut w, mut bitmap) = scratch();
        file.write_bytes(&[0xaa; 600], &mut w, &mut bitmap).unwrap();

        let mut w = WriteBuffer::new();
        file.seek(SeekPos::Set(100)).unwrap();
        file.write_bytes(&[0xbb; 50], &mut w, &mut bitmap).unwrap();
        assert_eq!(file.size(), 600);
        assert_eq!(w.len(), 1);

        file.seek(SeekPos::Set(99)).unwrap();
        let mut read = [0u8; 52];
        file.read(&mut read).unwrap();
        assert_eq!(read[0], 0xaa);
        assert!(read[1..51].iter().all(|b| *b == 0xbb));
        assert_eq!(read[51], 0xaa);
    }

    #[test]
    fn seek_bounds() {
        let (mut file, mut w, mut bitmap) = scratch();
        file.write_bytes(&[1; 100], &mut w, &mut bitmap).unwrap();

        file.seek(SeekPos::Set(100)).unwrap();
        assert_eq!(file.position(), 100);
        assert!(matches!(
            file.seek(SeekPos::Set(101)),
            Err(Error::ByteOutOfRange)
        ));
        file.seek(SeekPos::End).unwrap();
        assert_eq!(file.position(), 100);
        file.seek(SeekPos::Start).unwrap();
        assert_eq!(file.position(), 0);
    }

    #[test]
    fn write_at_max_size_fails() {
        let (mut file, mut w, mut bitmap) = scratch();
        file.inode.file_size = MAX_FILE_SIZE;
        file.pos = MAX_FILE_SIZE;
        assert!(matches!(
            file.write_bytes(&[0], &mut w, &mut bitmap),
            Err(Error::FileFull)
        ));
    }
}
