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

//! The filesystem core, tying the disk, the allocation maps, the journal and the directory
//! tree together.
//!
//! The disk layout is fixed:
//!
//! | Block  | Purpose                               |
//! |--------|---------------------------------------|
//! | 0      | Superblock                            |
//! | 1      | Free-block bitmap                     |
//! | 2..=3  | Inode map                             |
//! | 12     | Journal superblock                    |
//! | 13..=31| Journal log                           |
//! | 32     | Root directory inode (inode 1)        |
//! | 33..   | Inode and data blocks                 |
//!
//! Every mutating operation stages its modified blocks (content, inode, allocation maps) into
//! one write buffer and submits it as a single journal transaction. The in-memory allocation
//! maps are mutated on copies that replace the live ones only once the transaction is on disk,
//! so a failed operation leaves both memory and disk untouched.

use crate::alloc::{Bitmap, InodeMap, MAX_INODES};
use crate::dir::{self, DirEntry};
use crate::disk::{BLOCK_COUNT, BLOCK_SIZE, Block, Disk};
use crate::error::{Error, Result};
use crate::file::FileHandle;
use crate::inode::{FileType, Inode};
use crate::journal::{Journal, WriteBuffer};
use crate::path::{self, Segments};
use crate::util::{read_struct, reinterpret, to_block};
use std::io::Read;
use std::path::Path;

/// The block holding the superblock.
pub const SUPER_BLOCK_LOC: u32 = 0;
/// The block holding the free-block bitmap.
pub const FREE_BLOCK_LOC: u32 = 1;
/// The first of the two blocks holding the inode map.
pub const INODE_MAP_LOC: u32 = 2;
/// The block holding the root directory's inode.
pub const ROOT_DIR_LOC: u32 = 32;
/// The number of blocks reserved for fixed structures, journal included.
const RESERVED_BLOCKS: usize = 33;
/// Magic number identifying an LLFS superblock (`"LLFS"`).
const MAGIC: u32 = 0x5346_4c4c;
/// The maximum number of content bytes written per transaction. Keeps a transaction's data
/// blocks, index blocks, inode and bitmap within the journal's limit.
const MAX_WRITE_SIZE: usize = 2048;

/// The on-disk superblock.
#[repr(C)]
#[derive(Clone, Copy)]
struct SuperBlock {
    magic: u32,
    /// The number of blocks on the disk.
    block_count: u32,
    /// The block holding the root directory's inode.
    root_dir_block: u32,
    /// The maximum number of inodes.
    max_inodes: u32,
    /// The number of allocated inodes at format time.
    used_inodes: u32,
}

/// A mounted filesystem.
///
/// All state lives in this handle; unmounting (or dropping) it releases the disk for the next
/// mount.
pub struct Filesystem {
    disk: Disk,
    bitmap: Bitmap,
    imap: InodeMap,
    journal: Journal,
}

impl Filesystem {
    /// Formats the disk image at `path` and mounts the resulting filesystem.
    ///
    /// A missing image is created. Existing content is discarded.
    pub fn format(path: &Path) -> Result<Self> {
        let mut disk = Disk::mount(path)?;
        let sb = SuperBlock {
            magic: MAGIC,
            block_count: BLOCK_COUNT as u32,
            root_dir_block: ROOT_DIR_LOC,
            max_inodes: MAX_INODES as u32,
            used_inodes: 1,
        };
        disk.write_block(SUPER_BLOCK_LOC, &to_block(&sb))?;

        let mut bitmap = Bitmap::all_free();
        bitmap.reserve(RESERVED_BLOCKS)?;
        disk.write_block(FREE_BLOCK_LOC, bitmap.as_block())?;

        let journal = Journal::init(&mut disk)?;

        let mut imap = InodeMap::new();
        imap.reserve(ROOT_DIR_LOC)?;
        disk.write_block(INODE_MAP_LOC, &imap.block(0))?;
        disk.write_block(INODE_MAP_LOC + 1, &imap.block(1))?;

        let root = Inode::new(FileType::Dir);
        disk.write_block(ROOT_DIR_LOC, &to_block(&root))?;

        Ok(Self {
            disk,
            bitmap,
            imap,
            journal,
        })
    }

    /// Mounts the filesystem on the disk image at `path`.
    ///
    /// Journal recovery runs before the allocation maps are read, so a replayed transaction's
    /// metadata is what ends up cached in memory.
    pub fn load(path: &Path) -> Result<Self> {
        let mut disk = Disk::mount(path)?;
        let journal = Journal::recover(&mut disk)?;

        let mut buf: Block = [0; BLOCK_SIZE];
        disk.read_block(FREE_BLOCK_LOC, &mut buf)?;
        let bitmap = Bitmap::from_block(&buf);

        let mut b0: Block = [0; BLOCK_SIZE];
        let mut b1: Block = [0; BLOCK_SIZE];
        disk.read_block(INODE_MAP_LOC, &mut b0)?;
        disk.read_block(INODE_MAP_LOC + 1, &mut b1)?;
        let imap = InodeMap::from_blocks(&b0, &b1);

        Ok(Self {
            disk,
            bitmap,
            imap,
            journal,
        })
    }

    /// Tells whether the image at `path` contains an LLFS filesystem.
    pub fn probe(path: &Path) -> Result<bool> {
        let mut file = std::fs::File::open(path)?;
        let mut buf: Block = [0; BLOCK_SIZE];
        match file.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        let sb: SuperBlock = read_struct(&buf);
        Ok(sb.magic == MAGIC)
    }

    /// Unmounts the filesystem, making every write durable.
    pub fn unmount(self) -> Result<()> {
        self.disk.unmount()
    }

    /// Reads the inode stored at `block`.
    fn read_inode(&mut self, block: u32) -> Result<Inode> {
        let mut buf: Block = [0; BLOCK_SIZE];
        self.disk.read_block(block, &mut buf)?;
        Ok(read_struct(&buf))
    }

    /// Walks the absolute path `path` and returns the target's inode along with the block
    /// storing it.
    fn resolve(&mut self, path: &str) -> Result<(Inode, u32)> {
        let mut block = ROOT_DIR_LOC;
        let mut inode = self.read_inode(block)?;
        for seg in Segments::new(path)? {
            let seg = seg?;
            if inode.file_type() != FileType::Dir {
                return Err(Error::FileNotFound);
            }
            let current = FileHandle::open(&mut self.disk, inode, block)?;
            let ino = dir::search(&current, seg.as_bytes()).ok_or(Error::FileNotFound)?;
            block = self.imap.get(ino).ok_or(Error::FileNotFound)?;
            inode = self.read_inode(block)?;
        }
        Ok((inode, block))
    }

    /// Opens the file at `path`.
    ///
    /// The handle caches the file's whole content; dropping it closes the file.
    pub fn open(&mut self, path: &str) -> Result<FileHandle> {
        let (inode, block) = self.resolve(path)?;
        FileHandle::open(&mut self.disk, inode, block)
    }

    /// Creates a directory at `path`. The parent directory must exist.
    pub fn mkdir(&mut self, path: &str) -> Result<()> {
        self.create(path, FileType::Dir)
    }

    /// Creates an empty regular file at `path`. The parent directory must exist.
    pub fn touch(&mut self, path: &str) -> Result<()> {
        self.create(path, FileType::Flat)
    }

    fn create(&mut self, path: &str, file_type: FileType) -> Result<()> {
        let (parent_path, name) = path::split(path)?;
        // A missing intermediate directory is a path error, not a lookup failure
        let (parent_inode, parent_block) = match self.resolve(parent_path) {
            Err(Error::FileNotFound) => return Err(Error::BadPath),
            res => res?,
        };
        if parent_inode.file_type() != FileType::Dir {
            return Err(Error::BadPath);
        }
        let mut parent = FileHandle::open(&mut self.disk, parent_inode, parent_block)?;
        if dir::search(&parent, name.as_bytes()).is_some() {
            return Err(Error::FileAlreadyExists);
        }

        let mut bitmap = self.bitmap.clone();
        let mut imap = self.imap.clone();
        let inode_block = bitmap.reserve(1)?[0] as u32;
        let (map_index, ino) = imap.reserve(inode_block)?;

        let mut w = WriteBuffer::new();
        dir::append(&mut parent, &mut w, &mut bitmap, DirEntry::new(ino, name.as_bytes())?)?;
        w.stage(parent.inode_block, reinterpret(&parent.inode))?;
        let node = Inode::new(file_type);
        w.stage(inode_block, reinterpret(&node))?;
        w.stage(INODE_MAP_LOC + map_index as u32, &imap.block(map_index))?;
        w.stage(FREE_BLOCK_LOC, bitmap.as_block())?;
        self.journal.new_transaction(&mut self.disk, &w)?;

        self.bitmap = bitmap;
        self.imap = imap;
        Ok(())
    }

    /// Writes `content` at the file's current position.
    ///
    /// The request is split into slices so that each slice, together with the updated inode and
    /// bitmap, commits as one journal transaction.
    pub fn write(&mut self, file: &mut FileHandle, content: &[u8]) -> Result<()> {
        for slice in content.chunks(MAX_WRITE_SIZE) {
            self.write_slice(file, slice)?;
        }
        Ok(())
    }

    fn write_slice(&mut self, file: &mut FileHandle, content: &[u8]) -> Result<()> {
        let mut bitmap = self.bitmap.clone();
        let mut w = WriteBuffer::new();
        file.write_bytes(content, &mut w, &mut bitmap)?;
        w.stage(file.inode_block, reinterpret(&file.inode))?;
        w.stage(FREE_BLOCK_LOC, bitmap.as_block())?;
        self.journal.new_transaction(&mut self.disk, &w)?;
        self.bitmap = bitmap;
        Ok(())
    }

    /// Removes the file at `path`.
    ///
    /// A non-empty directory is only removed when `recursive` is set; its children are then
    /// removed first. The root directory cannot be removed.
    pub fn rm(&mut self, path: &str, recursive: bool) -> Result<()> {
        let (parent_path, name) = path::split(path)?;
        let (parent_inode, parent_block) = self.resolve(parent_path)?;
        if parent_inode.file_type() != FileType::Dir {
            return Err(Error::BadPath);
        }
        let mut parent = FileHandle::open(&mut self.disk, parent_inode, parent_block)?;
        let target = dir::search(&parent, name.as_bytes()).ok_or(Error::FileNotFound)?;

        let mut bitmap = self.bitmap.clone();
        let mut imap = self.imap.clone();

        // Depth-first removal over an explicit stack, to keep deep trees off the call stack
        let mut stack = vec![target];
        let mut is_target = true;
        while let Some(ino) = stack.pop() {
            let block = imap.get(ino).ok_or(Error::FileNotFound)?;
            let inode = self.read_inode(block)?;
            let file = FileHandle::open(&mut self.disk, inode, block)?;
            if inode.file_type() == FileType::Dir {
                let children = dir::children(&file);
                if is_target && !recursive && !children.is_empty() {
                    return Err(Error::NonRecursiveDelete);
                }
                stack.extend(children);
            }
            Self::free_file_blocks(&file, &mut bitmap)?;
            imap.free(ino)?;
            is_target = false;
        }

        let mut w = WriteBuffer::new();
        dir::remove(&mut parent, &mut w, name.as_bytes())?;
        w.stage(parent.inode_block, reinterpret(&parent.inode))?;
        w.stage(FREE_BLOCK_LOC, bitmap.as_block())?;
        w.stage(INODE_MAP_LOC, &imap.block(0))?;
        w.stage(INODE_MAP_LOC + 1, &imap.block(1))?;
        self.journal.new_transaction(&mut self.disk, &w)?;

        self.bitmap = bitmap;
        self.imap = imap;
        Ok(())
    }

    /// Returns every block owned by `file` to the bitmap: data blocks, index blocks and the
    /// inode block itself.
    fn free_file_blocks(file: &FileHandle, bitmap: &mut Bitmap) -> Result<()> {
        bitmap.free(file.inode_block as u16)?;
        for block in &file.blocks {
            bitmap.free(block.num as u16)?;
        }
        if file.indirect.is_some() {
            bitmap.free(file.inode.indirect)?;
        }
        if let Some(dind) = &file.dindirect {
            bitmap.free(file.inode.double_indirect)?;
            for l1 in 0..dind.singles.len() {
                bitmap.free(dind.table[l1] as u16)?;
            }
        }
        Ok(())
    }
}
