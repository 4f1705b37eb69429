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

//! Directories: regular files whose content is an array of directory entries.
//!
//! A removed entry leaves a tombstone (inode 0) behind; the inode's `file_size` only accounts
//! for live entries while `dir_blocks` tracks the physical extent. Scans walk the physical
//! extent so tombstones never hide later entries, and appends reuse the first free slot.

use crate::alloc::Bitmap;
use crate::disk::BLOCK_SIZE;
use crate::error::{Error, Result};
use crate::file::FileHandle;
use crate::journal::WriteBuffer;
use crate::path::MAX_NAME_LEN;
use crate::util::{read_struct, reinterpret};

/// The size of a directory entry in bytes.
pub const DIR_ENTRY_SIZE: usize = 32;
/// The number of entries per directory block.
pub const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / DIR_ENTRY_SIZE;

/// An on-disk directory entry. An entry with inode 0 is free.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct DirEntry {
    /// The inode of the file the entry points to.
    pub inode: u8,
    /// The name of the file, NUL-terminated.
    pub name: [u8; 31],
}

impl DirEntry {
    /// Builds an entry binding `name` to inode `ino`.
    pub fn new(ino: u8, name: &[u8]) -> Result<Self> {
        if name.len() > MAX_NAME_LEN {
            return Err(Error::BadPath);
        }
        let mut entry = Self {
            inode: ino,
            name: [0; 31],
        };
        entry.name[..name.len()].copy_from_slice(name);
        Ok(entry)
    }

    /// Returns the name of the entry.
    pub fn name(&self) -> &[u8] {
        let len = self
            .name
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(self.name.len());
        &self.name[..len]
    }
}

/// Reads the entry at the given block and slot of `dir`.
fn entry_at(dir: &FileHandle, block: usize, slot: usize) -> DirEntry {
    read_struct(&dir.blocks[block].data[slot * DIR_ENTRY_SIZE..])
}

/// Writes `entry` at the given block and slot of `dir`.
fn set_entry(dir: &mut FileHandle, block: usize, slot: usize, entry: &DirEntry) {
    let off = slot * DIR_ENTRY_SIZE;
    dir.blocks[block].data[off..off + DIR_ENTRY_SIZE].copy_from_slice(reinterpret(entry));
}

/// Searches the directory for a live entry named `name` and returns its inode number.
pub(crate) fn search(dir: &FileHandle, name: &[u8]) -> Option<u8> {
    for block in 0..dir.blocks.len() {
        for slot in 0..ENTRIES_PER_BLOCK {
            let entry = entry_at(dir, block, slot);
            if entry.inode != 0 && entry.name() == name {
                return Some(entry.inode);
            }
        }
    }
    None
}

/// Returns the inode numbers of every live entry of the directory.
pub(crate) fn children(dir: &FileHandle) -> Vec<u8> {
    let mut inodes = Vec::new();
    for block in 0..dir.blocks.len() {
        for slot in 0..ENTRIES_PER_BLOCK {
            let entry = entry_at(dir, block, slot);
            if entry.inode != 0 {
                inodes.push(entry.inode);
            }
        }
    }
    inodes
}

/// Appends `entry` to the directory.
///
/// The first free slot is reused; when every slot is live the directory is extended by one
/// block. The modified block is staged into `w`.
pub(crate) fn append(
    dir: &mut FileHandle,
    w: &mut WriteBuffer,
    bitmap: &mut Bitmap,
    entry: DirEntry,
) -> Result<()> {
    let mut target = None;
    'scan: for block in 0..dir.blocks.len() {
        for slot in 0..ENTRIES_PER_BLOCK {
            if entry_at(dir, block, slot).inode == 0 {
                target = Some((block, slot));
                break 'scan;
            }
        }
    }
    let (block, slot) = match target {
        Some(target) => target,
        None => {
            dir.extend(w, bitmap, 1)?;
            let count = dir.inode.dir_blocks() + 1;
            dir.inode.set_dir_blocks(count);
            (dir.blocks.len() - 1, 0)
        }
    };
    set_entry(dir, block, slot, &entry);
    dir.inode.file_size += DIR_ENTRY_SIZE as u32;
    let block = &dir.blocks[block];
    w.stage_index(block.num, &*block.data)
}

/// Removes the live entry named `name`, leaving a tombstone, and stages the modified block.
///
/// Returns the inode number the entry pointed to.
pub(crate) fn remove(dir: &mut FileHandle, w: &mut WriteBuffer, name: &[u8]) -> Result<u8> {
    for block in 0..dir.blocks.len() {
        for slot in 0..ENTRIES_PER_BLOCK {
            let mut entry = entry_at(dir, block, slot);
            if entry.inode != 0 && entry.name() == name {
                let ino = entry.inode;
                entry.inode = 0;
                set_entry(dir, block, slot, &entry);
                dir.inode.file_size -= DIR_ENTRY_SIZE as u32;
                let block = &dir.blocks[block];
                w.stage_index(block.num, &*block.data)?;
                return Ok(ino);
            }
        }
    }
    Err(Error::FileNotFound)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::inode::{FileType, Inode};

    fn scratch_dir() -> (FileHandle, WriteBuffer, Bitmap) {
        let mut bitmap = Bitmap::all_free();
        bitmap.reserve(33).unwrap();
        (
            FileHandle::empty(Inode::new(FileType::Dir)),
            WriteBuffer::new(),
            bitmap,
        )
    }

    #[test]
    fn entry_names() {
        let entry = DirEntry::new(8, b"something.txt").unwrap();
        assert_eq!(entry.name(), b"something.txt");
        assert_eq!(entry.inode, 8);

        // 30 characters fit, 31 do not
        assert!(DirEntry::new(1, &[b'a'; 30]).is_ok());
        assert!(matches!(
            DirEntry::new(1, &[b'a'; 31]),
            Err(Error::BadPath)
        ));
    }

    #[test]
    fn append_and_search() {
        let (mut dir, mut w, mut bitmap) = scratch_dir();
        append(&mut dir, &mut w, &mut bitmap, DirEntry::new(8, b"something.txt").unwrap())
            .unwrap();

        assert_eq!(dir.inode.file_size, 32);
        assert_eq!(dir.inode.dir_blocks(), 1);
        assert_eq!(search(&dir, b"something.txt"), Some(8));
        assert_eq!(search(&dir, b"missing.txt"), None);

        append(&mut dir, &mut w, &mut bitmap, DirEntry::new(9, b"other").unwrap()).unwrap();
        assert_eq!(dir.inode.file_size, 64);
        // Both entries share the first block
        assert_eq!(dir.inode.dir_blocks(), 1);
        assert_eq!(search(&dir, b"other"), Some(9));
    }

    #[test]
    fn append_extends_when_full() {
        let (mut dir, mut w, mut bitmap) = scratch_dir();
        for i in 0..ENTRIES_PER_BLOCK as u8 {
            let name = [b'a' + i];
            append(&mut dir, &mut w, &mut bitmap, DirEntry::new(i + 2, &name).unwrap()).unwrap();
        }
        assert_eq!(dir.inode.dir_blocks(), 1);

        append(&mut dir, &mut w, &mut bitmap, DirEntry::new(100, b"overflow").unwrap()).unwrap();
        assert_eq!(dir.inode.dir_blocks(), 2);
        assert_eq!(dir.inode.file_size, 17 * 32);
        assert_eq!(search(&dir, b"overflow"), Some(100));
    }

    #[test]
    fn remove_leaves_tombstone() {
        let (mut dir, mut w, mut bitmap) = scratch_dir();
        append(&mut dir, &mut w, &mut bitmap, DirEntry::new(2, b"first").unwrap()).unwrap();
        append(&mut dir, &mut w, &mut bitmap, DirEntry::new(3, b"second").unwrap()).unwrap();

        let ino = remove(&mut dir, &mut w, b"first").unwrap();
        assert_eq!(ino, 2);
        assert_eq!(dir.inode.file_size, 32);
        // The block count does not shrink
        assert_eq!(dir.inode.dir_blocks(), 1);
        assert_eq!(search(&dir, b"first"), None);
        assert_eq!(search(&dir, b"second"), Some(3));

        assert!(matches!(
            remove(&mut dir, &mut w, b"first"),
            Err(Error::FileNotFound)
        ));

        // The tombstone is reused by the next append
        append(&mut dir, &mut w, &mut bitmap, DirEntry::new(4, b"third").unwrap()).unwrap();
        assert_eq!(dir.inode.dir_blocks(), 1);
        assert_eq!(search(&dir, b"third"), Some(4));
    }
}
