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

//! Errors shared by the disk and filesystem layers.

use std::io;
use thiserror::Error;

/// The result of a filesystem operation.
pub type Result<T> = std::result::Result<T, Error>;

/// An error reported by the disk or the filesystem.
#[derive(Debug, Error)]
pub enum Error {
    /// An error has occurred while reading or writing the underlying file.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// The block number provided is out of bounds.
    #[error("the block number provided is out of bounds")]
    BlockOutOfBounds,
    /// A disk has already been loaded by this process.
    #[error("a disk has already been loaded, unmount first")]
    DiskAlreadyLoaded,
    /// The disk image or device cannot back a filesystem.
    #[error("failed to load the disk")]
    DiskLoadFailed,
    /// No free block or no free inode is left.
    #[error("the disk is full")]
    DiskFull,
    /// The block is already staged in the write buffer.
    ///
    /// Index blocks are re-staged after each mutation, so callers usually treat this as success.
    #[error("the block is already staged in the write buffer")]
    BufferDuplicate,
    /// The path is relative, manipulates the root, contains an oversized name or crosses a
    /// missing directory.
    #[error("bad path")]
    BadPath,
    /// The byte position is beyond the maximum file size, or beyond the end of the file.
    #[error("byte position out of range")]
    ByteOutOfRange,
    /// The write would grow the file beyond the maximum file size.
    #[error("the file has reached its maximum size")]
    FileFull,
    /// The path does not name an existing file.
    #[error("file not found")]
    FileNotFound,
    /// The directory is not empty and the recursive flag was not given.
    #[error("cannot remove a non-empty directory without the recursive flag")]
    NonRecursiveDelete,
    /// Attempt to free inode 0, the root inode or an out-of-range inode.
    #[error("the inode cannot be freed")]
    InodeFree,
    /// The transaction holds more blocks than the journal can log.
    #[error("the transaction exceeds the maximum number of blocks")]
    ExceededMaxBuffer,
    /// A file with the same name already exists.
    #[error("a file with the same name already exists")]
    FileAlreadyExists,
    /// No valid descriptor/commit pair is present at the head of the journal log.
    ///
    /// During recovery this means there is nothing to replay and is downgraded to success.
    #[error("no valid transaction in the journal log")]
    Journal,
    /// The journal superblock is malformed.
    #[error("the journal superblock is malformed")]
    JournalBadHeader,
}
