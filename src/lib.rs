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

//! LLFS is a small journaling filesystem stored in a fixed-size disk image of 4096 blocks of
//! 512 bytes.
//!
//! Files are described by inodes referencing their content through direct, single-indirect and
//! double-indirect block references; directories are regular files holding fixed-size entries.
//! A free-block bitmap and an inode map, both kept in memory while mounted, track allocation.
//! Every mutation stages its modified blocks into a write buffer and commits them through a
//! redo journal, so a crash leaves the filesystem either before or after the whole operation,
//! never in between.
//!
//! ```no_run
//! use llfs::Filesystem;
//! use std::path::Path;
//!
//! fn main() -> llfs::Result<()> {
//!     let mut fs = Filesystem::format(Path::new("disk.img"))?;
//!     fs.mkdir("/usr")?;
//!     fs.touch("/usr/hello.txt")?;
//!     let mut file = fs.open("/usr/hello.txt")?;
//!     fs.write(&mut file, b"hello")?;
//!     drop(file);
//!     fs.unmount()?;
//!     Ok(())
//! }
//! ```

pub mod alloc;
pub mod crc32;
pub mod dir;
pub mod disk;
pub mod error;
pub mod file;
pub mod fs;
pub mod inode;
pub mod journal;
pub mod path;
mod util;

pub use error::{Error, Result};
pub use file::{FileHandle, SeekPos};
pub use fs::Filesystem;

#[cfg(test)]
pub(crate) mod test_util {
    use std::path::PathBuf;
    use std::sync::{Mutex, MutexGuard};

    /// Serializes tests touching a disk, since a process mounts at most one at a time.
    static DISK_LOCK: Mutex<()> = Mutex::new(());

    pub fn lock() -> MutexGuard<'static, ()> {
        DISK_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a unique path for a scratch disk image.
    pub fn disk_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("llfs_{}_{}.img", name, std::process::id()))
    }
}
