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

//! The virtual disk: a fixed-size, block-addressable store backed by a host file or device.

use crate::error::{Error, Result};
use libc::ioctl;

/// The `BLKGETSIZE64` ioctl request number (not exposed by the `libc` crate).
#[cfg(target_os = "linux")]
const BLKGETSIZE64: libc::c_ulong = 0x80081272;
use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// The size of a disk block in bytes.
pub const BLOCK_SIZE: usize = 512;
/// The number of blocks on the disk.
pub const BLOCK_COUNT: usize = 4096;
/// The total size of the disk in bytes.
pub const DISK_SIZE: u64 = (BLOCK_SIZE * BLOCK_COUNT) as u64;

/// A single block of disk data.
pub type Block = [u8; BLOCK_SIZE];

/// Tells whether a disk is currently mounted by this process.
static MOUNTED: AtomicBool = AtomicBool::new(false);

/// Returns how many [`BLOCK_SIZE`] blocks fit on `dev`.
///
/// A regular file is measured from its metadata; a block or character device is asked through
/// the `BLKGETSIZE64` ioctl. Anything else has no usable capacity.
pub fn get_disk_size(dev: &File) -> io::Result<u64> {
    let metadata = dev.metadata()?;
    let file_type = metadata.file_type();
    if file_type.is_file() {
        return Ok(metadata.len() / BLOCK_SIZE as u64);
    }
    if !file_type.is_block_device() && !file_type.is_char_device() {
        return Ok(0);
    }
    let mut bytes = 0u64;
    let res = unsafe { ioctl(dev.as_raw_fd(), BLKGETSIZE64, &mut bytes) };
    if res < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(bytes / BLOCK_SIZE as u64)
}

/// A mounted virtual disk.
///
/// At most one disk can be mounted by a process at a time. Unmounting (or dropping) the disk
/// releases the mount for the next one.
pub struct Disk {
    file: File,
}

impl Disk {
    /// Mounts the disk image at `path`.
    ///
    /// A missing image is created and zero-filled. An image too small to hold
    /// [`BLOCK_COUNT`] blocks is rejected.
    pub fn mount(path: &Path) -> Result<Self> {
        if MOUNTED.swap(true, Ordering::SeqCst) {
            return Err(Error::DiskAlreadyLoaded);
        }
        Self::open(path).inspect_err(|_| MOUNTED.store(false, Ordering::SeqCst))
    }

    fn open(path: &Path) -> Result<Self> {
        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => {
                if get_disk_size(&file)? < BLOCK_COUNT as u64 {
                    return Err(Error::DiskLoadFailed);
                }
                file
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Self::init(path)?,
            Err(e) => return Err(e.into()),
        };
        Ok(Self { file })
    }

    /// Creates a new zero-filled disk image at `path`.
    fn init(path: &Path) -> Result<File> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        let buf: Block = [0; BLOCK_SIZE];
        for _ in 0..BLOCK_COUNT {
            file.write_all(&buf)?;
        }
        file.seek(SeekFrom::Start(0))?;
        Ok(file)
    }

    /// Reads the block `n` into `buf`.
    pub fn read_block(&mut self, n: u32, buf: &mut Block) -> Result<()> {
        if n as usize >= BLOCK_COUNT {
            return Err(Error::BlockOutOfBounds);
        }
        self.file
            .seek(SeekFrom::Start(n as u64 * BLOCK_SIZE as u64))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Writes `buf` to the block `n`.
    pub fn write_block(&mut self, n: u32, buf: &Block) -> Result<()> {
        if n as usize >= BLOCK_COUNT {
            return Err(Error::BlockOutOfBounds);
        }
        self.file
            .seek(SeekFrom::Start(n as u64 * BLOCK_SIZE as u64))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    /// Unmounts the disk, making every previous write durable.
    pub fn unmount(self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

impl Drop for Disk {
    fn drop(&mut self) {
        MOUNTED.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_util;
    use std::fs;

    #[test]
    fn block_io() {
        let _lock = test_util::lock();
        let path = test_util::disk_path("block_io");
        let mut disk = Disk::mount(&path).unwrap();

        let mut block: Block = [0; BLOCK_SIZE];
        block[..12].copy_from_slice(b"Hello World!");
        disk.write_block(10, &block).unwrap();

        let mut read: Block = [0; BLOCK_SIZE];
        disk.read_block(10, &mut read).unwrap();
        assert_eq!(read, block);

        assert!(matches!(
            disk.write_block(BLOCK_COUNT as u32, &block),
            Err(Error::BlockOutOfBounds)
        ));
        assert!(matches!(
            disk.read_block(BLOCK_COUNT as u32, &mut read),
            Err(Error::BlockOutOfBounds)
        ));

        drop(disk);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn created_zero_filled() {
        let _lock = test_util::lock();
        let path = test_util::disk_path("zero_filled");
        let mut disk = Disk::mount(&path).unwrap();

        let mut read: Block = [0xff; BLOCK_SIZE];
        disk.read_block(0, &mut read).unwrap();
        assert_eq!(read, [0; BLOCK_SIZE]);
        disk.read_block(BLOCK_COUNT as u32 - 1, &mut read).unwrap();
        assert_eq!(read, [0; BLOCK_SIZE]);

        drop(disk);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn mount_exclusivity() {
        let _lock = test_util::lock();
        let path_a = test_util::disk_path("exclusive_a");
        let path_b = test_util::disk_path("exclusive_b");

        let disk_a = Disk::mount(&path_a).unwrap();
        assert!(matches!(Disk::mount(&path_b), Err(Error::DiskAlreadyLoaded)));
        disk_a.unmount().unwrap();

        let disk_b = Disk::mount(&path_b).unwrap();
        drop(disk_b);

        let _ = fs::remove_file(&path_a);
        let _ = fs::remove_file(&path_b);
    }

    #[test]
    fn persistence() {
        let _lock = test_util::lock();
        let path = test_util::disk_path("persistence");

        let mut block: Block = [0; BLOCK_SIZE];
        block[..4].copy_from_slice(b"data");
        let mut disk = Disk::mount(&path).unwrap();
        disk.write_block(100, &block).unwrap();
        disk.unmount().unwrap();

        let mut disk = Disk::mount(&path).unwrap();
        let mut read: Block = [0; BLOCK_SIZE];
        disk.read_block(100, &mut read).unwrap();
        assert_eq!(read, block);

        drop(disk);
        let _ = fs::remove_file(&path);
    }
}
