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

//! The `mkllfs` tool creates an LLFS filesystem on a disk image or device.

use llfs::Filesystem;
use llfs::alloc::MAX_INODES;
use llfs::disk::{BLOCK_COUNT, BLOCK_SIZE, get_disk_size};
use std::env;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::exit;

/// Writes an error to stderr, then exits.
fn error<M: fmt::Display>(msg: M) -> ! {
    eprintln!("mkllfs: error: {msg}");
    exit(1);
}

/// Structure storing command line arguments.
#[derive(Default)]
struct Args {
    /// If true, print command line help.
    help: bool,
    /// If true, do not ask for confirmation before overwriting an existing filesystem.
    force: bool,
    /// The path to the image or device on which the filesystem will be created.
    path: Option<PathBuf>,
}

fn parse_args() -> Args {
    let mut res: Args = Default::default();
    for arg in env::args_os().skip(1) {
        match arg.to_str() {
            Some("-h" | "--help") => res.help = true,
            Some("-f" | "--force") => res.force = true,
            // TODO `-q` to suppress the final report
            _ => res.path = Some(PathBuf::from(arg)),
        }
    }
    res
}

/// Show a prompt. This function returns when a newline is received.
fn prompt(text: &str) -> Option<String> {
    print!("{text}");
    let _ = io::stdout().flush();
    io::stdin().lock().lines().next().and_then(|line| line.ok())
}

fn main() {
    let args = parse_args();
    if args.help {
        println!("usage: mkllfs [-f] <path>");
        println!();
        println!("Creates an LLFS filesystem on the disk image or device at <path>.");
        println!("A missing image is created; an existing filesystem is overwritten after");
        println!("confirmation, or silently with -f.");
        exit(0);
    }
    let Some(path) = args.path else {
        error("specify path to a disk image");
    };

    if let Ok(file) = File::open(&path) {
        let sectors = get_disk_size(&file)
            .unwrap_or_else(|e| error(format_args!("{}: {e}", path.display())));
        if sectors < BLOCK_COUNT as u64 {
            error(format_args!(
                "{}: not large enough to hold a filesystem",
                path.display()
            ));
        }
        let present = Filesystem::probe(&path).unwrap_or(false);
        if present && !args.force {
            println!("{} already contains an LLFS filesystem", path.display());
            let confirm = prompt("Proceed anyway? (y/N) ")
                .map(|s| s.to_lowercase() == "y")
                .unwrap_or(false);
            if !confirm {
                eprintln!("Abort.");
                exit(1);
            }
        }
    }

    let fs = Filesystem::format(&path)
        .unwrap_or_else(|e| error(format_args!("failed to create filesystem: {e}")));
    fs.unmount()
        .unwrap_or_else(|e| error(format_args!("failed to create filesystem: {e}")));
    println!(
        "Created LLFS on {}: {} blocks of {} bytes, {} inodes",
        path.display(),
        BLOCK_COUNT,
        BLOCK_SIZE,
        MAX_INODES - 1,
    );
}
