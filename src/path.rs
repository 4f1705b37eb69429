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

//! Absolute path handling.

use crate::error::{Error, Result};
use std::str::Split;

/// The maximum length of a file name, not counting the NUL terminator.
pub const MAX_NAME_LEN: usize = 30;

/// A zero-copy iterator over the segments of an absolute path.
///
/// Consecutive separators are collapsed. A segment longer than [`MAX_NAME_LEN`] yields an
/// error.
pub struct Segments<'p> {
    inner: Split<'p, char>,
}

impl<'p> Segments<'p> {
    /// Returns an iterator over the segments of `path`.
    ///
    /// The path must be absolute.
    pub fn new(path: &'p str) -> Result<Self> {
        let Some(rest) = path.strip_prefix('/') else {
            return Err(Error::BadPath);
        };
        Ok(Self {
            inner: rest.split('/'),
        })
    }
}

impl<'p> Iterator for Segments<'p> {
    type Item = Result<&'p str>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let seg = self.inner.next()?;
            if seg.is_empty() {
                continue;
            }
            if seg.len() > MAX_NAME_LEN {
                return Some(Err(Error::BadPath));
            }
            return Some(Ok(seg));
        }
    }
}

/// Splits an absolute path into its parent directory path and the leaf name.
///
/// The root itself cannot be split; relative paths, empty leaf names and leaf names longer
/// than [`MAX_NAME_LEN`] are rejected.
pub fn split(path: &str) -> Result<(&str, &str)> {
    if !path.starts_with('/') {
        return Err(Error::BadPath);
    }
    let i = path.rfind('/').unwrap();
    let name = &path[i + 1..];
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(Error::BadPath);
    }
    let parent = if i == 0 { "/" } else { &path[..i] };
    Ok((parent, name))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn split_paths() {
        assert_eq!(split("/usr").unwrap(), ("/", "usr"));
        assert_eq!(split("/usr/file.c").unwrap(), ("/usr", "file.c"));
        assert_eq!(split("/a/b/c").unwrap(), ("/a/b", "c"));

        assert!(matches!(split("/"), Err(Error::BadPath)));
        assert!(matches!(split("usr"), Err(Error::BadPath)));
        assert!(matches!(split("usr/file.c"), Err(Error::BadPath)));
        assert!(matches!(split("/usr/"), Err(Error::BadPath)));
        // 31 characters
        assert!(matches!(
            split("/f32charnameeeeeeeeeeeeeeeeeeee.c"),
            Err(Error::BadPath)
        ));
    }

    #[test]
    fn segments() {
        let segs: Vec<_> = Segments::new("/usr/local/file.c")
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(segs, ["usr", "local", "file.c"]);

        let segs: Vec<_> = Segments::new("/").unwrap().collect::<Result<_>>().unwrap();
        assert!(segs.is_empty());

        // Consecutive separators are collapsed
        let segs: Vec<_> = Segments::new("//usr///x")
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(segs, ["usr", "x"]);

        assert!(matches!(Segments::new("usr"), Err(Error::BadPath)));
        assert!(
            Segments::new("/usr/aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa")
                .unwrap()
                .any(|s| s.is_err())
        );
    }
}
