/*
 * SPDX-FileCopyrightText: 2023 Andrew Gunnerson
 * SPDX-License-Identifier: GPL-3.0-only
 */

use std::{
    fmt, fs,
    io::{self, Write},
    path::Path,
};

use num_traits::PrimInt;
use tempfile::NamedTempFile;

pub const ZEROS: [u8; 16384] = [0u8; 16384];

/// A small wrapper to format a number as a size in bytes.
#[derive(Clone, Copy)]
pub struct NumBytes<T: PrimInt>(pub T);

impl<T: PrimInt + fmt::Display> fmt::Display for NumBytes<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == T::one() {
            write!(f, "{} byte", self.0)
        } else {
            write!(f, "{} bytes", self.0)
        }
    }
}

impl<T: PrimInt + fmt::Debug> fmt::Debug for NumBytes<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == T::one() {
            write!(f, "<{:?} byte>", self.0)
        } else {
            write!(f, "<{:?} bytes>", self.0)
        }
    }
}

/// Get the non-empty parent of a path. If the path has no parent in the string,
/// then `.` is returned. This does not perform any filesystem operations.
pub fn parent_path(path: &Path) -> &Path {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            return parent;
        }
    }

    Path::new(".")
}

/// Get the process umask. This briefly sets the umask to 0 and then restores
/// the original value.
#[cfg(unix)]
pub fn umask() -> u32 {
    use rustix::{fs::Mode, process};

    let mask = process::umask(Mode::empty());
    process::umask(mask);

    // Mac uses a 16-bit value.
    #[allow(clippy::useless_conversion)]
    u32::from(mask.bits())
}

/// Write `data` to `path` through a temporary file in the same directory. The
/// temporary file is removed if anything fails, so a partially written output
/// is never left behind. Missing parent directories are created.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = parent_path(path);
    fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(data)?;
    temp.flush()?;

    // NamedTempFile forces 600 permissions. The output directory is not a
    // shared /tmp, so mimic umask instead.
    #[cfg(unix)]
    {
        use std::{fs::Permissions, os::unix::fs::PermissionsExt};

        let mode = 0o666 & !umask();
        temp.as_file().set_permissions(Permissions::from_mode(mode))?;
    }

    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}
