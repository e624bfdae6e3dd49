//! File operations used by quarantine.
//!
//! Provides:
//! - Moving files with a copy-then-delete fallback across devices
//! - Idempotent deletion

use std::fs::{self, File};
use std::io;
use std::path::Path;

use crate::core::error::{Error, Result};

/// `EXDEV` on Linux and macOS.
#[cfg(unix)]
const CROSS_DEVICE: i32 = 18;
/// `ERROR_NOT_SAME_DEVICE`.
#[cfg(windows)]
const CROSS_DEVICE: i32 = 17;

fn is_cross_device(err: &io::Error) -> bool {
    #[cfg(any(unix, windows))]
    {
        err.raw_os_error() == Some(CROSS_DEVICE)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = err;
        false
    }
}

/// How a move was carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMethod {
    Rename,
    CopyThenDelete,
}

/// Move `source` to `dest`, creating the destination directory.
///
/// A plain rename is tried first. If the OS rejects it as cross-device the
/// file is copied, the copy is size-checked and synced, then the source is
/// removed.
pub fn move_file(source: &Path, dest: &Path) -> Result<MoveMethod> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::DirectoryAccess {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    match fs::rename(source, dest) {
        Ok(()) => Ok(MoveMethod::Rename),
        Err(e) if is_cross_device(&e) => {
            log::debug!("{:?} -> {:?} crosses devices, copying", source, dest);
            copy_then_delete(source, dest)?;
            Ok(MoveMethod::CopyThenDelete)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound && !source.exists() => {
            Err(Error::SourceMissing(source.to_path_buf()))
        }
        Err(e) => Err(Error::QuarantineFailed {
            path: source.to_path_buf(),
            source: e,
        }),
    }
}

fn copy_then_delete(source: &Path, dest: &Path) -> Result<()> {
    let cross = |e: io::Error| Error::CrossDeviceMove {
        from: source.to_path_buf(),
        to: dest.to_path_buf(),
        source: e,
    };

    let expected = fs::metadata(source).map_err(cross)?.len();
    fs::copy(source, dest).map_err(cross)?;

    let copied = File::open(dest).and_then(|f| {
        f.sync_all()?;
        f.metadata()
    });
    match copied {
        Ok(meta) if meta.len() == expected => {}
        Ok(_) => {
            let _ = fs::remove_file(dest);
            return Err(Error::CopyVerification(dest.to_path_buf()));
        }
        Err(e) => {
            let _ = fs::remove_file(dest);
            return Err(cross(e));
        }
    }

    fs::remove_file(source).map_err(|e| {
        // Keep exactly one copy.
        let _ = fs::remove_file(dest);
        Error::file_delete(source, e)
    })
}

/// Remove a file. Returns `false` if it was already gone.
pub fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::file_delete(path, e)),
    }
}
