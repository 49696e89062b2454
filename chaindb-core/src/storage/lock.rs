//! Exclusive lock on a database directory

use crate::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Name of the lock file inside a database directory
pub const LOCK_FILE: &str = "LOCK";

/// Held for as long as a database is open; released on drop
#[derive(Debug)]
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Lock a database directory without blocking
    ///
    /// Fails with [`Error::Locked`] when another handle holds it. The lock
    /// file carries the holder's process ID for debugging.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);

        // Don't truncate before locking, that would wipe the holder's pid
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;

        if let Err(e) = Self::try_lock(&file) {
            return Err(match e.kind() {
                io::ErrorKind::WouldBlock => Error::Locked(dir.to_path_buf()),
                _ => Error::Io(e),
            });
        }

        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { _file: file, path })
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> io::Result<()> {
        use libc::{flock, LOCK_EX, LOCK_NB};

        let fd = file.as_raw_fd();
        let result = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn try_lock(_file: &File) -> io::Result<()> {
        Ok(())
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}
