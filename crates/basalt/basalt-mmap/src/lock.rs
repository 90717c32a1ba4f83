//! Advisory whole-file locks (`flock(2)`).
//!
//! A lock belongs to the open file description, not to the process: two
//! descriptors obtained by separate `open` calls conflict even inside one
//! process, while threads sharing one descriptor do not. The kernel drops the
//! lock when the last descriptor closes, including on process death, which is
//! what makes these locks usable as liveness tokens.

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;

fn flock(file: &File, operation: libc::c_int) -> io::Result<()> {
    loop {
        // SAFETY: the descriptor is owned by `file` and stays open for the call.
        let ret = unsafe { libc::flock(file.as_raw_fd(), operation) };
        if ret == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

fn try_flock(file: &File, operation: libc::c_int) -> io::Result<bool> {
    match flock(file, operation | libc::LOCK_NB) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
        Err(e) => Err(e),
    }
}

/// Block until an exclusive lock on `file` is held.
pub fn lock_exclusive(file: &File) -> io::Result<()> {
    flock(file, libc::LOCK_EX)
}

/// Take an exclusive lock without blocking; `Ok(false)` if someone else holds one.
pub fn try_lock_exclusive(file: &File) -> io::Result<bool> {
    try_flock(file, libc::LOCK_EX)
}

/// Take a shared lock without blocking; `Ok(false)` if an exclusive lock is held.
pub fn try_lock_shared(file: &File) -> io::Result<bool> {
    try_flock(file, libc::LOCK_SH)
}

pub fn unlock(file: &File) -> io::Result<()> {
    flock(file, libc::LOCK_UN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;

    #[test]
    fn separate_descriptors_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock");
        let holder = OpenOptions::new().create(true).truncate(false).write(true).open(&path).unwrap();
        let probe = OpenOptions::new().read(true).open(&path).unwrap();

        lock_exclusive(&holder).unwrap();
        assert!(!try_lock_shared(&probe).unwrap());
        assert!(!try_lock_exclusive(&probe).unwrap());

        unlock(&holder).unwrap();
        assert!(try_lock_shared(&probe).unwrap());
    }

    #[test]
    fn lock_is_released_when_descriptor_closes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock");
        let holder = OpenOptions::new().create(true).truncate(false).write(true).open(&path).unwrap();
        lock_exclusive(&holder).unwrap();
        drop(holder);

        let probe = OpenOptions::new().read(true).open(&path).unwrap();
        assert!(try_lock_exclusive(&probe).unwrap());
    }
}
