//! Memory-mapped files shared between processes.
//!
//! Every shared structure in basalt lives in a regular file mapped read-write
//! into each attached process. [`MmapFileMut`] owns both the file and the
//! mapping and hands out a stable base pointer; [`lock`] provides the advisory
//! whole-file locks used for mutual exclusion and liveness tokens.

pub mod lock;

use memmap2::MmapMut;
use std::{
    fs::{File, OpenOptions},
    io,
    path::Path,
    ptr::NonNull,
};

pub struct MmapFileMut {
    file: File,
    mmap: MmapMut,
    base: NonNull<u8>,
}

// SAFETY: the mapping is shared memory by construction; every structure placed
// in it is accessed through atomics or under an external lock, so moving or
// sharing the handle between threads is no different from sharing it between
// processes.
unsafe impl Send for MmapFileMut {}
unsafe impl Sync for MmapFileMut {}

impl MmapFileMut {
    /// Create (or truncate) a file to `size_bytes` and map it read-write
    pub fn create_rw<P: AsRef<Path>>(path: P, size_bytes: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size_bytes)?;

        Self::map(file)
    }

    /// Create a new file to `size_bytes` and map it read-write, failing with
    /// `AlreadyExists` if the file is already present
    pub fn create_new_rw<P: AsRef<Path>>(path: P, size_bytes: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(path)?;
        file.set_len(size_bytes)?;

        Self::map(file)
    }

    /// Open an existing file and map it to read and write
    pub fn open_rw<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        Self::map(file)
    }

    /// Map an already opened read-write file over its current length.
    ///
    /// Used when the caller has to hold a lock on the file before deciding
    /// whether it still needs to be sized and initialized.
    pub fn from_file(file: File) -> io::Result<Self> {
        Self::map(file)
    }

    fn map(file: File) -> io::Result<Self> {
        if file.metadata()?.len() == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "cannot map an empty file",
            ));
        }

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let base = NonNull::new(mmap.as_mut_ptr())
            .ok_or_else(|| io::Error::other("mapping returned a null base address"))?;

        Ok(Self { file, mmap, base })
    }

    /// Return raw pointer to start of memory mapped file data.
    ///
    /// The pointer stays valid for the lifetime of `self`. Writes through it
    /// must go through atomics or be otherwise synchronized with the other
    /// processes mapping the same file.
    #[inline]
    pub fn base(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    /// The underlying file, e.g. to take a [`lock`] on it.
    #[inline]
    pub fn file(&self) -> &File {
        &self.file
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[test]
    fn two_mappings_of_one_file_share_memory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared");

        let a = MmapFileMut::create_rw(&path, 4096).unwrap();
        let b = MmapFileMut::open_rw(&path).unwrap();
        assert_eq!(a.len(), 4096);
        assert_eq!(b.len(), 4096);

        let wa = unsafe { &*(a.base() as *const AtomicU64) };
        let wb = unsafe { &*(b.base() as *const AtomicU64) };
        wa.store(0xdead_beef, Ordering::Release);
        assert_eq!(wb.load(Ordering::Acquire), 0xdead_beef);
    }

    #[test]
    fn create_new_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exclusive");

        let _first = MmapFileMut::create_new_rw(&path, 64).unwrap();
        let second = MmapFileMut::create_new_rw(&path, 64);
        assert_eq!(second.err().map(|e| e.kind()), Some(io::ErrorKind::AlreadyExists));
    }

    #[test]
    fn empty_file_cannot_be_mapped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty");
        File::create(&path).unwrap();

        assert!(MmapFileMut::open_rw(&path).is_err());
    }
}
