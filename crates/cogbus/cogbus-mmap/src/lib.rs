//! Shared byte regions backing the ring buffer and the message pool.
//!
//! A region is either anonymous (private to the process, the default for a
//! single-process pipeline) or file-backed (visible to other processes,
//! used by the cross-process tests and by external inspection tooling).
//! Either way the consumer gets a fixed-length contiguous byte range whose
//! base pointer never moves for the lifetime of the region.

use memmap2::{Mmap, MmapMut};
use std::{
    fs::{File, OpenOptions},
    io,
    path::Path,
};

enum Backing {
    /// File handle kept alive to maintain the memory map validity.
    File(#[allow(dead_code)] File),
    Anon,
}

/// A writable shared region.
pub struct SharedRegionMut {
    backing: Backing,
    mmap: MmapMut,
}

/// A read-only view of an existing file-backed region.
pub struct SharedRegion {
    /// File handle kept alive to maintain the memory map validity.
    _file: File,
    mmap: Mmap,
}

impl SharedRegionMut {
    /// Maps an anonymous region of `size_bytes`, zero-initialized.
    pub fn anon(size_bytes: usize) -> io::Result<Self> {
        let mmap = MmapMut::map_anon(size_bytes)?;
        Ok(Self {
            backing: Backing::Anon,
            mmap,
        })
    }

    /// Creates (or truncates) a file of `size_bytes` and maps it read-write.
    pub fn create_rw<P: AsRef<Path>>(path: P, size_bytes: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size_bytes)?;

        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self {
            backing: Backing::File(file),
            mmap,
        })
    }

    /// Opens an existing file and maps it read-write.
    pub fn open_rw<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self {
            backing: Backing::File(file),
            mmap,
        })
    }

    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.mmap.as_mut_ptr()
    }

    /// Base pointer without requiring `&mut`; the ring and pool hand this
    /// to atomics living inside the region.
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.len() == 0
    }

    pub fn is_file_backed(&self) -> bool {
        matches!(self.backing, Backing::File(_))
    }
}

impl SharedRegion {
    /// Opens an existing file and maps it read-only.
    pub fn open_ro<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { _file: file, mmap })
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.mmap.as_ptr()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.mmap.len() == 0
    }
}
